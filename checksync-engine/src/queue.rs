//! Unbounded multi-producer ingestion queue feeding the tick loop.
//!
//! Producers hold an [`IngestionHandle`] and may enqueue from any thread
//! without blocking. Only the tick loop owns the [`IngestionQueue`] and drains
//! it.

use crossbeam::channel::{Receiver, Sender, unbounded};

use crate::fact::Fact;

/// Cloneable producer side of the ingestion queue.
#[derive(Debug, Clone)]
pub struct IngestionHandle {
    tx: Sender<Fact>,
}

impl IngestionHandle {
    /// Enqueue a fact. Never blocks; facts sent after the queue is dropped are discarded.
    pub fn enqueue(&self, fact: Fact) {
        if self.tx.send(fact).is_err() {
            log::debug!("ingestion queue closed; dropping late fact");
        }
    }
}

/// Consumer side of the ingestion queue, owned by the tick loop.
#[derive(Debug)]
pub struct IngestionQueue {
    tx: Sender<Fact>,
    rx: Receiver<Fact>,
}

impl IngestionQueue {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// A new producer handle.
    #[must_use]
    pub fn handle(&self) -> IngestionHandle {
        IngestionHandle {
            tx: self.tx.clone(),
        }
    }

    /// Enqueue from the tick loop itself.
    pub fn enqueue(&self, fact: Fact) {
        // The queue owns a receiver, so the channel cannot be disconnected here.
        let _ = self.tx.send(fact);
    }

    /// Take at most `max` facts in arrival order.
    #[must_use]
    pub fn drain_up_to(&self, max: usize) -> Vec<Fact> {
        self.rx.try_iter().take(max).collect()
    }

    /// Discard everything currently queued, returning how many facts were dropped.
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for IngestionQueue {
    fn default() -> Self {
        Self::new()
    }
}
