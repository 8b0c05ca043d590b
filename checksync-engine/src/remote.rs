//! Coordination-service collaborator and outbound dispatch.
//!
//! Outbound sends never run on the tick loop's terms: they are submitted to a
//! [`Dispatch`] and their outcome comes back through the ingestion queue as a
//! [`Fact`].

use crossbeam::channel::{Sender, unbounded};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

use crate::fact::{Fact, RemoteCheckId, RemoteItem};
use crate::queue::IngestionHandle;

/// Failure talking to the coordination service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("not connected to the coordination service")]
    Disconnected,
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Local handle of the remote coordination service.
///
/// Query methods read the session's cached view and must be cheap. Send
/// methods may block on I/O and are only ever called from a [`Dispatch`].
pub trait RemoteFactSource: Send + Sync {
    /// Register the producer handle that live item facts are pushed to.
    fn subscribe(&self, handle: IngestionHandle);

    /// Full received-items history in service order.
    fn all_received_facts(&self) -> Vec<RemoteItem>;

    /// Whether the service already recorded `check` as completed.
    fn is_acknowledged(&self, check: &RemoteCheckId) -> bool;

    /// Report a completed check.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` when the send does not reach the service.
    fn send_completed_check(&self, check: &RemoteCheckId) -> Result<(), RemoteError>;

    /// Report that the player reached the goal.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` when the send does not reach the service.
    fn send_terminal_status(&self) -> Result<(), RemoteError>;

    /// Identity of the remote session (the "seed"), used to scope the claim ledger.
    fn session_identity(&self) -> String;
}

/// Outbound request produced by the tick loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundRequest {
    CompletedCheck(RemoteCheckId),
    /// `attempt` is echoed back in [`Fact::GoalSent`].
    TerminalStatus { attempt: u32 },
}

/// Fire-and-forget submission of outbound requests.
pub trait Dispatch {
    fn submit(&self, request: OutboundRequest);
}

/// How the engine dispatches outbound requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Send synchronously and enqueue the outcome for the next drain.
    ///
    /// The remote call runs on the tick thread and blocks it, so this mode is
    /// meant for tests and simulation. Hosts should keep the worker default.
    Inline,
    /// Send from a dedicated background thread.
    #[default]
    Worker,
}

fn perform<R>(remote: &R, request: OutboundRequest) -> Fact
where
    R: RemoteFactSource + ?Sized,
{
    match request {
        OutboundRequest::CompletedCheck(check) => {
            let outcome = remote.send_completed_check(&check);
            if let Err(err) = &outcome {
                log::warn!("sending check '{check}' failed: {err}");
            }
            Fact::CheckSent { check, outcome }
        }
        OutboundRequest::TerminalStatus { attempt } => {
            let outcome = remote.send_terminal_status();
            if let Err(err) = &outcome {
                log::warn!("sending goal status failed: {err}");
            }
            Fact::GoalSent { attempt, outcome }
        }
    }
}

/// Dispatch that performs the send on the caller's thread.
///
/// Used by [`DispatchMode::Inline`]; a slow service stalls the tick loop.
pub struct InlineDispatch<R: ?Sized> {
    remote: Arc<R>,
    results: IngestionHandle,
}

impl<R: RemoteFactSource + ?Sized> InlineDispatch<R> {
    #[must_use]
    pub const fn new(remote: Arc<R>, results: IngestionHandle) -> Self {
        Self { remote, results }
    }
}

impl<R: RemoteFactSource + ?Sized> Dispatch for InlineDispatch<R> {
    fn submit(&self, request: OutboundRequest) {
        let fact = perform(self.remote.as_ref(), request);
        self.results.enqueue(fact);
    }
}

/// Dispatch backed by a background thread draining an unbounded channel.
///
/// Dropping the dispatcher closes the channel and joins the worker after it
/// has sent everything already submitted.
pub struct WorkerDispatch {
    tx: Option<Sender<OutboundRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl WorkerDispatch {
    /// Spawn the outbound worker.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the operating system refuses to spawn the thread.
    pub fn spawn<R>(remote: Arc<R>, results: IngestionHandle) -> std::io::Result<Self>
    where
        R: RemoteFactSource + ?Sized + 'static,
    {
        let (tx, rx) = unbounded::<OutboundRequest>();
        let worker = thread::Builder::new()
            .name("checksync-outbound".to_string())
            .spawn(move || {
                for request in rx {
                    results.enqueue(perform(remote.as_ref(), request));
                }
                log::debug!("outbound worker drained and stopped");
            })?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }
}

impl Dispatch for WorkerDispatch {
    fn submit(&self, request: OutboundRequest) {
        if let Some(tx) = &self.tx
            && tx.send(request).is_err()
        {
            log::warn!("outbound worker stopped; request dropped");
        }
    }
}

impl Drop for WorkerDispatch {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            log::error!("outbound worker panicked");
        }
    }
}

/// Build the dispatcher for `mode`, falling back to inline dispatch if no thread can be spawned.
pub fn build_dispatch<R>(
    mode: DispatchMode,
    remote: Arc<R>,
    results: IngestionHandle,
) -> Box<dyn Dispatch>
where
    R: RemoteFactSource + ?Sized + 'static,
{
    match mode {
        DispatchMode::Inline => Box::new(InlineDispatch::new(remote, results)),
        DispatchMode::Worker => match WorkerDispatch::spawn(Arc::clone(&remote), results.clone()) {
            Ok(worker) => Box::new(worker),
            Err(err) => {
                log::warn!("could not spawn outbound worker ({err}); sending inline");
                Box::new(InlineDispatch::new(remote, results))
            }
        },
    }
}
