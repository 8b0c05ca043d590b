//! Capped, monotonic emission of outbound "check completed" signals.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::fact::{CategoryKey, RemoteCheckId};

/// Emission progress of one category. `next_index` starts at 1 and only grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionCounter {
    pub category: CategoryKey,
    /// `None` means unbounded.
    pub cap: Option<u32>,
    pub next_index: u32,
}

impl EmissionCounter {
    #[must_use]
    pub const fn new(category: CategoryKey, cap: Option<u32>) -> Self {
        Self {
            category,
            cap,
            next_index: 1,
        }
    }

    /// Whether every check up to the cap has been emitted or skipped.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.cap.is_some_and(|cap| self.next_index > cap)
    }

    /// Checks still available before the cap.
    #[must_use]
    pub fn remaining(&self) -> Option<u32> {
        self.cap
            .map(|cap| cap.saturating_add(1).saturating_sub(self.next_index))
    }
}

/// What the gate decided for one qualifying world event.
///
/// Discrete checks have no position in a sequence and report `index` 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum EmissionDecision {
    /// The category has no emission configured.
    NotConfigured,
    /// The category's activity precondition does not hold.
    Inactive,
    /// All checks up to the cap were already emitted.
    CapReached,
    /// The service already has this check; the counter advanced without a send.
    AlreadyAcknowledged { index: u32, check: RemoteCheckId },
    /// The discrete key was completed earlier in this session.
    AlreadyCompleted { key: String },
    /// A new check must be sent.
    Send { index: u32, check: RemoteCheckId },
}

impl EmissionDecision {
    /// The check to send, if any.
    #[must_use]
    pub const fn check_to_send(&self) -> Option<&RemoteCheckId> {
        match self {
            Self::Send { check, .. } => Some(check),
            _ => None,
        }
    }
}

/// Emission counters of every configured category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionGate {
    counters: BTreeMap<CategoryKey, EmissionCounter>,
}

impl EmissionGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, category: CategoryKey, cap: Option<u32>) {
        self.counters
            .insert(category.clone(), EmissionCounter::new(category, cap));
    }

    #[must_use]
    pub fn counter(&self, category: &CategoryKey) -> Option<&EmissionCounter> {
        self.counters.get(category)
    }

    pub fn counters(&self) -> impl Iterator<Item = &EmissionCounter> {
        self.counters.values()
    }

    #[must_use]
    pub fn is_exhausted(&self, category: &CategoryKey) -> bool {
        self.counters
            .get(category)
            .is_some_and(EmissionCounter::is_exhausted)
    }

    /// Decide what a qualifying event for `category` produces and advance the counter.
    ///
    /// `check_for` maps a 1-based index to its deterministic check identifier
    /// and `is_acknowledged` reads the service's acknowledged set. The counter
    /// advances at most once per call and never past the cap.
    pub fn on_qualifying_event(
        &mut self,
        category: &CategoryKey,
        active: bool,
        check_for: impl Fn(u32) -> Option<RemoteCheckId>,
        is_acknowledged: impl Fn(&RemoteCheckId) -> bool,
    ) -> EmissionDecision {
        let Some(counter) = self.counters.get_mut(category) else {
            return EmissionDecision::NotConfigured;
        };
        if !active {
            return EmissionDecision::Inactive;
        }
        if counter.is_exhausted() {
            return EmissionDecision::CapReached;
        }
        let index = counter.next_index;
        let Some(check) = check_for(index) else {
            return EmissionDecision::NotConfigured;
        };
        counter.next_index = counter.next_index.saturating_add(1);
        if is_acknowledged(&check) {
            EmissionDecision::AlreadyAcknowledged { index, check }
        } else {
            EmissionDecision::Send { index, check }
        }
    }

    /// Rewind every counter to index 1; acknowledged checks are skipped again on replay.
    pub fn reset(&mut self) {
        for counter in self.counters.values_mut() {
            counter.next_index = 1;
        }
    }
}
