//! Terminal goal state machine: `Pending -> Satisfied -> Reported`.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{GoalCondition, GoalConfig};
use crate::remote::RemoteError;
use crate::tracker::TrackerRegistry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalState {
    #[default]
    Pending,
    Satisfied,
    /// Terminal once the send is confirmed.
    Reported,
}

impl fmt::Display for GoalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Satisfied => write!(f, "satisfied"),
            Self::Reported => write!(f, "reported"),
        }
    }
}

impl GoalCondition {
    /// Whether the condition holds against the current trackers.
    #[must_use]
    pub fn holds(&self, registry: &TrackerRegistry) -> bool {
        match self {
            Self::Count { category, at_least } => registry.get_count(category) >= *at_least,
            Self::Completed { category, key } => registry.is_completed(category, key),
        }
    }
}

/// Goal progress of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalTracker {
    config: GoalConfig,
    state: GoalState,
    /// Identifier of the latest terminal status send.
    attempt: u32,
    awaiting: bool,
    confirmed: bool,
}

impl GoalTracker {
    #[must_use]
    pub const fn new(config: GoalConfig) -> Self {
        Self {
            config,
            state: GoalState::Pending,
            attempt: 0,
            awaiting: false,
            confirmed: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> GoalState {
        self.state
    }

    #[must_use]
    pub const fn poll_interval_ticks(&self) -> u32 {
        self.config.poll_interval_ticks
    }

    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    #[must_use]
    pub fn conditions_hold(&self, registry: &TrackerRegistry) -> bool {
        self.config
            .conditions
            .iter()
            .all(|condition| condition.holds(registry))
    }

    /// Advance the machine. Returns the attempt id when the terminal status must be sent now.
    pub fn poll(&mut self, registry: &TrackerRegistry) -> Option<u32> {
        if self.state == GoalState::Pending && self.conditions_hold(registry) {
            log::info!("goal conditions satisfied");
            self.state = GoalState::Satisfied;
        }
        if self.state != GoalState::Satisfied {
            return None;
        }
        self.state = GoalState::Reported;
        self.attempt = self.attempt.saturating_add(1);
        self.awaiting = true;
        Some(self.attempt)
    }

    /// Apply the outcome of send `attempt`. Stale or unexpected outcomes are ignored.
    pub fn on_send_outcome(&mut self, attempt: u32, outcome: &Result<(), RemoteError>) {
        if !self.awaiting || attempt != self.attempt {
            log::debug!("ignoring stale goal outcome for attempt {attempt}");
            return;
        }
        self.awaiting = false;
        match outcome {
            Ok(()) => {
                self.confirmed = true;
                log::info!("goal reported to the coordination service");
            }
            Err(err) => {
                log::warn!("goal report failed ({err}); will retry on next poll");
                self.state = GoalState::Satisfied;
            }
        }
    }

    /// Forget the in-flight send; an unconfirmed report is retried later.
    pub fn abandon_in_flight(&mut self) {
        if self.awaiting {
            self.awaiting = false;
            self.state = GoalState::Satisfied;
        }
    }
}
