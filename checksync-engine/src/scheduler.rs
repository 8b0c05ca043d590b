//! Logical time for the tick loop: the frame counter, per-tick work bounds and
//! the interval schedule of periodic pollers.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::BridgeConfig;
use crate::fact::CategoryKey;

/// Something polled on a fixed tick interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollTarget {
    Category(CategoryKey),
    Goal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSchedule {
    pub interval_ticks: u32,
    pub remaining_ticks: u32,
}

/// Per-tick work limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickBudget {
    pub fact_batch_size: usize,
    pub max_actions_per_tick: usize,
}

impl From<&BridgeConfig> for TickBudget {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            fact_batch_size: config.fact_batch_size.max(1),
            max_actions_per_tick: config.max_actions_per_tick.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickScheduler {
    tick: u64,
    budget: TickBudget,
    polls: BTreeMap<PollTarget, PollSchedule>,
}

impl TickScheduler {
    #[must_use]
    pub const fn new(budget: TickBudget) -> Self {
        Self {
            tick: 0,
            budget,
            polls: BTreeMap::new(),
        }
    }

    /// Number of ticks started so far.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    #[must_use]
    pub const fn budget(&self) -> TickBudget {
        self.budget
    }

    /// Poll `target` every `interval_ticks` ticks (at least 1).
    pub fn register(&mut self, target: PollTarget, interval_ticks: u32) {
        let interval_ticks = interval_ticks.max(1);
        self.polls.insert(
            target,
            PollSchedule {
                interval_ticks,
                remaining_ticks: interval_ticks,
            },
        );
    }

    #[must_use]
    pub fn schedule(&self, target: &PollTarget) -> Option<PollSchedule> {
        self.polls.get(target).copied()
    }

    /// Start a new tick and return its number.
    pub const fn begin_tick(&mut self) -> u64 {
        self.tick = self.tick.saturating_add(1);
        self.tick
    }

    /// Count down every poller and return those whose interval elapsed, in key order.
    pub fn due_polls(&mut self) -> Vec<PollTarget> {
        let mut due = Vec::new();
        for (target, schedule) in &mut self.polls {
            schedule.remaining_ticks = schedule.remaining_ticks.saturating_sub(1);
            if schedule.remaining_ticks == 0 {
                schedule.remaining_ticks = schedule.interval_ticks;
                due.push(target.clone());
            }
        }
        due
    }

    /// Restart every poller's interval from now.
    pub fn restart_polls(&mut self) {
        for schedule in self.polls.values_mut() {
            schedule.remaining_ticks = schedule.interval_ticks;
        }
    }
}
