//! Deferred actions executed by the tick loop after a delay or once ready.
//!
//! The register never interprets payloads. A payload reports an
//! [`ActionOutcome`] and the register decides whether it is dropped, retried
//! after its retry delay, or re-queued for the next tick.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Result reported by a deferred payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Done,
    /// A world object or subsystem is not available yet.
    NotReady,
    /// A finite shared resource (e.g. a reward slot) is currently exhausted.
    Exhausted,
    /// Permanent failure; the action is dropped.
    Failed(String),
}

type Payload<C> = Box<dyn FnMut(&mut C) -> ActionOutcome>;
type Readiness<C> = Box<dyn Fn(&C) -> bool>;

/// A scheduled unit of work owned by the register.
pub struct DeferredAction<C> {
    label: String,
    remaining_ticks: u32,
    delay_ticks: u32,
    retry_on_failure: bool,
    ready: Option<Readiness<C>>,
    payload: Payload<C>,
    attempts: u32,
}

impl<C> DeferredAction<C> {
    /// Build an action that becomes due after `delay_ticks` full ticks.
    pub fn new(
        label: impl Into<String>,
        delay_ticks: u32,
        retry_on_failure: bool,
        payload: impl FnMut(&mut C) -> ActionOutcome + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            remaining_ticks: delay_ticks,
            delay_ticks,
            retry_on_failure,
            ready: None,
            payload: Box::new(payload),
            attempts: 0,
        }
    }

    /// Wait `ticks` instead of the initial delay between retries.
    #[must_use]
    pub fn retry_after(mut self, ticks: u32) -> Self {
        self.delay_ticks = ticks;
        self
    }

    /// Additionally hold the action until `ready` returns true.
    #[must_use]
    pub fn when(mut self, ready: impl Fn(&C) -> bool + 'static) -> Self {
        self.ready = Some(Box::new(ready));
        self
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub const fn remaining_ticks(&self) -> u32 {
        self.remaining_ticks
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    fn is_ready(&self, ctx: &C) -> bool {
        self.ready.as_ref().is_none_or(|ready| ready(ctx))
    }
}

impl<C> fmt::Debug for DeferredAction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredAction")
            .field("label", &self.label)
            .field("remaining_ticks", &self.remaining_ticks)
            .field("delay_ticks", &self.delay_ticks)
            .field("retry_on_failure", &self.retry_on_failure)
            .field("gated", &self.ready.is_some())
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Per-tick accounting of the register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredRunReport {
    pub executed: u32,
    pub completed: u32,
    pub retried: u32,
    pub requeued: u32,
    pub dropped: u32,
}

impl DeferredRunReport {
    /// Add the counters of a later pass in the same tick.
    pub const fn absorb(&mut self, other: Self) {
        self.executed += other.executed;
        self.completed += other.completed;
        self.retried += other.retried;
        self.requeued += other.requeued;
        self.dropped += other.dropped;
    }
}

/// Ordered collection of pending deferred actions.
pub struct DeferredRegister<C> {
    actions: VecDeque<DeferredAction<C>>,
}

impl<C> DeferredRegister<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            actions: VecDeque::new(),
        }
    }

    /// Schedule a payload after `delay_ticks` ticks.
    pub fn schedule(
        &mut self,
        label: impl Into<String>,
        delay_ticks: u32,
        retry_on_failure: bool,
        payload: impl FnMut(&mut C) -> ActionOutcome + 'static,
    ) {
        self.push(DeferredAction::new(label, delay_ticks, retry_on_failure, payload));
    }

    /// Schedule a fully built action.
    pub fn push(&mut self, action: DeferredAction<C>) {
        self.actions.push_back(action);
    }

    /// Advance timers and execute due actions, at most `max_executions` of them.
    ///
    /// Due actions beyond the cap stay queued with a zero timer and run on a
    /// later tick. Re-queued and retried actions never run twice in one call.
    pub fn run_due(&mut self, ctx: &mut C, max_executions: usize) -> DeferredRunReport {
        let mut report = DeferredRunReport::default();
        let mut executed = 0_usize;
        let pending = std::mem::take(&mut self.actions);
        let mut survivors = VecDeque::with_capacity(pending.len());

        for mut action in pending {
            if action.remaining_ticks > 0 {
                action.remaining_ticks -= 1;
                survivors.push_back(action);
                continue;
            }
            if executed >= max_executions || !action.is_ready(ctx) {
                survivors.push_back(action);
                continue;
            }
            executed += 1;
            if let Some(action) = Self::execute(action, ctx, &mut report) {
                survivors.push_back(action);
            }
        }

        self.actions = survivors;
        report
    }

    /// Execute actions scheduled during the current tick that are already
    /// due, at most `max_executions` of them, and queue the rest.
    ///
    /// Timers of delayed actions are not advanced, so a delay still counts
    /// full ticks from the next [`run_due`](Self::run_due).
    pub fn run_fresh(
        &mut self,
        ctx: &mut C,
        actions: impl IntoIterator<Item = DeferredAction<C>>,
        max_executions: usize,
    ) -> DeferredRunReport {
        let mut report = DeferredRunReport::default();
        let mut executed = 0_usize;
        for action in actions {
            if action.remaining_ticks > 0 || executed >= max_executions || !action.is_ready(ctx) {
                self.actions.push_back(action);
                continue;
            }
            executed += 1;
            if let Some(action) = Self::execute(action, ctx, &mut report) {
                self.actions.push_back(action);
            }
        }
        report
    }

    /// Run one due action. Returns it when it must stay queued.
    fn execute(
        mut action: DeferredAction<C>,
        ctx: &mut C,
        report: &mut DeferredRunReport,
    ) -> Option<DeferredAction<C>> {
        report.executed += 1;
        action.attempts = action.attempts.saturating_add(1);
        match (action.payload)(ctx) {
            ActionOutcome::Done => {
                report.completed += 1;
                None
            }
            ActionOutcome::NotReady if action.retry_on_failure => {
                log::debug!(
                    "deferred '{}' not ready (attempt {}); retrying in {} ticks",
                    action.label,
                    action.attempts,
                    action.delay_ticks
                );
                action.remaining_ticks = action.delay_ticks;
                report.retried += 1;
                Some(action)
            }
            ActionOutcome::Exhausted if action.retry_on_failure => {
                log::debug!(
                    "deferred '{}' found no free resource; re-queued for next tick",
                    action.label
                );
                action.remaining_ticks = 0;
                report.requeued += 1;
                Some(action)
            }
            ActionOutcome::NotReady | ActionOutcome::Exhausted => {
                log::debug!("deferred '{}' not applied and not retried", action.label);
                report.dropped += 1;
                None
            }
            ActionOutcome::Failed(reason) => {
                log::warn!("deferred '{}' failed permanently: {reason}", action.label);
                report.dropped += 1;
                None
            }
        }
    }

    /// Discard every pending action without executing it.
    pub fn clear(&mut self) -> usize {
        let dropped = self.actions.len();
        self.actions.clear();
        dropped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Labels of pending actions in queue order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.label.clone()).collect()
    }
}

impl<C> Default for DeferredRegister<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for DeferredRegister<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredRegister")
            .field("actions", &self.actions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        applied: u32,
        failures_left: u32,
        ready: bool,
    }

    #[test]
    fn delay_counts_full_ticks() {
        let mut register = DeferredRegister::<Counter>::new();
        let mut ctx = Counter::default();
        register.schedule("grant", 2, false, |c: &mut Counter| {
            c.applied += 1;
            ActionOutcome::Done
        });
        register.run_due(&mut ctx, 8);
        register.run_due(&mut ctx, 8);
        assert_eq!(ctx.applied, 0);
        let report = register.run_due(&mut ctx, 8);
        assert_eq!(ctx.applied, 1);
        assert_eq!(report.completed, 1);
        assert!(register.is_empty());
    }

    #[test]
    fn not_ready_retries_with_same_delay_and_applies_once() {
        let mut register = DeferredRegister::<Counter>::new();
        let mut ctx = Counter {
            failures_left: 3,
            ..Counter::default()
        };
        register.schedule("unlock", 1, true, |c: &mut Counter| {
            if c.failures_left > 0 {
                c.failures_left -= 1;
                return ActionOutcome::NotReady;
            }
            c.applied += 1;
            ActionOutcome::Done
        });

        let mut attempts = 0;
        for _ in 0..20 {
            attempts += register.run_due(&mut ctx, 8).executed;
        }
        assert_eq!(ctx.applied, 1);
        assert_eq!(attempts, 4);
        assert!(register.is_empty());
    }

    #[test]
    fn retry_delay_can_differ_from_initial_delay() {
        let mut register = DeferredRegister::<Counter>::new();
        let mut ctx = Counter {
            failures_left: 1,
            ..Counter::default()
        };
        register.push(
            DeferredAction::new("meter", 0, true, |c: &mut Counter| {
                if c.failures_left > 0 {
                    c.failures_left -= 1;
                    return ActionOutcome::NotReady;
                }
                c.applied += 1;
                ActionOutcome::Done
            })
            .retry_after(2),
        );
        assert_eq!(register.run_due(&mut ctx, 8).retried, 1);
        register.run_due(&mut ctx, 8);
        register.run_due(&mut ctx, 8);
        assert_eq!(ctx.applied, 0);
        assert_eq!(register.run_due(&mut ctx, 8).completed, 1);
        assert_eq!(ctx.applied, 1);
    }

    #[test]
    fn exhausted_requeues_for_the_next_tick_only() {
        let mut register = DeferredRegister::<Counter>::new();
        let mut ctx = Counter {
            failures_left: 1,
            ..Counter::default()
        };
        register.schedule("spawn", 5, true, |c: &mut Counter| {
            if c.failures_left > 0 {
                c.failures_left -= 1;
                return ActionOutcome::Exhausted;
            }
            c.applied += 1;
            ActionOutcome::Done
        });
        for _ in 0..5 {
            register.run_due(&mut ctx, 8);
        }
        let report = register.run_due(&mut ctx, 8);
        assert_eq!(report.requeued, 1);
        assert_eq!(register.labels(), vec!["spawn".to_string()]);
        let report = register.run_due(&mut ctx, 8);
        assert_eq!(report.completed, 1);
        assert_eq!(ctx.applied, 1);
    }

    #[test]
    fn failures_without_retry_are_dropped() {
        let mut register = DeferredRegister::<Counter>::new();
        let mut ctx = Counter::default();
        register.schedule("once", 0, false, |_: &mut Counter| ActionOutcome::NotReady);
        register.schedule("broken", 0, true, |_: &mut Counter| {
            ActionOutcome::Failed("no such entity".to_string())
        });
        let report = register.run_due(&mut ctx, 8);
        assert_eq!(report.dropped, 2);
        assert!(register.is_empty());
    }

    #[test]
    fn executions_per_tick_are_capped() {
        let mut register = DeferredRegister::<Counter>::new();
        let mut ctx = Counter::default();
        for i in 0..5 {
            register.schedule(format!("grant-{i}"), 0, false, |c: &mut Counter| {
                c.applied += 1;
                ActionOutcome::Done
            });
        }
        assert_eq!(register.run_due(&mut ctx, 2).executed, 2);
        assert_eq!(ctx.applied, 2);
        assert_eq!(register.run_due(&mut ctx, 2).executed, 2);
        assert_eq!(register.run_due(&mut ctx, 2).executed, 1);
        assert_eq!(ctx.applied, 5);
    }

    #[test]
    fn readiness_predicate_holds_action_back() {
        let mut register = DeferredRegister::<Counter>::new();
        let mut ctx = Counter::default();
        register.push(
            DeferredAction::new("reconcile", 0, false, |c: &mut Counter| {
                c.applied += 1;
                ActionOutcome::Done
            })
            .when(|c: &Counter| c.ready),
        );
        for _ in 0..3 {
            assert_eq!(register.run_due(&mut ctx, 8).executed, 0);
        }
        ctx.ready = true;
        assert_eq!(register.run_due(&mut ctx, 8).completed, 1);
        assert_eq!(ctx.applied, 1);
    }

    #[test]
    fn fresh_actions_run_now_within_the_remaining_cap() {
        let mut register = DeferredRegister::<Counter>::new();
        let mut ctx = Counter::default();
        let fresh = (0..3).map(|i| {
            DeferredAction::new(format!("apply-{i}"), 0, true, |c: &mut Counter| {
                c.applied += 1;
                ActionOutcome::Done
            })
        });
        let report = register.run_fresh(&mut ctx, fresh, 2);
        assert_eq!(report.completed, 2);
        assert_eq!(ctx.applied, 2);
        assert_eq!(register.labels(), vec!["apply-2".to_string()]);
        assert_eq!(register.run_due(&mut ctx, 8).completed, 1);
        assert_eq!(ctx.applied, 3);
    }

    #[test]
    fn fresh_pass_leaves_delayed_and_unready_actions_queued() {
        let mut register = DeferredRegister::<Counter>::new();
        let mut ctx = Counter {
            failures_left: 1,
            ..Counter::default()
        };
        let delayed = DeferredAction::new("reconcile", 2, false, |c: &mut Counter| {
            c.applied += 1;
            ActionOutcome::Done
        });
        let gated = DeferredAction::new("gated", 0, false, |c: &mut Counter| {
            c.applied += 1;
            ActionOutcome::Done
        })
        .when(|c: &Counter| c.ready);
        let flaky = DeferredAction::new("flaky", 0, true, |c: &mut Counter| {
            if c.failures_left > 0 {
                c.failures_left -= 1;
                return ActionOutcome::NotReady;
            }
            c.applied += 1;
            ActionOutcome::Done
        })
        .retry_after(1);

        let report = register.run_fresh(&mut ctx, [delayed, gated, flaky], 8);
        assert_eq!(report.executed, 1);
        assert_eq!(report.retried, 1);
        assert_eq!(ctx.applied, 0);
        let remaining: Vec<u32> = register.actions.iter().map(DeferredAction::remaining_ticks).collect();
        assert_eq!(remaining, vec![2, 0, 1]);
    }

    #[test]
    fn reports_of_two_passes_add_up() {
        let mut first = DeferredRunReport {
            executed: 2,
            completed: 1,
            retried: 1,
            ..DeferredRunReport::default()
        };
        first.absorb(DeferredRunReport {
            executed: 1,
            dropped: 1,
            ..DeferredRunReport::default()
        });
        assert_eq!(first.executed, 3);
        assert_eq!(first.completed, 1);
        assert_eq!(first.dropped, 1);
    }

    #[test]
    fn clear_discards_without_running() {
        let mut register = DeferredRegister::<Counter>::new();
        let mut ctx = Counter::default();
        register.schedule("grant", 0, true, |c: &mut Counter| {
            c.applied += 1;
            ActionOutcome::Done
        });
        assert_eq!(register.clear(), 1);
        register.run_due(&mut ctx, 8);
        assert_eq!(ctx.applied, 0);
    }
}
