//! The bridge engine: owner of the tick loop and every piece of progress state.
//!
//! [`BridgeEngine`] is driven by the host. Producers on any thread push facts
//! through an [`IngestionHandle`]; the host calls [`BridgeEngine::tick`] once
//! per simulation frame and the lifecycle hooks when the world is loaded,
//! saved or torn down. All world mutation happens inside `tick`, on the
//! caller's thread.

mod lifecycle;
mod reconcile;
mod routing;


use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::sync::Arc;

use crate::config::{Activation, ApplyPolicy, BridgeConfig};
use crate::deferred::{DeferredAction, DeferredRegister, DeferredRunReport};
use crate::emission::{EmissionCounter, EmissionDecision, EmissionGate};
use crate::fact::{CategoryKey, RemoteCheckId};
use crate::goal::{GoalState, GoalTracker};
use crate::ledger::{ClaimLedger, ClaimLedgerEntry, LedgerStorage};
use crate::matcher::CategoryResolver;
use crate::queue::{IngestionHandle, IngestionQueue};
use crate::remote::{Dispatch, OutboundRequest, RemoteFactSource};
use crate::scheduler::{PollTarget, TickScheduler};
use crate::tracker::{CategoryTracker, TrackerRegistry};
use crate::world::WorldEffectSink;

pub use reconcile::ReconcileReport;

/// Summary of one [`BridgeEngine::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub deferred: DeferredRunReport,
    pub facts_drained: u32,
    /// Items seen for the first time this session.
    pub items_recorded: u32,
    /// Items whose sequence index was already known.
    pub duplicates: u32,
    pub unrouted: u32,
    pub polls: u32,
    pub materializations_scheduled: u32,
    pub failed_sends: SmallVec<[RemoteCheckId; 4]>,
    /// Attempt id of a goal report dispatched this tick.
    pub goal_attempt: Option<u32>,
}

/// Serializable view of the engine for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub tick: u64,
    pub session: String,
    pub world_loaded: bool,
    pub synced: bool,
    pub trackers: Vec<CategoryTracker>,
    pub emission: Vec<EmissionCounter>,
    pub claims: Vec<ClaimLedgerEntry>,
    pub goal: Option<GoalState>,
    pub pending_actions: Vec<String>,
    pub queued_facts: usize,
    pub unrouted: u32,
}

/// State mutated by deferred payloads. Kept apart from the register so a
/// running payload can borrow it mutably.
pub(crate) struct EngineCore<R: ?Sized, W, S> {
    config: BridgeConfig,
    resolver: CategoryResolver,
    registry: TrackerRegistry,
    gate: EmissionGate,
    ledger: ClaimLedger,
    goal: Option<GoalTracker>,
    world: W,
    storage: S,
    remote: Arc<R>,
    dispatch: Box<dyn Dispatch>,
    world_loaded: bool,
    /// Set once the first reconcile after a world load has run.
    synced: bool,
    follow_ups: Vec<DeferredAction<Self>>,
}

impl<R, W, S> EngineCore<R, W, S>
where
    R: RemoteFactSource + ?Sized + 'static,
    W: WorldEffectSink + 'static,
    S: LedgerStorage + 'static,
{
    const fn is_world_loaded(&self) -> bool {
        self.world_loaded
    }

    fn policy(&self, category: &CategoryKey) -> Option<ApplyPolicy> {
        self.config.category(category).map(|c| c.policy)
    }

    fn is_active(&self, activation: &Activation) -> bool {
        match activation {
            Activation::Always => true,
            Activation::RequiresItem { category } => self.registry.get_count(category) > 0,
            Activation::UntilItem { category } => self.registry.get_count(category) == 0,
            Activation::Companion {
                category,
                when_neither,
            } => self.registry.get_count(category) > 0 || *when_neither,
        }
    }

    fn send_check(&self, check: &RemoteCheckId) {
        log::info!("emitting check '{check}'");
        self.dispatch
            .submit(OutboundRequest::CompletedCheck(check.clone()));
    }

    fn poll_goal(&mut self) -> Option<u32> {
        let goal = self.goal.as_mut()?;
        let attempt = goal.poll(&self.registry)?;
        log::info!("reporting goal (attempt {attempt})");
        self.dispatch
            .submit(OutboundRequest::TerminalStatus { attempt });
        Some(attempt)
    }
}

/// Reconciliation engine for one connected session.
pub struct BridgeEngine<R: ?Sized, W, S> {
    deferred: DeferredRegister<EngineCore<R, W, S>>,
    core: EngineCore<R, W, S>,
    queue: IngestionQueue,
    scheduler: TickScheduler,
}

impl<R, W, S> BridgeEngine<R, W, S>
where
    R: RemoteFactSource + ?Sized + 'static,
    W: WorldEffectSink + 'static,
    S: LedgerStorage + 'static,
{
    /// Run one simulation frame: due deferred actions, then a bounded batch of
    /// facts, then every poller whose interval elapsed.
    ///
    /// Work scheduled during the frame with no delay runs before it returns,
    /// within what is left of the per-tick action budget, so an immediate-apply
    /// item takes effect the tick it is drained.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport {
            tick: self.scheduler.begin_tick(),
            ..TickReport::default()
        };
        let budget = self.scheduler.budget();

        report.deferred = self
            .deferred
            .run_due(&mut self.core, budget.max_actions_per_tick);

        for fact in self.queue.drain_up_to(budget.fact_batch_size) {
            report.facts_drained += 1;
            self.core.route(fact, &mut report);
        }

        for target in self.scheduler.due_polls() {
            report.polls += 1;
            match target {
                PollTarget::Category(category) => {
                    report.materializations_scheduled += self.core.poll_category(&category);
                }
                PollTarget::Goal => {
                    if let Some(attempt) = self.core.poll_goal() {
                        report.goal_attempt = Some(attempt);
                    }
                }
            }
        }

        let remaining = budget
            .max_actions_per_tick
            .saturating_sub(report.deferred.executed as usize);
        let fresh = std::mem::take(&mut self.core.follow_ups);
        report
            .deferred
            .absorb(self.deferred.run_fresh(&mut self.core, fresh, remaining));
        self.adopt_follow_ups();
        report
    }

    /// A qualifying world event for `category` happened (e.g. a trash pile was cleared).
    pub fn notify_qualifying_event(&mut self, category: &CategoryKey) -> EmissionDecision {
        let core = &mut self.core;
        let Some(config) = core.config.category(category) else {
            return EmissionDecision::NotConfigured;
        };
        let Some(emission) = config.emission.as_ref() else {
            return EmissionDecision::NotConfigured;
        };
        let active = core.is_active(&emission.activation);
        let remote = Arc::clone(&core.remote);
        let decision = core.gate.on_qualifying_event(
            category,
            active,
            |index| config.indexed_check(index),
            |check| remote.is_acknowledged(check),
        );
        match &decision {
            EmissionDecision::Send { check, .. } => core.send_check(check),
            EmissionDecision::AlreadyAcknowledged { index, check } => {
                log::debug!("check '{check}' (#{index}) already acknowledged; skipping send");
            }
            _ => {}
        }
        decision
    }

    /// A discrete world event completed `key` in `category` (e.g. an NPC was recruited).
    pub fn notify_discrete_event(&mut self, category: &CategoryKey, key: &str) -> EmissionDecision {
        let core = &mut self.core;
        let Some(check) = core
            .config
            .category(category)
            .and_then(|config| config.discrete_check_for(key))
        else {
            return EmissionDecision::NotConfigured;
        };
        if !core.registry.mark_completed(category, key) {
            return EmissionDecision::AlreadyCompleted {
                key: key.to_string(),
            };
        }
        core.release_gated(category);
        self.adopt_follow_ups();

        if self.core.remote.is_acknowledged(&check) {
            log::debug!("discrete check '{check}' already acknowledged");
            EmissionDecision::AlreadyAcknowledged { index: 0, check }
        } else {
            self.core.send_check(&check);
            EmissionDecision::Send { index: 0, check }
        }
    }

    /// Whether the host may run its default behavior for `category`.
    ///
    /// Categories configured with `veto_default` block it until at least one
    /// unit has been applied to the world.
    #[must_use]
    pub fn should_allow_default_behavior(&self, category: &CategoryKey) -> bool {
        match self.core.config.category(category) {
            Some(config) if config.veto_default => self
                .core
                .registry
                .tracker(category)
                .is_some_and(|tracker| tracker.applied() > 0),
            _ => true,
        }
    }

    /// Units received for `category` this session.
    #[must_use]
    pub fn count(&self, category: &CategoryKey) -> u32 {
        self.core.registry.get_count(category)
    }

    #[must_use]
    pub fn is_completed(&self, category: &CategoryKey, key: &str) -> bool {
        self.core.registry.is_completed(category, key)
    }

    /// Rewards of `category` materialized according to the claim ledger.
    #[must_use]
    pub fn claimed(&self, category: &CategoryKey) -> u32 {
        self.core.ledger.claimed(category.as_str())
    }

    #[must_use]
    pub fn goal_state(&self) -> Option<GoalState> {
        self.core.goal.as_ref().map(GoalTracker::state)
    }

    #[must_use]
    pub fn tracker(&self, category: &CategoryKey) -> Option<&CategoryTracker> {
        self.core.registry.tracker(category)
    }

    #[must_use]
    pub fn emission_counter(&self, category: &CategoryKey) -> Option<&EmissionCounter> {
        self.core.gate.counter(category)
    }

    /// A producer handle for facts delivered outside the remote subscription.
    #[must_use]
    pub fn ingestion_handle(&self) -> IngestionHandle {
        self.queue.handle()
    }

    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.core.config
    }

    #[must_use]
    pub const fn world(&self) -> &W {
        &self.core.world
    }

    pub const fn world_mut(&mut self) -> &mut W {
        &mut self.core.world
    }

    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.core.storage
    }

    #[must_use]
    pub const fn is_world_loaded(&self) -> bool {
        self.core.world_loaded
    }

    #[must_use]
    pub fn pending_actions(&self) -> usize {
        self.deferred.len()
    }

    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            tick: self.scheduler.tick(),
            session: self.core.ledger.identity().to_string(),
            world_loaded: self.core.world_loaded,
            synced: self.core.synced,
            trackers: self.core.registry.trackers().cloned().collect(),
            emission: self.core.gate.counters().cloned().collect(),
            claims: self.core.ledger.entries(),
            goal: self.goal_state(),
            pending_actions: self.deferred.labels(),
            queued_facts: self.queue.len(),
            unrouted: self.core.registry.unrouted(),
        }
    }

    fn adopt_follow_ups(&mut self) {
        for action in self.core.follow_ups.drain(..) {
            self.deferred.push(action);
        }
    }
}
