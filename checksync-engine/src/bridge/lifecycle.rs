use anyhow::Context;
use std::sync::Arc;

use crate::config::{ApplyPolicy, BridgeConfig, ConfigError};
use crate::deferred::{ActionOutcome, DeferredAction, DeferredRegister};
use crate::emission::EmissionGate;
use crate::fact::Fact;
use crate::goal::GoalTracker;
use crate::ledger::{ClaimLedger, LedgerStorage};
use crate::matcher::CategoryResolver;
use crate::queue::{IngestionHandle, IngestionQueue};
use crate::remote::{Dispatch, RemoteFactSource, build_dispatch};
use crate::scheduler::{PollTarget, TickBudget, TickScheduler};
use crate::tracker::TrackerRegistry;
use crate::world::WorldEffectSink;

use super::{BridgeEngine, EngineCore};

impl<R, W, S> BridgeEngine<R, W, S>
where
    R: RemoteFactSource + ?Sized + 'static,
    W: WorldEffectSink + 'static,
    S: LedgerStorage + 'static,
{
    /// Start a connected session using the dispatcher selected by `config.dispatch`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if an item matcher cannot be compiled.
    pub fn new(config: BridgeConfig, remote: Arc<R>, world: W, storage: S) -> Result<Self, ConfigError> {
        let queue = IngestionQueue::new();
        let dispatch = build_dispatch(config.dispatch, Arc::clone(&remote), queue.handle());
        Self::assemble(config, remote, world, storage, dispatch, queue)
    }

    /// Start a connected session with a caller-provided dispatcher.
    ///
    /// The dispatcher must report outcomes through the engine's
    /// [`ingestion_handle`](Self::ingestion_handle); `make_dispatch` receives it.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if an item matcher cannot be compiled.
    pub fn with_dispatch(
        config: BridgeConfig,
        remote: Arc<R>,
        world: W,
        storage: S,
        make_dispatch: impl FnOnce(Arc<R>, IngestionHandle) -> Box<dyn Dispatch>,
    ) -> Result<Self, ConfigError> {
        let queue = IngestionQueue::new();
        let dispatch = make_dispatch(Arc::clone(&remote), queue.handle());
        Self::assemble(config, remote, world, storage, dispatch, queue)
    }

    fn assemble(
        mut config: BridgeConfig,
        remote: Arc<R>,
        world: W,
        storage: S,
        dispatch: Box<dyn Dispatch>,
        queue: IngestionQueue,
    ) -> Result<Self, ConfigError> {
        for issue in config.sanitize() {
            log::warn!("configuration: {issue}");
        }
        let matchers: Vec<_> = config
            .categories
            .iter()
            .map(|category| (category.key.clone(), category.matcher()))
            .collect();
        let resolver = CategoryResolver::build(matchers.iter().map(|(key, matcher)| (key, matcher)))?;

        let mut gate = EmissionGate::new();
        let mut scheduler = TickScheduler::new(TickBudget::from(&config));
        for category in &config.categories {
            if category.emission.is_some() {
                gate.register(category.key.clone(), category.emission_cap());
            }
            if matches!(category.policy, ApplyPolicy::Cumulative | ApplyPolicy::Gated) {
                scheduler.register(
                    PollTarget::Category(category.key.clone()),
                    category.poll_interval_ticks,
                );
            }
        }
        let goal = config.goal.clone().map(GoalTracker::new);
        if let Some(goal) = &goal {
            scheduler.register(PollTarget::Goal, goal.poll_interval_ticks());
        }

        let identity = remote.session_identity();
        let ledger = ClaimLedger::load(&storage, identity.as_str());
        log::info!(
            "session '{identity}' started with {} categories ({} claims on record)",
            config.categories.len(),
            ledger.entries().len()
        );
        remote.subscribe(queue.handle());

        Ok(Self {
            deferred: DeferredRegister::new(),
            core: EngineCore {
                config,
                resolver,
                registry: TrackerRegistry::new(),
                gate,
                ledger,
                goal,
                world,
                storage,
                remote,
                dispatch,
                world_loaded: false,
                synced: false,
                follow_ups: Vec::new(),
            },
            queue,
            scheduler,
        })
    }

    /// The world finished loading: replay the full item history and schedule a
    /// reconcile once the settle delay has passed.
    pub fn on_world_loaded(&mut self) {
        self.core.world_loaded = true;
        let history = self.core.remote.all_received_facts();
        log::info!("world loaded; replaying {} received items", history.len());
        for item in history {
            self.queue.enqueue(Fact::ItemReceived(item));
        }
        self.deferred.push(
            DeferredAction::new(
                "reconcile",
                self.core.config.settle_delay_ticks,
                false,
                |core: &mut EngineCore<R, W, S>| {
                    core.reconcile();
                    ActionOutcome::Done
                },
            )
            .when(EngineCore::is_world_loaded),
        );
    }

    /// The world was saved: persist the claim ledger.
    ///
    /// # Errors
    ///
    /// Returns the storage error when the ledger cannot be written; the
    /// in-memory claims stay authoritative until the next successful save.
    pub fn on_world_saved(&mut self) -> anyhow::Result<()>
    where
        S::Error: Into<anyhow::Error>,
    {
        let core = &mut self.core;
        if !core.ledger.is_dirty() {
            return Ok(());
        }
        core.ledger
            .flush(&core.storage)
            .map_err(Into::<anyhow::Error>::into)
            .with_context(|| format!("saving claim ledger for '{}'", core.ledger.identity()))?;
        log::info!("claim ledger saved for '{}'", core.ledger.identity());
        Ok(())
    }

    /// The world was torn down: drop pending work and in-memory progress and
    /// fall back to the last saved ledger.
    pub fn on_world_torn_down(&mut self) {
        let dropped_actions = self.deferred.clear();
        let dropped_facts = self.queue.clear();
        let core = &mut self.core;
        core.follow_ups.clear();
        core.registry.reset();
        core.gate.reset();
        core.ledger.reload(&core.storage);
        if let Some(goal) = core.goal.as_mut() {
            goal.abandon_in_flight();
        }
        core.world_loaded = false;
        core.synced = false;
        self.scheduler.restart_polls();
        log::info!(
            "world torn down; discarded {dropped_actions} pending actions and {dropped_facts} queued facts"
        );
    }

    /// Identity of the connected session.
    #[must_use]
    pub fn session_identity(&self) -> &str {
        self.core.ledger.identity()
    }
}
