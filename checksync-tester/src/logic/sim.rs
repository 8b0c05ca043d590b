//! Simulated coordination service and world used by every scenario.

use checksync_engine::{
    CategoryKey, ConfigError, EffectError, Fact, IngestionHandle, LedgerError, RemoteCheckId,
    RemoteError, RemoteFactSource, RemoteItem, WorldEffectSink,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use thiserror::Error;

/// Failure setting up or driving a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("engine rejected scenario configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("ledger storage failed: {0}")]
    Ledger(#[from] LedgerError),
    #[error("scratch directory {path} unavailable: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default)]
struct ServiceState {
    history: Vec<RemoteItem>,
    acknowledged: BTreeSet<RemoteCheckId>,
    received_checks: Vec<RemoteCheckId>,
    subscriber: Option<IngestionHandle>,
}

/// In-process coordination service.
///
/// Live grants go to the subscribed ingestion handle; sends can be made to
/// fail on demand to exercise the engine's retry paths.
#[derive(Debug)]
pub struct SimRemote {
    session: String,
    state: Mutex<ServiceState>,
    failing_sends: AtomicU32,
    terminal_reports: AtomicU32,
    disconnected: AtomicBool,
}

impl SimRemote {
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            state: Mutex::new(ServiceState::default()),
            failing_sends: AtomicU32::new(0),
            terminal_reports: AtomicU32::new(0),
            disconnected: AtomicBool::new(false),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ServiceState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Append an item to the session history and push it to the subscriber.
    pub fn grant(&self, name: &str) {
        let mut state = self.state();
        let item = RemoteItem::new(name, state.history.len() as u64);
        state.history.push(item.clone());
        if let Some(handle) = &state.subscriber {
            handle.enqueue(Fact::ItemReceived(item));
        }
    }

    /// Record `check` as completed by an earlier session.
    pub fn acknowledge(&self, check: &str) {
        self.state().acknowledged.insert(RemoteCheckId::new(check));
    }

    /// Fail the next `count` sends.
    pub fn fail_next_sends(&self, count: u32) {
        self.failing_sends.store(count, Ordering::SeqCst);
    }

    pub fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::SeqCst);
    }

    /// Checks the service accepted, in arrival order.
    pub fn received_checks(&self) -> Vec<String> {
        self.state()
            .received_checks
            .iter()
            .map(|check| check.as_str().to_string())
            .collect()
    }

    pub fn terminal_reports(&self) -> u32 {
        self.terminal_reports.load(Ordering::SeqCst)
    }

    fn try_send(&self) -> Result<(), RemoteError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(RemoteError::Disconnected);
        }
        let injected = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RemoteError::SendFailed("injected failure".to_string()));
        }
        Ok(())
    }
}

impl RemoteFactSource for SimRemote {
    fn subscribe(&self, handle: IngestionHandle) {
        self.state().subscriber = Some(handle);
    }

    fn all_received_facts(&self) -> Vec<RemoteItem> {
        self.state().history.clone()
    }

    fn is_acknowledged(&self, check: &RemoteCheckId) -> bool {
        self.state().acknowledged.contains(check)
    }

    fn send_completed_check(&self, check: &RemoteCheckId) -> Result<(), RemoteError> {
        self.try_send()?;
        let mut state = self.state();
        state.received_checks.push(check.clone());
        state.acknowledged.insert(check.clone());
        Ok(())
    }

    fn send_terminal_status(&self) -> Result<(), RemoteError> {
        self.try_send()?;
        self.terminal_reports.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn session_identity(&self) -> String {
        self.session.clone()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct WorldState {
    currency: Vec<i64>,
    unlocked: BTreeSet<String>,
    meters: BTreeMap<CategoryKey, i64>,
    spawned: Vec<String>,
}

/// Local world with a save slot.
///
/// `save` snapshots the live state; `revert` restores it the way reloading a
/// save after a teardown would.
#[derive(Debug, Default)]
pub struct SimWorld {
    live: WorldState,
    saved: WorldState,
    pub not_ready_left: u32,
    pub spawn_slots: u32,
    pub attempts: u32,
}

impl SimWorld {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&mut self) {
        self.saved = self.live.clone();
    }

    pub fn revert(&mut self) {
        self.live = self.saved.clone();
    }

    #[must_use]
    pub fn currency_grants(&self) -> &[i64] {
        &self.live.currency
    }

    #[must_use]
    pub fn is_unlocked(&self, key: &str) -> bool {
        self.live.unlocked.contains(key)
    }

    #[must_use]
    pub fn meter(&self, category: &CategoryKey) -> Option<i64> {
        self.live.meters.get(category).copied()
    }

    #[must_use]
    pub fn spawned(&self) -> usize {
        self.live.spawned.len()
    }

    fn ready(&mut self) -> Result<(), EffectError> {
        self.attempts += 1;
        if self.not_ready_left > 0 {
            self.not_ready_left -= 1;
            return Err(EffectError::NotReady);
        }
        Ok(())
    }
}

impl WorldEffectSink for SimWorld {
    fn grant_currency(&mut self, amount: i64) -> Result<(), EffectError> {
        self.ready()?;
        self.live.currency.push(amount);
        Ok(())
    }

    fn unlock_entity(&mut self, key: &str) -> Result<(), EffectError> {
        self.ready()?;
        self.live.unlocked.insert(key.to_string());
        Ok(())
    }

    fn set_meter(&mut self, category: &CategoryKey, value: i64) -> Result<(), EffectError> {
        self.ready()?;
        self.live.meters.insert(category.clone(), value);
        Ok(())
    }

    fn spawn_reward(&mut self, spec: &str) -> Result<(), EffectError> {
        self.ready()?;
        if self.spawn_slots == 0 {
            return Err(EffectError::Exhausted {
                resource: "spawn slot".to_string(),
            });
        }
        self.spawn_slots -= 1;
        self.live.spawned.push(spec.to_string());
        Ok(())
    }
}
