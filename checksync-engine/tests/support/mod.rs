#![allow(dead_code)]

use checksync_engine::{
    BridgeConfig, BridgeEngine, CategoryKey, EffectError, Fact, IngestionHandle, LedgerStorage,
    RemoteCheckId, RemoteError, RemoteFactSource, RemoteItem, WorldEffectSink,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

pub const SESSION: &str = "seed-7431";

pub const CONFIG: &str = r#"{
    "settle_delay_ticks": 3,
    "retry_delay_ticks": 1,
    "dispatch": "inline",
    "categories": [
        {
            "key": "cash",
            "matcher": {"exact": "Cash Bundle"},
            "policy": "cumulative",
            "effect": {"kind": "currency", "reward": {"min": 100, "max": 500, "total": 5}},
            "poll_interval_ticks": 4
        },
        {
            "key": "bigcash",
            "matcher": {"exact": "Big Cash Bundle"},
            "policy": "cumulative",
            "effect": {"kind": "currency", "reward": {"min": 1000, "max": 6000, "total": 6}},
            "poll_interval_ticks": 4
        },
        {"key": "suppliers", "matcher": {"suffix": " Unlock"}},
        {
            "key": "trash",
            "matcher": {"exact": "Trash Token"},
            "emission": {"cap": 7, "check_template": "Trash Pile {index}"}
        }
    ]
}"#;

/// Coordination service stand-in with a mutable history and acknowledgement set.
#[derive(Default)]
pub struct ScriptedRemote {
    history: Mutex<Vec<RemoteItem>>,
    acked: Mutex<BTreeSet<RemoteCheckId>>,
    sent: Mutex<Vec<RemoteCheckId>>,
    handle: Mutex<Option<IngestionHandle>>,
}

impl ScriptedRemote {
    pub fn grant(&self, name: &str) {
        let item = {
            let mut history = self.history.lock().unwrap();
            let item = RemoteItem::new(name, history.len() as u64);
            history.push(item.clone());
            item
        };
        if let Some(handle) = self.handle.lock().unwrap().as_ref() {
            handle.enqueue(Fact::ItemReceived(item));
        }
    }

    pub fn acknowledge(&self, check: &str) {
        self.acked.lock().unwrap().insert(RemoteCheckId::new(check));
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|check| check.as_str().to_string())
            .collect()
    }
}

impl RemoteFactSource for ScriptedRemote {
    fn subscribe(&self, handle: IngestionHandle) {
        *self.handle.lock().unwrap() = Some(handle);
    }

    fn all_received_facts(&self) -> Vec<RemoteItem> {
        self.history.lock().unwrap().clone()
    }

    fn is_acknowledged(&self, check: &RemoteCheckId) -> bool {
        self.acked.lock().unwrap().contains(check)
    }

    fn send_completed_check(&self, check: &RemoteCheckId) -> Result<(), RemoteError> {
        self.sent.lock().unwrap().push(check.clone());
        self.acked.lock().unwrap().insert(check.clone());
        Ok(())
    }

    fn send_terminal_status(&self) -> Result<(), RemoteError> {
        Ok(())
    }

    fn session_identity(&self) -> String {
        SESSION.to_string()
    }
}

/// World that keeps a saved copy of its grants and reverts to it on teardown.
#[derive(Debug, Default)]
pub struct SaveableWorld {
    pub grants: Vec<i64>,
    saved_grants: Vec<i64>,
    pub unlocked: Vec<String>,
    pub not_ready_left: u32,
    pub attempts: u32,
}

impl SaveableWorld {
    pub fn save(&mut self) {
        self.saved_grants = self.grants.clone();
    }

    pub fn revert(&mut self) {
        self.grants = self.saved_grants.clone();
    }

    /// Currency grants in the live world whose amount lies in `range`.
    pub fn granted_in(&self, range: std::ops::RangeInclusive<i64>) -> Vec<i64> {
        self.grants
            .iter()
            .copied()
            .filter(|amount| range.contains(amount))
            .collect()
    }
}

impl WorldEffectSink for SaveableWorld {
    fn grant_currency(&mut self, amount: i64) -> Result<(), EffectError> {
        self.attempts += 1;
        if self.not_ready_left > 0 {
            self.not_ready_left -= 1;
            return Err(EffectError::NotReady);
        }
        self.grants.push(amount);
        Ok(())
    }

    fn unlock_entity(&mut self, key: &str) -> Result<(), EffectError> {
        self.attempts += 1;
        if self.not_ready_left > 0 {
            self.not_ready_left -= 1;
            return Err(EffectError::NotReady);
        }
        self.unlocked.push(key.to_string());
        Ok(())
    }

    fn set_meter(&mut self, _category: &CategoryKey, _value: i64) -> Result<(), EffectError> {
        Ok(())
    }

    fn spawn_reward(&mut self, spec: &str) -> Result<(), EffectError> {
        Err(EffectError::Rejected(format!("unknown spawn spec {spec}")))
    }
}

pub fn config() -> BridgeConfig {
    let (config, issues) = BridgeConfig::from_json(CONFIG).unwrap();
    assert!(issues.is_empty(), "{issues:?}");
    config
}

pub fn engine<S: LedgerStorage + 'static>(
    storage: S,
) -> (BridgeEngine<ScriptedRemote, SaveableWorld, S>, Arc<ScriptedRemote>) {
    let remote = Arc::new(ScriptedRemote::default());
    let engine = BridgeEngine::new(config(), Arc::clone(&remote), SaveableWorld::default(), storage)
        .unwrap();
    (engine, remote)
}

pub fn run<S: LedgerStorage + 'static>(
    engine: &mut BridgeEngine<ScriptedRemote, SaveableWorld, S>,
    ticks: u32,
) {
    for _ in 0..ticks {
        engine.tick();
    }
}

pub fn key(value: &str) -> CategoryKey {
    CategoryKey::new(value)
}
