use anyhow::{Result, ensure};
use checksync_engine::{
    BridgeConfig, BridgeEngine, CategoryKey, ClaimMap, FileLedgerStorage, GoalState,
    LedgerStorage, MemoryLedgerStorage, RemoteFactSource, bundle_amount,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use super::sim::{SimError, SimRemote, SimWorld};

type SimEngine<S> = BridgeEngine<SimRemote, SimWorld, S>;

/// A named end-to-end check of the engine against the simulated service.
#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    run: fn(u64) -> Result<()>,
}

impl Scenario {
    /// Run the scenario once for `seed`.
    ///
    /// # Errors
    ///
    /// Returns the first violated expectation.
    pub fn run(&self, seed: u64) -> Result<()> {
        (self.run)(seed)
    }
}

pub fn catalog() -> Vec<Scenario> {
    vec![
        Scenario {
            key: "cap-emission",
            name: "Capped Check Emission",
            description: "Qualifying events emit indexed checks up to the cap, monotonic across teardown",
            run: cap_emission,
        },
        Scenario {
            key: "ledger-replay",
            name: "Ledger Replay",
            description: "Reconnect grants only the unclaimed tail at historical amounts",
            run: ledger_replay,
        },
        Scenario {
            key: "not-ready-retry",
            name: "Not-Ready Retry",
            description: "Effects refused by an unready world are retried and applied once",
            run: not_ready_retry,
        },
        Scenario {
            key: "ledger-loss",
            name: "Ledger Loss",
            description: "A deleted ledger file re-grants the full history exactly once",
            run: ledger_loss,
        },
        Scenario {
            key: "preacknowledged",
            name: "Pre-Acknowledged Checks",
            description: "Checks completed by an earlier session are never re-sent",
            run: preacknowledged,
        },
        Scenario {
            key: "goal-report",
            name: "Goal Report",
            description: "Terminal status is reported once and retried after send failures",
            run: goal_report,
        },
        Scenario {
            key: "reconnect-soak",
            name: "Reconnect Soak",
            description: "Concurrent grants with save/teardown cycles never over- or under-grant",
            run: reconnect_soak,
        },
    ]
}

pub fn find_scenario(key: &str) -> Option<Scenario> {
    catalog().into_iter().find(|scenario| scenario.key == key)
}

pub fn list_scenarios() -> Vec<(&'static str, &'static str)> {
    catalog()
        .iter()
        .map(|scenario| (scenario.key, scenario.description))
        .collect()
}

const BASE_CONFIG: &str = r#"{
    "settle_delay_ticks": 2,
    "retry_delay_ticks": 1,
    "dispatch": "inline",
    "categories": [
        {
            "key": "cash",
            "matcher": {"exact": "Cash Bundle"},
            "policy": "cumulative",
            "effect": {"kind": "currency", "reward": {"min": 100, "max": 500, "total": 5}},
            "poll_interval_ticks": 3
        },
        {
            "key": "bigcash",
            "matcher": {"exact": "Big Cash Bundle"},
            "policy": "cumulative",
            "effect": {"kind": "currency", "reward": {"min": 1000, "max": 6000, "total": 6}},
            "poll_interval_ticks": 3
        },
        {"key": "suppliers", "matcher": {"suffix": " Unlock"}},
        {
            "key": "dealers",
            "matcher": {"prefix": "Dealer: "},
            "policy": "gated",
            "discrete_check": "Recruit {key}",
            "discrete_keys": ["Benzies", "Wu"],
            "poll_interval_ticks": 3
        },
        {
            "key": "trash",
            "matcher": {"exact": "Trash Token"},
            "emission": {"cap": 7, "check_template": "Trash Pile {index}"}
        }
    ],
    "goal": {
        "conditions": [{"kind": "count", "category": "cash", "at_least": 5}],
        "poll_interval_ticks": 2
    }
}"#;

const CAP: u32 = 7;

fn key(value: &str) -> CategoryKey {
    CategoryKey::new(value)
}

fn session(seed: u64) -> String {
    format!("sim-{seed:016x}")
}

fn start<S: LedgerStorage + 'static>(
    remote: &Arc<SimRemote>,
    world: SimWorld,
    storage: S,
) -> Result<SimEngine<S>, SimError> {
    let (config, issues) = BridgeConfig::from_json(BASE_CONFIG)?;
    for issue in issues {
        log::warn!("scenario config: {issue}");
    }
    Ok(BridgeEngine::new(config, Arc::clone(remote), world, storage)?)
}

fn run_ticks<S: LedgerStorage + 'static>(engine: &mut SimEngine<S>, ticks: u32) {
    for _ in 0..ticks {
        engine.tick();
    }
}

fn emitted_indices(remote: &SimRemote) -> Vec<u32> {
    remote
        .received_checks()
        .iter()
        .filter_map(|check| check.strip_prefix("Trash Pile "))
        .filter_map(|index| index.parse().ok())
        .collect()
}

fn cap_emission(seed: u64) -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let remote = Arc::new(SimRemote::new(session(seed)));
    let mut engine = start(&remote, SimWorld::new(), MemoryLedgerStorage::new())?;
    let trash = key("trash");
    engine.on_world_loaded();

    let before_teardown = rng.gen_range(0..=CAP + 2);
    let after_teardown = rng.gen_range(0..=CAP + 4);
    for _ in 0..before_teardown {
        engine.notify_qualifying_event(&trash);
    }
    engine.on_world_torn_down();
    engine.on_world_loaded();
    for _ in 0..after_teardown {
        engine.notify_qualifying_event(&trash);
    }

    let indices = emitted_indices(&remote);
    let expected = (before_teardown.min(CAP)).max(after_teardown.min(CAP));
    ensure!(
        indices == (1..=expected).collect::<Vec<_>>(),
        "expected checks 1..={expected}, service received {indices:?}"
    );
    ensure!(
        engine
            .emission_counter(&trash)
            .is_some_and(|counter| counter.is_exhausted() == (after_teardown >= CAP)),
        "emission counter disagrees with cap state after {after_teardown} events"
    );
    Ok(())
}

fn ledger_replay(seed: u64) -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let already_claimed = rng.gen_range(0..=5_u32);
    let identity = session(seed);
    let storage = MemoryLedgerStorage::new();
    storage
        .save_claims(&identity, &ClaimMap::from([("cash".to_string(), already_claimed)]))
        .map_err(SimError::from)?;

    let remote = Arc::new(SimRemote::new(identity));
    for _ in 0..5 {
        remote.grant("Cash Bundle");
    }
    let mut engine = start(&remote, SimWorld::new(), storage)?;
    engine.on_world_loaded();
    run_ticks(&mut engine, 10);

    let expected: Vec<i64> = (already_claimed..5)
        .map(|index| bundle_amount(index, 5, 100, 500))
        .collect();
    ensure!(
        engine.world().currency_grants() == expected.as_slice(),
        "with {already_claimed} claimed expected {expected:?}, world got {:?}",
        engine.world().currency_grants()
    );
    ensure!(engine.claimed(&key("cash")) == 5, "ledger should end fully claimed");
    Ok(())
}

fn not_ready_retry(seed: u64) -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let refusals = rng.gen_range(1..=5_u32);
    let remote = Arc::new(SimRemote::new(session(seed)));
    let mut world = SimWorld::new();
    world.not_ready_left = refusals;
    let mut engine = start(&remote, world, MemoryLedgerStorage::new())?;
    engine.on_world_loaded();
    remote.grant("Benzies Unlock");
    run_ticks(&mut engine, 4 * refusals + 10);

    ensure!(engine.world().is_unlocked("Benzies"), "unlock never applied");
    ensure!(
        engine.world().attempts == refusals + 1,
        "expected {} attempts, saw {}",
        refusals + 1,
        engine.world().attempts
    );
    let tracker = engine.tracker(&key("suppliers"));
    ensure!(
        tracker.is_some_and(|tracker| tracker.applied() == 1 && tracker.in_flight() == 0),
        "supplier unit should be applied exactly once"
    );
    Ok(())
}

struct ScratchDir(PathBuf);

impl ScratchDir {
    fn create(seed: u64) -> Result<Self, SimError> {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("checksync-tester-{seed}-{nanos}"));
        std::fs::create_dir_all(&path).map_err(|source| SimError::Scratch {
            path: path.clone(),
            source,
        })?;
        Ok(Self(path))
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn ledger_loss(seed: u64) -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let bundles = rng.gen_range(1..=6_u32);
    let scratch = ScratchDir::create(seed)?;
    let storage = FileLedgerStorage::new(&scratch.0);
    let identity = session(seed);
    let expected: Vec<i64> = (0..bundles)
        .map(|index| bundle_amount(index, 6, 1000, 6000))
        .collect();

    let connect = |storage: FileLedgerStorage| -> Result<Vec<i64>> {
        let remote = Arc::new(SimRemote::new(identity.clone()));
        for _ in 0..bundles {
            remote.grant("Big Cash Bundle");
        }
        let mut engine = start(&remote, SimWorld::new(), storage)?;
        engine.on_world_loaded();
        run_ticks(&mut engine, 12);
        engine.on_world_saved()?;
        Ok(engine.world().currency_grants().to_vec())
    };

    let first = connect(storage.clone())?;
    ensure!(first == expected, "first session granted {first:?}, expected {expected:?}");
    let second = connect(storage.clone())?;
    ensure!(second.is_empty(), "intact ledger still re-granted {second:?}");

    storage.delete_claims(&identity).map_err(SimError::from)?;
    let third = connect(storage)?;
    ensure!(
        third == expected,
        "after ledger loss granted {third:?}, expected one full re-grant {expected:?}"
    );
    Ok(())
}

fn preacknowledged(seed: u64) -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let acknowledged = rng.gen_range(0..=CAP);
    let remote = Arc::new(SimRemote::new(session(seed)));
    for index in 1..=acknowledged {
        remote.acknowledge(&format!("Trash Pile {index}"));
    }
    remote.acknowledge("Recruit Benzies");
    remote.grant("Dealer: Benzies");

    let mut engine = start(&remote, SimWorld::new(), MemoryLedgerStorage::new())?;
    engine.on_world_loaded();
    run_ticks(&mut engine, 8);
    for _ in 0..CAP {
        engine.notify_qualifying_event(&key("trash"));
    }

    let indices = emitted_indices(&remote);
    ensure!(
        indices == (acknowledged + 1..=CAP).collect::<Vec<_>>(),
        "with {acknowledged} acknowledged the service received {indices:?}"
    );
    let dealers = key("dealers");
    ensure!(
        engine.is_completed(&dealers, "Benzies"),
        "acknowledged recruit not marked completed"
    );
    ensure!(engine.world().is_unlocked("Benzies"), "gated dealer never released");
    ensure!(
        !remote.received_checks().iter().any(|check| check == "Recruit Benzies"),
        "acknowledged recruit was re-sent"
    );
    Ok(())
}

fn goal_report(seed: u64) -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let failures = rng.gen_range(0..=3_u32);
    let remote = Arc::new(SimRemote::new(session(seed)));
    remote.fail_next_sends(failures);
    let mut engine = start(&remote, SimWorld::new(), MemoryLedgerStorage::new())?;
    engine.on_world_loaded();
    for _ in 0..4 {
        remote.grant("Cash Bundle");
    }
    run_ticks(&mut engine, 10);
    ensure!(
        engine.goal_state() == Some(GoalState::Pending),
        "goal moved before its condition held"
    );

    remote.grant("Cash Bundle");
    run_ticks(&mut engine, 8 * (failures + 2));
    ensure!(
        engine.goal_state() == Some(GoalState::Reported),
        "goal ended in {:?}",
        engine.goal_state()
    );
    ensure!(
        remote.terminal_reports() == 1,
        "terminal status accepted {} times",
        remote.terminal_reports()
    );
    Ok(())
}

fn reconnect_soak(seed: u64) -> Result<()> {
    const GRANTS: u32 = 60;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let remote = Arc::new(SimRemote::new(session(seed)));
    let mut engine = start(&remote, SimWorld::new(), MemoryLedgerStorage::new())?;
    engine.on_world_loaded();

    let producer = {
        let remote = Arc::clone(&remote);
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));
        thread::spawn(move || {
            for _ in 0..GRANTS {
                let name = match rng.gen_range(0..4) {
                    0 => "Big Cash Bundle",
                    1 => "Sewer Unlock",
                    _ => "Cash Bundle",
                };
                remote.grant(name);
                thread::yield_now();
            }
        })
    };

    let cash = key("cash");
    for frame in 0..400_u32 {
        engine.tick();
        if rng.gen_bool(0.1) {
            engine.notify_qualifying_event(&key("trash"));
        }
        let granted = u32::try_from(engine.world().currency_grants().len())?;
        let claimed = engine.claimed(&cash) + engine.claimed(&key("bigcash"));
        ensure!(
            granted == claimed,
            "frame {frame}: world holds {granted} grants but ledger claims {claimed}"
        );
        if frame % 37 == 36 {
            engine.on_world_saved()?;
            engine.world_mut().save();
        }
        if frame % 53 == 52 {
            engine.on_world_torn_down();
            engine.world_mut().revert();
            engine.on_world_loaded();
        }
    }
    if producer.join().is_err() {
        anyhow::bail!("grant producer panicked");
    }

    let received = u32::try_from(remote.all_received_facts().len())?;
    run_ticks(&mut engine, 20);
    let materialized = engine.claimed(&cash) + engine.claimed(&key("bigcash"));
    let counted = engine.count(&cash) + engine.count(&key("bigcash"));
    let unlocks = engine.count(&key("suppliers"));
    ensure!(
        counted + unlocks == received,
        "engine counted {} of {received} received items",
        counted + unlocks
    );
    ensure!(
        materialized == counted,
        "materialized {materialized} of {counted} fungible rewards"
    );
    ensure!(
        unlocks == 0 || engine.world().is_unlocked("Sewer"),
        "supplier unlock lost across reconnects"
    );
    let indices = emitted_indices(&remote);
    ensure!(
        indices.windows(2).all(|pair| pair[0] < pair[1]) && indices.len() <= CAP as usize,
        "emission not monotonic: {indices:?}"
    );
    Ok(())
}
