mod support;

use checksync_engine::{
    BridgeConfig, BridgeEngine, ClaimMap, DispatchMode, EmissionDecision, FileLedgerStorage,
    LedgerStorage, MemoryLedgerStorage, bundle_amount,
};
use std::sync::Arc;
use support::{SESSION, SaveableWorld, ScriptedRemote, engine, key, run};
use tempfile::TempDir;

#[test]
fn cap_of_seven_emits_exactly_seven_checks_in_order() {
    let (mut engine, remote) = engine(MemoryLedgerStorage::new());
    let trash = key("trash");
    let sends = (0..9)
        .filter(|_| {
            engine
                .notify_qualifying_event(&trash)
                .check_to_send()
                .is_some()
        })
        .count();
    assert_eq!(sends, 7);
    let expected: Vec<String> = (1..=7).map(|i| format!("Trash Pile {i}")).collect();
    assert_eq!(remote.sent(), expected);
}

#[test]
fn preacknowledged_checks_are_skipped_without_sending() {
    let (mut engine, remote) = engine(MemoryLedgerStorage::new());
    let trash = key("trash");
    remote.acknowledge("Trash Pile 1");
    remote.acknowledge("Trash Pile 2");
    assert!(matches!(
        engine.notify_qualifying_event(&trash),
        EmissionDecision::AlreadyAcknowledged { index: 1, .. }
    ));
    assert!(matches!(
        engine.notify_qualifying_event(&trash),
        EmissionDecision::AlreadyAcknowledged { index: 2, .. }
    ));
    assert!(remote.sent().is_empty());
    engine.notify_qualifying_event(&trash);
    assert_eq!(remote.sent(), vec!["Trash Pile 3".to_string()]);
}

#[test]
fn emission_stays_monotonic_across_teardown() {
    let (mut engine, remote) = engine(MemoryLedgerStorage::new());
    let trash = key("trash");
    engine.on_world_loaded();
    for _ in 0..3 {
        engine.notify_qualifying_event(&trash);
    }
    engine.on_world_torn_down();
    engine.on_world_loaded();
    for _ in 0..10 {
        engine.notify_qualifying_event(&trash);
    }

    let indices: Vec<u32> = remote
        .sent()
        .iter()
        .map(|check| check.trim_start_matches("Trash Pile ").parse().unwrap())
        .collect();
    assert_eq!(indices, (1..=7).collect::<Vec<_>>());
    assert!(indices.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn ledger_replay_materializes_the_missing_tail_at_historical_amounts() {
    let storage = MemoryLedgerStorage::new();
    storage
        .save_claims(SESSION, &ClaimMap::from([("cash".to_string(), 2)]))
        .unwrap();
    let (mut engine, remote) = engine(storage);
    for _ in 0..5 {
        remote.grant("Cash Bundle");
    }
    engine.on_world_loaded();
    run(&mut engine, 8);
    assert_eq!(engine.world().grants, vec![300, 400, 500]);
    assert_eq!(engine.claimed(&key("cash")), 5);
}

#[test]
fn world_not_ready_three_times_applies_exactly_once() {
    let (mut engine, remote) = engine(MemoryLedgerStorage::new());
    engine.world_mut().not_ready_left = 3;
    engine.on_world_loaded();
    remote.grant("Benzies Unlock");
    run(&mut engine, 20);
    assert_eq!(engine.world().unlocked, vec!["Benzies".to_string()]);
    assert_eq!(engine.world().attempts, 4);
}

#[test]
fn missing_ledger_file_regrants_the_full_history_once() {
    let temp = TempDir::new().unwrap();
    let storage = FileLedgerStorage::new(temp.path());
    std::fs::write(storage.path_for(SESSION), r#"{"bigcash": 6}"#).unwrap();
    storage.delete_claims(SESSION).unwrap();

    let expected: Vec<i64> = (0..6).map(|i| bundle_amount(i, 6, 1000, 6000)).collect();
    let history = |remote: &ScriptedRemote| {
        for _ in 0..6 {
            remote.grant("Big Cash Bundle");
        }
    };

    let (mut first, remote) = engine(storage.clone());
    history(&remote);
    first.on_world_loaded();
    run(&mut first, 10);
    assert_eq!(first.world().grants, expected);
    first.on_world_saved().unwrap();
    assert!(storage.path_for(SESSION).exists());
    drop(first);

    let (mut second, remote) = engine(storage.clone());
    history(&remote);
    second.on_world_loaded();
    run(&mut second, 10);
    assert!(second.world().grants.is_empty());
    assert_eq!(second.claimed(&key("bigcash")), 6);
    drop(second);

    std::fs::remove_file(storage.path_for(SESSION)).unwrap();
    let (mut third, remote) = engine(storage);
    history(&remote);
    third.on_world_loaded();
    run(&mut third, 10);
    assert_eq!(third.world().grants, expected);
}

#[test]
fn reconcile_twice_changes_nothing() {
    let (mut engine, remote) = engine(MemoryLedgerStorage::new());
    for name in ["Cash Bundle", "Cash Bundle", "Big Cash Bundle", "Benzies Unlock"] {
        remote.grant(name);
    }
    engine.on_world_loaded();
    run(&mut engine, 10);
    let before = engine.snapshot();
    let grants = engine.world().grants.clone();

    assert!(engine.reconcile().is_noop());
    assert!(engine.reconcile().is_noop());
    assert_eq!(engine.snapshot(), before);
    run(&mut engine, 10);
    assert_eq!(engine.world().grants, grants);
}

#[test]
fn materialized_rewards_never_exceed_received_across_reconnects() {
    let (mut engine, remote) = engine(MemoryLedgerStorage::new());
    let cash = key("cash");
    let mut received = 0_u32;
    engine.on_world_loaded();

    for cycle in 0..12_u32 {
        for _ in 0..=(cycle % 3) {
            remote.grant("Cash Bundle");
            received += 1;
        }
        for _ in 0..10 {
            engine.tick();
            let materialized = u32::try_from(engine.world().grants.len()).unwrap();
            assert!(materialized <= received, "cycle {cycle}: over-granted");
            assert_eq!(materialized, engine.claimed(&cash));
        }
        assert_eq!(engine.count(&cash), received);
        assert_eq!(engine.claimed(&cash), received, "cycle {cycle}: under-granted");

        if cycle % 2 == 0 {
            engine.on_world_saved().unwrap();
            engine.world_mut().save();
        }
        if cycle % 3 == 2 {
            engine.on_world_torn_down();
            engine.world_mut().revert();
            engine.on_world_loaded();
        }
    }
}

#[test]
fn worker_dispatch_delivers_every_check() {
    let config = BridgeConfig {
        dispatch: DispatchMode::Worker,
        ..support::config()
    };
    let remote = Arc::new(ScriptedRemote::default());
    let mut engine = BridgeEngine::new(
        config,
        Arc::clone(&remote),
        SaveableWorld::default(),
        MemoryLedgerStorage::new(),
    )
    .unwrap();
    for _ in 0..3 {
        engine.notify_qualifying_event(&key("trash"));
    }
    drop(engine);
    assert_eq!(
        remote.sent(),
        vec!["Trash Pile 1", "Trash Pile 2", "Trash Pile 3"]
    );
}
