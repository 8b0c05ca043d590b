mod support;

use std::hash::Hasher;

use checksync_engine::{BridgeConfig, EngineSnapshot, MemoryLedgerStorage, TickReport};
use serde_json::{Map, Value};
use support::{engine, key, run};
use twox_hash::XxHash64;

#[test]
fn config_snapshot_survives_reserialization() {
    let config = support::config();
    let first = canonicalize_value(serde_json::to_value(&config).unwrap());
    let canonical = serde_json::to_string_pretty(&first).unwrap();

    let (reparsed, issues) = BridgeConfig::from_json(&canonical).unwrap();
    assert!(issues.is_empty(), "{issues:?}");
    assert_eq!(reparsed, config);
    let second = canonicalize_value(serde_json::to_value(&reparsed).unwrap());
    let recanonical = serde_json::to_string_pretty(&second).unwrap();

    assert_eq!(
        snapshot_hash(canonical.as_bytes()),
        snapshot_hash(recanonical.as_bytes()),
        "config snapshot changed on round-trip\n{canonical}\n{recanonical}"
    );
}

#[test]
fn engine_snapshot_serialization_preserves_progress() {
    let (mut engine, remote) = engine(MemoryLedgerStorage::new());
    for name in ["Cash Bundle", "Cash Bundle", "Benzies Unlock"] {
        remote.grant(name);
    }
    engine.on_world_loaded();
    engine.notify_qualifying_event(&key("trash"));
    run(&mut engine, 6);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.claims.len(), 1);
    assert!(snapshot.synced);

    let saved = serde_json::to_string(&snapshot).unwrap();
    let restored: EngineSnapshot = serde_json::from_str(&saved).unwrap();
    assert_eq!(restored, snapshot, "round-trip mismatch");
    assert_eq!(
        canonicalize_value(serde_json::to_value(&restored).unwrap()),
        canonicalize_value(serde_json::to_value(&snapshot).unwrap())
    );
}

#[test]
fn tick_report_serializes_every_counter() {
    let (mut engine, remote) = engine(MemoryLedgerStorage::new());
    engine.on_world_loaded();
    remote.grant("Mystery Crate");
    let report = engine.tick();
    let value = serde_json::to_value(&report).unwrap();
    let Value::Object(fields) = value else {
        panic!("tick report should serialize as an object");
    };
    for field in ["tick", "facts_drained", "unrouted", "failed_sends", "goal_attempt"] {
        assert!(fields.contains_key(field), "missing {field}");
    }
    let restored: TickReport = serde_json::from_value(Value::Object(fields)).unwrap();
    assert_eq!(restored, report);
    assert_eq!(restored.unrouted, 1);
}

fn canonicalize_value(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize_value).collect()),
        Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut result = Map::with_capacity(entries.len());
            for (key, value) in entries {
                result.insert(key, canonicalize_value(value));
            }
            Value::Object(result)
        }
        other => other,
    }
}

fn snapshot_hash(bytes: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(bytes);
    hasher.finish()
}
