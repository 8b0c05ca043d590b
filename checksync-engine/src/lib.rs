//! Checksync Engine
//!
//! Reconciliation engine between a remote multiworld progression service and a
//! single-threaded, tick-driven local world. Facts arrive from any thread,
//! world effects are applied exactly once from the tick loop, outbound checks
//! are emitted at most once per qualifying event, and fungible rewards are
//! counted in a persisted claim ledger so reconnects never re-grant them.
//! This crate has no host-specific dependencies; hosts plug in through the
//! [`RemoteFactSource`], [`WorldEffectSink`] and [`LedgerStorage`] traits.

pub mod bridge;
pub mod config;
pub mod constants;
pub mod deferred;
pub mod emission;
pub mod fact;
pub mod goal;
pub mod ledger;
pub mod matcher;
pub mod numbers;
pub mod queue;
pub mod remote;
pub mod reward;
pub mod scheduler;
pub mod tracker;
pub mod world;

// Re-export commonly used types
pub use bridge::{BridgeEngine, EngineSnapshot, ReconcileReport, TickReport};
pub use config::{
    Activation, ApplyPolicy, BridgeConfig, CategoryConfig, ConfigError, ConfigIssue, EffectSpec,
    EmissionConfig, GoalCondition, GoalConfig,
};
pub use deferred::{ActionOutcome, DeferredAction, DeferredRegister, DeferredRunReport};
pub use emission::{EmissionCounter, EmissionDecision, EmissionGate};
pub use fact::{CategoryKey, Fact, RemoteCheckId, RemoteItem};
pub use goal::{GoalState, GoalTracker};
pub use ledger::{
    ClaimLedger, ClaimLedgerEntry, ClaimMap, FileLedgerStorage, LedgerError, LedgerStorage,
    MemoryLedgerStorage, ledger_file_name,
};
pub use matcher::{CategoryResolver, ItemMatcher, Resolved};
pub use queue::{IngestionHandle, IngestionQueue};
pub use remote::{
    Dispatch, DispatchMode, InlineDispatch, OutboundRequest, RemoteError, RemoteFactSource,
    WorkerDispatch, build_dispatch,
};
pub use reward::{RewardRange, bundle_amount};
pub use scheduler::{PollTarget, TickBudget, TickScheduler};
pub use tracker::{CategoryTracker, TrackerRegistry, UnitRecord};
pub use world::{Effect, EffectError, WorldEffectSink};
