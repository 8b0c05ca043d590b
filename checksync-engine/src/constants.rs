//! Engine-wide defaults shared by configuration and the tick loop.

/// Facts drained from the ingestion queue per tick.
pub const DEFAULT_FACT_BATCH_SIZE: usize = 64;

/// Deferred actions executed per tick before the rest wait for the next tick.
pub const DEFAULT_MAX_ACTIONS_PER_TICK: usize = 16;

/// Ticks between a world load and the reconcile pass.
pub const DEFAULT_SETTLE_DELAY_TICKS: u32 = 60;

/// Ticks between two polls of a category's pending work.
pub const DEFAULT_POLL_INTERVAL_TICKS: u32 = 30;

/// Ticks between two goal condition polls.
pub const DEFAULT_GOAL_POLL_INTERVAL_TICKS: u32 = 60;

/// Delay applied when a world effect reports "not ready".
pub const DEFAULT_RETRY_DELAY_TICKS: u32 = 10;

/// Amount granted for a bundle when no bundle count is configured and the minimum is not positive.
pub const FALLBACK_BUNDLE_AMOUNT: i64 = 100;

/// Maximum length of the sanitized session identity embedded in ledger file names.
pub const LEDGER_IDENTITY_MAX_LEN: usize = 48;

/// Prefix of every ledger file.
pub const LEDGER_FILE_PREFIX: &str = "claims";

/// Placeholder replaced by the 1-based check index in check templates.
pub const INDEX_PLACEHOLDER: &str = "{index}";

/// Placeholder replaced by the unit key in discrete check templates.
pub const KEY_PLACEHOLDER: &str = "{key}";
