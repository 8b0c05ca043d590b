//! Deterministic reward magnitudes for tiered bundles.
//!
//! Only the number of claimed bundles is ever persisted. The amount of a
//! bundle is re-derived from its index on every replay, so this function must
//! stay pure.

use serde::{Deserialize, Serialize};

use crate::constants::FALLBACK_BUNDLE_AMOUNT;
use crate::numbers::{i64_to_f64, round_f64_to_i64};

/// Amount for the bundle at `bundle_index` (0-based) out of `total_bundles`.
///
/// The first bundle grants `min_amount`, the last grants `max_amount`, and the
/// ones in between are linearly interpolated and rounded to the nearest unit.
#[must_use]
pub fn bundle_amount(bundle_index: u32, total_bundles: i64, min_amount: i64, max_amount: i64) -> i64 {
    if total_bundles <= 0 {
        return if min_amount > 0 {
            min_amount
        } else {
            FALLBACK_BUNDLE_AMOUNT
        };
    }
    if total_bundles == 1 {
        return min_amount;
    }
    let index = i64::from(bundle_index);
    if index >= total_bundles - 1 {
        return max_amount;
    }
    let span = i64_to_f64(max_amount) - i64_to_f64(min_amount);
    let step = span / i64_to_f64(total_bundles - 1);
    round_f64_to_i64(i64_to_f64(min_amount) + i64_to_f64(index) * step)
}

/// Configured range of a tiered reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardRange {
    #[serde(default)]
    pub min: i64,
    #[serde(default)]
    pub max: i64,
    /// Number of bundles the service will ever grant; 0 when unknown.
    #[serde(default)]
    pub total: i64,
}

impl RewardRange {
    #[must_use]
    pub const fn new(min: i64, max: i64, total: i64) -> Self {
        Self { min, max, total }
    }

    /// Amount for the bundle with the given historical index.
    #[must_use]
    pub fn amount_for(&self, bundle_index: u32) -> i64 {
        bundle_amount(bundle_index, self.total, self.min, self.max)
    }
}

impl Default for RewardRange {
    fn default() -> Self {
        Self::new(FALLBACK_BUNDLE_AMOUNT, FALLBACK_BUNDLE_AMOUNT, 0)
    }
}
