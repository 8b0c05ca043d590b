//! Sync-from-session: bring local state in line with what the service and the
//! claim ledger already know, without re-granting or re-emitting anything.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::ApplyPolicy;
use crate::deferred::DeferredAction;
use crate::fact::CategoryKey;
use crate::ledger::LedgerStorage;
use crate::numbers::saturating_u32;
use crate::remote::RemoteFactSource;
use crate::world::WorldEffectSink;

use super::{BridgeEngine, EngineCore};

/// What one reconcile pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Discrete keys newly marked completed from acknowledgements.
    pub marked_completed: u32,
    /// Fungible rewards scheduled for materialization.
    pub materializations: u32,
    /// Gated units released for application.
    pub released: u32,
}

impl ReconcileReport {
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.marked_completed == 0 && self.materializations == 0 && self.released == 0
    }
}

impl<R, W, S> EngineCore<R, W, S>
where
    R: RemoteFactSource + ?Sized + 'static,
    W: WorldEffectSink + 'static,
    S: LedgerStorage + 'static,
{
    /// Acknowledgement scan, then the claim-ledger pass, then gated release.
    pub(super) fn reconcile(&mut self) -> ReconcileReport {
        let mut report = ReconcileReport {
            marked_completed: self.mark_acknowledged(),
            ..ReconcileReport::default()
        };
        let categories: Vec<(CategoryKey, ApplyPolicy)> = self
            .config
            .categories
            .iter()
            .map(|c| (c.key.clone(), c.policy))
            .collect();
        for (category, policy) in &categories {
            if *policy == ApplyPolicy::Cumulative {
                report.materializations += self.schedule_materializations(category);
            }
        }
        for (category, policy) in &categories {
            if *policy == ApplyPolicy::Gated {
                report.released += self.release_gated(category);
            }
        }
        self.synced = true;
        log::info!(
            "reconcile: {} acknowledged, {} to materialize, {} released",
            report.marked_completed,
            report.materializations,
            report.released
        );
        report
    }

    /// Mark every discrete key the service already acknowledged as completed.
    fn mark_acknowledged(&mut self) -> u32 {
        let mut marked = 0;
        for config in &self.config.categories {
            if config.discrete_check.is_none() {
                continue;
            }
            let mut keys: BTreeSet<&str> = config.discrete_keys.iter().map(String::as_str).collect();
            if let Some(tracker) = self.registry.tracker(&config.key) {
                keys.extend(tracker.units().iter().map(|unit| unit.unit_key.as_str()));
            }
            let acknowledged: Vec<String> = keys
                .into_iter()
                .filter(|key| {
                    config
                        .discrete_check_for(key)
                        .is_some_and(|check| self.remote.is_acknowledged(&check))
                })
                .map(str::to_string)
                .collect();
            for key in acknowledged {
                if self.registry.mark_completed(&config.key, &key) {
                    log::debug!("{}: '{key}' already acknowledged remotely", config.key);
                    marked += 1;
                }
            }
        }
        marked
    }

    /// Schedule `received - claimed - in_flight` materializations, each at its
    /// historical bundle index.
    pub(super) fn schedule_materializations(&mut self, category: &CategoryKey) -> u32 {
        if !self.world_loaded {
            return 0;
        }
        let claimed = self.ledger.claimed(category.as_str());
        let retry_delay = self.config.retry_delay_ticks;
        let tracker = self.registry.tracker_mut(category);
        let accounted = claimed
            .saturating_add(tracker.in_flight())
            .saturating_add(tracker.rejected());
        let outstanding = tracker.received().saturating_sub(accounted);
        for bundle_index in accounted..accounted.saturating_add(outstanding) {
            tracker.begin_apply();
            let key = category.clone();
            self.follow_ups.push(
                DeferredAction::new(
                    format!("materialize {category}#{bundle_index}"),
                    0,
                    true,
                    move |core: &mut Self| core.materialize(&key, bundle_index),
                )
                .retry_after(retry_delay)
                .when(Self::is_world_loaded),
            );
        }
        if outstanding > 0 {
            log::info!("{category}: materializing {outstanding} reward(s) after {claimed} claimed");
        }
        outstanding
    }

    /// Mark pending units of `category` completed when the service already
    /// acknowledged their companion check.
    fn mark_pending_acknowledged(&mut self, category: &CategoryKey) -> u32 {
        let (Some(config), Some(tracker)) =
            (self.config.category(category), self.registry.tracker(category))
        else {
            return 0;
        };
        let acknowledged: BTreeSet<String> = tracker
            .pending()
            .iter()
            .filter_map(|ordinal| tracker.unit(*ordinal))
            .map(|unit| unit.unit_key.as_str())
            .filter(|key| !tracker.is_completed(key))
            .filter(|key| {
                config
                    .discrete_check_for(key)
                    .is_some_and(|check| self.remote.is_acknowledged(&check))
            })
            .map(str::to_string)
            .collect();
        let mut marked = 0;
        for key in acknowledged {
            if self.registry.mark_completed(category, &key) {
                log::debug!("{category}: '{key}' acknowledged remotely; releasing");
                marked += 1;
            }
        }
        marked
    }

    /// Schedule every pending gated unit whose companion key is completed
    /// locally or acknowledged by the service.
    pub(super) fn release_gated(&mut self, category: &CategoryKey) -> u32 {
        self.mark_pending_acknowledged(category);
        let released = self.registry.tracker_mut(category).release_completed();
        let count = saturating_u32(released.len());
        for unit in released {
            log::debug!("{category}: releasing gated unit '{}'", unit.unit_key);
            self.schedule_unit(category, unit.unit_key);
        }
        count
    }
}

impl<R, W, S> BridgeEngine<R, W, S>
where
    R: RemoteFactSource + ?Sized + 'static,
    W: WorldEffectSink + 'static,
    S: LedgerStorage + 'static,
{
    /// Reconcile immediately instead of waiting for the post-load schedule.
    ///
    /// Calling it again with no new facts in between changes nothing.
    pub fn reconcile(&mut self) -> ReconcileReport {
        let report = self.core.reconcile();
        self.adopt_follow_ups();
        report
    }
}
