use crate::config::{ApplyPolicy, EffectSpec};
use crate::deferred::{ActionOutcome, DeferredAction};
use crate::fact::{CategoryKey, Fact, RemoteItem};
use crate::ledger::LedgerStorage;
use crate::remote::RemoteFactSource;
use crate::world::{Effect, WorldEffectSink};

use super::{EngineCore, TickReport};

/// Effect of one idempotent unit. `applied` counts the unit itself.
fn unit_effect(spec: &EffectSpec, category: &CategoryKey, unit_key: &str, applied: u32) -> Option<Effect> {
    match spec {
        EffectSpec::Unlock { entity } => Some(Effect::UnlockEntity {
            key: entity.clone().unwrap_or_else(|| unit_key.to_string()),
        }),
        EffectSpec::Meter {
            start,
            step,
            floor,
            ceiling,
        } => {
            let value = start
                .saturating_add(step.saturating_mul(i64::from(applied)))
                .max(*floor)
                .min(*ceiling);
            Some(Effect::SetMeter {
                category: category.clone(),
                value,
            })
        }
        EffectSpec::Currency { .. } | EffectSpec::Spawn { .. } => None,
    }
}

impl<R, W, S> EngineCore<R, W, S>
where
    R: RemoteFactSource + ?Sized + 'static,
    W: WorldEffectSink + 'static,
    S: LedgerStorage + 'static,
{
    pub(super) fn route(&mut self, fact: Fact, report: &mut TickReport) {
        match fact {
            Fact::ItemReceived(item) => self.route_item(&item, report),
            Fact::CheckSent { check, outcome } => match outcome {
                Ok(()) => log::debug!("check '{check}' delivered"),
                Err(_) => report.failed_sends.push(check),
            },
            Fact::GoalSent { attempt, outcome } => {
                if let Some(goal) = self.goal.as_mut() {
                    goal.on_send_outcome(attempt, &outcome);
                }
            }
        }
    }

    fn route_item(&mut self, item: &RemoteItem, report: &mut TickReport) {
        let Some(resolved) = self.resolver.resolve(&item.name) else {
            if self.registry.on_unrouted(item) {
                log::debug!(
                    "item '{}' (#{}) matches no category",
                    item.name,
                    item.sequence_index
                );
                report.unrouted += 1;
            } else {
                report.duplicates += 1;
            }
            return;
        };
        let category = resolved.category;
        let Some(ordinal) =
            self.registry
                .on_fact_received(&category, item, resolved.unit_key.clone())
        else {
            log::debug!(
                "item #{} already recorded; ignoring replay",
                item.sequence_index
            );
            report.duplicates += 1;
            return;
        };
        report.items_recorded += 1;
        log::debug!(
            "item '{}' (#{}) -> {category} unit {ordinal}",
            item.name,
            item.sequence_index
        );

        match self.policy(&category) {
            Some(ApplyPolicy::Immediate) => self.schedule_unit(&category, resolved.unit_key),
            Some(ApplyPolicy::Gated) => {
                self.registry.tracker_mut(&category).defer(ordinal);
                self.release_gated(&category);
            }
            Some(ApplyPolicy::Cumulative) | None => {}
        }
    }

    /// Hand one idempotent unit to the deferred register.
    pub(super) fn schedule_unit(&mut self, category: &CategoryKey, unit_key: String) {
        self.registry.tracker_mut(category).begin_apply();
        let label = format!("apply {category}/{unit_key}");
        let key = category.clone();
        self.follow_ups.push(
            DeferredAction::new(label, 0, true, move |core: &mut Self| {
                core.apply_unit(&key, &unit_key)
            })
            .retry_after(self.config.retry_delay_ticks)
            .when(Self::is_world_loaded),
        );
    }

    fn apply_unit(&mut self, category: &CategoryKey, unit_key: &str) -> ActionOutcome {
        let Some(config) = self.config.category(category) else {
            return ActionOutcome::Failed(format!("category '{category}' is not configured"));
        };
        let applied = self
            .registry
            .tracker(category)
            .map_or(0, |tracker| tracker.applied())
            .saturating_add(1);
        let Some(effect) = unit_effect(&config.effect, category, unit_key, applied) else {
            self.registry.tracker_mut(category).reject_apply();
            return ActionOutcome::Failed(format!(
                "{} effect of '{category}' needs the claim ledger",
                config.effect.label()
            ));
        };
        let outcome = ActionOutcome::from(self.world.apply(&effect));
        self.settle(category, outcome)
    }

    /// Materialize the fungible reward with historical index `bundle_index`.
    pub(super) fn materialize(&mut self, category: &CategoryKey, bundle_index: u32) -> ActionOutcome {
        let Some(config) = self.config.category(category) else {
            return ActionOutcome::Failed(format!("category '{category}' is not configured"));
        };
        let effect = match &config.effect {
            EffectSpec::Currency { reward } => Effect::GrantCurrency {
                amount: reward.amount_for(bundle_index),
            },
            EffectSpec::Spawn { spec } => Effect::SpawnReward { spec: spec.clone() },
            idempotent => {
                let unit_key = self
                    .registry
                    .tracker(category)
                    .and_then(|tracker| tracker.unit(bundle_index))
                    .map_or_else(|| category.to_string(), |unit| unit.unit_key.clone());
                match unit_effect(idempotent, category, &unit_key, bundle_index.saturating_add(1)) {
                    Some(effect) => effect,
                    None => return ActionOutcome::Failed("no effect for unit".to_string()),
                }
            }
        };
        let outcome = ActionOutcome::from(self.world.apply(&effect));
        if outcome == ActionOutcome::Done {
            let claimed = self.ledger.claim(category.as_str());
            log::debug!("materialized {category} bundle {bundle_index} ({claimed} claimed)");
        }
        self.settle(category, outcome)
    }

    /// Update tracker accounting for a finished attempt.
    fn settle(&mut self, category: &CategoryKey, outcome: ActionOutcome) -> ActionOutcome {
        let tracker = self.registry.tracker_mut(category);
        match &outcome {
            ActionOutcome::Done => {
                tracker.finish_apply();
            }
            ActionOutcome::Failed(_) => tracker.reject_apply(),
            ActionOutcome::NotReady | ActionOutcome::Exhausted => {}
        }
        outcome
    }

    /// Periodic poller of one category. Returns the number of materializations scheduled.
    pub(super) fn poll_category(&mut self, category: &CategoryKey) -> u32 {
        match self.policy(category) {
            Some(ApplyPolicy::Cumulative) if self.synced => self.schedule_materializations(category),
            Some(ApplyPolicy::Gated) => {
                self.release_gated(category);
                0
            }
            _ => 0,
        }
    }
}
