//! Per-category progress state rebuilt from the remote history each session.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::fact::{CategoryKey, RemoteItem};
use crate::numbers::saturating_u32;

/// One received unit of a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    /// 0-based position of the unit within its category.
    pub ordinal: u32,
    pub sequence_index: u64,
    pub unit_key: String,
}

/// In-memory progress of one category.
///
/// `applied <= received` always holds and `completed` only grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTracker {
    key: CategoryKey,
    received: u32,
    applied: u32,
    in_flight: u32,
    rejected: u32,
    completed: BTreeSet<String>,
    pending: BTreeSet<u32>,
    units: Vec<UnitRecord>,
}

impl CategoryTracker {
    #[must_use]
    pub const fn new(key: CategoryKey) -> Self {
        Self {
            key,
            received: 0,
            applied: 0,
            in_flight: 0,
            rejected: 0,
            completed: BTreeSet::new(),
            pending: BTreeSet::new(),
            units: Vec::new(),
        }
    }

    #[must_use]
    pub const fn key(&self) -> &CategoryKey {
        &self.key
    }

    #[must_use]
    pub const fn received(&self) -> u32 {
        self.received
    }

    #[must_use]
    pub const fn applied(&self) -> u32 {
        self.applied
    }

    /// Units scheduled for application but not yet confirmed.
    #[must_use]
    pub const fn in_flight(&self) -> u32 {
        self.in_flight
    }

    /// Units the world permanently refused.
    #[must_use]
    pub const fn rejected(&self) -> u32 {
        self.rejected
    }

    #[must_use]
    pub fn units(&self) -> &[UnitRecord] {
        &self.units
    }

    #[must_use]
    pub fn unit(&self, ordinal: u32) -> Option<&UnitRecord> {
        self.units.get(ordinal as usize)
    }

    #[must_use]
    pub const fn completed(&self) -> &BTreeSet<String> {
        &self.completed
    }

    #[must_use]
    pub fn is_completed(&self, key: &str) -> bool {
        self.completed.contains(key)
    }

    /// Returns true if `key` was not completed before.
    pub fn mark_completed(&mut self, key: &str) -> bool {
        self.completed.insert(key.to_string())
    }

    fn record(&mut self, sequence_index: u64, unit_key: String) -> u32 {
        let ordinal = saturating_u32(self.units.len());
        self.units.push(UnitRecord {
            ordinal,
            sequence_index,
            unit_key,
        });
        self.received = self.received.saturating_add(1);
        ordinal
    }

    /// Park a unit until its precondition holds.
    pub fn defer(&mut self, ordinal: u32) {
        self.pending.insert(ordinal);
    }

    #[must_use]
    pub const fn pending(&self) -> &BTreeSet<u32> {
        &self.pending
    }

    /// Remove and return the pending units whose unit key is completed.
    pub fn release_completed(&mut self) -> Vec<UnitRecord> {
        let Self {
            pending,
            units,
            completed,
            ..
        } = self;
        let mut released = Vec::new();
        pending.retain(|ordinal| match units.get(*ordinal as usize) {
            Some(unit) if completed.contains(&unit.unit_key) => {
                released.push(unit.clone());
                false
            }
            _ => true,
        });
        released
    }

    /// Note that one more unit has been handed to the deferred register.
    pub const fn begin_apply(&mut self) {
        self.in_flight = self.in_flight.saturating_add(1);
    }

    /// Confirm a unit applied, returning the new applied count.
    pub fn finish_apply(&mut self) -> u32 {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.applied = self.applied.saturating_add(1).min(self.received);
        self.applied
    }

    /// Give up on an in-flight unit the world will never accept.
    pub const fn reject_apply(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.rejected = self.rejected.saturating_add(1);
    }
}

/// Registry of all category trackers for the connected session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerRegistry {
    trackers: BTreeMap<CategoryKey, CategoryTracker>,
    seen: BTreeSet<u64>,
    unrouted: u32,
}

impl TrackerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `item` for `category`, returning its ordinal when the sequence index is new.
    pub fn on_fact_received(
        &mut self,
        category: &CategoryKey,
        item: &RemoteItem,
        unit_key: impl Into<String>,
    ) -> Option<u32> {
        if !self.seen.insert(item.sequence_index) {
            return None;
        }
        Some(
            self.tracker_mut(category)
                .record(item.sequence_index, unit_key.into()),
        )
    }

    /// Record an item no category claims. Returns false for a replayed index.
    pub fn on_unrouted(&mut self, item: &RemoteItem) -> bool {
        if !self.seen.insert(item.sequence_index) {
            return false;
        }
        self.unrouted = self.unrouted.saturating_add(1);
        true
    }

    #[must_use]
    pub const fn unrouted(&self) -> u32 {
        self.unrouted
    }

    /// Highest sequence index observed so far.
    #[must_use]
    pub fn last_sequence_index(&self) -> Option<u64> {
        self.seen.last().copied()
    }

    #[must_use]
    pub fn get_count(&self, category: &CategoryKey) -> u32 {
        self.trackers.get(category).map_or(0, CategoryTracker::received)
    }

    #[must_use]
    pub fn is_completed(&self, category: &CategoryKey, key: &str) -> bool {
        self.trackers
            .get(category)
            .is_some_and(|tracker| tracker.is_completed(key))
    }

    /// Returns true if `key` was newly completed.
    pub fn mark_completed(&mut self, category: &CategoryKey, key: &str) -> bool {
        self.tracker_mut(category).mark_completed(key)
    }

    #[must_use]
    pub fn tracker(&self, category: &CategoryKey) -> Option<&CategoryTracker> {
        self.trackers.get(category)
    }

    /// Tracker for `category`, created on first use.
    pub fn tracker_mut(&mut self, category: &CategoryKey) -> &mut CategoryTracker {
        self.trackers
            .entry(category.clone())
            .or_insert_with(|| CategoryTracker::new(category.clone()))
    }

    pub fn trackers(&self) -> impl Iterator<Item = &CategoryTracker> {
        self.trackers.values()
    }

    /// Forget everything; used when the session or world goes away.
    pub fn reset(&mut self) {
        self.trackers.clear();
        self.seen.clear();
        self.unrouted = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(value: &str) -> CategoryKey {
        CategoryKey::new(value)
    }

    #[test]
    fn dedups_by_sequence_index_not_name() {
        let mut registry = TrackerRegistry::new();
        let cash = key("cash");
        assert_eq!(
            registry.on_fact_received(&cash, &RemoteItem::new("Cash Bundle", 0), "Cash Bundle"),
            Some(0)
        );
        assert_eq!(
            registry.on_fact_received(&cash, &RemoteItem::new("Cash Bundle", 1), "Cash Bundle"),
            Some(1)
        );
        assert_eq!(
            registry.on_fact_received(&cash, &RemoteItem::new("Cash Bundle", 1), "Cash Bundle"),
            None
        );
        assert_eq!(registry.get_count(&cash), 2);
        assert_eq!(registry.last_sequence_index(), Some(1));
        assert!(!registry.on_unrouted(&RemoteItem::new("Mystery", 0)));
        assert!(registry.on_unrouted(&RemoteItem::new("Mystery", 9)));
        assert_eq!(registry.unrouted(), 1);
    }

    #[test]
    fn applied_never_exceeds_received() {
        let mut tracker = CategoryTracker::new(key("ranks"));
        tracker.record(3, "1".to_string());
        tracker.begin_apply();
        assert_eq!(tracker.finish_apply(), 1);
        tracker.begin_apply();
        assert_eq!(tracker.finish_apply(), 1);
        assert_eq!(tracker.in_flight(), 0);
        assert!(tracker.applied() <= tracker.received());
        tracker.begin_apply();
        tracker.reject_apply();
        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(tracker.rejected(), 1);
    }

    #[test]
    fn pending_units_release_when_ready() {
        let mut registry = TrackerRegistry::new();
        let dealers = key("dealers");
        for (i, name) in ["Benji", "Molly", "Brad"].iter().enumerate() {
            let ordinal = registry
                .on_fact_received(&dealers, &RemoteItem::new(*name, i as u64), *name)
                .unwrap();
            registry.tracker_mut(&dealers).defer(ordinal);
        }
        assert!(registry.tracker_mut(&dealers).release_completed().is_empty());
        registry.mark_completed(&dealers, "Molly");
        let released = registry.tracker_mut(&dealers).release_completed();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].ordinal, 1);
        assert_eq!(released[0].unit_key, "Molly");
        assert_eq!(registry.tracker(&dealers).unwrap().pending().len(), 2);
        assert!(registry.tracker_mut(&dealers).release_completed().is_empty());
    }

    #[test]
    fn completed_set_only_grows_and_reset_clears() {
        let mut registry = TrackerRegistry::new();
        let recipes = key("recipes");
        assert!(registry.mark_completed(&recipes, "Meth"));
        assert!(!registry.mark_completed(&recipes, "Meth"));
        assert!(registry.is_completed(&recipes, "Meth"));
        assert!(!registry.is_completed(&key("other"), "Meth"));
        registry.reset();
        assert!(!registry.is_completed(&recipes, "Meth"));
        assert_eq!(registry.trackers().count(), 0);
    }
}
