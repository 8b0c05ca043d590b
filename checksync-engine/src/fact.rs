//! Facts and identifiers exchanged with the coordination service.
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::remote::RemoteError;

/// An item granted to the local player by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteItem {
    pub name: String,
    /// Service-assigned position in the received-items history.
    pub sequence_index: u64,
}

impl RemoteItem {
    #[must_use]
    pub fn new(name: impl Into<String>, sequence_index: u64) -> Self {
        Self {
            name: name.into(),
            sequence_index,
        }
    }
}

/// Opaque identifier of a check the local world can report as completed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteCheckId(pub String);

impl RemoteCheckId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteCheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Typed key of a configured category, resolved once at configuration load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CategoryKey(pub String);

impl<'de> Deserialize<'de> for CategoryKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|value| Self::new(&value))
    }
}

impl CategoryKey {
    /// Construct a key from a string slice, trimming whitespace.
    #[must_use]
    pub fn new(value: &str) -> Self {
        Self(value.trim().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CategoryKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Message crossing from producer threads into the tick loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Fact {
    /// An entry of the received-items history, live or replayed.
    ItemReceived(RemoteItem),
    /// Result of a completed-check send dispatched earlier.
    CheckSent {
        check: RemoteCheckId,
        outcome: Result<(), RemoteError>,
    },
    /// Result of the terminal status send for report `attempt`.
    GoalSent {
        attempt: u32,
        outcome: Result<(), RemoteError>,
    },
}

impl Fact {
    #[must_use]
    pub fn item(name: impl Into<String>, sequence_index: u64) -> Self {
        Self::ItemReceived(RemoteItem::new(name, sequence_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_key_trims_and_displays() {
        let key = CategoryKey::new("  dealer_recruits ");
        assert_eq!(key.as_str(), "dealer_recruits");
        assert_eq!(key.to_string(), "dealer_recruits");
        assert!(!key.is_empty());
        assert!(CategoryKey::new("   ").is_empty());
    }

    #[test]
    fn identifiers_serialize_transparently() {
        let check = RemoteCheckId::new("Trash Pile 3");
        assert_eq!(serde_json::to_string(&check).unwrap(), "\"Trash Pile 3\"");
        let key: CategoryKey = serde_json::from_str("\" cash \"").unwrap();
        assert_eq!(key, CategoryKey::from("cash"));
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"cash\"");
    }
}
