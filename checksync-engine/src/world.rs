//! Capability-typed effects the engine applies to the local world.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deferred::ActionOutcome;
use crate::fact::CategoryKey;

/// A concrete in-world mutation requested by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect {
    GrantCurrency { amount: i64 },
    UnlockEntity { key: String },
    SetMeter { category: CategoryKey, value: i64 },
    SpawnReward { spec: String },
}

/// Why the world refused an effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectError {
    /// The target object or subsystem does not exist yet.
    #[error("world not ready")]
    NotReady,
    /// A finite shared resource is currently unavailable.
    #[error("no free {resource} available")]
    Exhausted { resource: String },
    /// The effect can never succeed.
    #[error("effect rejected: {0}")]
    Rejected(String),
}

impl From<Result<(), EffectError>> for ActionOutcome {
    fn from(value: Result<(), EffectError>) -> Self {
        match value {
            Ok(()) => Self::Done,
            Err(EffectError::NotReady) => Self::NotReady,
            Err(EffectError::Exhausted { .. }) => Self::Exhausted,
            Err(EffectError::Rejected(reason)) => Self::Failed(reason),
        }
    }
}

/// Host-provided sink applying effects on the simulation thread.
pub trait WorldEffectSink {
    /// Add currency to the player.
    ///
    /// # Errors
    ///
    /// Returns `EffectError` when the world cannot accept the grant now or ever.
    fn grant_currency(&mut self, amount: i64) -> Result<(), EffectError>;

    /// Unlock an entity (supplier, recipe, NPC, rank...). Must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns `EffectError` when the entity is not available.
    fn unlock_entity(&mut self, key: &str) -> Result<(), EffectError>;

    /// Set a category meter to an absolute value. Must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns `EffectError` when the meter cannot be written.
    fn set_meter(&mut self, category: &CategoryKey, value: i64) -> Result<(), EffectError>;

    /// Spawn a filler reward described by `spec`.
    ///
    /// # Errors
    ///
    /// Returns `EffectError::Exhausted` when no slot is free.
    fn spawn_reward(&mut self, spec: &str) -> Result<(), EffectError>;

    /// Dispatch an [`Effect`] to the matching capability.
    ///
    /// # Errors
    ///
    /// Propagates the capability's `EffectError`.
    fn apply(&mut self, effect: &Effect) -> Result<(), EffectError> {
        match effect {
            Effect::GrantCurrency { amount } => self.grant_currency(*amount),
            Effect::UnlockEntity { key } => self.unlock_entity(key),
            Effect::SetMeter { category, value } => self.set_meter(category, *value),
            Effect::SpawnReward { spec } => self.spawn_reward(spec),
        }
    }
}
