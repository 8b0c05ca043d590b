//! Category configuration ("slot options") loading and validation.
//!
//! Configuration is supplied once per session. Every category entry is parsed
//! and validated on its own; a broken entry degrades to a documented default
//! rather than failing the whole document.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::constants::{
    DEFAULT_FACT_BATCH_SIZE, DEFAULT_GOAL_POLL_INTERVAL_TICKS, DEFAULT_MAX_ACTIONS_PER_TICK,
    DEFAULT_POLL_INTERVAL_TICKS, DEFAULT_RETRY_DELAY_TICKS, DEFAULT_SETTLE_DELAY_TICKS,
    INDEX_PLACEHOLDER, KEY_PLACEHOLDER,
};
use crate::fact::{CategoryKey, RemoteCheckId};
use crate::matcher::ItemMatcher;
use crate::remote::DispatchMode;
use crate::reward::RewardRange;

/// How a category turns received facts into world effects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPolicy {
    /// Apply the effect as soon as the world is loaded.
    #[default]
    Immediate,
    /// Apply only once the unit's companion (discrete) check is completed.
    Gated,
    /// Count facts and materialize through the claim ledger.
    Cumulative,
}

impl fmt::Display for ApplyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::Gated => write!(f, "gated"),
            Self::Cumulative => write!(f, "cumulative"),
        }
    }
}

/// The world effect produced by one unit of a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectSpec {
    /// Unlock `entity`, or the unit key when absent.
    Unlock {
        #[serde(default)]
        entity: Option<String>,
    },
    /// Set the category meter to `clamp(start + step * applied, floor, ceiling)`.
    Meter {
        #[serde(default)]
        start: i64,
        #[serde(default = "EffectSpec::default_meter_step")]
        step: i64,
        #[serde(default)]
        floor: i64,
        #[serde(default = "EffectSpec::default_meter_ceiling")]
        ceiling: i64,
    },
    /// Grant a tiered currency bundle.
    Currency { reward: RewardRange },
    /// Spawn a filler reward described by `spec`.
    Spawn { spec: String },
}

impl EffectSpec {
    const fn default_meter_step() -> i64 {
        -1
    }

    const fn default_meter_ceiling() -> i64 {
        100
    }

    /// Whether re-applying the effect after a replay leaves the world unchanged.
    #[must_use]
    pub const fn is_idempotent(&self) -> bool {
        matches!(self, Self::Unlock { .. } | Self::Meter { .. })
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Unlock { .. } => "unlock",
            Self::Meter { .. } => "meter",
            Self::Currency { .. } => "currency",
            Self::Spawn { .. } => "spawn",
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Meter { floor, ceiling, .. } if floor > ceiling => {
                Err(ConfigError::MeterBoundsInverted {
                    floor: *floor,
                    ceiling: *ceiling,
                })
            }
            Self::Currency { reward } if reward.total > 1 && reward.min > reward.max => {
                Err(ConfigError::RewardRangeInverted {
                    min: reward.min,
                    max: reward.max,
                })
            }
            Self::Spawn { spec } if spec.trim().is_empty() => Err(ConfigError::EmptySpawnSpec),
            _ => Ok(()),
        }
    }
}

impl Default for EffectSpec {
    fn default() -> Self {
        Self::Unlock { entity: None }
    }
}

/// Precondition deciding whether a category's emission gate is active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Always,
    /// Active once `category` has received at least one item.
    RequiresItem { category: CategoryKey },
    /// Active until `category` receives its first item.
    UntilItem { category: CategoryKey },
    /// Active when `category` holds an item; when it holds none and the cap is
    /// not yet reached, `when_neither` decides.
    Companion {
        category: CategoryKey,
        #[serde(default)]
        when_neither: bool,
    },
}

impl Activation {
    fn referenced(&self) -> Option<&CategoryKey> {
        match self {
            Self::Always => None,
            Self::RequiresItem { category }
            | Self::UntilItem { category }
            | Self::Companion { category, .. } => Some(category),
        }
    }
}

/// Outbound check emission for indexed, capped checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionConfig {
    /// Maximum number of checks; `None` is unbounded.
    #[serde(default)]
    pub cap: Option<u32>,
    /// Check name with an `{index}` placeholder (1-based).
    pub check_template: String,
    #[serde(default)]
    pub activation: Activation,
}

/// Static configuration of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub key: CategoryKey,
    /// Name matcher; defaults to the exact category key.
    #[serde(default)]
    pub matcher: Option<ItemMatcher>,
    #[serde(default)]
    pub policy: ApplyPolicy,
    #[serde(default)]
    pub effect: EffectSpec,
    #[serde(default)]
    pub emission: Option<EmissionConfig>,
    /// Check name with a `{key}` placeholder for per-unit discrete checks.
    #[serde(default)]
    pub discrete_check: Option<String>,
    /// Discrete keys known up front, scanned during reconcile.
    #[serde(default)]
    pub discrete_keys: Vec<String>,
    /// Veto the host's default behavior until a unit has been applied.
    #[serde(default)]
    pub veto_default: bool,
    #[serde(default = "CategoryConfig::default_poll_interval")]
    pub poll_interval_ticks: u32,
}

impl CategoryConfig {
    const fn default_poll_interval() -> u32 {
        DEFAULT_POLL_INTERVAL_TICKS
    }

    /// Default used when an entry is malformed: immediate unlock keyed by name, no emission.
    #[must_use]
    pub fn fallback(key: CategoryKey) -> Self {
        Self {
            key,
            matcher: None,
            policy: ApplyPolicy::Immediate,
            effect: EffectSpec::default(),
            emission: None,
            discrete_check: None,
            discrete_keys: Vec::new(),
            veto_default: false,
            poll_interval_ticks: Self::default_poll_interval(),
        }
    }

    /// Effective item matcher.
    #[must_use]
    pub fn matcher(&self) -> ItemMatcher {
        self.matcher
            .clone()
            .unwrap_or_else(|| ItemMatcher::Exact(self.key.0.clone()))
    }

    /// Check identifier for the 1-based emission `index`.
    #[must_use]
    pub fn indexed_check(&self, index: u32) -> Option<RemoteCheckId> {
        self.emission.as_ref().map(|emission| {
            RemoteCheckId::new(
                emission
                    .check_template
                    .replace(INDEX_PLACEHOLDER, &index.to_string()),
            )
        })
    }

    /// Check identifier of the discrete check for `key`.
    #[must_use]
    pub fn discrete_check_for(&self, key: &str) -> Option<RemoteCheckId> {
        self.discrete_check
            .as_ref()
            .map(|template| RemoteCheckId::new(template.replace(KEY_PLACEHOLDER, key)))
    }

    #[must_use]
    pub fn emission_cap(&self) -> Option<u32> {
        self.emission.as_ref().and_then(|e| e.cap)
    }

    /// Validate the entry in isolation.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key.is_empty() {
            return Err(ConfigError::EmptyKey);
        }
        self.matcher().validate()?;
        self.effect.validate()?;
        if self.poll_interval_ticks == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "poll_interval_ticks",
            });
        }
        if let Some(emission) = &self.emission
            && !emission.check_template.contains(INDEX_PLACEHOLDER)
        {
            return Err(ConfigError::MissingPlaceholder {
                template: emission.check_template.clone(),
                placeholder: INDEX_PLACEHOLDER,
            });
        }
        if let Some(template) = &self.discrete_check
            && !template.contains(KEY_PLACEHOLDER)
        {
            return Err(ConfigError::MissingPlaceholder {
                template: template.clone(),
                placeholder: KEY_PLACEHOLDER,
            });
        }
        if self.policy == ApplyPolicy::Gated && self.discrete_check.is_none() {
            return Err(ConfigError::GatedWithoutCompanion {
                category: self.key.0.clone(),
            });
        }
        if self.policy != ApplyPolicy::Cumulative && !self.effect.is_idempotent() {
            return Err(ConfigError::IncompatibleEffect {
                policy: self.policy,
                effect: self.effect.label(),
            });
        }
        Ok(())
    }
}

/// A condition of the terminal goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GoalCondition {
    /// `category` has received at least `at_least` units.
    Count { category: CategoryKey, at_least: u32 },
    /// `key` is completed in `category`.
    Completed { category: CategoryKey, key: String },
}

impl GoalCondition {
    #[must_use]
    pub const fn category(&self) -> &CategoryKey {
        match self {
            Self::Count { category, .. } | Self::Completed { category, .. } => category,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalConfig {
    pub conditions: Vec<GoalCondition>,
    #[serde(default = "GoalConfig::default_poll_interval")]
    pub poll_interval_ticks: u32,
}

impl GoalConfig {
    const fn default_poll_interval() -> u32 {
        DEFAULT_GOAL_POLL_INTERVAL_TICKS
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "BridgeConfig::default_settle_delay")]
    pub settle_delay_ticks: u32,
    #[serde(default = "BridgeConfig::default_fact_batch_size")]
    pub fact_batch_size: usize,
    #[serde(default = "BridgeConfig::default_max_actions")]
    pub max_actions_per_tick: usize,
    #[serde(default = "BridgeConfig::default_retry_delay")]
    pub retry_delay_ticks: u32,
    #[serde(default)]
    pub dispatch: DispatchMode,
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
    #[serde(default)]
    pub goal: Option<GoalConfig>,
}

/// Same document with categories left untyped so each can fail on its own.
#[derive(Debug, Deserialize)]
struct RawBridgeConfig {
    #[serde(default = "BridgeConfig::default_settle_delay")]
    settle_delay_ticks: u32,
    #[serde(default = "BridgeConfig::default_fact_batch_size")]
    fact_batch_size: usize,
    #[serde(default = "BridgeConfig::default_max_actions")]
    max_actions_per_tick: usize,
    #[serde(default = "BridgeConfig::default_retry_delay")]
    retry_delay_ticks: u32,
    #[serde(default)]
    dispatch: DispatchMode,
    #[serde(default)]
    categories: Vec<Value>,
    #[serde(default)]
    goal: Option<GoalConfig>,
}

impl BridgeConfig {
    const fn default_settle_delay() -> u32 {
        DEFAULT_SETTLE_DELAY_TICKS
    }

    const fn default_fact_batch_size() -> usize {
        DEFAULT_FACT_BATCH_SIZE
    }

    const fn default_max_actions() -> usize {
        DEFAULT_MAX_ACTIONS_PER_TICK
    }

    const fn default_retry_delay() -> u32 {
        DEFAULT_RETRY_DELAY_TICKS
    }

    /// Parse a configuration document, degrading broken categories to defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Json` only when the document itself is not valid
    /// JSON of the expected top-level shape.
    pub fn from_json(json: &str) -> Result<(Self, Vec<ConfigIssue>), ConfigError> {
        let raw: RawBridgeConfig =
            serde_json::from_str(json).map_err(|err| ConfigError::Json(err.to_string()))?;
        let mut issues = Vec::new();
        let categories = raw
            .categories
            .into_iter()
            .filter_map(|value| parse_category(value, &mut issues))
            .collect();
        let mut config = Self {
            settle_delay_ticks: raw.settle_delay_ticks,
            fact_batch_size: raw.fact_batch_size,
            max_actions_per_tick: raw.max_actions_per_tick,
            retry_delay_ticks: raw.retry_delay_ticks,
            dispatch: raw.dispatch,
            categories,
            goal: raw.goal,
        };
        issues.extend(config.sanitize());
        for issue in &issues {
            log::warn!("configuration: {issue}");
        }
        Ok((config, issues))
    }

    /// Enforce cross-entry invariants, returning what had to be changed.
    ///
    /// Validates every category and coerces non-idempotent effects under
    /// immediate/gated policies to cumulative. Otherwise invalid entries are
    /// replaced with [`CategoryConfig::fallback`]; entries without a key and
    /// duplicate keys are dropped. References to unknown categories reset.
    pub fn sanitize(&mut self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.fact_batch_size == 0 {
            issues.push(ConfigIssue::engine(ConfigError::ZeroInterval {
                field: "fact_batch_size",
            }));
            self.fact_batch_size = DEFAULT_FACT_BATCH_SIZE;
        }
        if self.max_actions_per_tick == 0 {
            issues.push(ConfigIssue::engine(ConfigError::ZeroInterval {
                field: "max_actions_per_tick",
            }));
            self.max_actions_per_tick = DEFAULT_MAX_ACTIONS_PER_TICK;
        }

        let mut seen = BTreeSet::new();
        let mut kept = Vec::with_capacity(self.categories.len());
        for mut category in std::mem::take(&mut self.categories) {
            if category.key.is_empty() {
                issues.push(ConfigIssue::engine(ConfigError::EmptyKey));
                continue;
            }
            if !seen.insert(category.key.clone()) {
                issues.push(ConfigIssue::category(
                    &category.key,
                    ConfigError::DuplicateCategory,
                ));
                continue;
            }
            match category.validate() {
                Ok(()) => kept.push(category),
                Err(err @ ConfigError::IncompatibleEffect { .. }) => {
                    issues.push(ConfigIssue::category(&category.key, err));
                    category.policy = ApplyPolicy::Cumulative;
                    kept.push(category);
                }
                Err(err) => {
                    issues.push(ConfigIssue::category(&category.key, err));
                    kept.push(CategoryConfig::fallback(category.key));
                }
            }
        }

        for category in &mut kept {
            let Some(emission) = category.emission.as_mut() else {
                continue;
            };
            if let Some(referenced) = emission.activation.referenced()
                && !seen.contains(referenced)
            {
                issues.push(ConfigIssue::category(
                    &category.key,
                    ConfigError::UnknownCategory {
                        referenced: referenced.0.clone(),
                    },
                ));
                emission.activation = Activation::Always;
            }
        }
        self.categories = kept;

        if let Some(goal) = self.goal.as_mut() {
            goal.conditions.retain(|condition| {
                let known = seen.contains(condition.category());
                if !known {
                    issues.push(ConfigIssue::engine(ConfigError::UnknownCategory {
                        referenced: condition.category().0.clone(),
                    }));
                }
                known
            });
            if goal.poll_interval_ticks == 0 {
                goal.poll_interval_ticks = GoalConfig::default_poll_interval();
            }
            if goal.conditions.is_empty() {
                issues.push(ConfigIssue::engine(ConfigError::EmptyGoal));
                self.goal = None;
            }
        }
        issues
    }

    /// Category configuration by key.
    #[must_use]
    pub fn category(&self, key: &CategoryKey) -> Option<&CategoryConfig> {
        self.categories.iter().find(|c| &c.key == key)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            settle_delay_ticks: Self::default_settle_delay(),
            fact_batch_size: Self::default_fact_batch_size(),
            max_actions_per_tick: Self::default_max_actions(),
            retry_delay_ticks: Self::default_retry_delay(),
            dispatch: DispatchMode::default(),
            categories: Vec::new(),
            goal: None,
        }
    }
}

fn parse_category(value: Value, issues: &mut Vec<ConfigIssue>) -> Option<CategoryConfig> {
    let key = value
        .get("key")
        .and_then(Value::as_str)
        .map(CategoryKey::new)
        .filter(|key| !key.is_empty());
    match serde_json::from_value::<CategoryConfig>(value) {
        Ok(category) => Some(category),
        Err(err) => {
            let error = ConfigError::Json(err.to_string());
            if let Some(key) = key {
                issues.push(ConfigIssue::category(&key, error));
                Some(CategoryConfig::fallback(key))
            } else {
                issues.push(ConfigIssue::engine(error));
                None
            }
        }
    }
}

/// Errors raised when configuration invariants are violated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Json(String),
    #[error("category key must not be empty")]
    EmptyKey,
    #[error("duplicate category key")]
    DuplicateCategory,
    #[error("item matcher must not be empty")]
    EmptyMatcher,
    #[error("invalid item pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("template '{template}' lacks the {placeholder} placeholder")]
    MissingPlaceholder {
        template: String,
        placeholder: &'static str,
    },
    #[error("gated category '{category}' needs a discrete_check companion template")]
    GatedWithoutCompanion { category: String },
    #[error("{effect} effects cannot be replayed under the {policy} policy")]
    IncompatibleEffect {
        policy: ApplyPolicy,
        effect: &'static str,
    },
    #[error("reward range inverted (min {min} > max {max})")]
    RewardRangeInverted { min: i64, max: i64 },
    #[error("meter bounds inverted (floor {floor} > ceiling {ceiling})")]
    MeterBoundsInverted { floor: i64, ceiling: i64 },
    #[error("spawn effect needs a non-empty spec")]
    EmptySpawnSpec,
    #[error("{field} must be at least 1")]
    ZeroInterval { field: &'static str },
    #[error("reference to unknown category '{referenced}'")]
    UnknownCategory { referenced: String },
    #[error("goal has no usable conditions")]
    EmptyGoal,
}

/// A configuration problem and the category it affected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// `None` for engine-level settings.
    pub category: Option<CategoryKey>,
    pub error: ConfigError,
}

impl ConfigIssue {
    fn category(key: &CategoryKey, error: ConfigError) -> Self {
        Self {
            category: Some(key.clone()),
            error,
        }
    }

    const fn engine(error: ConfigError) -> Self {
        Self {
            category: None,
            error,
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.category {
            Some(key) => write!(f, "category '{key}': {}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}
