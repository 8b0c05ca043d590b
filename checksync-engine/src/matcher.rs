//! Item-name matching, confined to the configuration boundary.
//!
//! Item names are human-readable strings from the service. Each category
//! declares one matcher; the [`CategoryResolver`] compiles them once and maps
//! an incoming name to a typed [`CategoryKey`] plus the unit key the name
//! carries (e.g. the NPC in "Dealer: Benji").

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::ConfigError;
use crate::fact::CategoryKey;

/// Declarative name matcher as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemMatcher {
    /// Whole name equals the value; the unit key is the name.
    Exact(String),
    /// Name starts with the value; the unit key is the remainder.
    Prefix(String),
    /// Name ends with the value; the unit key is the leading part.
    Suffix(String),
    /// Regex; the unit key is the `key` capture group, or the whole match.
    Pattern(String),
}

#[derive(Debug, Clone)]
enum CompiledMatcher {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Pattern(Regex),
}

impl CompiledMatcher {
    fn compile(matcher: &ItemMatcher) -> Result<Self, ConfigError> {
        Ok(match matcher {
            ItemMatcher::Exact(value) => Self::Exact(value.clone()),
            ItemMatcher::Prefix(value) => Self::Prefix(value.clone()),
            ItemMatcher::Suffix(value) => Self::Suffix(value.clone()),
            ItemMatcher::Pattern(pattern) => {
                Self::Pattern(Regex::new(pattern).map_err(|err| ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: err.to_string(),
                })?)
            }
        })
    }

    fn unit_key(&self, name: &str) -> Option<String> {
        let key = match self {
            Self::Exact(value) => (name == value).then(|| name.to_string()),
            Self::Prefix(prefix) => name.strip_prefix(prefix.as_str()).map(str::to_string),
            Self::Suffix(suffix) => name.strip_suffix(suffix.as_str()).map(str::to_string),
            Self::Pattern(regex) => regex.captures(name).and_then(|caps| {
                caps.name("key")
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().to_string())
            }),
        }?;
        let trimmed = key.trim();
        if trimmed.is_empty() {
            // A bare prefix/suffix names the category itself.
            Some(name.trim().to_string())
        } else {
            Some(trimmed.to_string())
        }
    }
}

impl ItemMatcher {
    /// Validate the matcher, compiling patterns.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPattern` for malformed regexes and
    /// `ConfigError::EmptyMatcher` for empty literals.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Exact(v) | Self::Prefix(v) | Self::Suffix(v) if v.trim().is_empty() => {
                Err(ConfigError::EmptyMatcher)
            }
            _ => CompiledMatcher::compile(self).map(|_| ()),
        }
    }
}

/// A resolved item: which category it feeds and under which unit key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolved {
    pub category: CategoryKey,
    pub unit_key: String,
}

/// Compiled matchers in configuration order with a memo of resolved names.
#[derive(Debug, Clone, Default)]
pub struct CategoryResolver {
    matchers: Vec<(CategoryKey, CompiledMatcher)>,
    memo: HashMap<String, Option<Resolved>>,
}

impl CategoryResolver {
    /// Compile matchers. The first matching category wins.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` raised while compiling a matcher.
    pub fn build<'a>(
        entries: impl IntoIterator<Item = (&'a CategoryKey, &'a ItemMatcher)>,
    ) -> Result<Self, ConfigError> {
        let matchers = entries
            .into_iter()
            .map(|(key, matcher)| Ok((key.clone(), CompiledMatcher::compile(matcher)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self {
            matchers,
            memo: HashMap::new(),
        })
    }

    /// Resolve an item name, memoizing the answer.
    pub fn resolve(&mut self, name: &str) -> Option<Resolved> {
        if let Some(hit) = self.memo.get(name) {
            return hit.clone();
        }
        let resolved = self.matchers.iter().find_map(|(category, matcher)| {
            matcher.unit_key(name).map(|unit_key| Resolved {
                category: category.clone(),
                unit_key,
            })
        });
        self.memo.insert(name.to_string(), resolved.clone());
        resolved
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(entries: &[(&str, ItemMatcher)]) -> CategoryResolver {
        let owned: Vec<(CategoryKey, ItemMatcher)> = entries
            .iter()
            .map(|(k, m)| (CategoryKey::new(k), m.clone()))
            .collect();
        CategoryResolver::build(owned.iter().map(|(k, m)| (k, m))).unwrap()
    }

    #[test]
    fn prefix_and_suffix_extract_unit_keys() {
        let mut resolver = resolver(&[
            ("dealers", ItemMatcher::Prefix("Dealer: ".to_string())),
            ("influence", ItemMatcher::Suffix(" Cartel Influence".to_string())),
        ]);
        let dealer = resolver.resolve("Dealer: Benji").unwrap();
        assert_eq!(dealer.category, CategoryKey::new("dealers"));
        assert_eq!(dealer.unit_key, "Benji");

        let region = resolver.resolve("Westville Cartel Influence").unwrap();
        assert_eq!(region.category, CategoryKey::new("influence"));
        assert_eq!(region.unit_key, "Westville");
        assert!(resolver.resolve("Cash Bundle").is_none());
    }

    #[test]
    fn pattern_prefers_named_group() {
        let mut resolver = resolver(&[
            (
                "ranks",
                ItemMatcher::Pattern(r"^Progressive Rank(?: (?P<key>\d+))?$".to_string()),
            ),
            ("cash", ItemMatcher::Exact("Cash Bundle".to_string())),
        ]);
        assert_eq!(resolver.resolve("Progressive Rank 3").unwrap().unit_key, "3");
        assert_eq!(
            resolver.resolve("Progressive Rank").unwrap().unit_key,
            "Progressive Rank"
        );
        assert_eq!(resolver.resolve("Cash Bundle").unwrap().unit_key, "Cash Bundle");
    }

    #[test]
    fn first_matching_category_wins_and_is_memoized() {
        let mut resolver = resolver(&[
            ("special", ItemMatcher::Exact("Dealer: Benji".to_string())),
            ("dealers", ItemMatcher::Prefix("Dealer: ".to_string())),
        ]);
        assert_eq!(
            resolver.resolve("Dealer: Benji").unwrap().category,
            CategoryKey::new("special")
        );
        assert_eq!(
            resolver.resolve("Dealer: Benji").unwrap().category,
            CategoryKey::new("special")
        );
        assert_eq!(
            resolver.resolve("Dealer: Molly").unwrap().category,
            CategoryKey::new("dealers")
        );
    }

    #[test]
    fn validation_rejects_bad_matchers() {
        assert_eq!(
            ItemMatcher::Prefix("  ".to_string()).validate(),
            Err(ConfigError::EmptyMatcher)
        );
        assert!(matches!(
            ItemMatcher::Pattern("(unclosed".to_string()).validate(),
            Err(ConfigError::InvalidPattern { .. })
        ));
        assert!(ItemMatcher::Suffix(" Recipe".to_string()).validate().is_ok());
    }
}
