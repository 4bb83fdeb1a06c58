//! Keyword rules and the shared store the capture thread reads them from.
//!
//! A [`RuleSet`] keeps its entries in insertion order. That order is part of
//! the matching contract: when several keywords end the buffer, the one
//! inserted first wins.

use crate::config::{BUFFER_MARGIN, DEFAULT_BUFFER_SIZE};
use crate::error::{Result, RetypeError};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// A single keyword and the text that replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub keyword: String,
    pub replacement: String,
}

impl Rule {
    /// Number of characters the keyword occupies in the focused application.
    pub fn keyword_len(&self) -> usize {
        self.keyword.chars().count()
    }
}

/// Ordered keyword -> replacement mapping with unique keywords.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a rule set from pairs, keeping their order.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut rules = Self::new();
        for (keyword, replacement) in pairs {
            rules.insert(keyword, replacement)?;
        }
        Ok(rules)
    }

    /// Rules written to a fresh config file.
    pub fn sample() -> Self {
        let pairs = [
            ("!email", "my.email.address@example.com"),
            ("!addr", "Seoul, Gangnam-gu, Teheran-ro 123"),
            ("!greet", "Hello there! Have a nice day."),
            (
                "longkwtest",
                "This is a test for a longer keyword replacement.",
            ),
        ];
        Self {
            rules: pairs
                .iter()
                .map(|(keyword, replacement)| Rule {
                    keyword: keyword.to_string(),
                    replacement: replacement.to_string(),
                })
                .collect(),
        }
    }

    /// Insert a rule. An existing keyword keeps its position and gets the
    /// new replacement.
    pub fn insert(&mut self, keyword: impl Into<String>, replacement: impl Into<String>) -> Result<()> {
        let keyword = keyword.into();
        let replacement = replacement.into();
        if keyword.is_empty() {
            return Err(RetypeError::InvalidRule(
                "keyword must not be empty".to_string(),
            ));
        }

        match self.rules.iter_mut().find(|rule| rule.keyword == keyword) {
            Some(rule) => rule.replacement = replacement,
            None => self.rules.push(Rule {
                keyword,
                replacement,
            }),
        }
        Ok(())
    }

    /// Remove a rule, returning its replacement.
    pub fn remove(&mut self, keyword: &str) -> Option<String> {
        let index = self.rules.iter().position(|rule| rule.keyword == keyword)?;
        Some(self.rules.remove(index).replacement)
    }

    pub fn get(&self, keyword: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.keyword == keyword)
            .map(|rule| rule.replacement.as_str())
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.get(keyword).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Longest keyword plus a margin, or the floor size for an empty set.
    pub fn max_buffer_size(&self) -> usize {
        self.rules
            .iter()
            .map(Rule::keyword_len)
            .max()
            .map(|longest| longest + BUFFER_MARGIN)
            .unwrap_or(DEFAULT_BUFFER_SIZE)
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

impl Serialize for RuleSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.rules.len()))?;
        for rule in &self.rules {
            map.serialize_entry(&rule.keyword, &rule.replacement)?;
        }
        map.end()
    }
}

struct RuleSetVisitor;

impl<'de> Visitor<'de> for RuleSetVisitor {
    type Value = RuleSet;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of keyword to replacement text")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<RuleSet, A::Error> {
        let mut rules = RuleSet::new();
        while let Some((keyword, replacement)) = access.next_entry::<String, String>()? {
            if keyword.is_empty() {
                warn!("Skipping rule with an empty keyword");
                continue;
            }
            // Keyword is non-empty, insert cannot fail
            let _ = rules.insert(keyword, replacement);
        }
        Ok(rules)
    }
}

impl<'de> Deserialize<'de> for RuleSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(RuleSetVisitor)
    }
}

/// An immutable view of the active rules.
#[derive(Debug)]
pub struct RuleSnapshot {
    rules: Arc<RuleSet>,
    max_buffer_size: usize,
    generation: u64,
}

impl RuleSnapshot {
    fn new(rules: RuleSet, generation: u64) -> Self {
        let max_buffer_size = rules.max_buffer_size();
        Self {
            rules: Arc::new(rules),
            max_buffer_size,
            generation,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Holds the active rules. Replacement swaps the whole snapshot, so readers
/// see either the old rule set or the new one, never a mix.
#[derive(Debug)]
pub struct RuleStore {
    current: RwLock<Arc<RuleSnapshot>>,
    generation: AtomicU64,
}

impl RuleStore {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(RuleSnapshot::new(rules, 0))),
            generation: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// The active rule set.
    pub fn rules(&self) -> Arc<RuleSet> {
        Arc::clone(&self.snapshot().rules)
    }

    /// Bumped on every [`RuleStore::replace`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Swap in a new rule set and return the snapshot built for it.
    pub fn replace(&self, rules: RuleSet) -> Arc<RuleSnapshot> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let generation = guard.generation + 1;
        let snapshot = Arc::new(RuleSnapshot::new(rules, generation));
        *guard = Arc::clone(&snapshot);
        self.generation.store(generation, Ordering::Release);

        debug!(
            rules = snapshot.rules.len(),
            max_buffer_size = snapshot.max_buffer_size,
            generation,
            "Rule set replaced"
        );
        snapshot
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new(RuleSet::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_buffer_size_follows_longest_keyword() {
        let rules = RuleSet::from_pairs([("!email", "a@b.com")]).unwrap();
        assert_eq!(rules.max_buffer_size(), 11);

        let rules = RuleSet::from_pairs([("kw", "A"), ("longkw", "B")]).unwrap();
        assert_eq!(rules.max_buffer_size(), 11);

        assert_eq!(RuleSet::new().max_buffer_size(), DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn keyword_length_counts_characters() {
        let rules = RuleSet::from_pairs([("éé", "x")]).unwrap();
        assert_eq!(rules.max_buffer_size(), 2 + BUFFER_MARGIN);
    }

    #[test]
    fn empty_keyword_is_rejected() {
        let mut rules = RuleSet::new();
        assert!(matches!(
            rules.insert("", "nothing"),
            Err(RetypeError::InvalidRule(_))
        ));
        assert!(rules.is_empty());
    }

    #[test]
    fn reinserting_keeps_position() {
        let mut rules = RuleSet::from_pairs([("a1", "x"), ("b2", "y")]).unwrap();
        rules.insert("a1", "z").unwrap();

        let keywords: Vec<_> = rules.iter().map(|r| r.keyword.as_str()).collect();
        assert_eq!(keywords, ["a1", "b2"]);
        assert_eq!(rules.get("a1"), Some("z"));
    }

    #[test]
    fn json_keeps_document_order() {
        let json = r#"{"zeta": "1", "alpha": "2", "mid": "3"}"#;
        let rules: RuleSet = serde_json::from_str(json).unwrap();

        let keywords: Vec<_> = rules.iter().map(|r| r.keyword.as_str()).collect();
        assert_eq!(keywords, ["zeta", "alpha", "mid"]);

        let written = serde_json::to_string(&rules).unwrap();
        assert_eq!(written, r#"{"zeta":"1","alpha":"2","mid":"3"}"#);
    }

    #[test]
    fn json_skips_empty_keywords() {
        let rules: RuleSet = serde_json::from_str(r#"{"": "x", "ok": "y"}"#).unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules.contains("ok"));
    }

    #[test]
    fn store_replace_swaps_snapshot_and_bumps_generation() {
        let store = RuleStore::new(RuleSet::sample());
        let before = store.snapshot();
        assert_eq!(store.generation(), 0);

        let after = store.replace(RuleSet::new());
        assert_eq!(store.generation(), 1);
        assert_eq!(after.generation(), 1);
        assert_eq!(after.max_buffer_size(), DEFAULT_BUFFER_SIZE);
        assert!(store.rules().is_empty());

        // Old readers keep their view
        assert_eq!(before.rules().len(), 4);
    }
}
