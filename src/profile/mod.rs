//! User profile data: traits and feature flags.
//!
//! A trait is a keyed, confidence-weighted attribute describing a user, either
//! stated by the user or inferred elsewhere. Feature flags follow the same
//! lifecycle. Both are owned by external stores; the selector only ever reads a
//! point-in-time [`TraitSnapshot`] and a feature map.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a trait value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraitSource {
    /// Entered by the user.
    #[default]
    Explicit,
    /// Produced by an external inference process.
    Inferred,
    /// Copied from another system.
    Imported,
}

fn default_confidence() -> f64 {
    1.0
}

/// A single user trait. Unique per `(user_id, key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTrait {
    pub user_id: String,
    pub key: String,
    pub value: Value,
    /// Confidence in `[0, 1]`.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub source: TraitSource,
}

impl UserTrait {
    /// Create an explicit trait with full confidence.
    pub fn new(user_id: impl Into<String>, key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            user_id: user_id.into(),
            key: key.into(),
            value: value.into(),
            confidence: 1.0,
            source: TraitSource::Explicit,
        }
    }

    /// Set the confidence, clamped to `[0, 1]`. NaN becomes 0.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_confidence(confidence);
        self
    }

    pub fn with_source(mut self, source: TraitSource) -> Self {
        self.source = source;
        self
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// The part of a trait the evaluator looks at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitValue {
    pub value: Value,
    pub confidence: f64,
}

impl TraitValue {
    pub fn new(value: impl Into<Value>, confidence: f64) -> Self {
        Self {
            value: value.into(),
            confidence: clamp_confidence(confidence),
        }
    }

    /// The raw string form of the value used for equality and membership.
    ///
    /// Strings compare by their content, everything else by its JSON text
    /// (`true`, `42`, `null`).
    pub fn raw(&self) -> Cow<'_, str> {
        raw_string(&self.value)
    }

    /// The value as a number, if it is one or is a string that parses as one.
    pub fn as_number(&self) -> Option<f64> {
        numeric(&self.value)
    }
}

/// Raw string form of a JSON value: string content, or JSON text otherwise.
pub fn raw_string(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

/// Numeric reading of a JSON value. Non-finite results are rejected.
pub fn numeric(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// A point-in-time view of one user's traits, keyed by trait key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraitSnapshot {
    traits: HashMap<String, TraitValue>,
}

impl TraitSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from stored traits. Later duplicates of a key win.
    pub fn from_traits<'a>(traits: impl IntoIterator<Item = &'a UserTrait>) -> Self {
        let traits = traits
            .into_iter()
            .map(|t| (t.key.clone(), TraitValue::new(t.value.clone(), t.confidence)))
            .collect();
        Self { traits }
    }

    /// Insert or replace a trait value. Returns `self` for chaining in tests and seeds.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>, confidence: f64) -> Self {
        self.insert(key, TraitValue::new(value, confidence));
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: TraitValue) {
        self.traits.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&TraitValue> {
        self.traits.get(key)
    }

    pub fn len(&self) -> usize {
        self.traits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traits.is_empty()
    }
}

/// A per-user feature flag. Read-only from the selector's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub user_id: String,
    pub key: String,
    pub enabled: bool,
    #[serde(default)]
    pub variant: String,
}

impl FeatureFlag {
    pub fn new(user_id: impl Into<String>, key: impl Into<String>, enabled: bool) -> Self {
        Self {
            user_id: user_id.into(),
            key: key.into(),
            enabled,
            variant: String::new(),
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = variant.into();
        self
    }
}

/// Feature state as it appears in a layout payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureState {
    pub enabled: bool,
    pub variant: String,
}

/// Ordered feature map, so payloads built from the same flags serialize identically.
pub type FeatureSet = BTreeMap<String, FeatureState>;

/// Collapse stored flags into a [`FeatureSet`].
pub fn feature_set<'a>(flags: impl IntoIterator<Item = &'a FeatureFlag>) -> FeatureSet {
    flags
        .into_iter()
        .map(|f| {
            (
                f.key.clone(),
                FeatureState {
                    enabled: f.enabled,
                    variant: f.variant.clone(),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_confidence_is_clamped() {
        let t = UserTrait::new("u1", "diet_type", "vegan").with_confidence(1.7);
        assert_eq!(t.confidence, 1.0);
        let t = UserTrait::new("u1", "diet_type", "vegan").with_confidence(-0.2);
        assert_eq!(t.confidence, 0.0);
        let t = UserTrait::new("u1", "diet_type", "vegan").with_confidence(f64::NAN);
        assert_eq!(t.confidence, 0.0);
    }

    #[test]
    fn test_raw_string_forms() {
        assert_eq!(raw_string(&json!("vegan")), "vegan");
        assert_eq!(raw_string(&json!(42)), "42");
        assert_eq!(raw_string(&json!(true)), "true");
        assert_eq!(raw_string(&json!(null)), "null");
    }

    #[test]
    fn test_numeric_reading() {
        assert_eq!(numeric(&json!(3.5)), Some(3.5));
        assert_eq!(numeric(&json!(" 12 ")), Some(12.0));
        assert_eq!(numeric(&json!("twelve")), None);
        assert_eq!(numeric(&json!(true)), None);
        assert_eq!(numeric(&json!("NaN")), None);
    }

    #[test]
    fn test_snapshot_from_traits() {
        let traits = vec![
            UserTrait::new("u1", "diet_type", "vegan").with_confidence(0.9),
            UserTrait::new("u1", "age", 34),
        ];
        let snapshot = TraitSnapshot::from_traits(&traits);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("diet_type").unwrap().confidence, 0.9);
        assert_eq!(snapshot.get("age").unwrap().as_number(), Some(34.0));
        assert!(snapshot.get("missing").is_none());
    }

    #[test]
    fn test_feature_set_is_ordered() {
        let flags = vec![
            FeatureFlag::new("u1", "zeta", true),
            FeatureFlag::new("u1", "alpha", false).with_variant("b"),
        ];
        let set = feature_set(&flags);
        let keys: Vec<&str> = set.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["alpha", "zeta"]);
        assert_eq!(set["alpha"].variant, "b");
    }
}
