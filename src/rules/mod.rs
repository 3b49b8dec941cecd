//! # Layout rules
//!
//! A rule maps a predicate over user traits to an effect: which layout to
//! show, optionally which persona to present and any other settings the
//! client should apply.
//!
//! Rules are evaluated in ascending `priority`; the first match wins. Equal
//! priorities are broken by `rule_id` so the outcome never depends on the
//! order a store happens to return rules in.
//!
//! ```yaml
//! rule_id: "10"
//! priority: 1
//! predicate:
//!   trait_key: diet_type
//!   operator: eq
//!   expected_value: vegan
//! effect:
//!   layout_key: vegan_home
//!   persona: plant_coach
//!   areas: [home]
//!   settings:
//!     show_macros: false
//! ```

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::predicate::Predicate;

fn default_active() -> bool {
    true
}

/// What applying a matched rule does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEffect {
    /// Layout to resolve against the layout store.
    pub layout_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,

    /// Display areas this effect applies to. Empty means every area.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub areas: Vec<String>,

    /// Auxiliary settings passed through to the payload untouched.
    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl RuleEffect {
    pub fn new(layout_key: impl Into<String>) -> Self {
        Self {
            layout_key: layout_key.into(),
            persona: None,
            areas: Vec::new(),
            settings: Map::new(),
        }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    pub fn for_area(mut self, area: impl Into<String>) -> Self {
        self.areas.push(area.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn applies_to(&self, area: &str) -> bool {
        self.areas.is_empty() || self.areas.iter().any(|a| a == area)
    }
}

/// A prioritized predicate → effect mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,

    /// Human-readable note for authors.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Missing predicate means the rule always matches.
    #[serde(default)]
    pub predicate: Predicate,

    /// Lower numbers are evaluated first.
    #[serde(default)]
    pub priority: i64,

    pub effect: RuleEffect,

    #[serde(default = "default_active")]
    pub active: bool,
}

impl Rule {
    pub fn new(rule_id: impl Into<String>, priority: i64, predicate: Predicate, effect: RuleEffect) -> Self {
        Self {
            rule_id: rule_id.into(),
            description: String::new(),
            predicate,
            priority,
            effect,
            active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Whether this rule takes part in selection for `area`.
    pub fn is_candidate_for(&self, area: &str) -> bool {
        self.active && self.effect.applies_to(area)
    }
}

/// Compare rule ids: numeric ids numerically, then everything else lexicographically.
///
/// Numeric ids sort before non-numeric ones; ids equal as numbers (`"7"`,
/// `"07"`) fall back to their text.
pub fn compare_rule_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<i128>(), b.parse::<i128>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Evaluation order: ascending priority, then rule id.
pub fn evaluation_order(a: &Rule, b: &Rule) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| compare_rule_ids(&a.rule_id, &b.rule_id))
}

/// Active rules applying to `area`, in evaluation order.
pub fn candidates_for_area<'a>(rules: &'a [Rule], area: &str) -> Vec<&'a Rule> {
    let mut candidates: Vec<&Rule> = rules.iter().filter(|r| r.is_candidate_for(area)).collect();
    candidates.sort_by(|a, b| evaluation_order(a, b));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, priority: i64) -> Rule {
        Rule::new(id, priority, Predicate::Empty, RuleEffect::new(format!("layout_{}", id)))
    }

    #[test]
    fn test_priority_orders_first() {
        let mut rules = vec![rule("a", 5), rule("b", 1), rule("c", 3)];
        rules.sort_by(evaluation_order);
        let ids: Vec<&str> = rules.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_ties_break_on_rule_id() {
        let mut rules = vec![rule("10", 1), rule("9", 1), rule("beta", 1), rule("alpha", 1)];
        rules.sort_by(evaluation_order);
        let ids: Vec<&str> = rules.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["9", "10", "alpha", "beta"]);
    }

    #[test]
    fn test_ordering_ignores_input_order() {
        let a = vec![rule("2", 1), rule("1", 1), rule("3", 0)];
        let mut b = a.clone();
        b.reverse();
        let ids_a: Vec<String> = candidates_for_area(&a, "home").iter().map(|r| r.rule_id.clone()).collect();
        let ids_b: Vec<String> = candidates_for_area(&b, "home").iter().map(|r| r.rule_id.clone()).collect();
        assert_eq!(ids_a, ids_b);
        assert_eq!(ids_a, vec!["3", "1", "2"]);
    }

    #[test]
    fn test_candidates_skip_inactive_and_other_areas() {
        let mut scoped = rule("scoped", 1);
        scoped.effect = scoped.effect.for_area("dashboard");
        let rules = vec![rule("off", 0).inactive(), scoped, rule("global", 2)];
        let home: Vec<&str> = candidates_for_area(&rules, "home").iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(home, vec!["global"]);
        let dash: Vec<&str> = candidates_for_area(&rules, "dashboard").iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(dash, vec!["scoped", "global"]);
    }

    #[test]
    fn test_rule_yaml_defaults() {
        let yaml = r#"
rule_id: r1
effect:
  layout_key: vegan_home
"#;
        let r: Rule = serde_yaml::from_str(yaml).unwrap();
        assert!(r.active);
        assert_eq!(r.priority, 0);
        assert_eq!(r.predicate, Predicate::Empty);
        assert!(r.effect.applies_to("anything"));
    }

    #[test]
    fn test_malformed_predicate_still_loads_rule() {
        let yaml = r#"
rule_id: r2
priority: 3
predicate:
  trait_key: diet_type
  operator: sounds_like
  expected_value: vegan
effect:
  layout_key: vegan_home
"#;
        let r: Rule = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(r.predicate, Predicate::Malformed(_)));
    }
}
