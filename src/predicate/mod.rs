//! # Predicates
//!
//! A predicate is a small boolean expression over a user's traits. Rules carry
//! one each; the [`Evaluator`] decides whether it matches a [`TraitSnapshot`].
//!
//! ## Wire shape
//!
//! Predicates are authored as JSON/YAML objects. Exactly one shape key may be
//! present:
//!
//! ```yaml
//! # leaf
//! trait_key: diet_type
//! operator: eq          # eq | ne | in | not_in | gt | gte | lt | lte
//! expected_value: vegan
//! min_confidence: 0.7   # optional
//!
//! # combinators
//! all: [ ... ]
//! any: [ ... ]
//! not: { ... }
//!
//! # empty object (or null): always matches
//! {}
//! ```
//!
//! Parsing is total. Anything that does not fit one of these shapes becomes
//! [`Predicate::Malformed`], which never matches, so one badly authored rule
//! cannot take down selection for everyone else.
//!
//! [`TraitSnapshot`]: crate::profile::TraitSnapshot

pub mod evaluator;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use evaluator::{evaluate, Diagnostic, DiagnosticKind, Evaluation, Evaluator, DEFAULT_MAX_DEPTH};

/// Nesting beyond this is rejected while parsing, before the evaluator's own cap applies.
pub const PARSE_DEPTH_LIMIT: usize = 256;

/// Leaf comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    In,
    NotIn,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Operator {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Operator::Eq),
            "ne" => Some(Operator::Ne),
            "in" => Some(Operator::In),
            "not_in" => Some(Operator::NotIn),
            "gt" => Some(Operator::Gt),
            "gte" => Some(Operator::Gte),
            "lt" => Some(Operator::Lt),
            "lte" => Some(Operator::Lte),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
        }
    }

    /// Whether both operands are read as numbers.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single trait comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Trait key to look up in the snapshot.
    pub trait_key: String,
    pub operator: Operator,
    /// Scalar for `eq`/`ne`/numeric operators, list for `in`/`not_in`.
    pub expected_value: Value,
    /// Traits below this confidence never match.
    pub min_confidence: Option<f64>,
}

impl Condition {
    pub fn new(trait_key: impl Into<String>, operator: Operator, expected_value: impl Into<Value>) -> Self {
        Self {
            trait_key: trait_key.into(),
            operator,
            expected_value: expected_value.into(),
            min_confidence: None,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = Some(min_confidence);
        self
    }
}

/// A predicate expression tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Predicate {
    /// No fields set. Always matches.
    #[default]
    Empty,
    Leaf(Condition),
    /// Conjunction. Empty list matches.
    All(Vec<Predicate>),
    /// Disjunction. Empty list does not match.
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
    /// Input that did not parse; carries the reason. Never matches.
    Malformed(String),
}

impl Predicate {
    pub fn leaf(trait_key: impl Into<String>, operator: Operator, expected_value: impl Into<Value>) -> Self {
        Predicate::Leaf(Condition::new(trait_key, operator, expected_value))
    }

    pub fn eq(trait_key: impl Into<String>, expected_value: impl Into<Value>) -> Self {
        Self::leaf(trait_key, Operator::Eq, expected_value)
    }

    pub fn all(children: Vec<Predicate>) -> Self {
        Predicate::All(children)
    }

    pub fn any(children: Vec<Predicate>) -> Self {
        Predicate::Any(children)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: Predicate) -> Self {
        Predicate::Not(Box::new(child))
    }

    /// Parse from a JSON value. Never fails; see [`Predicate::Malformed`].
    pub fn from_value(value: &Value) -> Self {
        parse(value, 1)
    }

    pub fn to_value(&self) -> Value {
        match self {
            Predicate::Empty => Value::Object(Map::new()),
            Predicate::Leaf(c) => {
                let mut obj = Map::new();
                obj.insert("trait_key".into(), Value::String(c.trait_key.clone()));
                obj.insert("operator".into(), Value::String(c.operator.as_str().into()));
                obj.insert("expected_value".into(), c.expected_value.clone());
                if let Some(min) = c.min_confidence {
                    obj.insert("min_confidence".into(), serde_json::json!(min));
                }
                Value::Object(obj)
            }
            Predicate::All(children) => single("all", Value::Array(children.iter().map(Self::to_value).collect())),
            Predicate::Any(children) => single("any", Value::Array(children.iter().map(Self::to_value).collect())),
            Predicate::Not(child) => single("not", child.to_value()),
            Predicate::Malformed(reason) => single("malformed", Value::String(reason.clone())),
        }
    }
}

fn single(key: &str, value: Value) -> Value {
    let mut obj = Map::new();
    obj.insert(key.to_string(), value);
    Value::Object(obj)
}

impl From<Value> for Predicate {
    fn from(value: Value) -> Self {
        Predicate::from_value(&value)
    }
}

impl From<Predicate> for Value {
    fn from(predicate: Predicate) -> Self {
        predicate.to_value()
    }
}

const SHAPE_KEYS: [&str; 5] = ["all", "any", "not", "trait_key", "malformed"];
const LEAF_KEYS: [&str; 4] = ["trait_key", "operator", "expected_value", "min_confidence"];

fn parse(value: &Value, depth: usize) -> Predicate {
    if depth > PARSE_DEPTH_LIMIT {
        return Predicate::Malformed(format!("nesting deeper than {}", PARSE_DEPTH_LIMIT));
    }

    let obj = match value {
        Value::Null => return Predicate::Empty,
        Value::Object(obj) => obj,
        other => return Predicate::Malformed(format!("expected an object, found {}", kind_of(other))),
    };

    let shapes: Vec<&str> = SHAPE_KEYS.iter().copied().filter(|k| obj.contains_key(*k)).collect();
    match shapes.as_slice() {
        [] if obj.is_empty() => Predicate::Empty,
        [] => {
            let mut keys: Vec<&str> = obj.keys().map(|k| k.as_str()).collect();
            keys.sort_unstable();
            Predicate::Malformed(format!("no predicate shape in keys [{}]", keys.join(", ")))
        }
        ["malformed"] => Predicate::Malformed(
            obj["malformed"].as_str().unwrap_or("malformed predicate").to_string(),
        ),
        ["trait_key"] => parse_leaf(obj),
        [shape] => {
            if obj.len() > 1 {
                return Predicate::Malformed(format!("'{}' must be the only key", shape));
            }
            let inner = &obj[*shape];
            match *shape {
                "not" => Predicate::Not(Box::new(parse(inner, depth + 1))),
                combinator => match inner.as_array() {
                    Some(items) => {
                        let children = items.iter().map(|v| parse(v, depth + 1)).collect();
                        if combinator == "all" {
                            Predicate::All(children)
                        } else {
                            Predicate::Any(children)
                        }
                    }
                    None => Predicate::Malformed(format!(
                        "'{}' expects a list, found {}",
                        combinator,
                        kind_of(inner)
                    )),
                },
            }
        }
        many => Predicate::Malformed(format!("ambiguous predicate with keys [{}]", many.join(", "))),
    }
}

fn parse_leaf(obj: &Map<String, Value>) -> Predicate {
    if let Some(extra) = obj.keys().find(|k| !LEAF_KEYS.contains(&k.as_str())) {
        return Predicate::Malformed(format!("unexpected key '{}' in leaf", extra));
    }

    let trait_key = match obj.get("trait_key").and_then(Value::as_str) {
        Some(k) if !k.is_empty() => k.to_string(),
        _ => return Predicate::Malformed("trait_key must be a non-empty string".into()),
    };

    let operator = match obj.get("operator").and_then(Value::as_str) {
        Some(op) => match Operator::parse(op) {
            Some(op) => op,
            None => return Predicate::Malformed(format!("unknown operator '{}'", op)),
        },
        None => return Predicate::Malformed(format!("leaf on '{}' has no operator", trait_key)),
    };

    let expected_value = match obj.get("expected_value") {
        Some(v) => v.clone(),
        None => return Predicate::Malformed(format!("leaf on '{}' has no expected_value", trait_key)),
    };

    let min_confidence = match obj.get("min_confidence") {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_f64() {
            Some(min) if min.is_finite() => Some(min),
            _ => return Predicate::Malformed(format!("min_confidence on '{}' is not a number", trait_key)),
        },
    };

    Predicate::Leaf(Condition {
        trait_key,
        operator,
        expected_value,
        min_confidence,
    })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
