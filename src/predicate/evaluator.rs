//! Predicate evaluation against a trait snapshot.
//!
//! Evaluation is pure and total:
//!
//! - A structurally broken tree (a [`Predicate::Malformed`] node anywhere, or
//!   nesting beyond the evaluator's depth cap) does not match as a whole. The
//!   check runs before any leaf is looked at, so a broken node under a `not`
//!   cannot turn into a match.
//! - Leaf-level data problems (a numeric operator on a non-numeric value, a
//!   membership operator without a list) make that leaf `false` and nothing
//!   more.
//!
//! Problems are reported as [`Diagnostic`]s; the evaluator itself never logs.

use serde::Serialize;

use super::{Condition, Operator, Predicate};
use crate::profile::{numeric, raw_string, TraitSnapshot};

/// Default recursion cap.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Category of an evaluation problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Malformed,
    DepthExceeded,
    NonNumericOperand,
    ExpectedList,
}

/// Something the evaluator resolved as a non-match instead of failing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub detail: String,
}

impl Diagnostic {
    fn new(kind: DiagnosticKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Result of [`Evaluator::evaluate_with_diagnostics`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evaluation {
    pub matched: bool,
    pub diagnostics: Vec<Diagnostic>,
}

/// Evaluates predicates with a fixed recursion cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluator {
    max_depth: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

/// Evaluate with the default depth cap, discarding diagnostics.
pub fn evaluate(traits: &TraitSnapshot, expr: &Predicate) -> bool {
    Evaluator::default().evaluate(traits, expr)
}

impl Evaluator {
    /// A cap of 0 is raised to 1 so the empty predicate still evaluates.
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn evaluate(&self, traits: &TraitSnapshot, expr: &Predicate) -> bool {
        self.evaluate_with_diagnostics(traits, expr).matched
    }

    pub fn evaluate_with_diagnostics(&self, traits: &TraitSnapshot, expr: &Predicate) -> Evaluation {
        let mut diagnostics = Vec::new();

        if let Some(problem) = self.structural_problem(expr, 1) {
            diagnostics.push(problem);
            return Evaluation {
                matched: false,
                diagnostics,
            };
        }

        let matched = eval(traits, expr, &mut diagnostics);
        Evaluation {
            matched,
            diagnostics,
        }
    }

    /// First malformed node or depth overrun, walking children in order.
    fn structural_problem(&self, expr: &Predicate, depth: usize) -> Option<Diagnostic> {
        if depth > self.max_depth {
            return Some(Diagnostic::new(
                DiagnosticKind::DepthExceeded,
                format!("predicate nests deeper than {} levels", self.max_depth),
            ));
        }
        match expr {
            Predicate::Malformed(reason) => {
                Some(Diagnostic::new(DiagnosticKind::Malformed, reason.clone()))
            }
            Predicate::All(children) | Predicate::Any(children) => children
                .iter()
                .find_map(|c| self.structural_problem(c, depth + 1)),
            Predicate::Not(child) => self.structural_problem(child, depth + 1),
            Predicate::Empty | Predicate::Leaf(_) => None,
        }
    }
}

fn eval(traits: &TraitSnapshot, expr: &Predicate, diagnostics: &mut Vec<Diagnostic>) -> bool {
    match expr {
        Predicate::Empty => true,
        Predicate::Leaf(condition) => leaf_matches(traits, condition, diagnostics),
        // Vacuously true.
        Predicate::All(children) if children.is_empty() => true,
        Predicate::All(children) => children.iter().all(|c| eval(traits, c, diagnostics)),
        Predicate::Any(children) => children.iter().any(|c| eval(traits, c, diagnostics)),
        Predicate::Not(child) => !eval(traits, child, diagnostics),
        // Filtered out by the structural pass.
        Predicate::Malformed(_) => false,
    }
}

fn leaf_matches(traits: &TraitSnapshot, condition: &Condition, diagnostics: &mut Vec<Diagnostic>) -> bool {
    // Missing trait never matches, for every operator including not_in.
    let actual = match traits.get(&condition.trait_key) {
        Some(v) => v,
        None => return false,
    };

    if let Some(min) = condition.min_confidence {
        if actual.confidence < min {
            return false;
        }
    }

    let expected = &condition.expected_value;
    match condition.operator {
        Operator::Eq => actual.raw() == raw_string(expected),
        Operator::Ne => actual.raw() != raw_string(expected),
        Operator::In | Operator::NotIn => {
            let list = match expected.as_array() {
                Some(list) => list,
                None => {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::ExpectedList,
                        format!(
                            "'{}' {} needs a list of expected values",
                            condition.trait_key, condition.operator
                        ),
                    ));
                    return false;
                }
            };
            let raw = actual.raw();
            if condition.operator == Operator::In {
                list.iter().any(|e| raw_string(e) == raw)
            } else {
                // Not equal to every element; true for an empty list.
                list.iter().all(|e| raw_string(e) != raw)
            }
        }
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            match (actual.as_number(), numeric(expected)) {
                (Some(a), Some(b)) => match condition.operator {
                    Operator::Gt => a > b,
                    Operator::Gte => a >= b,
                    Operator::Lt => a < b,
                    _ => a <= b,
                },
                _ => {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::NonNumericOperand,
                        format!(
                            "'{}' {} compares {} with {}",
                            condition.trait_key,
                            condition.operator,
                            actual.raw(),
                            raw_string(expected)
                        ),
                    ));
                    false
                }
            }
        }
    }
}
