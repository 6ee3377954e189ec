//! # Condition Gate
//!
//! Pluggable predicate evaluation for loop matching.
//!
//! The engine ships two evaluators behind one trait:
//!
//! - [`DefaultGate`] is the wired default: an empty condition always passes,
//!   any non-empty condition always skips. The skip is deliberate, not a bug;
//!   richer evaluation is opt-in.
//! - [`ExpressionEvaluator`] is a real evaluator over a tagged expression
//!   tree ([`Condition`]): `always`, `eq`, `exists`, `all`, `any`, `not`,
//!   with dot-path reads into the enriched payload.
//!
//! Evaluation returns `Result<bool>`: a malformed condition is a processing
//! error (it counts against the event's retry budget), distinct from a clean
//! skip.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MirrorError, Result};
use crate::processor::enrichment::lookup_path;

/// Outcome of gating a loop against an enriched payload.
pub trait ConditionEvaluator: Send + Sync {
    /// `Ok(true)` dispatches the loop, `Ok(false)` skips it silently,
    /// `Err` fails the event's processing pass.
    fn evaluate(&self, condition: &Value, payload: &Value) -> Result<bool>;
}

fn is_trivial(condition: &Value) -> bool {
    match condition {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// The default gate: pass the empty condition, skip everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultGate;

impl ConditionEvaluator for DefaultGate {
    fn evaluate(&self, condition: &Value, _payload: &Value) -> Result<bool> {
        Ok(is_trivial(condition))
    }
}

/// A tagged predicate expression over the enriched payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// Unconditional pass.
    Always,
    /// The value at `path` equals `value`.
    Eq { path: String, value: Value },
    /// A non-null value exists at `path`.
    Exists { path: String },
    /// Every sub-condition holds.
    All { conditions: Vec<Condition> },
    /// At least one sub-condition holds.
    Any { conditions: Vec<Condition> },
    /// The sub-condition does not hold.
    Not { condition: Box<Condition> },
}

impl Condition {
    fn holds(&self, payload: &Value) -> bool {
        match self {
            Condition::Always => true,
            Condition::Eq { path, value } => lookup_path(payload, path) == Some(value),
            Condition::Exists { path } => {
                matches!(lookup_path(payload, path), Some(v) if !v.is_null())
            }
            Condition::All { conditions } => conditions.iter().all(|c| c.holds(payload)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.holds(payload)),
            Condition::Not { condition } => !condition.holds(payload),
        }
    }
}

/// Expression-tree evaluator. The empty condition still passes, so swapping
/// this in only changes the fate of non-empty conditions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEvaluator;

impl ConditionEvaluator for ExpressionEvaluator {
    fn evaluate(&self, condition: &Value, payload: &Value) -> Result<bool> {
        if is_trivial(condition) {
            return Ok(true);
        }
        let parsed: Condition = serde_json::from_value(condition.clone())
            .map_err(|e| MirrorError::Condition(format!("malformed condition: {e}")))?;
        Ok(parsed.holds(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_gate_passes_only_the_empty_condition() {
        let gate = DefaultGate;
        let payload = json!({"plan": "pro"});
        assert!(gate.evaluate(&json!({}), &payload).unwrap());
        assert!(gate.evaluate(&Value::Null, &payload).unwrap());
        // Any non-empty condition skips, even one that would hold.
        assert!(!gate
            .evaluate(&json!({"op": "always"}), &payload)
            .unwrap());
        assert!(!gate
            .evaluate(&json!({"op": "eq", "path": "plan", "value": "pro"}), &payload)
            .unwrap());
    }

    #[test]
    fn expression_evaluator_empty_condition_still_passes() {
        let eval = ExpressionEvaluator;
        assert!(eval.evaluate(&json!({}), &json!({})).unwrap());
    }

    #[test]
    fn expression_evaluator_eq_and_exists() {
        let eval = ExpressionEvaluator;
        let payload = json!({"plan": "pro", "org": {"tier": 2}, "gone": null});

        assert!(eval
            .evaluate(&json!({"op": "eq", "path": "plan", "value": "pro"}), &payload)
            .unwrap());
        assert!(!eval
            .evaluate(&json!({"op": "eq", "path": "plan", "value": "free"}), &payload)
            .unwrap());
        assert!(eval
            .evaluate(&json!({"op": "eq", "path": "org.tier", "value": 2}), &payload)
            .unwrap());
        assert!(eval
            .evaluate(&json!({"op": "exists", "path": "org.tier"}), &payload)
            .unwrap());
        assert!(!eval
            .evaluate(&json!({"op": "exists", "path": "gone"}), &payload)
            .unwrap());
        assert!(!eval
            .evaluate(&json!({"op": "exists", "path": "missing"}), &payload)
            .unwrap());
    }

    #[test]
    fn expression_evaluator_combinators() {
        let eval = ExpressionEvaluator;
        let payload = json!({"plan": "pro", "seats": 10});

        let all = json!({"op": "all", "conditions": [
            {"op": "eq", "path": "plan", "value": "pro"},
            {"op": "exists", "path": "seats"}
        ]});
        assert!(eval.evaluate(&all, &payload).unwrap());

        let any = json!({"op": "any", "conditions": [
            {"op": "eq", "path": "plan", "value": "free"},
            {"op": "eq", "path": "seats", "value": 10}
        ]});
        assert!(eval.evaluate(&any, &payload).unwrap());

        let not = json!({"op": "not", "condition": {"op": "eq", "path": "plan", "value": "free"}});
        assert!(eval.evaluate(&not, &payload).unwrap());
    }

    #[test]
    fn malformed_condition_is_an_error_not_a_skip() {
        let eval = ExpressionEvaluator;
        let result = eval.evaluate(&json!({"op": "frobnicate"}), &json!({}));
        assert!(matches!(result, Err(MirrorError::Condition(_))));
    }
}
