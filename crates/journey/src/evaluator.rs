use std::cmp::Ordering;

use serde_json::Value;
use tracing::info;

use carepath_core::types::{Condition, Operator, PatientContext};

/// Evaluates conditional-node predicates against a patient context.
///
/// Comparison rules:
/// - `eq`/`ne` use structural equality, with numbers compared by value
///   (`65 == 65.0`).
/// - `gt`/`gte`/`lt`/`lte` only order number against number and string
///   against string. Every other pairing, including an absent field, is false.
/// - `in`/`nin` require an array literal; with any other literal both are false.
///
/// An absent field reads as `null`.
#[derive(Debug, Clone)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, condition: &Condition, context: &PatientContext) -> bool {
        let actual = context.field(&condition.field);
        let result = compare(condition.operator, &actual, &condition.value);

        info!(
            field = %condition.field,
            operator = %condition.operator,
            literal = %condition.value,
            patient_value = %actual,
            result,
            "Evaluated condition"
        );

        result
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies `op` to a patient value and a literal.
pub fn compare(op: Operator, actual: &Value, literal: &Value) -> bool {
    match op {
        Operator::Eq => loosely_equal(actual, literal),
        Operator::Ne => !loosely_equal(actual, literal),
        Operator::Gt => matches!(order(actual, literal), Some(Ordering::Greater)),
        Operator::Gte => matches!(
            order(actual, literal),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::Lt => matches!(order(actual, literal), Some(Ordering::Less)),
        Operator::Lte => matches!(
            order(actual, literal),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Operator::In => match literal {
            Value::Array(items) => items.iter().any(|item| loosely_equal(actual, item)),
            _ => false,
        },
        Operator::Nin => match literal {
            Value::Array(items) => !items.iter().any(|item| loosely_equal(actual, item)),
            _ => false,
        },
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| loosely_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| loosely_equal(x, y)))
        }
        _ => a == b,
    }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
