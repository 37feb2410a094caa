//
// rules.rs
// Dicom-Hanging-rs
//
// Evaluates a single matching rule: resolve the attribute, apply every operator of the constraint
// and report pass/fail with the weight contributed to the score.
//
// Thales Matheus Mendonça Santos - November 2025

use serde_json::Value;

use crate::attributes::{AttributeResolver, MatchContext, Subject};
use crate::models::RuleResult;
use crate::protocol::{Operator, Rule};

#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub passed: bool,
    /// Rule weight on pass, zero otherwise.
    pub score: f64,
    pub detail: RuleResult,
}

pub fn evaluate(
    rule: &Rule,
    resolver: &AttributeResolver,
    subject: &Subject<'_>,
    context: &MatchContext<'_>,
) -> RuleOutcome {
    let actual = resolver.resolve(&rule.attribute, subject, context);
    let failure = rule
        .constraint
        .0
        .iter()
        .find_map(|(op, expected)| check(*op, actual.as_ref(), expected.value()).err());

    let passed = failure.is_none();
    let message = failure.map(|reason| format!("{} {}", rule.attribute, reason));
    RuleOutcome {
        passed,
        score: if passed { rule.weight } else { 0.0 },
        detail: RuleResult {
            rule: rule.clone(),
            message,
        },
    }
}

/// Apply one operator. `Err` carries the failure reason.
pub fn check(op: Operator, actual: Option<&Value>, expected: &Value) -> Result<(), String> {
    let Some(actual) = actual else {
        return if is_negated(op) {
            Ok(())
        } else {
            Err("is missing".to_string())
        };
    };

    let ok = match op {
        Operator::Equals => values_equal(actual, expected),
        Operator::DoesNotEqual => !values_equal(actual, expected),
        Operator::Contains => text_test(actual, expected, |a, e| a.contains(e)),
        Operator::DoesNotContain => !text_test(actual, expected, |a, e| a.contains(e)),
        Operator::StartsWith => text_test(actual, expected, |a, e| a.starts_with(e)),
        Operator::EndsWith => text_test(actual, expected, |a, e| a.ends_with(e)),
        Operator::Includes => includes(actual, expected),
        Operator::DoesNotInclude => !includes(actual, expected),
        Operator::GreaterThan => numeric_test(actual, expected, |a, e| a > e),
        Operator::LessThan => numeric_test(actual, expected, |a, e| a < e),
    };

    if ok {
        Ok(())
    } else {
        Err(format!("{} {} failed (found {})", operator_name(op), expected, actual))
    }
}

fn is_negated(op: Operator) -> bool {
    matches!(
        op,
        Operator::DoesNotEqual | Operator::DoesNotContain | Operator::DoesNotInclude
    )
}

fn operator_name(op: Operator) -> &'static str {
    match op {
        Operator::Equals => "equals",
        Operator::DoesNotEqual => "doesNotEqual",
        Operator::Contains => "contains",
        Operator::DoesNotContain => "doesNotContain",
        Operator::Includes => "includes",
        Operator::DoesNotInclude => "doesNotInclude",
        Operator::StartsWith => "startsWith",
        Operator::EndsWith => "endsWith",
        Operator::GreaterThan => "greaterThan",
        Operator::LessThan => "lessThan",
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Array(a), Value::Array(e)) => {
            a.len() == e.len() && a.iter().zip(e).all(|(a, e)| values_equal(a, e))
        }
        // DICOM IS/DS values travel as strings, so compare numerically when either side is a number.
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            match (as_number(actual), as_number(expected)) {
                (Some(a), Some(e)) => a == e,
                _ => false,
            }
        }
        _ => actual == expected,
    }
}

/// Case-insensitive string test; arrays on either side pass if any element does.
fn text_test(actual: &Value, expected: &Value, test: fn(&str, &str) -> bool) -> bool {
    if let Value::Array(items) = actual {
        return items.iter().any(|item| text_test(item, expected, test));
    }
    if let Value::Array(options) = expected {
        return options.iter().any(|option| text_test(actual, option, test));
    }
    match (as_text(actual), as_text(expected)) {
        (Some(a), Some(e)) => test(&a.to_lowercase(), &e.to_lowercase()),
        _ => false,
    }
}

fn includes(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Array(items), Value::Array(options)) => items
            .iter()
            .any(|item| options.iter().any(|option| values_equal(item, option))),
        (_, Value::Array(options)) => options.iter().any(|option| values_equal(actual, option)),
        (Value::Array(items), _) => items.iter().any(|item| values_equal(item, expected)),
        _ => values_equal(actual, expected),
    }
}

fn numeric_test(actual: &Value, expected: &Value, test: fn(f64, f64) -> bool) -> bool {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(e)) => test(a, e),
        _ => false,
    }
}
