//! Structural comparison of JSON documents.
//!
//! The comparison is driven by `expected`: it walks the keys and indices of
//! the expected document and records every place where `actual` disagrees.
//! Keys that only exist in `actual` are not reported, so an expected document
//! acts as a subset template over the observed state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One mismatch between expected and actual.
///
/// `None` means the value was absent at that path (JSON has no `undefined`,
/// and an explicit `null` is a different thing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Difference {
    /// Dotted path, with `[i]` for array indices; empty for the root
    pub path: String,
    /// Expected value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    /// Actual value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
}

/// Outcome of [`compare_objects`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    /// No differences were found
    pub passed: bool,
    /// Every mismatch, in traversal order
    pub differences: Vec<Difference>,
    /// Summary line
    pub message: String,
}

impl ComparisonResult {
    fn from_differences(differences: Vec<Difference>) -> Self {
        let message = match differences.len() {
            0 => "All expected fields match".to_string(),
            1 => format!("1 difference found at '{}'", differences[0].path),
            n => format!("{n} differences found"),
        };
        Self {
            passed: differences.is_empty(),
            differences,
            message,
        }
    }
}

/// Compare `actual` against the `expected` template.
///
/// `path` prefixes every reported path; pass `""` for the root.
#[must_use]
pub fn compare_objects(expected: &Value, actual: &Value, path: &str) -> ComparisonResult {
    compare_slots(Some(expected), Some(actual), path)
}

/// Like [`compare_objects`] but with either side possibly absent.
#[must_use]
pub fn compare_slots(expected: Option<&Value>, actual: Option<&Value>, path: &str) -> ComparisonResult {
    let mut differences = Vec::new();
    diff_into(expected, actual, path, &mut differences);
    ComparisonResult::from_differences(differences)
}

fn diff_into(
    expected: Option<&Value>,
    actual: Option<&Value>,
    path: &str,
    out: &mut Vec<Difference>,
) {
    let expected = match expected {
        None | Some(Value::Null) => {
            if !strict_eq(expected, actual) {
                record(out, path.to_string(), expected, actual);
            }
            return;
        }
        Some(v) => v,
    };

    let actual_value = match actual {
        None | Some(Value::Null) => {
            record(out, path.to_string(), Some(expected), actual);
            return;
        }
        Some(v) => v,
    };

    match expected {
        Value::Array(expected_items) => {
            let Value::Array(actual_items) = actual_value else {
                record(out, path.to_string(), Some(expected), Some(actual_value));
                return;
            };

            if expected_items.len() != actual_items.len() {
                out.push(Difference {
                    path: join_key(path, "length"),
                    expected: Some(Value::from(expected_items.len())),
                    actual: Some(Value::from(actual_items.len())),
                });
            }

            let longest = expected_items.len().max(actual_items.len());
            for i in 0..longest {
                diff_into(
                    expected_items.get(i),
                    actual_items.get(i),
                    &format!("{path}[{i}]"),
                    out,
                );
            }
        }
        Value::Object(expected_fields) => {
            for (key, expected_field) in expected_fields {
                let actual_field = actual_value.as_object().and_then(|m| m.get(key));
                diff_into(Some(expected_field), actual_field, &join_key(path, key), out);
            }
        }
        primitive => {
            if !strict_eq(Some(primitive), Some(actual_value)) {
                record(out, path.to_string(), Some(primitive), Some(actual_value));
            }
        }
    }
}

/// Strict equality without coercion. Numbers compare by value so `1` and
/// `1.0` are equal; a number never equals its string spelling.
fn strict_eq(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) if x.is_f64() || y.is_f64() => fx == fy,
            _ => x == y,
        },
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn record(out: &mut Vec<Difference>, path: String, expected: Option<&Value>, actual: Option<&Value>) {
    out.push(Difference {
        path,
        expected: expected.cloned(),
        actual: actual.cloned(),
    });
}

fn join_key(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}
