//! Value utility functions shared across modules
//!
//! Dotted-path access over JSON documents, value comparison and the
//! canonical string form used for set semantics.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Get nested value from JSON with dot notation support
///
/// Supports:
/// - Simple fields: "name"
/// - Nested objects: "address.city"
/// - Array indexing: "items.0.name"
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use ironsync_core::value_utils::get_nested_value;
///
/// let doc = json!({"address": {"city": "NYC"}});
/// assert_eq!(get_nested_value(&doc, "address.city"), Some(&json!("NYC")));
/// ```
pub fn get_nested_value<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if !path.contains('.') {
        return doc.get(path);
    }

    let mut value = doc;
    for part in path.split('.') {
        match value {
            Value::Object(map) => value = map.get(part)?,
            Value::Array(arr) => {
                let index = part.parse::<usize>().ok()?;
                value = arr.get(index)?;
            }
            _ => return None,
        }
    }
    Some(value)
}

/// Collect every value reachable through `path`, fanning out across arrays
/// of sub-documents.
///
/// `orders.customer.id` against `{"orders": [{"customer": {"id": 1}}, {"customer": {"id": 2}}]}`
/// yields `[1, 2]`. Numeric segments still index into arrays.
pub fn get_path_values<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    collect_path_values(doc, &parts, &mut out);
    out
}

fn collect_path_values<'a>(value: &'a Value, parts: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = parts.split_first() else {
        out.push(value);
        return;
    };

    match value {
        Value::Object(map) => {
            if let Some(next) = map.get(*head) {
                collect_path_values(next, rest, out);
            }
        }
        Value::Array(arr) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(next) = arr.get(index) {
                    collect_path_values(next, rest, out);
                }
                return;
            }
            for element in arr {
                if element.is_object() {
                    collect_path_values(element, parts, out);
                }
            }
        }
        _ => {}
    }
}

/// Resolve a field path the way an aggregation expression does:
/// a path that crosses an array of sub-documents evaluates to the array of
/// the nested values.
pub fn resolve_field_path(doc: &Value, path: &str) -> Option<Value> {
    let parts: Vec<&str> = path.split('.').collect();
    resolve_parts(doc, &parts)
}

fn resolve_parts(value: &Value, parts: &[&str]) -> Option<Value> {
    let Some((head, rest)) = parts.split_first() else {
        return Some(value.clone());
    };

    match value {
        Value::Object(map) => resolve_parts(map.get(*head)?, rest),
        Value::Array(arr) => {
            if let Ok(index) = head.parse::<usize>() {
                return resolve_parts(arr.get(index)?, rest);
            }
            let collected: Vec<Value> = arr
                .iter()
                .filter_map(|element| resolve_parts(element, parts))
                .collect();
            Some(Value::Array(collected))
        }
        _ => None,
    }
}

/// Set a value at a nested path with dot notation support
///
/// Creates intermediate objects if they don't exist. Numeric segments
/// address existing array elements.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use ironsync_core::value_utils::set_nested_value;
///
/// let mut doc = json!({"name": "Alice"});
/// set_nested_value(&mut doc, "address.city", json!("NYC"));
/// assert_eq!(doc["address"]["city"], "NYC");
/// ```
pub fn set_nested_value(doc: &mut Value, path: &str, value: Value) {
    if !path.contains('.') {
        if let Value::Object(ref mut map) = doc {
            map.insert(path.to_string(), value);
        }
        return;
    }

    let parts: Vec<&str> = path.split('.').collect();
    let (last, parents) = match parts.split_last() {
        Some(split) => split,
        None => return,
    };

    let mut current = doc;
    for part in parents {
        current = match current {
            Value::Object(map) => map
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(arr) => match part.parse::<usize>().ok().and_then(|i| arr.get_mut(i)) {
                Some(element) => element,
                None => return,
            },
            _ => return,
        };
    }

    match current {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
        }
        Value::Array(arr) => {
            if let Some(slot) = last.parse::<usize>().ok().and_then(|i| arr.get_mut(i)) {
                *slot = value;
            }
        }
        _ => {}
    }
}

/// Remove the value at a nested path, returning it when present
pub fn remove_nested_value(doc: &mut Value, path: &str) -> Option<Value> {
    let parts: Vec<&str> = path.split('.').collect();
    let (last, parents) = parts.split_last()?;

    let mut current = doc;
    for part in parents {
        current = match current {
            Value::Object(map) => map.get_mut(*part)?,
            Value::Array(arr) => arr.get_mut(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    match current {
        Value::Object(map) => map.remove(*last),
        _ => None,
    }
}

/// Truthiness used by `$cond`, `$expr` and boolean helpers
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => true,
    }
}

/// Compare two JSON values
///
/// Returns `Some(Ordering)` for comparable types (numbers, strings, booleans),
/// `None` for incompatible types (e.g., comparing string to number).
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use std::cmp::Ordering;
/// use ironsync_core::value_utils::compare_values;
///
/// assert_eq!(compare_values(&json!(10), &json!(5)), Some(Ordering::Greater));
/// assert_eq!(compare_values(&json!("a"), &json!("b")), Some(Ordering::Less));
/// assert_eq!(compare_values(&json!("a"), &json!(1)), None);
/// ```
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => {
            let f1 = n1.as_f64()?;
            let f2 = n2.as_f64()?;
            f1.partial_cmp(&f2)
        }
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
        (Value::Object(_), Value::Object(_)) => {
            // Canonical UTC instants share one fixed-width format
            Some(date_str(a)?.cmp(date_str(b)?))
        }
        _ => None,
    }
}

/// The instant string of a `{"$date": ...}` wrapper
pub fn date_str(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) if map.len() == 1 => map.get("$date")?.as_str(),
        _ => None,
    }
}

/// Compare two optional JSON values with None handling
///
/// Missing values and nulls sort before any actual value; incompatible types
/// compare Equal so sorting stays stable.
pub fn compare_values_with_none(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(av), Some(bv)) => compare_values(av, bv).unwrap_or(Ordering::Equal),
    }
}

/// Creates a canonical string representation of a JSON value
/// where object keys are always sorted alphabetically.
///
/// Used by `$addToSet` and `$group` composite keys to deduplicate objects
/// regardless of key insertion order.
pub fn canonical_json_string(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));

            let inner: String = pairs
                .iter()
                .map(|(k, v)| format!("\"{}\":{}", k, canonical_json_string(v)))
                .collect::<Vec<_>>()
                .join(",");

            format!("{{{}}}", inner)
        }
        Value::Array(arr) => {
            let inner: String = arr
                .iter()
                .map(canonical_json_string)
                .collect::<Vec<_>>()
                .join(",");
            format!("[{}]", inner)
        }
        _ => value.to_string(),
    }
}
