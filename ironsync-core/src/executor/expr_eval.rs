// src/executor/expr_eval.rs
//! Aggregation expression evaluation for the in-memory executor
//!
//! Evaluates the expression language used inside `$project`, `$addFields`,
//! `$group`, `$expr` and `$lookup` pipelines against one document.
//! `$field` reads a (dotted) field of the document, `$$name` reads a
//! variable bound by `$lookup.let`.

use crate::error::{IronSyncError, Result};
use crate::value_utils::{compare_values, date_str, is_truthy, resolve_field_path};
use chrono::{DateTime, Datelike, FixedOffset};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;

/// Variables visible to `$$name` references
pub type Vars = Map<String, Value>;

/// Evaluate an expression; missing fields evaluate to `Null`
pub fn evaluate(expr: &Value, doc: &Value, vars: &Vars) -> Result<Value> {
    match expr {
        Value::String(s) => Ok(resolve_reference(s, doc, vars).unwrap_or(Value::Null)),
        Value::Array(items) => items
            .iter()
            .map(|item| evaluate(item, doc, vars))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(obj) => {
            let mut entries = obj.iter();
            match (entries.next(), entries.next()) {
                (Some((op, args)), None) if op.starts_with('$') => {
                    evaluate_operator(op, args, doc, vars)
                }
                _ => {
                    // Object literal whose fields are expressions
                    let mut out = Map::new();
                    for (key, value) in obj {
                        out.insert(key.clone(), evaluate(value, doc, vars)?);
                    }
                    Ok(Value::Object(out))
                }
            }
        }
        other => Ok(other.clone()),
    }
}

/// Resolve `$field` / `$$var.path`; plain strings are literals
pub fn resolve_reference(raw: &str, doc: &Value, vars: &Vars) -> Option<Value> {
    if let Some(var_path) = raw.strip_prefix("$$") {
        let (name, rest) = match var_path.split_once('.') {
            Some((name, rest)) => (name, Some(rest)),
            None => (var_path, None),
        };
        let bound = match name {
            "ROOT" | "CURRENT" => doc,
            _ => vars.get(name)?,
        };
        return match rest {
            Some(path) => resolve_field_path(bound, path),
            None => Some(bound.clone()),
        };
    }

    match raw.strip_prefix('$') {
        Some(path) => resolve_field_path(doc, path),
        None => Some(Value::String(raw.to_string())),
    }
}

fn evaluate_operator(op: &str, args: &Value, doc: &Value, vars: &Vars) -> Result<Value> {
    match op {
        "$literal" => Ok(args.clone()),
        // Date literals stay in wire form
        "$date" => Ok(json!({ "$date": args })),

        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
            let (left, right) = binary_args(op, args, doc, vars)?;
            let ordering = if left == right {
                Some(Ordering::Equal)
            } else {
                compare_values(&left, &right)
            };
            let result = match op {
                "$eq" => ordering == Some(Ordering::Equal),
                "$ne" => ordering != Some(Ordering::Equal),
                "$gt" => ordering == Some(Ordering::Greater),
                "$gte" => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                "$lt" => ordering == Some(Ordering::Less),
                _ => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            };
            Ok(Value::Bool(result))
        }

        "$and" => {
            for item in list_args(op, args)? {
                if !is_truthy(&evaluate(item, doc, vars)?) {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        "$or" => {
            for item in list_args(op, args)? {
                if is_truthy(&evaluate(item, doc, vars)?) {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "$not" => {
            let inner = match args {
                Value::Array(items) if items.len() == 1 => &items[0],
                other => other,
            };
            Ok(Value::Bool(!is_truthy(&evaluate(inner, doc, vars)?)))
        }

        "$in" => {
            let (needle, haystack) = binary_args(op, args, doc, vars)?;
            match haystack {
                Value::Array(items) => Ok(Value::Bool(items.contains(&needle))),
                _ => Err(IronSyncError::AggregationError(
                    "$in requires an array as its second argument".to_string(),
                )),
            }
        }

        "$size" => match evaluate(args, doc, vars)? {
            Value::Array(items) => Ok(json!(items.len())),
            other => Err(IronSyncError::AggregationError(format!(
                "$size requires an array, got {}",
                other
            ))),
        },

        "$first" | "$last" => match evaluate(args, doc, vars)? {
            Value::Array(items) => {
                let picked = if op == "$first" { items.first() } else { items.last() };
                Ok(picked.cloned().unwrap_or(Value::Null))
            }
            Value::Null => Ok(Value::Null),
            other => Err(IronSyncError::AggregationError(format!(
                "{} requires an array, got {}",
                op, other
            ))),
        },

        "$arrayElemAt" => {
            let (array, index) = binary_args(op, args, doc, vars)?;
            let index = index.as_i64().ok_or_else(|| {
                IronSyncError::AggregationError("$arrayElemAt index must be an integer".to_string())
            })?;
            match array {
                Value::Array(items) => {
                    let position = if index < 0 {
                        items.len() as i64 + index
                    } else {
                        index
                    };
                    Ok(usize::try_from(position)
                        .ok()
                        .and_then(|i| items.get(i).cloned())
                        .unwrap_or(Value::Null))
                }
                _ => Ok(Value::Null),
            }
        }

        "$concat" => {
            let mut out = String::new();
            for item in list_args(op, args)? {
                match evaluate(item, doc, vars)? {
                    Value::String(s) => out.push_str(&s),
                    Value::Null => return Ok(Value::Null),
                    other => {
                        return Err(IronSyncError::AggregationError(format!(
                            "$concat only supports strings, got {}",
                            other
                        )))
                    }
                }
            }
            Ok(Value::String(out))
        }

        "$add" | "$multiply" => {
            let mut acc = if op == "$add" { 0.0 } else { 1.0 };
            let mut all_int = true;
            for item in list_args(op, args)? {
                let value = evaluate(item, doc, vars)?;
                if value.is_null() {
                    return Ok(Value::Null);
                }
                all_int &= value.is_i64();
                let n = number_of(op, &value)?;
                acc = if op == "$add" { acc + n } else { acc * n };
            }
            Ok(number_value(acc, all_int))
        }
        "$subtract" | "$divide" => {
            let (left, right) = binary_args(op, args, doc, vars)?;
            if left.is_null() || right.is_null() {
                return Ok(Value::Null);
            }
            let (l, r) = (number_of(op, &left)?, number_of(op, &right)?);
            if op == "$subtract" {
                Ok(number_value(l - r, left.is_i64() && right.is_i64()))
            } else if r == 0.0 {
                Err(IronSyncError::AggregationError("can't $divide by zero".to_string()))
            } else {
                Ok(json!(l / r))
            }
        }

        "$sum" | "$avg" | "$min" | "$max" => {
            let values = match evaluate(args, doc, vars)? {
                Value::Array(items) => items,
                single => vec![single],
            };
            Ok(fold_values(op, &values))
        }

        "$cond" => {
            let (condition, then, otherwise) = match args {
                Value::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
                Value::Object(obj) => match (obj.get("if"), obj.get("then"), obj.get("else")) {
                    (Some(c), Some(t), Some(e)) => (c, t, e),
                    _ => {
                        return Err(IronSyncError::AggregationError(
                            "$cond requires if, then and else".to_string(),
                        ))
                    }
                },
                _ => {
                    return Err(IronSyncError::AggregationError(
                        "$cond requires an object or a 3-element array".to_string(),
                    ))
                }
            };
            if is_truthy(&evaluate(condition, doc, vars)?) {
                evaluate(then, doc, vars)
            } else {
                evaluate(otherwise, doc, vars)
            }
        }

        "$ifNull" => {
            for item in list_args(op, args)? {
                let value = evaluate(item, doc, vars)?;
                if !value.is_null() {
                    return Ok(value);
                }
            }
            Ok(Value::Null)
        }

        "$year" | "$month" | "$week" | "$dayOfMonth" | "$dayOfWeek" => {
            let value = evaluate(args, doc, vars)?;
            match parse_date(&value) {
                Some(date) => Ok(json!(date_part(op, &date))),
                None if value.is_null() => Ok(Value::Null),
                None => Err(IronSyncError::AggregationError(format!(
                    "{} requires a date, got {}",
                    op, value
                ))),
            }
        }

        _ => Err(IronSyncError::AggregationError(format!(
            "Unsupported expression operator: {}",
            op
        ))),
    }
}

fn list_args<'a>(op: &str, args: &'a Value) -> Result<&'a Vec<Value>> {
    args.as_array()
        .ok_or_else(|| IronSyncError::AggregationError(format!("{} requires an array", op)))
}

fn binary_args(op: &str, args: &Value, doc: &Value, vars: &Vars) -> Result<(Value, Value)> {
    match args {
        Value::Array(items) if items.len() == 2 => {
            Ok((evaluate(&items[0], doc, vars)?, evaluate(&items[1], doc, vars)?))
        }
        _ => Err(IronSyncError::AggregationError(format!(
            "{} requires exactly 2 arguments",
            op
        ))),
    }
}

fn number_of(op: &str, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        IronSyncError::AggregationError(format!("{} only supports numeric types, got {}", op, value))
    })
}

fn number_value(n: f64, integral: bool) -> Value {
    if integral && n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

/// Fold `$sum`/`$avg`/`$min`/`$max` over already-evaluated values
///
/// Non-numeric values are ignored by `$sum`/`$avg`; `$min`/`$max` compare any
/// comparable values and skip nulls.
pub fn fold_values(op: &str, values: &[Value]) -> Value {
    match op {
        "$sum" | "$avg" => {
            let numbers: Vec<&Value> = values.iter().filter(|v| v.is_number()).collect();
            let all_int = numbers.iter().all(|v| v.is_i64());
            let total: f64 = numbers.iter().filter_map(|v| v.as_f64()).sum();
            if op == "$sum" {
                number_value(total, all_int)
            } else if numbers.is_empty() {
                Value::Null
            } else {
                json!(total / numbers.len() as f64)
            }
        }
        _ => {
            let wanted = if op == "$min" { Ordering::Less } else { Ordering::Greater };
            let mut best: Option<&Value> = None;
            for value in values.iter().filter(|v| !v.is_null()) {
                best = match best {
                    None => Some(value),
                    Some(current) if compare_values(value, current) == Some(wanted) => Some(value),
                    keep => keep,
                };
            }
            best.cloned().unwrap_or(Value::Null)
        }
    }
}

fn parse_date(value: &Value) -> Option<DateTime<FixedOffset>> {
    let raw = date_str(value).or_else(|| value.as_str())?;
    DateTime::parse_from_rfc3339(raw).ok()
}

fn date_part(op: &str, date: &DateTime<FixedOffset>) -> u32 {
    let utc = date.naive_utc();
    match op {
        "$year" => utc.year() as u32,
        "$month" => utc.month(),
        "$dayOfMonth" => utc.day(),
        "$dayOfWeek" => utc.weekday().num_days_from_sunday() + 1,
        // Weeks start on Sunday; days before the first Sunday are week 0
        _ => (utc.ordinal0() + 7 - utc.weekday().num_days_from_sunday()) / 7,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: Value, doc: Value) -> Value {
        evaluate(&expr, &doc, &Vars::new()).unwrap()
    }

    #[test]
    fn test_field_and_variable_references() {
        let doc = json!({"user": {"name": "Ada"}, "tags": ["a", "b"]});
        assert_eq!(eval(json!("$user.name"), doc.clone()), json!("Ada"));
        assert_eq!(eval(json!("$missing"), doc.clone()), Value::Null);
        assert_eq!(eval(json!("plain"), doc.clone()), json!("plain"));

        let mut vars = Vars::new();
        vars.insert("owner".to_string(), json!({"id": 9}));
        assert_eq!(evaluate(&json!("$$owner.id"), &doc, &vars).unwrap(), json!(9));
    }

    #[test]
    fn test_comparisons_between_columns() {
        let doc = json!({"qty": 5, "reorder": 10});
        assert_eq!(eval(json!({"$lt": ["$qty", "$reorder"]}), doc.clone()), json!(true));
        assert_eq!(eval(json!({"$eq": ["$qty", 5]}), doc), json!(true));
    }

    #[test]
    fn test_arithmetic_and_strings() {
        let doc = json!({"price": 4, "qty": 3, "first": "Ada", "last": "Lovelace"});
        assert_eq!(eval(json!({"$multiply": ["$price", "$qty"]}), doc.clone()), json!(12));
        assert_eq!(eval(json!({"$divide": ["$price", 8]}), doc.clone()), json!(0.5));
        assert_eq!(
            eval(json!({"$concat": ["$first", " ", "$last"]}), doc),
            json!("Ada Lovelace")
        );
    }

    #[test]
    fn test_cond_and_size() {
        let doc = json!({"items": [1, 2, 3]});
        assert_eq!(eval(json!({"$size": "$items"}), doc.clone()), json!(3));
        assert_eq!(
            eval(
                json!({"$cond": {"if": {"$gt": [{"$size": "$items"}, 2]}, "then": "big", "else": "small"}}),
                doc
            ),
            json!("big")
        );
    }

    #[test]
    fn test_first_of_array() {
        let doc = json!({"user": [{"id": 1}, {"id": 2}]});
        assert_eq!(eval(json!({"$first": "$user"}), doc), json!({"id": 1}));
        assert_eq!(eval(json!({"$first": "$none"}), json!({})), Value::Null);
    }

    #[test]
    fn test_date_parts() {
        // 2023-01-01 was a Sunday
        let doc = json!({"at": {"$date": "2023-01-01T10:00:00.000Z"}});
        assert_eq!(eval(json!({"$year": "$at"}), doc.clone()), json!(2023));
        assert_eq!(eval(json!({"$dayOfWeek": "$at"}), doc.clone()), json!(1));
        assert_eq!(eval(json!({"$week": "$at"}), doc), json!(1));

        let saturday = json!({"at": {"$date": "2022-01-01T00:00:00.000Z"}});
        assert_eq!(eval(json!({"$week": "$at"}), saturday), json!(0));
    }

    #[test]
    fn test_unknown_operator_errors() {
        let err = evaluate(&json!({"$teleport": 1}), &json!({}), &Vars::new()).unwrap_err();
        assert!(err.to_string().contains("Unsupported expression operator"));
    }
}
