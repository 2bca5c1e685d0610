//! Aggregation expression helpers
//!
//! Small constructors for accumulator, date-part and match expressions in
//! their wire form. Helpers taking an optional `column` wrap the expression
//! as `{"$column": expression}`.

use serde_json::{json, Map, Value};

/// Column reference form: `"total"` -> `"$total"` (idempotent)
pub fn column_name(column: &str) -> String {
    format!("${}", column.trim_start_matches('$'))
}

fn wrap(expression: Value, column: Option<&str>) -> Value {
    match column {
        Some(column) => {
            let mut wrapped = Map::new();
            wrapped.insert(column_name(column), expression);
            Value::Object(wrapped)
        }
        None => expression,
    }
}

// ========== accumulators ==========

pub fn count() -> Value {
    json!({ "$sum": 1 })
}

pub fn sum(column: &str) -> Value {
    json!({ "$sum": column_name(column) })
}

pub fn avg(column: &str) -> Value {
    json!({ "$avg": column_name(column) })
}

pub fn min(column: &str) -> Value {
    json!({ "$min": column_name(column) })
}

pub fn max(column: &str) -> Value {
    json!({ "$max": column_name(column) })
}

pub fn first(column: &str) -> Value {
    json!({ "$first": column_name(column) })
}

pub fn last(column: &str) -> Value {
    json!({ "$last": column_name(column) })
}

/// `$push` of a column (string) or of an arbitrary expression
pub fn push(data: Value) -> Value {
    match data {
        Value::String(column) => json!({ "$push": column_name(&column) }),
        other => json!({ "$push": other }),
    }
}

pub fn add_to_set(column: &str) -> Value {
    json!({ "$addToSet": column_name(column) })
}

// ========== date parts ==========

pub fn year(column: &str) -> Value {
    json!({ "$year": column_name(column) })
}

pub fn month(column: &str) -> Value {
    json!({ "$month": column_name(column) })
}

pub fn week(column: &str) -> Value {
    json!({ "$week": column_name(column) })
}

pub fn day_of_month(column: &str) -> Value {
    json!({ "$dayOfMonth": column_name(column) })
}

pub fn day_of_week(column: &str) -> Value {
    json!({ "$dayOfWeek": column_name(column) })
}

// ========== computed columns ==========

/// `{"a": "$a", "b": "$b"}`
pub fn columns(columns: &[&str]) -> Value {
    Value::Object(
        columns
            .iter()
            .map(|column| (column.to_string(), Value::String(column_name(column))))
            .collect(),
    )
}

/// Concatenate raw expressions (literals or `$column` references)
pub fn concat(parts: &[&str]) -> Value {
    json!({ "$concat": parts })
}

/// Concatenate columns, each followed by `separator`
pub fn concat_with(separator: &str, columns: &[&str]) -> Value {
    let parts: Vec<Value> = columns
        .iter()
        .flat_map(|column| [json!(column_name(column)), json!(separator)])
        .collect();
    json!({ "$concat": parts })
}

pub fn cond(condition: Value, if_true: Value, if_false: Value, column: Option<&str>) -> Value {
    wrap(
        json!({ "$cond": { "if": condition, "then": if_true, "else": if_false } }),
        column,
    )
}

pub fn boolean_cond(condition: Value, column: Option<&str>) -> Value {
    cond(condition, json!(true), json!(false), column)
}

pub fn multiply(columns: &[&str]) -> Value {
    let refs: Vec<String> = columns.iter().map(|c| column_name(c)).collect();
    json!({ "$multiply": refs })
}

pub fn divide(columns: &[&str]) -> Value {
    let refs: Vec<String> = columns.iter().map(|c| column_name(c)).collect();
    json!({ "$divide": refs })
}

pub fn expr(expression: Value) -> Value {
    json!({ "$expr": expression })
}

// ========== match helpers ==========

pub fn gt(value: Value, column: Option<&str>) -> Value {
    wrap(json!({ "$gt": value }), column)
}

pub fn gte(value: Value, column: Option<&str>) -> Value {
    wrap(json!({ "$gte": value }), column)
}

pub fn lt(value: Value, column: Option<&str>) -> Value {
    wrap(json!({ "$lt": value }), column)
}

pub fn lte(value: Value, column: Option<&str>) -> Value {
    wrap(json!({ "$lte": value }), column)
}

/// `$eq` over a list of operands (expression form)
pub fn eq(values: Vec<Value>) -> Value {
    json!({ "$eq": values })
}

pub fn ne(value: Value) -> Value {
    json!({ "$ne": value })
}

pub fn in_array(value: Value) -> Value {
    json!({ "$in": value })
}

pub fn nin(value: Value) -> Value {
    json!({ "$nin": value })
}

pub fn exists(value: bool, column: Option<&str>) -> Value {
    wrap(json!({ "$exists": value }), column)
}

/// Case-insensitive regex; the pattern is used as given
pub fn like(pattern: &str, column: Option<&str>) -> Value {
    wrap(json!({ "$regex": pattern, "$options": "i" }), column)
}

pub fn not_like(pattern: &str, column: Option<&str>) -> Value {
    wrap(
        json!({ "$not": { "$regex": pattern, "$options": "i" } }),
        column,
    )
}

pub fn is_null(column: Option<&str>) -> Value {
    wrap(json!({ "$eq": null }), column)
}

pub fn not_null(column: Option<&str>) -> Value {
    wrap(json!({ "$ne": null }), column)
}

pub fn between(min: Value, max: Value, column: Option<&str>) -> Value {
    wrap(json!({ "$gte": min, "$lte": max }), column)
}

pub fn not_between(min: Value, max: Value, column: Option<&str>) -> Value {
    wrap(json!({ "$not": { "$gte": min, "$lte": max } }), column)
}

pub fn regex(pattern: &str, column: Option<&str>) -> Value {
    wrap(json!({ "$regex": pattern }), column)
}

pub fn all(values: Vec<Value>, column: Option<&str>) -> Value {
    wrap(json!({ "$all": values }), column)
}
