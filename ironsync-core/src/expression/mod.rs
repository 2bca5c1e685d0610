// ironsync-core/src/expression/mod.rs
// Filter DSL compiler: (column, operator, value) -> native match expression

pub mod agg;

use crate::error::{IronSyncError, Result};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

/// A compiled match expression keyed by column
pub type Filter = Map<String, Value>;

/// The closed set of filter operators accepted by `where`-style calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WhereOperator {
    Eq,
    Ne,
    Not,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    All,
    Exists,
    Type,
    Mod,
    Regex,
    Between,
    NotBetween,
    GeoIntersects,
    GeoWithin,
    Near,
    NearSphere,
    ElemMatch,
    Size,
    Like,
    NotLike,
    StartsWith,
    EndsWith,
    NotStartsWith,
    NotEndsWith,
}

impl WhereOperator {
    pub const ALL: [WhereOperator; 28] = [
        WhereOperator::Eq,
        WhereOperator::Ne,
        WhereOperator::Not,
        WhereOperator::Gt,
        WhereOperator::Gte,
        WhereOperator::Lt,
        WhereOperator::Lte,
        WhereOperator::In,
        WhereOperator::NotIn,
        WhereOperator::All,
        WhereOperator::Exists,
        WhereOperator::Type,
        WhereOperator::Mod,
        WhereOperator::Regex,
        WhereOperator::Between,
        WhereOperator::NotBetween,
        WhereOperator::GeoIntersects,
        WhereOperator::GeoWithin,
        WhereOperator::Near,
        WhereOperator::NearSphere,
        WhereOperator::ElemMatch,
        WhereOperator::Size,
        WhereOperator::Like,
        WhereOperator::NotLike,
        WhereOperator::StartsWith,
        WhereOperator::EndsWith,
        WhereOperator::NotStartsWith,
        WhereOperator::NotEndsWith,
    ];

    /// DSL token, as accepted by [`FromStr`]
    pub fn token(&self) -> &'static str {
        match self {
            WhereOperator::Eq => "=",
            WhereOperator::Ne => "!=",
            WhereOperator::Not => "not",
            WhereOperator::Gt => ">",
            WhereOperator::Gte => ">=",
            WhereOperator::Lt => "<",
            WhereOperator::Lte => "<=",
            WhereOperator::In => "in",
            WhereOperator::NotIn => "notIn",
            WhereOperator::All => "all",
            WhereOperator::Exists => "exists",
            WhereOperator::Type => "type",
            WhereOperator::Mod => "mod",
            WhereOperator::Regex => "regex",
            WhereOperator::Between => "between",
            WhereOperator::NotBetween => "notBetween",
            WhereOperator::GeoIntersects => "geoIntersects",
            WhereOperator::GeoWithin => "geoWithin",
            WhereOperator::Near => "near",
            WhereOperator::NearSphere => "nearSphere",
            WhereOperator::ElemMatch => "elemMatch",
            WhereOperator::Size => "size",
            WhereOperator::Like => "like",
            WhereOperator::NotLike => "notLike",
            WhereOperator::StartsWith => "startsWith",
            WhereOperator::EndsWith => "endsWith",
            WhereOperator::NotStartsWith => "notStartsWith",
            WhereOperator::NotEndsWith => "notEndsWith",
        }
    }

    /// Native operator the token maps to before any rewriting
    pub fn native(&self) -> &'static str {
        match self {
            WhereOperator::Eq => "$eq",
            WhereOperator::Ne => "$ne",
            WhereOperator::Not => "$not",
            WhereOperator::Gt => "$gt",
            WhereOperator::Gte => "$gte",
            WhereOperator::Lt => "$lt",
            WhereOperator::Lte => "$lte",
            WhereOperator::In => "$in",
            WhereOperator::NotIn => "$nin",
            WhereOperator::All => "$all",
            WhereOperator::Exists => "$exists",
            WhereOperator::Type => "$type",
            WhereOperator::Mod => "$mod",
            WhereOperator::Regex => "$regex",
            WhereOperator::Between | WhereOperator::NotBetween => "$between",
            WhereOperator::GeoIntersects => "$geoIntersects",
            WhereOperator::GeoWithin => "$geoWithin",
            WhereOperator::Near => "$near",
            WhereOperator::NearSphere => "$nearSphere",
            WhereOperator::ElemMatch => "$elemMatch",
            WhereOperator::Size => "$size",
            WhereOperator::Like
            | WhereOperator::NotLike
            | WhereOperator::StartsWith
            | WhereOperator::EndsWith
            | WhereOperator::NotStartsWith
            | WhereOperator::NotEndsWith => "$regex",
        }
    }
}

impl FromStr for WhereOperator {
    type Err = IronSyncError;

    fn from_str(token: &str) -> Result<Self> {
        if token == "nin" {
            return Ok(WhereOperator::NotIn);
        }
        WhereOperator::ALL
            .iter()
            .copied()
            .find(|op| op.token() == token)
            .ok_or_else(|| IronSyncError::UnknownOperator(token.to_string()))
    }
}

impl fmt::Display for WhereOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Escape every regex metacharacter so the value matches literally
pub fn escape_regex(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() * 2);
    for ch in value.chars() {
        if matches!(
            ch,
            '-' | '[' | ']' | '{' | '}' | '(' | ')' | '*' | '+' | '?' | '.' | ',' | '\\' | '^'
                | '$' | '|' | '#'
        ) || ch.is_whitespace()
        {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Wire form of a date literal: `{"$date": "<UTC RFC 3339, millis>"}`
pub fn date_value<Tz: TimeZone>(date: &DateTime<Tz>) -> Value {
    let utc = date.with_timezone(&Utc);
    json!({ "$date": utc.to_rfc3339_opts(SecondsFormat::Millis, true) })
}

/// Normalize `{"$date": ...}` literals to UTC, recursing into arrays and objects
pub fn normalize_dates(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                let parsed = map
                    .get("$date")
                    .and_then(Value::as_str)
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok());
                if let Some(parsed) = parsed {
                    return date_value(&parsed);
                }
            }
            Value::Object(
                map.into_iter()
                    .map(|(key, inner)| (key, normalize_dates(inner)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_dates).collect()),
        other => other,
    }
}

/// `(column, value)` sugar for `(column, "=", value)`
pub fn compile_eq(column: &str, value: Value) -> Filter {
    let mut filter = Filter::new();
    filter.insert(column.to_string(), json!({ "$eq": normalize_dates(value) }));
    filter
}

/// Pass a pre-built native filter through, only normalizing dates
pub fn compile_raw(filter: Filter) -> Filter {
    filter
        .into_iter()
        .map(|(key, value)| (key, normalize_dates(value)))
        .collect()
}

/// Compile a token-based call; unknown tokens fail here, before compilation
pub fn compile_token(column: &str, token: &str, value: Value) -> Result<Filter> {
    compile(column, token.parse()?, value)
}

/// Compile `(column, operator, value)` into `{column: nativeExpression}`
pub fn compile(column: &str, operator: WhereOperator, value: Value) -> Result<Filter> {
    let value = normalize_dates(value);

    let expression = match operator {
        WhereOperator::Like => {
            json!({ "$regex": escape_regex(&string_operand(operator, &value)?), "$options": "i" })
        }
        WhereOperator::NotLike => json!({
            "$not": { "$regex": escape_regex(&string_operand(operator, &value)?), "$options": "i" }
        }),
        WhereOperator::StartsWith => {
            json!({ "$regex": format!("^{}", escape_regex(&string_operand(operator, &value)?)) })
        }
        WhereOperator::EndsWith => {
            json!({ "$regex": format!("{}$", escape_regex(&string_operand(operator, &value)?)) })
        }
        WhereOperator::NotStartsWith => json!({
            "$not": { "$regex": format!("^{}", escape_regex(&string_operand(operator, &value)?)) }
        }),
        WhereOperator::NotEndsWith => json!({
            "$not": { "$regex": format!("{}$", escape_regex(&string_operand(operator, &value)?)) }
        }),
        WhereOperator::In if value.is_string() => {
            json!({ "$in": agg::column_name(value.as_str().unwrap_or_default()) })
        }
        WhereOperator::NotIn if value.is_string() => {
            json!({ "$not": { "$in": agg::column_name(value.as_str().unwrap_or_default()) } })
        }
        WhereOperator::Between => {
            let (min, max) = range_operand(operator, value)?;
            json!({ "$gte": min, "$lte": max })
        }
        WhereOperator::NotBetween => {
            let (min, max) = range_operand(operator, value)?;
            json!({ "$not": { "$gte": min, "$lte": max } })
        }
        other => {
            let mut expression = Map::new();
            expression.insert(other.native().to_string(), value);
            Value::Object(expression)
        }
    };

    let mut filter = Filter::new();
    filter.insert(column.to_string(), expression);
    Ok(filter)
}

fn string_operand(operator: WhereOperator, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(IronSyncError::InvalidQuery(format!(
            "'{}' expects a string value, got {}",
            operator, value
        ))),
    }
}

fn range_operand(operator: WhereOperator, value: Value) -> Result<(Value, Value)> {
    match value {
        Value::Array(mut pair) if pair.len() == 2 => {
            let max = pair.pop().unwrap_or(Value::Null);
            let min = pair.pop().unwrap_or(Value::Null);
            Ok((min, max))
        }
        other => Err(IronSyncError::InvalidQuery(format!(
            "'{}' expects a [min, max] pair, got {}",
            operator, other
        ))),
    }
}
