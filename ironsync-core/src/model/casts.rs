// src/model/casts.rs
// Column casts applied before a record is persisted

use crate::expression::{date_value, normalize_dates};
use crate::value_utils::date_str;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy)]
pub enum Cast {
    String,
    Integer,
    Float,
    Number,
    Boolean,
    Date,
    /// `[lng, lat]` into a GeoJSON point
    Location,
    Array,
    Object,
    Any,
    Custom(fn(&Value) -> Value),
}

/// "", 0, false, null, [] and {} count as empty
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

impl Cast {
    /// Cast a column value; arrays are cast element-wise unless the cast
    /// is a container cast
    pub fn apply(&self, value: Value) -> Value {
        match (self, value) {
            (Cast::Array | Cast::Any | Cast::Location | Cast::Custom(_), value) => self.cast_value(value),
            (_, Value::Array(items)) => {
                Value::Array(items.into_iter().map(|item| self.cast_value(item)).collect())
            }
            (_, value) => self.cast_value(value),
        }
    }

    fn cast_value(&self, value: Value) -> Value {
        let empty = is_empty(&value);
        match self {
            Cast::String => {
                if empty {
                    return json!("");
                }
                match value {
                    Value::String(s) => json!(s.trim()),
                    other => json!(other.to_string()),
                }
            }
            Cast::Integer => {
                if empty {
                    return json!(0);
                }
                json!(to_f64(&value).map(|f| f.trunc() as i64).unwrap_or(0))
            }
            Cast::Float | Cast::Number => {
                if empty {
                    return json!(0);
                }
                match value {
                    Value::Number(n) => Value::Number(n),
                    other => to_f64(&other).map(|f| json!(f)).unwrap_or(json!(0)),
                }
            }
            Cast::Boolean => match value {
                _ if empty => json!(false),
                Value::String(s) => json!(!(s == "false" || s == "0")),
                _ => json!(true),
            },
            Cast::Date => cast_date(value),
            Cast::Location => {
                if empty {
                    return Value::Null;
                }
                let coordinate = |i: usize| value.get(i).and_then(to_f64).unwrap_or(0.0);
                json!({ "type": "Point", "coordinates": [coordinate(0), coordinate(1)] })
            }
            Cast::Object => match value {
                _ if empty => json!({}),
                Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
                    Ok(parsed @ Value::Object(_)) => parsed,
                    _ => json!({}),
                },
                other => other,
            },
            Cast::Array => match value {
                _ if empty => json!([]),
                Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
                    Ok(parsed @ Value::Array(_)) => parsed,
                    _ => json!([]),
                },
                other => other,
            },
            Cast::Any => value,
            Cast::Custom(cast) => cast(&value),
        }
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => leading_number(s.trim()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Longest numeric prefix, so "12px" reads as 12
fn leading_number(raw: &str) -> Option<f64> {
    let end = raw
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    raw[..end].parse().ok()
}

fn cast_date(value: Value) -> Value {
    if date_str(&value).is_some() {
        return normalize_dates(value);
    }
    if is_empty(&value) {
        return Value::Null;
    }
    match &value {
        Value::String(raw) => parse_date(raw.trim())
            .map(|date| date_value(&date))
            .unwrap_or_else(|| date_value(&Utc::now())),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .map(|date| date_value(&date))
            .unwrap_or_else(|| date_value(&Utc::now())),
        _ => date_value(&Utc::now()),
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }
    ["%Y-%m-%d", "%d-%m-%Y", "%Y/%m/%d", "%d/%m/%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_values() {
        assert_eq!(Cast::String.apply(Value::Null), json!(""));
        assert_eq!(Cast::Integer.apply(json!("")), json!(0));
        assert_eq!(Cast::Boolean.apply(json!(0)), json!(false));
        assert_eq!(Cast::Object.apply(json!([])), json!({}));
        assert_eq!(Cast::Date.apply(json!("")), Value::Null);
    }

    #[test]
    fn test_scalar_casts() {
        assert_eq!(Cast::String.apply(json!("  Ada ")), json!("Ada"));
        assert_eq!(Cast::String.apply(json!(42)), json!("42"));
        assert_eq!(Cast::Integer.apply(json!("12px")), json!(12));
        assert_eq!(Cast::Integer.apply(json!(7.9)), json!(7));
        assert_eq!(Cast::Float.apply(json!("2.5")), json!(2.5));
        assert_eq!(Cast::Boolean.apply(json!("false")), json!(false));
        assert_eq!(Cast::Boolean.apply(json!("0")), json!(false));
        assert_eq!(Cast::Boolean.apply(json!("yes")), json!(true));
    }

    #[test]
    fn test_array_values_cast_per_element() {
        assert_eq!(Cast::Integer.apply(json!(["1", "2"])), json!([1, 2]));
        assert_eq!(Cast::Array.apply(json!(["1", "2"])), json!(["1", "2"]));
        assert_eq!(Cast::Array.apply(json!("[1,2]")), json!([1, 2]));
    }

    #[test]
    fn test_date_casts() {
        assert_eq!(
            Cast::Date.apply(json!("2024-03-01T10:00:00+02:00")),
            json!({"$date": "2024-03-01T08:00:00.000Z"})
        );
        assert_eq!(
            Cast::Date.apply(json!("2024-03-01")),
            json!({"$date": "2024-03-01T00:00:00.000Z"})
        );
        assert_eq!(
            Cast::Date.apply(json!(0)),
            Value::Null
        );
        assert_eq!(
            Cast::Date.apply(json!(86_400_000)),
            json!({"$date": "1970-01-02T00:00:00.000Z"})
        );
    }

    #[test]
    fn test_location_and_custom() {
        assert_eq!(
            Cast::Location.apply(json!(["10.5", 20])),
            json!({"type": "Point", "coordinates": [10.5, 20.0]})
        );

        fn upper(value: &Value) -> Value {
            json!(value.as_str().unwrap_or_default().to_uppercase())
        }
        assert_eq!(Cast::Custom(upper).apply(json!("ada")), json!("ADA"));
    }
}
