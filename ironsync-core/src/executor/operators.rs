// src/executor/operators.rs
//! Match operators for the in-memory executor
//!
//! Each query operator is a type implementing [`OperatorMatcher`], looked up
//! by name in [`OPERATOR_REGISTRY`]. Field values are resolved through dotted
//! paths that fan out over arrays of sub-documents, so
//! `{"orders.customer.id": 5}` matches when any order's customer has id 5.

use super::expr_eval::{self, Vars};
use crate::error::{IronSyncError, Result};
use crate::value_utils::{compare_values, date_str, get_nested_value, get_path_values, is_truthy};
use lazy_static::lazy_static;
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::num::NonZeroUsize;

// ============================================================================
// REGEX CACHE
// ============================================================================

const REGEX_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(128) {
    Some(size) => size,
    None => unreachable!(),
};

lazy_static! {
    /// Compiled patterns keyed by "options/pattern"
    static ref REGEX_CACHE: Mutex<LruCache<String, Regex>> =
        Mutex::new(LruCache::new(REGEX_CACHE_SIZE));
}

/// Translate `$options` flags (i, m, s, x) into an inline-flag prefix
fn build_regex_pattern(pattern: &str, options: &str) -> String {
    let flags: String = options
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .collect();

    if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", flags, pattern)
    }
}

fn get_or_compile_regex(pattern: &str, options: &str) -> Result<Regex> {
    let cache_key = format!("{}/{}", options, pattern);

    if let Some(regex) = REGEX_CACHE.lock().get(&cache_key) {
        return Ok(regex.clone());
    }

    let regex = Regex::new(&build_regex_pattern(pattern, options)).map_err(|e| {
        IronSyncError::InvalidQuery(format!("Invalid regex pattern '{}': {}", pattern, e))
    })?;

    REGEX_CACHE.lock().put(cache_key, regex.clone());
    Ok(regex)
}

/// Regex match against a string, or any string element of an array
fn regex_matches(doc_value: Option<&Value>, pattern: &str, options: &str) -> Result<bool> {
    let regex = get_or_compile_regex(pattern, options)?;
    Ok(match doc_value {
        Some(Value::String(s)) => regex.is_match(s),
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| item.as_str().map(|s| regex.is_match(s)).unwrap_or(false)),
        _ => false,
    })
}

// ============================================================================
// TRAIT DEFINITION
// ============================================================================

/// Document context handed to operators that recurse or read other columns
pub struct MatchContext<'a> {
    pub document: &'a Value,
    pub vars: &'a Vars,
}

/// A query operator (`$eq`, `$in`, `$and`, ...)
///
/// `doc_value` is the resolved field value (`None` when the field is
/// missing); `filter_value` is the operand from the filter.
pub trait OperatorMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        ctx: &MatchContext<'_>,
    ) -> Result<bool>;
}

// ============================================================================
// COMPARISON OPERATORS
// ============================================================================

/// `$eq`; an array field matches when any element is equal
pub struct EqOperator;

impl OperatorMatcher for EqOperator {
    fn name(&self) -> &'static str {
        "$eq"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, _: &MatchContext<'_>) -> Result<bool> {
        Ok(value_equals(doc_value, filter_value))
    }
}

fn value_equals(doc_value: Option<&Value>, filter_value: &Value) -> bool {
    match doc_value {
        // A missing field equals null
        None => filter_value.is_null(),
        Some(v) if v == filter_value => true,
        Some(Value::Array(items)) => items.iter().any(|item| item == filter_value),
        Some(_) => false,
    }
}

/// `$ne`; true for missing fields, false when any array element is equal
pub struct NeOperator;

impl OperatorMatcher for NeOperator {
    fn name(&self) -> &'static str {
        "$ne"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, _: &MatchContext<'_>) -> Result<bool> {
        Ok(!value_equals(doc_value, filter_value))
    }
}

/// Ordering operators share one implementation parameterized by the
/// orderings they accept
pub struct OrderingOperator {
    name: &'static str,
    accepts: fn(Ordering) -> bool,
}

impl OperatorMatcher for OrderingOperator {
    fn name(&self) -> &'static str {
        self.name
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, _: &MatchContext<'_>) -> Result<bool> {
        compare_with_predicate(doc_value, filter_value, self.accepts)
    }
}

// ============================================================================
// ARRAY OPERATORS
// ============================================================================

/// `$in`; the operand is a literal array or a `"$column"` reference
pub struct InOperator;

impl OperatorMatcher for InOperator {
    fn name(&self) -> &'static str {
        "$in"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        let candidates = membership_operand("$in", filter_value, ctx)?;
        Ok(contained_in(doc_value, &candidates))
    }
}

/// `$nin`; true for missing fields
pub struct NinOperator;

impl OperatorMatcher for NinOperator {
    fn name(&self) -> &'static str {
        "$nin"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        let candidates = membership_operand("$nin", filter_value, ctx)?;
        Ok(!contained_in(doc_value, &candidates))
    }
}

fn membership_operand<'v>(
    op: &str,
    filter_value: &'v Value,
    ctx: &MatchContext<'_>,
) -> Result<Cow<'v, [Value]>> {
    match filter_value {
        Value::Array(items) => Ok(Cow::Borrowed(items.as_slice())),
        Value::String(reference) if reference.starts_with('$') => {
            match expr_eval::resolve_reference(reference, ctx.document, ctx.vars) {
                Some(Value::Array(items)) => Ok(Cow::Owned(items)),
                Some(Value::Null) | None => Ok(Cow::Owned(Vec::new())),
                Some(other) => Err(IronSyncError::InvalidQuery(format!(
                    "{} column reference {} must resolve to an array, got {}",
                    op, reference, other
                ))),
            }
        }
        _ => Err(IronSyncError::InvalidQuery(format!(
            "{} operator requires an array",
            op
        ))),
    }
}

fn contained_in(doc_value: Option<&Value>, candidates: &[Value]) -> bool {
    match doc_value {
        None => candidates.iter().any(Value::is_null),
        Some(v) if candidates.contains(v) => true,
        Some(Value::Array(items)) => items.iter().any(|item| candidates.contains(item)),
        Some(_) => false,
    }
}

/// `$all`: the array field contains every listed value
pub struct AllOperator;

impl OperatorMatcher for AllOperator {
    fn name(&self) -> &'static str {
        "$all"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, _: &MatchContext<'_>) -> Result<bool> {
        let required = filter_value.as_array().ok_or_else(|| {
            IronSyncError::InvalidQuery("$all operator requires an array".to_string())
        })?;
        Ok(match doc_value {
            Some(Value::Array(items)) => required.iter().all(|req| items.contains(req)),
            _ => false,
        })
    }
}

/// `$elemMatch`: at least one element satisfies every condition
///
/// Object elements are matched as sub-documents; scalar elements against an
/// operator object such as `{"$gt": 5}`.
pub struct ElemMatchOperator;

impl OperatorMatcher for ElemMatchOperator {
    fn name(&self) -> &'static str {
        "$elemMatch"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        let conditions = filter_value.as_object().ok_or_else(|| {
            IronSyncError::InvalidQuery("$elemMatch requires an object".to_string())
        })?;
        let operator_form = conditions.keys().all(|key| key.starts_with('$'))
            && !conditions.keys().any(|key| is_logical(key));

        let Some(Value::Array(items)) = doc_value else {
            return Ok(false);
        };

        for item in items {
            let matched = if operator_form {
                matches_condition(Some(item), conditions, ctx)?
            } else if item.is_object() {
                matches_filter_with(item, filter_value, ctx.vars)?
            } else {
                false
            };
            if matched {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// `$size`: exact array length
pub struct SizeOperator;

impl OperatorMatcher for SizeOperator {
    fn name(&self) -> &'static str {
        "$size"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, _: &MatchContext<'_>) -> Result<bool> {
        let size = filter_value.as_u64().ok_or_else(|| {
            IronSyncError::InvalidQuery("$size operator requires a non-negative integer".to_string())
        })?;
        Ok(match doc_value {
            Some(Value::Array(items)) => items.len() as u64 == size,
            _ => false,
        })
    }
}

// ============================================================================
// ELEMENT AND EVALUATION OPERATORS
// ============================================================================

/// `$exists`
pub struct ExistsOperator;

impl OperatorMatcher for ExistsOperator {
    fn name(&self) -> &'static str {
        "$exists"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, _: &MatchContext<'_>) -> Result<bool> {
        let should_exist = match filter_value {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            _ => {
                return Err(IronSyncError::InvalidQuery(
                    "$exists operator requires a boolean".to_string(),
                ))
            }
        };
        Ok(doc_value.is_some() == should_exist)
    }
}

/// `$type` by alias (`"string"`, `"date"`, ...) or BSON type number
pub struct TypeOperator;

impl OperatorMatcher for TypeOperator {
    fn name(&self) -> &'static str {
        "$type"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, _: &MatchContext<'_>) -> Result<bool> {
        let type_name = match filter_value {
            Value::String(s) => s.as_str(),
            Value::Number(n) => match n.as_i64() {
                Some(1) => "double",
                Some(2) => "string",
                Some(3) => "object",
                Some(4) => "array",
                Some(8) => "bool",
                Some(9) => "date",
                Some(10) => "null",
                Some(16) | Some(18) => "int",
                _ => {
                    return Err(IronSyncError::InvalidQuery(format!(
                        "Unknown BSON type number: {}",
                        n
                    )))
                }
            },
            _ => {
                return Err(IronSyncError::InvalidQuery(
                    "$type operator requires a string or number".to_string(),
                ))
            }
        };

        let Some(value) = doc_value else {
            return Ok(false);
        };
        let is_date = date_str(value).is_some();

        Ok(match type_name {
            "double" | "number" => value.is_number(),
            "int" | "long" => value.is_i64() || value.is_u64(),
            "string" => value.is_string(),
            "date" => is_date,
            "object" => value.is_object() && !is_date,
            "array" => value.is_array(),
            "bool" | "boolean" => value.is_boolean(),
            "null" => value.is_null(),
            _ => {
                return Err(IronSyncError::InvalidQuery(format!(
                    "Unknown type name: {}",
                    type_name
                )))
            }
        })
    }
}

/// `$mod: [divisor, remainder]`
pub struct ModOperator;

impl OperatorMatcher for ModOperator {
    fn name(&self) -> &'static str {
        "$mod"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, _: &MatchContext<'_>) -> Result<bool> {
        let (divisor, remainder) = match filter_value.as_array().map(Vec::as_slice) {
            Some([d, r]) => match (d.as_i64(), r.as_i64()) {
                (Some(d), Some(r)) if d != 0 => (d, r),
                _ => {
                    return Err(IronSyncError::InvalidQuery(
                        "$mod requires a non-zero integer divisor and an integer remainder"
                            .to_string(),
                    ))
                }
            },
            _ => {
                return Err(IronSyncError::InvalidQuery(
                    "$mod requires [divisor, remainder]".to_string(),
                ))
            }
        };

        let check = |v: &Value| v.as_f64().map(|f| (f.trunc() as i64) % divisor == remainder);
        Ok(match doc_value {
            Some(Value::Array(items)) => items.iter().any(|item| check(item).unwrap_or(false)),
            Some(v) => check(v).unwrap_or(false),
            None => false,
        })
    }
}

/// `$regex` without `$options`; the combined form is handled by
/// [`matches_condition`]
pub struct RegexOperator;

impl OperatorMatcher for RegexOperator {
    fn name(&self) -> &'static str {
        "$regex"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, _: &MatchContext<'_>) -> Result<bool> {
        let pattern = filter_value.as_str().ok_or_else(|| {
            IronSyncError::InvalidQuery("$regex operator requires a string pattern".to_string())
        })?;
        regex_matches(doc_value, pattern, "")
    }
}

/// Geo predicates need a geospatial index and are left to a real server
pub struct GeoOperator(&'static str);

impl OperatorMatcher for GeoOperator {
    fn name(&self) -> &'static str {
        self.0
    }

    fn matches(&self, _: Option<&Value>, _: &Value, _: &MatchContext<'_>) -> Result<bool> {
        Err(IronSyncError::InvalidQuery(format!(
            "{} is not supported by the in-memory executor",
            self.0
        )))
    }
}

// ============================================================================
// LOGICAL OPERATORS
// ============================================================================

/// `$and` / `$or` / `$nor` over a list of sub-filters
pub struct LogicalOperator {
    name: &'static str,
}

impl OperatorMatcher for LogicalOperator {
    fn name(&self) -> &'static str {
        self.name
    }

    fn matches(&self, _: Option<&Value>, filter_value: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        let clauses = filter_value.as_array().ok_or_else(|| {
            IronSyncError::InvalidQuery(format!("{} operator requires an array", self.name))
        })?;

        let mut any = false;
        let mut all = true;
        for clause in clauses {
            let matched = matches_filter_with(ctx.document, clause, ctx.vars)?;
            any |= matched;
            all &= matched;
        }

        Ok(match self.name {
            "$and" => all,
            "$or" => any,
            _ => !any,
        })
    }
}

/// `$not`: negates an operator object or a bare regex
pub struct NotOperator;

impl OperatorMatcher for NotOperator {
    fn name(&self) -> &'static str {
        "$not"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        match filter_value {
            Value::Object(condition) => Ok(!matches_condition(doc_value, condition, ctx)?),
            Value::String(pattern) => Ok(!regex_matches(doc_value, pattern, "")?),
            _ => Err(IronSyncError::InvalidQuery(
                "$not requires an operator expression or a regex".to_string(),
            )),
        }
    }
}

/// `$expr`: an aggregation expression evaluated against the document
pub struct ExprOperator;

impl OperatorMatcher for ExprOperator {
    fn name(&self) -> &'static str {
        "$expr"
    }

    fn matches(&self, _: Option<&Value>, filter_value: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        let value = expr_eval::evaluate(filter_value, ctx.document, ctx.vars)
            .map_err(|e| IronSyncError::InvalidQuery(format!("$expr: {}", e)))?;
        Ok(is_truthy(&value))
    }
}

// ============================================================================
// OPERATOR REGISTRY
// ============================================================================

lazy_static! {
    /// Every operator the in-memory executor understands, by name
    pub static ref OPERATOR_REGISTRY: HashMap<&'static str, Box<dyn OperatorMatcher>> = {
        let mut registry: HashMap<&'static str, Box<dyn OperatorMatcher>> = HashMap::new();
        let mut register = |op: Box<dyn OperatorMatcher>| {
            registry.insert(op.name(), op);
        };

        register(Box::new(EqOperator));
        register(Box::new(NeOperator));
        register(Box::new(OrderingOperator { name: "$gt", accepts: |o| o == Ordering::Greater }));
        register(Box::new(OrderingOperator { name: "$gte", accepts: |o| o != Ordering::Less }));
        register(Box::new(OrderingOperator { name: "$lt", accepts: |o| o == Ordering::Less }));
        register(Box::new(OrderingOperator { name: "$lte", accepts: |o| o != Ordering::Greater }));

        register(Box::new(InOperator));
        register(Box::new(NinOperator));
        register(Box::new(AllOperator));
        register(Box::new(ElemMatchOperator));
        register(Box::new(SizeOperator));

        register(Box::new(ExistsOperator));
        register(Box::new(TypeOperator));
        register(Box::new(ModOperator));
        register(Box::new(RegexOperator));

        for geo in ["$geoIntersects", "$geoWithin", "$near", "$nearSphere"] {
            register(Box::new(GeoOperator(geo)));
        }

        for logical in ["$and", "$or", "$nor"] {
            register(Box::new(LogicalOperator { name: logical }));
        }
        register(Box::new(NotOperator));
        register(Box::new(ExprOperator));

        registry
    };
}

fn is_logical(key: &str) -> bool {
    matches!(key, "$and" | "$or" | "$nor" | "$expr")
}

// ============================================================================
// MATCHING
// ============================================================================

/// Shared body of `$gt`/`$gte`/`$lt`/`$lte` with array element matching
fn compare_with_predicate(
    doc_value: Option<&Value>,
    filter_value: &Value,
    predicate: fn(Ordering) -> bool,
) -> Result<bool> {
    let Some(v) = doc_value else {
        return Ok(false);
    };

    if compare_values(v, filter_value).map(predicate).unwrap_or(false) {
        return Ok(true);
    }
    Ok(match v {
        Value::Array(items) => items.iter().any(|item| {
            compare_values(item, filter_value)
                .map(predicate)
                .unwrap_or(false)
        }),
        _ => false,
    })
}

/// Value of a filter key: direct path first, then the fan-out over arrays
fn field_value<'a>(document: &'a Value, path: &str) -> Option<Cow<'a, Value>> {
    if let Some(direct) = get_nested_value(document, path) {
        return Some(Cow::Borrowed(direct));
    }
    if !path.contains('.') {
        return None;
    }
    let values = get_path_values(document, path);
    if values.is_empty() {
        None
    } else {
        Some(Cow::Owned(Value::Array(values.into_iter().cloned().collect())))
    }
}

/// Evaluate an operator object (`{"$gt": 1, "$lt": 5}`) against one value
fn matches_condition(
    doc_value: Option<&Value>,
    condition: &Map<String, Value>,
    ctx: &MatchContext<'_>,
) -> Result<bool> {
    if let Some(pattern) = condition.get("$regex") {
        let pattern = pattern.as_str().ok_or_else(|| {
            IronSyncError::InvalidQuery("$regex requires a string pattern".to_string())
        })?;
        let options = condition
            .get("$options")
            .and_then(Value::as_str)
            .unwrap_or("");
        if !regex_matches(doc_value, pattern, options)? {
            return Ok(false);
        }
    }

    for (op_name, op_value) in condition {
        if op_name == "$regex" || op_name == "$options" {
            continue;
        }
        let operator = OPERATOR_REGISTRY
            .get(op_name.as_str())
            .ok_or_else(|| IronSyncError::InvalidQuery(format!("Unknown operator: {}", op_name)))?;
        if !operator.matches(doc_value, op_value, ctx)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Does `document` satisfy `filter`?
pub fn matches_filter(document: &Value, filter: &Value) -> Result<bool> {
    matches_filter_with(document, filter, &Vars::new())
}

/// [`matches_filter`] with `$$variables` in scope (sub-pipelines of `$lookup`)
pub fn matches_filter_with(document: &Value, filter: &Value, vars: &Vars) -> Result<bool> {
    let filter_obj = filter
        .as_object()
        .ok_or_else(|| IronSyncError::InvalidQuery("Filter must be an object".to_string()))?;
    let ctx = MatchContext { document, vars };

    for (key, value) in filter_obj {
        if key.starts_with('$') {
            let operator = OPERATOR_REGISTRY
                .get(key.as_str())
                .filter(|_| is_logical(key))
                .ok_or_else(|| {
                    IronSyncError::InvalidQuery(format!("Unknown top-level operator: {}", key))
                })?;
            if !operator.matches(None, value, &ctx)? {
                return Ok(false);
            }
            continue;
        }

        let resolved = field_value(document, key);
        let doc_value = resolved.as_deref();

        let matched = match value {
            Value::Object(condition)
                if date_str(value).is_none() && condition.keys().any(|k| k.starts_with('$')) =>
            {
                matches_condition(doc_value, condition, &ctx)?
            }
            literal => value_equals(doc_value, literal),
        };
        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(doc: Value, filter: Value) -> bool {
        matches_filter(&doc, &filter).unwrap()
    }

    // ========== comparison tests ==========

    #[test]
    fn test_comparisons() {
        let doc = json!({"age": 30, "name": "Ada"});
        assert!(check(doc.clone(), json!({"age": {"$gte": 30, "$lt": 31}})));
        assert!(!check(doc.clone(), json!({"age": {"$gt": 30}})));
        assert!(check(doc.clone(), json!({"name": "Ada"})));
        assert!(check(doc.clone(), json!({"missing": {"$ne": 1}})));
        assert!(check(doc, json!({"missing": null})));
    }

    #[test]
    fn test_dates_compare_chronologically() {
        let doc = json!({"at": {"$date": "2024-05-01T00:00:00.000Z"}});
        assert!(check(
            doc.clone(),
            json!({"at": {"$gte": {"$date": "2024-01-01T00:00:00.000Z"}}})
        ));
        assert!(check(doc.clone(), json!({"at": {"$date": "2024-05-01T00:00:00.000Z"}})));
        assert!(check(doc, json!({"at": {"$type": "date"}})));
    }

    // ========== array traversal tests ==========

    #[test]
    fn test_dotted_path_through_array() {
        let doc = json!({"orders": [{"customer": {"id": 1}}, {"customer": {"id": 2}}]});
        assert!(check(doc.clone(), json!({"orders.customer.id": 2})));
        assert!(!check(doc.clone(), json!({"orders.customer.id": 3})));
        assert!(check(doc, json!({"orders.customer.id": {"$ne": 3}})));
    }

    #[test]
    fn test_in_column_reference() {
        let doc = json!({"tag": "b", "allowed": ["a", "b"]});
        assert!(check(doc.clone(), json!({"tag": {"$in": "$allowed"}})));
        assert!(!check(doc.clone(), json!({"tag": {"$not": {"$in": "$allowed"}}})));
        assert!(check(doc, json!({"tag": {"$nin": ["x"]}})));
    }

    #[test]
    fn test_in_requires_array_or_reference() {
        let err = matches_filter(&json!({"a": 1}), &json!({"a": {"$in": 1}})).unwrap_err();
        assert!(err.to_string().contains("requires an array"));
    }

    #[test]
    fn test_elem_match_and_size() {
        let doc = json!({"scores": [3, 9], "items": [{"sku": "a", "qty": 2}, {"sku": "b", "qty": 7}]});
        assert!(check(doc.clone(), json!({"scores": {"$elemMatch": {"$gt": 8}}})));
        assert!(check(doc.clone(), json!({"items": {"$elemMatch": {"sku": "b", "qty": {"$gt": 5}}}})));
        assert!(!check(doc.clone(), json!({"items": {"$elemMatch": {"sku": "a", "qty": {"$gt": 5}}}})));
        assert!(check(doc, json!({"scores": {"$size": 2}})));
    }

    // ========== regex tests ==========

    #[test]
    fn test_regex_with_options_and_not() {
        let doc = json!({"name": "xFOOx"});
        assert!(check(doc.clone(), json!({"name": {"$regex": "foo", "$options": "i"}})));
        assert!(!check(doc.clone(), json!({"name": {"$regex": "^foo", "$options": "i"}})));
        assert!(check(doc, json!({"name": {"$not": {"$regex": "^foo"}}})));
    }

    // ========== range tests ==========

    #[test]
    fn test_not_between_is_negated_conjunction() {
        let filter = json!({"x": {"$not": {"$gte": 5, "$lte": 10}}});
        assert!(check(json!({"x": 3}), filter.clone()));
        assert!(check(json!({"x": 12}), filter.clone()));
        assert!(!check(json!({"x": 5}), filter.clone()));
        assert!(check(json!({}), filter));
    }

    #[test]
    fn test_mod_and_type() {
        assert!(check(json!({"n": 10}), json!({"n": {"$mod": [4, 2]}})));
        assert!(!check(json!({"n": 11}), json!({"n": {"$mod": [4, 2]}})));
        assert!(check(json!({"n": 10}), json!({"n": {"$type": "int"}})));
        assert!(matches_filter(&json!({"n": 1}), &json!({"n": {"$mod": [0, 1]}})).is_err());
    }

    // ========== logical tests ==========

    #[test]
    fn test_logical_operators() {
        let doc = json!({"a": 1, "b": 2});
        assert!(check(doc.clone(), json!({"$or": [{"a": 5}, {"b": 2}]})));
        assert!(!check(doc.clone(), json!({"$and": [{"a": 1}, {"b": 5}]})));
        assert!(check(doc.clone(), json!({"$nor": [{"a": 5}, {"b": 5}]})));
        assert!(check(doc, json!({"$expr": {"$lt": ["$a", "$b"]}})));
    }

    #[test]
    fn test_geo_and_unknown_operators_error() {
        let geo = matches_filter(&json!({"loc": [0, 0]}), &json!({"loc": {"$near": [1, 1]}}));
        assert!(matches!(geo, Err(IronSyncError::InvalidQuery(_))));

        let unknown = matches_filter(&json!({"a": 1}), &json!({"a": {"$almost": 1}}));
        assert!(unknown.unwrap_err().to_string().contains("Unknown operator"));

        let top = matches_filter(&json!({"a": 1}), &json!({"$gt": 1}));
        assert!(top.unwrap_err().to_string().contains("Unknown top-level operator"));
    }
}
