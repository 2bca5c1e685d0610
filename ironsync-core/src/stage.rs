// src/stage.rs
// Pipeline stage model: one tagged value per stage kind, compiled to wire form

use crate::error::{IronSyncError, Result};
use crate::expression::agg::column_name;
use crate::expression::{compile_raw, normalize_dates, Filter};
use serde_json::{json, Map, Value};
use std::str::FromStr;

/// Pipeline stage
///
/// Stages are immutable once built; the builder only ever appends them.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Project(Map<String, Value>),
    Group(GroupStage),
    Sort(Vec<(String, SortDirection)>),
    Skip(u64),
    Limit(u64),
    Sample(u64),
    Unwind(UnwindStage),
    Lookup(LookupStage),
    AddFields(Map<String, Value>),
    /// Any other stage, carried verbatim (`$set`, `$unset`, `$facet`, ...)
    Raw { name: String, payload: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn ordinal(&self) -> i64 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

impl FromStr for SortDirection {
    type Err = IronSyncError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.to_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            _ => Err(IronSyncError::InvalidQuery(format!(
                "Sort direction must be 'asc' or 'desc', got '{}'",
                raw
            ))),
        }
    }
}

/// `_id` of a `$group` stage
#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    /// Every document in one group
    Null,
    Column(String),
    /// Composite key `{col: "$col", ...}`
    Columns(Vec<String>),
    Expression(Value),
}

impl GroupKey {
    fn to_value(&self) -> Value {
        match self {
            GroupKey::Null => Value::Null,
            GroupKey::Column(column) => Value::String(column_name(column)),
            GroupKey::Columns(columns) => Value::Object(
                columns
                    .iter()
                    .map(|column| (column.clone(), Value::String(column_name(column))))
                    .collect(),
            ),
            GroupKey::Expression(expression) => expression.clone(),
        }
    }
}

impl From<&str> for GroupKey {
    fn from(column: &str) -> Self {
        GroupKey::Column(column.to_string())
    }
}

impl From<Vec<&str>> for GroupKey {
    fn from(columns: Vec<&str>) -> Self {
        GroupKey::Columns(columns.into_iter().map(String::from).collect())
    }
}

impl From<Option<&str>> for GroupKey {
    fn from(column: Option<&str>) -> Self {
        column.map(GroupKey::from).unwrap_or(GroupKey::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupStage {
    pub key: GroupKey,
    pub accumulators: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnwindOptions {
    pub preserve_null_and_empty_arrays: bool,
    pub include_array_index: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnwindStage {
    pub column: String,
    pub options: UnwindOptions,
}

/// `$lookup` payload; `pipeline` is already in wire form
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LookupStage {
    pub from: String,
    pub local_field: Option<String>,
    pub foreign_field: Option<String>,
    pub as_field: String,
    pub let_vars: Option<Map<String, Value>>,
    pub pipeline: Vec<Value>,
}

/// The three accepted input shapes of an or-filter
#[derive(Debug, Clone)]
pub enum OrWhere {
    /// `[(column, value), ...]`
    Pairs(Vec<(String, Value)>),
    /// `[{column: value}, ...]`
    Clauses(Vec<Filter>),
    /// `{column: value, ...}`, one clause per key
    Object(Filter),
}

impl OrWhere {
    /// Normalize to the `$or` clause list
    pub fn into_clauses(self) -> Vec<Value> {
        match self {
            OrWhere::Pairs(pairs) => pairs
                .into_iter()
                .map(|(column, value)| single_clause(column, value))
                .collect(),
            OrWhere::Clauses(clauses) => clauses
                .into_iter()
                .map(|clause| Value::Object(compile_raw(clause)))
                .collect(),
            OrWhere::Object(filter) => filter
                .into_iter()
                .map(|(column, value)| single_clause(column, value))
                .collect(),
        }
    }

    pub fn into_stage(self) -> Stage {
        let mut filter = Filter::new();
        filter.insert("$or".to_string(), Value::Array(self.into_clauses()));
        Stage::Match(filter)
    }
}

fn single_clause(column: String, value: Value) -> Value {
    let mut clause = Map::new();
    clause.insert(column, normalize_dates(value));
    Value::Object(clause)
}

impl Stage {
    /// Stage family name without the `$` marker
    pub fn name(&self) -> &str {
        match self {
            Stage::Match(_) => "match",
            Stage::Project(_) => "project",
            Stage::Group(_) => "group",
            Stage::Sort(_) => "sort",
            Stage::Skip(_) => "skip",
            Stage::Limit(_) => "limit",
            Stage::Sample(_) => "sample",
            Stage::Unwind(_) => "unwind",
            Stage::Lookup(_) => "lookup",
            Stage::AddFields(_) => "addFields",
            Stage::Raw { name, .. } => name.as_str(),
        }
    }

    /// Wire payload
    pub fn payload(&self) -> Value {
        match self {
            Stage::Match(filter) => Value::Object(filter.clone()),
            Stage::Project(fields) | Stage::AddFields(fields) => Value::Object(fields.clone()),
            Stage::Group(group) => {
                let mut payload = Map::new();
                payload.insert("_id".to_string(), group.key.to_value());
                for (field, accumulator) in &group.accumulators {
                    payload.insert(field.clone(), accumulator.clone());
                }
                Value::Object(payload)
            }
            Stage::Sort(columns) => Value::Object(
                columns
                    .iter()
                    .map(|(column, direction)| (column.clone(), json!(direction.ordinal())))
                    .collect(),
            ),
            Stage::Skip(n) | Stage::Limit(n) => json!(n),
            Stage::Sample(size) => json!({ "size": size }),
            Stage::Unwind(unwind) => {
                let mut payload = Map::new();
                payload.insert("path".to_string(), json!(column_name(&unwind.column)));
                payload.insert(
                    "preserveNullAndEmptyArrays".to_string(),
                    json!(unwind.options.preserve_null_and_empty_arrays),
                );
                if let Some(index) = &unwind.options.include_array_index {
                    payload.insert("includeArrayIndex".to_string(), json!(index));
                }
                Value::Object(payload)
            }
            Stage::Lookup(lookup) => {
                let mut payload = Map::new();
                payload.insert("from".to_string(), json!(lookup.from));
                if let Some(local) = &lookup.local_field {
                    payload.insert("localField".to_string(), json!(local));
                }
                if let Some(foreign) = &lookup.foreign_field {
                    payload.insert("foreignField".to_string(), json!(foreign));
                }
                if let Some(let_vars) = &lookup.let_vars {
                    payload.insert("let".to_string(), Value::Object(let_vars.clone()));
                }
                if !lookup.pipeline.is_empty() {
                    payload.insert("pipeline".to_string(), Value::Array(lookup.pipeline.clone()));
                }
                payload.insert("as".to_string(), json!(lookup.as_field));
                Value::Object(payload)
            }
            Stage::Raw { payload, .. } => payload.clone(),
        }
    }

    /// Compile to the single-key wire object `{"$name": payload}`
    pub fn to_json(&self) -> Value {
        let mut stage = Map::new();
        stage.insert(format!("${}", self.name()), self.payload());
        Value::Object(stage)
    }

    /// Parse one wire-form stage; unknown stage names are kept as `Raw`
    pub fn from_json(stage_json: &Value) -> Result<Self> {
        let obj = match stage_json {
            Value::Object(obj) => obj,
            _ => {
                return Err(IronSyncError::InvalidStage(
                    "Stage must be an object".to_string(),
                ))
            }
        };

        let mut entries = obj.iter();
        let (key, spec) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(IronSyncError::InvalidStage(
                    "Each stage must have exactly one operator".to_string(),
                ))
            }
        };

        let name = key.strip_prefix('$').ok_or_else(|| {
            IronSyncError::InvalidStage(format!("Stage name must start with $: {}", key))
        })?;

        let stage = match (name, spec) {
            ("match", Value::Object(filter)) => Stage::Match(compile_raw(filter.clone())),
            ("project", Value::Object(fields)) => Stage::Project(fields.clone()),
            ("addFields", Value::Object(fields)) => Stage::AddFields(fields.clone()),
            ("skip", n) => Stage::Skip(count_of(name, n)?),
            ("limit", n) => Stage::Limit(count_of(name, n)?),
            ("sample", Value::Object(spec)) => {
                let size = spec.get("size").ok_or_else(|| {
                    IronSyncError::InvalidStage("$sample requires a size".to_string())
                })?;
                Stage::Sample(count_of(name, size)?)
            }
            ("sort", Value::Object(columns)) => {
                let mut parsed = Vec::with_capacity(columns.len());
                for (column, direction) in columns {
                    let direction = match direction.as_i64() {
                        Some(1) => SortDirection::Asc,
                        Some(-1) => SortDirection::Desc,
                        _ => {
                            return Err(IronSyncError::InvalidStage(
                                "Sort direction must be 1 or -1".to_string(),
                            ))
                        }
                    };
                    parsed.push((column.clone(), direction));
                }
                Stage::Sort(parsed)
            }
            ("match" | "project" | "addFields" | "sample" | "sort", _) => {
                return Err(IronSyncError::InvalidStage(format!(
                    "${} must be an object",
                    name
                )))
            }
            _ => Stage::Raw {
                name: name.to_string(),
                payload: spec.clone(),
            },
        };

        Ok(stage)
    }
}

fn count_of(name: &str, value: &Value) -> Result<u64> {
    value.as_u64().ok_or_else(|| {
        IronSyncError::InvalidStage(format!("${} must be a non-negative integer", name))
    })
}

/// Compile a stage list to its wire form
pub fn compile_stages(stages: &[Stage]) -> Vec<Value> {
    stages.iter().map(Stage::to_json).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(value: Value) -> Filter {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("fixture must be an object"),
        }
    }

    // ========== wire form tests ==========

    #[test]
    fn test_sort_keeps_column_order() {
        let stage = Stage::Sort(vec![
            ("zeta".to_string(), SortDirection::Asc),
            ("alpha".to_string(), SortDirection::Desc),
        ]);
        let wire = stage.to_json();
        let keys: Vec<&String> = wire["$sort"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
        assert_eq!(wire, json!({"$sort": {"zeta": 1, "alpha": -1}}));
    }

    #[test]
    fn test_group_keys() {
        let by_null = Stage::Group(GroupStage {
            key: GroupKey::Null,
            accumulators: filter(json!({"total": {"$sum": 1}})),
        });
        assert_eq!(by_null.to_json(), json!({"$group": {"_id": null, "total": {"$sum": 1}}}));

        let by_column = Stage::Group(GroupStage {
            key: "city".into(),
            accumulators: Map::new(),
        });
        assert_eq!(by_column.to_json(), json!({"$group": {"_id": "$city"}}));

        let composite = Stage::Group(GroupStage {
            key: vec!["year", "month"].into(),
            accumulators: Map::new(),
        });
        assert_eq!(
            composite.to_json(),
            json!({"$group": {"_id": {"year": "$year", "month": "$month"}}})
        );
    }

    #[test]
    fn test_unwind_defaults() {
        let stage = Stage::Unwind(UnwindStage {
            column: "tags".to_string(),
            options: UnwindOptions::default(),
        });
        assert_eq!(
            stage.to_json(),
            json!({"$unwind": {"path": "$tags", "preserveNullAndEmptyArrays": false}})
        );

        let indexed = Stage::Unwind(UnwindStage {
            column: "$tags".to_string(),
            options: UnwindOptions {
                preserve_null_and_empty_arrays: true,
                include_array_index: Some("position".to_string()),
            },
        });
        assert_eq!(indexed.payload()["includeArrayIndex"], "position");
        assert_eq!(indexed.payload()["path"], "$tags");
    }

    #[test]
    fn test_sample_and_paging() {
        assert_eq!(Stage::Sample(3).to_json(), json!({"$sample": {"size": 3}}));
        assert_eq!(Stage::Skip(20).to_json(), json!({"$skip": 20}));
        assert_eq!(Stage::Limit(10).to_json(), json!({"$limit": 10}));
    }

    #[test]
    fn test_lookup_payload() {
        let stage = Stage::Lookup(LookupStage {
            from: "users".to_string(),
            local_field: Some("user.id".to_string()),
            foreign_field: Some("id".to_string()),
            as_field: "user".to_string(),
            let_vars: None,
            pipeline: vec![json!({"$match": {"active": true}})],
        });
        assert_eq!(
            stage.to_json(),
            json!({"$lookup": {
                "from": "users",
                "localField": "user.id",
                "foreignField": "id",
                "pipeline": [{"$match": {"active": true}}],
                "as": "user"
            }})
        );
    }

    // ========== or-filter shape tests ==========

    #[test]
    fn test_or_where_shapes_normalize_alike() {
        let expected = json!({"$match": {"$or": [{"a": 1}, {"b": {"$gt": 2}}]}});

        let pairs = OrWhere::Pairs(vec![
            ("a".to_string(), json!(1)),
            ("b".to_string(), json!({"$gt": 2})),
        ]);
        let clauses = OrWhere::Clauses(vec![filter(json!({"a": 1})), filter(json!({"b": {"$gt": 2}}))]);
        let object = OrWhere::Object(filter(json!({"a": 1, "b": {"$gt": 2}})));

        assert_eq!(pairs.into_stage().to_json(), expected);
        assert_eq!(clauses.into_stage().to_json(), expected);
        assert_eq!(object.into_stage().to_json(), expected);
    }

    // ========== parsing tests ==========

    #[test]
    fn test_from_json_known_and_raw() {
        assert_eq!(Stage::from_json(&json!({"$limit": 5})).unwrap(), Stage::Limit(5));
        assert_eq!(
            Stage::from_json(&json!({"$sort": {"a": -1}})).unwrap(),
            Stage::Sort(vec![("a".to_string(), SortDirection::Desc)])
        );

        let raw = Stage::from_json(&json!({"$unset": ["secret"]})).unwrap();
        assert_eq!(raw.name(), "unset");
        assert_eq!(raw.to_json(), json!({"$unset": ["secret"]}));
    }

    #[test]
    fn test_from_json_errors() {
        let multi = Stage::from_json(&json!({"$match": {}, "$sort": {"a": 1}})).unwrap_err();
        assert!(multi.to_string().contains("exactly one operator"));

        let not_object = Stage::from_json(&json!("invalid")).unwrap_err();
        assert!(not_object.to_string().contains("must be an object"));

        let bad_limit = Stage::from_json(&json!({"$limit": -1})).unwrap_err();
        assert!(matches!(bad_limit, IronSyncError::InvalidStage(_)));

        let bad_sort = Stage::from_json(&json!({"$sort": {"a": 2}})).unwrap_err();
        assert!(bad_sort.to_string().contains("1 or -1"));
    }

    #[test]
    fn test_sort_direction_parse() {
        assert_eq!("desc".parse::<SortDirection>().unwrap(), SortDirection::Desc);
        assert_eq!("ASC".parse::<SortDirection>().unwrap().ordinal(), 1);
        assert!("sideways".parse::<SortDirection>().is_err());
    }
}
