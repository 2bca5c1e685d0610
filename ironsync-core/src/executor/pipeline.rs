// src/executor/pipeline.rs
// Aggregation pipeline evaluation for the in-memory executor

use super::expr_eval::{self, fold_values, Vars};
use super::operators::matches_filter_with;
use crate::error::{IronSyncError, Result};
use crate::value_utils::{
    canonical_json_string, compare_values_with_none, get_nested_value, get_path_values,
    remove_nested_value, set_nested_value,
};
use rand::seq::SliceRandom;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Collections visible to `$lookup`
pub type Collections = HashMap<String, Vec<Value>>;

fn agg_error(message: impl Into<String>) -> IronSyncError {
    IronSyncError::AggregationError(message.into())
}

/// Parsed aggregation pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<PipelineStage>,
}

#[derive(Debug, Clone)]
enum PipelineStage {
    Match(Value),
    Project(ProjectStage),
    AddFields(Vec<(String, Value)>),
    Unset(Vec<String>),
    Group(GroupStage),
    Sort(Vec<(String, i64)>),
    Skip(usize),
    Limit(usize),
    Sample(usize),
    Unwind(UnwindSpec),
    Lookup(LookupSpec),
    Count(String),
    ReplaceRoot(Value),
}

#[derive(Debug, Clone)]
struct ProjectStage {
    fields: Vec<(String, ProjectField)>,
}

#[derive(Debug, Clone)]
enum ProjectField {
    Include,
    Exclude,
    /// Any expression: `"$field"`, `{"$size": "$tags"}`, a literal...
    Computed(Value),
}

#[derive(Debug, Clone)]
struct GroupStage {
    id: Value,
    accumulators: Vec<(String, String, Value)>,
}

#[derive(Debug, Clone)]
struct UnwindSpec {
    path: String,
    preserve_null_and_empty: bool,
    include_array_index: Option<String>,
}

#[derive(Debug, Clone)]
struct LookupSpec {
    from: String,
    local_field: Option<String>,
    foreign_field: Option<String>,
    let_vars: Vec<(String, Value)>,
    pipeline: Option<Pipeline>,
    as_field: String,
}

impl Pipeline {
    /// Parse wire-form stages; an empty pipeline passes documents through
    pub fn from_json(stages: &[Value]) -> Result<Self> {
        let stages = stages
            .iter()
            .map(PipelineStage::from_json)
            .collect::<Result<Vec<_>>>()?;
        Ok(Pipeline { stages })
    }

    /// Parse an update pipeline: only reshaping stages are allowed
    pub fn for_update(stages: &[Value]) -> Result<Self> {
        let pipeline = Pipeline::from_json(stages)?;
        for stage in &pipeline.stages {
            match stage {
                PipelineStage::Project(_)
                | PipelineStage::AddFields(_)
                | PipelineStage::Unset(_)
                | PipelineStage::ReplaceRoot(_) => {}
                other => {
                    return Err(IronSyncError::InvalidQuery(format!(
                        "Stage {} is not allowed in an update pipeline",
                        other.name()
                    )))
                }
            }
        }
        Ok(pipeline)
    }

    pub fn execute(&self, docs: Vec<Value>, collections: &Collections) -> Result<Vec<Value>> {
        self.execute_with(docs, collections, &Vars::new())
    }

    fn execute_with(
        &self,
        mut docs: Vec<Value>,
        collections: &Collections,
        vars: &Vars,
    ) -> Result<Vec<Value>> {
        for stage in &self.stages {
            docs = stage.execute(docs, collections, vars)?;
        }
        Ok(docs)
    }
}

impl PipelineStage {
    fn name(&self) -> &'static str {
        match self {
            PipelineStage::Match(_) => "$match",
            PipelineStage::Project(_) => "$project",
            PipelineStage::AddFields(_) => "$addFields",
            PipelineStage::Unset(_) => "$unset",
            PipelineStage::Group(_) => "$group",
            PipelineStage::Sort(_) => "$sort",
            PipelineStage::Skip(_) => "$skip",
            PipelineStage::Limit(_) => "$limit",
            PipelineStage::Sample(_) => "$sample",
            PipelineStage::Unwind(_) => "$unwind",
            PipelineStage::Lookup(_) => "$lookup",
            PipelineStage::Count(_) => "$count",
            PipelineStage::ReplaceRoot(_) => "$replaceRoot",
        }
    }

    fn from_json(stage_json: &Value) -> Result<Self> {
        let obj = stage_json
            .as_object()
            .ok_or_else(|| agg_error("Stage must be an object"))?;
        let mut entries = obj.iter();
        let (name, spec) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => return Err(agg_error("Each stage must have exactly one operator")),
        };

        match name.as_str() {
            "$match" => {
                if !spec.is_object() {
                    return Err(agg_error("$match must be an object"));
                }
                Ok(PipelineStage::Match(spec.clone()))
            }
            "$project" => ProjectStage::from_json(spec).map(PipelineStage::Project),
            "$addFields" | "$set" => {
                let fields = spec
                    .as_object()
                    .ok_or_else(|| agg_error(format!("{} must be an object", name)))?;
                Ok(PipelineStage::AddFields(
                    fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                ))
            }
            "$unset" => match spec {
                Value::String(field) => Ok(PipelineStage::Unset(vec![field.clone()])),
                Value::Array(fields) => fields
                    .iter()
                    .map(|f| {
                        f.as_str()
                            .map(String::from)
                            .ok_or_else(|| agg_error("$unset fields must be strings"))
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(PipelineStage::Unset),
                _ => Err(agg_error("$unset must be a string or an array of strings")),
            },
            "$group" => GroupStage::from_json(spec).map(PipelineStage::Group),
            "$sort" => {
                let columns = spec
                    .as_object()
                    .ok_or_else(|| agg_error("$sort must be an object"))?;
                columns
                    .iter()
                    .map(|(column, direction)| match direction.as_i64() {
                        Some(d @ (1 | -1)) => Ok((column.clone(), d)),
                        _ => Err(agg_error("Sort direction must be 1 or -1")),
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(PipelineStage::Sort)
            }
            "$skip" => count_of(name, spec).map(PipelineStage::Skip),
            "$limit" => count_of(name, spec).map(PipelineStage::Limit),
            "$sample" => {
                let size = spec
                    .get("size")
                    .ok_or_else(|| agg_error("$sample requires a size"))?;
                count_of(name, size).map(PipelineStage::Sample)
            }
            "$unwind" => UnwindSpec::from_json(spec).map(PipelineStage::Unwind),
            "$lookup" => LookupSpec::from_json(spec).map(PipelineStage::Lookup),
            "$count" => spec
                .as_str()
                .map(|field| PipelineStage::Count(field.to_string()))
                .ok_or_else(|| agg_error("$count must be a field name")),
            "$replaceRoot" => spec
                .get("newRoot")
                .cloned()
                .map(PipelineStage::ReplaceRoot)
                .ok_or_else(|| agg_error("$replaceRoot requires newRoot")),
            "$replaceWith" => Ok(PipelineStage::ReplaceRoot(spec.clone())),
            _ => Err(agg_error(format!("Unknown pipeline stage: {}", name))),
        }
    }

    fn execute(&self, docs: Vec<Value>, collections: &Collections, vars: &Vars) -> Result<Vec<Value>> {
        match self {
            PipelineStage::Match(filter) => {
                let mut results = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches_filter_with(&doc, filter, vars)? {
                        results.push(doc);
                    }
                }
                Ok(results)
            }
            PipelineStage::Project(stage) => docs
                .iter()
                .map(|doc| stage.project_document(doc, vars))
                .collect(),
            PipelineStage::AddFields(fields) => docs
                .into_iter()
                .map(|mut doc| {
                    for (field, expression) in fields {
                        let value = expr_eval::evaluate(expression, &doc, vars)?;
                        set_nested_value(&mut doc, field, value);
                    }
                    Ok(doc)
                })
                .collect(),
            PipelineStage::Unset(fields) => Ok(docs
                .into_iter()
                .map(|mut doc| {
                    for field in fields {
                        remove_nested_value(&mut doc, field);
                    }
                    doc
                })
                .collect()),
            PipelineStage::Group(stage) => stage.execute(docs, vars),
            PipelineStage::Sort(columns) => {
                let mut docs = docs;
                docs.sort_by(|a, b| {
                    for (column, direction) in columns {
                        let ordering = compare_values_with_none(
                            get_nested_value(a, column),
                            get_nested_value(b, column),
                        );
                        let ordering = if *direction < 0 { ordering.reverse() } else { ordering };
                        if ordering.is_ne() {
                            return ordering;
                        }
                    }
                    std::cmp::Ordering::Equal
                });
                Ok(docs)
            }
            PipelineStage::Skip(n) => Ok(docs.into_iter().skip(*n).collect()),
            PipelineStage::Limit(n) => Ok(docs.into_iter().take(*n).collect()),
            PipelineStage::Sample(size) => {
                let mut docs = docs;
                docs.shuffle(&mut rand::thread_rng());
                docs.truncate(*size);
                Ok(docs)
            }
            PipelineStage::Unwind(spec) => Ok(spec.execute(docs)),
            PipelineStage::Lookup(spec) => spec.execute(docs, collections, vars),
            PipelineStage::Count(field) => {
                if docs.is_empty() {
                    return Ok(Vec::new());
                }
                let mut counted = Map::new();
                counted.insert(field.clone(), json!(docs.len()));
                Ok(vec![Value::Object(counted)])
            }
            PipelineStage::ReplaceRoot(expression) => docs
                .iter()
                .map(|doc| match expr_eval::evaluate(expression, doc, vars)? {
                    root @ Value::Object(_) => Ok(root),
                    other => Err(agg_error(format!(
                        "replacement root must be a document, got {}",
                        other
                    ))),
                })
                .collect(),
        }
    }
}

fn count_of(name: &str, value: &Value) -> Result<usize> {
    value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| agg_error(format!("{} must be a non-negative integer", name)))
}

impl ProjectStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| agg_error("$project must be an object"))?;

        let fields = obj
            .iter()
            .map(|(field, value)| {
                let action = match value {
                    Value::Bool(true) => ProjectField::Include,
                    Value::Bool(false) => ProjectField::Exclude,
                    Value::Number(n) if n.as_f64() == Some(0.0) => ProjectField::Exclude,
                    Value::Number(_) => ProjectField::Include,
                    expression => ProjectField::Computed(expression.clone()),
                };
                (field.clone(), action)
            })
            .collect();

        Ok(ProjectStage { fields })
    }

    fn project_document(&self, doc: &Value, vars: &Vars) -> Result<Value> {
        // Excluding _id is allowed in include mode
        let include_mode = self
            .fields
            .iter()
            .any(|(_, action)| !matches!(action, ProjectField::Exclude));

        if !include_mode {
            let mut result = doc.clone();
            for (field, _) in &self.fields {
                remove_nested_value(&mut result, field);
            }
            return Ok(result);
        }

        let mut result = Value::Object(Map::new());
        let id_excluded = self
            .fields
            .iter()
            .any(|(field, action)| field == "_id" && matches!(action, ProjectField::Exclude));
        if !id_excluded {
            if let Some(id) = doc.get("_id") {
                set_nested_value(&mut result, "_id", id.clone());
            }
        }

        for (field, action) in &self.fields {
            match action {
                ProjectField::Include => {
                    if let Some(value) = get_nested_value(doc, field) {
                        set_nested_value(&mut result, field, value.clone());
                    }
                }
                ProjectField::Computed(expression) => {
                    let value = expr_eval::evaluate(expression, doc, vars)?;
                    set_nested_value(&mut result, field, value);
                }
                ProjectField::Exclude => {}
            }
        }

        Ok(result)
    }
}

impl GroupStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| agg_error("$group must be an object"))?;
        let id = obj
            .get("_id")
            .cloned()
            .ok_or_else(|| agg_error("Group stage must have _id field"))?;

        let mut accumulators = Vec::new();
        for (field, value) in obj {
            if field == "_id" {
                continue;
            }
            let spec = value
                .as_object()
                .filter(|spec| spec.len() == 1)
                .ok_or_else(|| agg_error("Accumulator must have exactly one operator"))?;
            let Some((op, expression)) = spec.iter().next() else {
                continue;
            };
            match op.as_str() {
                "$sum" | "$avg" | "$min" | "$max" | "$first" | "$last" | "$push"
                | "$addToSet" | "$count" => {}
                _ => return Err(agg_error(format!("Unknown accumulator: {}", op))),
            }
            accumulators.push((field.clone(), op.clone(), expression.clone()));
        }

        Ok(GroupStage { id, accumulators })
    }

    fn execute(&self, docs: Vec<Value>, vars: &Vars) -> Result<Vec<Value>> {
        // Groups keep first-seen order
        let mut keys: Vec<Value> = Vec::new();
        let mut members: Vec<Vec<Value>> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for doc in docs {
            let key = expr_eval::evaluate(&self.id, &doc, vars)?;
            let slot = *index.entry(canonical_json_string(&key)).or_insert_with(|| {
                keys.push(key);
                members.push(Vec::new());
                members.len() - 1
            });
            members[slot].push(doc);
        }

        let mut results = Vec::with_capacity(keys.len());
        for (key, group_docs) in keys.into_iter().zip(members) {
            let mut result = Map::new();
            result.insert("_id".to_string(), key);
            for (field, op, expression) in &self.accumulators {
                let value = accumulate(op, expression, &group_docs, vars)?;
                result.insert(field.clone(), value);
            }
            results.push(Value::Object(result));
        }

        Ok(results)
    }
}

fn accumulate(op: &str, expression: &Value, docs: &[Value], vars: &Vars) -> Result<Value> {
    let evaluate_all = || -> Result<Vec<Value>> {
        docs.iter()
            .map(|doc| expr_eval::evaluate(expression, doc, vars))
            .collect()
    };

    match op {
        "$count" => Ok(json!(docs.len())),
        "$sum" | "$avg" | "$min" | "$max" => Ok(fold_values(op, &evaluate_all()?)),
        "$first" => match docs.first() {
            Some(doc) => expr_eval::evaluate(expression, doc, vars),
            None => Ok(Value::Null),
        },
        "$last" => match docs.last() {
            Some(doc) => expr_eval::evaluate(expression, doc, vars),
            None => Ok(Value::Null),
        },
        // Missing values are skipped
        "$push" => Ok(Value::Array(
            evaluate_all()?.into_iter().filter(|v| !v.is_null()).collect(),
        )),
        _ => {
            let mut seen = std::collections::HashSet::new();
            let unique = evaluate_all()?
                .into_iter()
                .filter(|v| !v.is_null() && seen.insert(canonical_json_string(v)))
                .collect();
            Ok(Value::Array(unique))
        }
    }
}

impl UnwindSpec {
    fn from_json(spec: &Value) -> Result<Self> {
        let (path, options) = match spec {
            Value::String(path) => (path.as_str(), None),
            Value::Object(obj) => (
                obj.get("path")
                    .and_then(Value::as_str)
                    .ok_or_else(|| agg_error("$unwind requires a path"))?,
                Some(obj),
            ),
            _ => return Err(agg_error("$unwind must be a path or an object")),
        };

        let path = path
            .strip_prefix('$')
            .ok_or_else(|| agg_error("$unwind path must start with $"))?;

        Ok(UnwindSpec {
            path: path.to_string(),
            preserve_null_and_empty: options
                .and_then(|o| o.get("preserveNullAndEmptyArrays"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            include_array_index: options
                .and_then(|o| o.get("includeArrayIndex"))
                .and_then(Value::as_str)
                .map(String::from),
        })
    }

    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        let mut results = Vec::new();
        for doc in docs {
            match get_nested_value(&doc, &self.path).cloned() {
                Some(Value::Array(items)) if !items.is_empty() => {
                    for (position, item) in items.into_iter().enumerate() {
                        let mut unwound = doc.clone();
                        set_nested_value(&mut unwound, &self.path, item);
                        if let Some(index_field) = &self.include_array_index {
                            set_nested_value(&mut unwound, index_field, json!(position));
                        }
                        results.push(unwound);
                    }
                }
                Some(Value::Array(_)) | Some(Value::Null) | None => {
                    if self.preserve_null_and_empty {
                        let mut kept = doc;
                        if let Some(index_field) = &self.include_array_index {
                            set_nested_value(&mut kept, index_field, Value::Null);
                        }
                        results.push(kept);
                    }
                }
                // A scalar behaves as a one-element array
                Some(_) => {
                    let mut kept = doc;
                    if let Some(index_field) = &self.include_array_index {
                        set_nested_value(&mut kept, index_field, Value::Null);
                    }
                    results.push(kept);
                }
            }
        }
        results
    }
}

impl LookupSpec {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| agg_error("$lookup must be an object"))?;
        let text = |key: &str| obj.get(key).and_then(Value::as_str).map(String::from);

        let from = text("from").ok_or_else(|| agg_error("$lookup requires from"))?;
        let as_field = text("as").ok_or_else(|| agg_error("$lookup requires as"))?;
        let local_field = text("localField");
        let foreign_field = text("foreignField");
        if local_field.is_some() != foreign_field.is_some() {
            return Err(agg_error(
                "$lookup requires both localField and foreignField, or neither",
            ));
        }

        let pipeline = match obj.get("pipeline") {
            Some(Value::Array(stages)) => Some(Pipeline::from_json(stages)?),
            Some(_) => return Err(agg_error("$lookup pipeline must be an array")),
            None => None,
        };
        if local_field.is_none() && pipeline.is_none() {
            return Err(agg_error("$lookup requires localField/foreignField or a pipeline"));
        }

        let let_vars = match obj.get("let") {
            Some(Value::Object(bindings)) => bindings
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Some(_) => return Err(agg_error("$lookup let must be an object")),
            None => Vec::new(),
        };

        Ok(LookupSpec {
            from,
            local_field,
            foreign_field,
            let_vars,
            pipeline,
            as_field,
        })
    }

    fn execute(&self, docs: Vec<Value>, collections: &Collections, vars: &Vars) -> Result<Vec<Value>> {
        let foreign_docs: &[Value] = collections
            .get(&self.from)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut results = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let mut joined: Vec<Value> = match (&self.local_field, &self.foreign_field) {
                (Some(local), Some(foreign)) => {
                    let wanted = join_keys(&doc, local);
                    foreign_docs
                        .iter()
                        .filter(|candidate| {
                            join_keys(candidate, foreign)
                                .iter()
                                .any(|key| wanted.contains(key))
                        })
                        .cloned()
                        .collect()
                }
                _ => foreign_docs.to_vec(),
            };

            if let Some(pipeline) = &self.pipeline {
                let mut scoped = vars.clone();
                for (name, expression) in &self.let_vars {
                    scoped.insert(name.clone(), expr_eval::evaluate(expression, &doc, vars)?);
                }
                joined = pipeline.execute_with(joined, collections, &scoped)?;
            }

            set_nested_value(&mut doc, &self.as_field, Value::Array(joined));
            results.push(doc);
        }
        Ok(results)
    }
}

/// Values a join side contributes; arrays contribute their elements and a
/// missing field joins as null
fn join_keys(doc: &Value, path: &str) -> Vec<Value> {
    let mut keys = Vec::new();
    for value in get_path_values(doc, path) {
        match value {
            Value::Array(items) => keys.extend(items.iter().cloned()),
            other => keys.push(other.clone()),
        }
    }
    if keys.is_empty() {
        keys.push(Value::Null);
    }
    keys
}
