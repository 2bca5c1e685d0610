// src/model/record.rs
// One document plus the snapshot it was loaded (or last saved) with

use crate::value_utils::{get_nested_value, remove_nested_value, set_nested_value};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Which columns make up a record's embedded copy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbedConfig {
    /// Embed only these columns (when non-empty)
    pub embedded: Vec<String>,
    /// Embed everything except these columns (takes precedence)
    pub embed_all_except: Vec<String>,
}

/// Records joined into a result by a lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Joined {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    data: Map<String, Value>,
    original: Map<String, Value>,
    embed: Arc<EmbedConfig>,
    /// Column holding the embedded identity
    id_column: String,
    joined: BTreeMap<String, Joined>,
}

const DEFAULT_ID_COLUMN: &str = "id";

/// Identity an embedded copy is matched by: its id column, or the value itself
fn embedded_identity<'v>(value: &'v Value, id_column: &str) -> &'v Value {
    match value.get(id_column) {
        Some(id) if !id.is_null() => id,
        _ => value,
    }
}

impl Record {
    /// A fresh record: the snapshot is empty, so every column is dirty
    pub fn new(data: Map<String, Value>) -> Self {
        Record {
            data,
            original: Map::new(),
            embed: Arc::default(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            joined: BTreeMap::new(),
        }
    }

    /// A record loaded from storage; the snapshot equals the data
    pub fn from_document(document: Map<String, Value>) -> Self {
        Record {
            original: document.clone(),
            data: document,
            embed: Arc::default(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            joined: BTreeMap::new(),
        }
    }

    pub(crate) fn with_embed(mut self, embed: Arc<EmbedConfig>) -> Self {
        self.embed = embed;
        self
    }

    /// Match embedded copies (and read `id()`) by `column` instead of `id`
    pub fn with_id_column(mut self, column: &str) -> Self {
        self.id_column = column.to_string();
        self
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn original(&self) -> &Map<String, Value> {
        &self.original
    }

    pub fn into_data(self) -> Map<String, Value> {
        self.data
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    /// Dotted-path read
    pub fn get(&self, column: &str) -> Option<&Value> {
        lookup(&self.data, column)
    }

    pub fn get_original(&self, column: &str) -> Option<&Value> {
        lookup(&self.original, column)
    }

    pub fn has(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn set(&mut self, column: &str, value: Value) -> &mut Self {
        self.with_data_value(|doc| set_nested_value(doc, column, value));
        self
    }

    pub fn unset(&mut self, column: &str) -> &mut Self {
        self.with_data_value(|doc| {
            remove_nested_value(doc, column);
        });
        self
    }

    /// Shallow merge of top-level columns
    pub fn merge(&mut self, data: Map<String, Value>) -> &mut Self {
        self.data.extend(data);
        self
    }

    /// Primary (embedded identity) id
    pub fn id(&self) -> Option<&Value> {
        self.get(&self.id_column).filter(|id| !id.is_null())
    }

    /// Storage id assigned by the executor
    pub fn object_id(&self) -> Option<&Value> {
        self.data.get("_id").filter(|id| !id.is_null())
    }

    pub fn is_new(&self) -> bool {
        self.object_id().is_none()
    }

    /// Whole record, or one column, differs from the snapshot
    pub fn is_dirty(&self, column: Option<&str>) -> bool {
        match column {
            None => self.data != self.original,
            Some(_) if self.is_new() => true,
            Some(column) => self.get(column) != self.get_original(column),
        }
    }

    /// Take the current data as the new snapshot
    pub fn sync_original(&mut self) {
        self.original = self.data.clone();
    }

    /// Copy of the pre-change state
    pub fn snapshot(&self) -> Record {
        Record::from_document(self.original.clone())
            .with_embed(self.embed.clone())
            .with_id_column(&self.id_column)
    }

    /// Columns stored inside other documents
    pub fn embedded_data(&self) -> Value {
        let embed = &self.embed;
        let data = if !embed.embed_all_except.is_empty() {
            self.data
                .iter()
                .filter(|(key, _)| !embed.embed_all_except.contains(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        } else if !embed.embedded.is_empty() {
            let mut only = Value::Object(Map::new());
            for column in &embed.embedded {
                if let Some(value) = self.get(column) {
                    set_nested_value(&mut only, column, value.clone());
                }
            }
            return only;
        } else {
            self.data.clone()
        };
        Value::Object(data)
    }

    /// Append an embedded copy to the array `column`
    pub fn associate(&mut self, column: &str, embedded: Value) -> &mut Self {
        let mut list = self.array_at(column);
        list.push(embedded);
        self.set(column, Value::Array(list))
    }

    /// Replace the element with the same identity, or append it
    pub fn reassociate(&mut self, column: &str, embedded: Value) -> &mut Self {
        let mut list = self.array_at(column);
        let identity = embedded_identity(&embedded, &self.id_column).clone();
        match list
            .iter()
            .position(|item| embedded_identity(item, &self.id_column) == &identity)
        {
            Some(index) => list[index] = embedded,
            None => list.push(embedded),
        }
        self.set(column, Value::Array(list))
    }

    /// Remove the element with the same identity
    pub fn disassociate(&mut self, column: &str, embedded: &Value) -> &mut Self {
        let Some(Value::Array(items)) = self.get(column) else {
            return self;
        };
        let mut list = items.clone();
        let identity = embedded_identity(embedded, &self.id_column);
        if let Some(index) = list
            .iter()
            .position(|item| embedded_identity(item, &self.id_column) == identity)
        {
            list.remove(index);
        }
        self.set(column, Value::Array(list))
    }

    pub fn joined(&self, alias: &str) -> Option<&Joined> {
        self.joined.get(alias)
    }

    pub(crate) fn attach_joined(&mut self, alias: String, joined: Joined) {
        self.joined.insert(alias, joined);
    }

    fn array_at(&self, column: &str) -> Vec<Value> {
        match self.get(column) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    fn with_data_value(&mut self, f: impl FnOnce(&mut Value)) {
        let mut doc = Value::Object(std::mem::take(&mut self.data));
        f(&mut doc);
        if let Value::Object(map) = doc {
            self.data = map;
        }
    }
}

/// Dotted-path read rooted at a map
fn lookup<'a>(map: &'a Map<String, Value>, column: &str) -> Option<&'a Value> {
    match column.split_once('.') {
        Some((head, rest)) => get_nested_value(map.get(head)?, rest),
        None => map.get(column),
    }
}
