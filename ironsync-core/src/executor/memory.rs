// src/executor/memory.rs
// In-process QueryExecutor over JSON documents

use super::operators::matches_filter;
use super::pipeline::{Collections, Pipeline};
use super::{QueryExecutor, Session};
use crate::error::{IronSyncError, Result};
use crate::expression::Filter;
use crate::value_utils::{canonical_json_string, get_path_values};
use crate::{log_debug, log_trace};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

/// Reference executor: every collection is a `Vec` of documents in
/// insertion order.
#[derive(Debug, Default)]
pub struct MemoryExecutor {
    collections: RwLock<Collections>,
    last_session: Mutex<Option<Session>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert documents as-is (missing `_id`s are generated)
    pub fn seed(&self, collection: &str, documents: Vec<Value>) {
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();
        for mut document in documents {
            ensure_object_id(&mut document);
            docs.push(document);
        }
    }

    /// Snapshot of a collection
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// List all collection names
    pub fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop collection
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        match self.collections.write().remove(name) {
            Some(docs) => {
                log_debug!("Dropped collection '{}' ({} documents)", name, docs.len());
                Ok(())
            }
            None => Err(IronSyncError::CollectionNotFound(name.to_string())),
        }
    }

    /// Session passed to the most recent call
    pub fn last_session(&self) -> Option<Session> {
        *self.last_session.lock()
    }

    fn observe(&self, session: Option<&Session>) {
        *self.last_session.lock() = session.copied();
    }

    /// Positions of documents matching `filter`
    fn matching_positions(docs: &[Value], filter: &Filter) -> Result<Vec<usize>> {
        let filter = Value::Object(filter.clone());
        let mut positions = Vec::new();
        for (position, doc) in docs.iter().enumerate() {
            if matches_filter(doc, &filter)? {
                positions.push(position);
            }
        }
        Ok(positions)
    }

    fn remove_positions(docs: &mut Vec<Value>, positions: &[usize]) -> u64 {
        for position in positions.iter().rev() {
            docs.remove(*position);
        }
        positions.len() as u64
    }
}

fn ensure_object_id(document: &mut Value) {
    if let Value::Object(map) = document {
        if !map.contains_key("_id") {
            map.insert("_id".to_string(), Value::String(Uuid::new_v4().to_string()));
        }
    }
}

#[async_trait]
impl QueryExecutor for MemoryExecutor {
    async fn run_pipeline(
        &self,
        collection: &str,
        stages: &[Value],
        session: Option<&Session>,
    ) -> Result<Vec<Value>> {
        self.observe(session);
        let pipeline = Pipeline::from_json(stages)?;
        log_trace!("run_pipeline on {}: {} stages", collection, stages.len());

        let collections = self.collections.read();
        let docs = collections.get(collection).cloned().unwrap_or_default();
        pipeline.execute(docs, &collections)
    }

    async fn insert(
        &self,
        collection: &str,
        mut document: Value,
        session: Option<&Session>,
    ) -> Result<Value> {
        self.observe(session);
        if !document.is_object() {
            return Err(IronSyncError::Executor(format!(
                "Cannot insert non-document into {}",
                collection
            )));
        }
        ensure_object_id(&mut document);

        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(document.clone());
        Ok(document)
    }

    async fn replace(
        &self,
        collection: &str,
        filter: &Filter,
        mut document: Value,
        session: Option<&Session>,
    ) -> Result<u64> {
        self.observe(session);
        let mut collections = self.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let Some(&position) = Self::matching_positions(docs, filter)?.first() else {
            return Ok(0);
        };

        // _id is immutable
        if let (Some(id), Value::Object(map)) = (docs[position].get("_id").cloned(), &mut document)
        {
            map.insert("_id".to_string(), id);
        }
        docs[position] = document;
        Ok(1)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &[Value],
        session: Option<&Session>,
    ) -> Result<u64> {
        self.observe(session);
        let pipeline = Pipeline::for_update(update)?;

        let mut collections = self.collections.write();
        let Some(docs) = collections.get(collection).cloned() else {
            return Ok(0);
        };
        let positions = Self::matching_positions(&docs, filter)?;

        let mut modified = Vec::new();
        for position in positions {
            let original = &docs[position];
            let mut updated = pipeline
                .execute(vec![original.clone()], &collections)?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    IronSyncError::Executor("update pipeline removed the document".to_string())
                })?;
            if let (Some(id), Value::Object(map)) = (original.get("_id"), &mut updated) {
                map.insert("_id".to_string(), id.clone());
            }
            if &updated != original {
                modified.push((position, updated));
            }
        }

        let count = modified.len() as u64;
        if let Some(docs) = collections.get_mut(collection) {
            for (position, updated) in modified {
                docs[position] = updated;
            }
        }
        log_debug!("update_many on {}: {} modified", collection, count);
        Ok(count)
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: &Filter,
        session: Option<&Session>,
    ) -> Result<u64> {
        self.observe(session);
        let mut collections = self.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let positions = Self::matching_positions(docs, filter)?;
        Ok(Self::remove_positions(docs, &positions[..positions.len().min(1)]))
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: &Filter,
        session: Option<&Session>,
    ) -> Result<u64> {
        self.observe(session);
        let mut collections = self.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let positions = Self::matching_positions(docs, filter)?;
        Ok(Self::remove_positions(docs, &positions))
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        session: Option<&Session>,
    ) -> Result<Option<Value>> {
        self.observe(session);
        let collections = self.collections.read();
        let Some(docs) = collections.get(collection) else {
            return Ok(None);
        };
        Ok(Self::matching_positions(docs, filter)?
            .first()
            .map(|&position| docs[position].clone()))
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        session: Option<&Session>,
    ) -> Result<Vec<Value>> {
        self.observe(session);
        let collections = self.collections.read();
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(Self::matching_positions(docs, filter)?
            .into_iter()
            .map(|position| docs[position].clone())
            .collect())
    }

    async fn count(&self, collection: &str, filter: &Filter, session: Option<&Session>) -> Result<u64> {
        self.observe(session);
        let collections = self.collections.read();
        match collections.get(collection) {
            Some(docs) => Ok(Self::matching_positions(docs, filter)?.len() as u64),
            None => Ok(0),
        }
    }

    async fn distinct(
        &self,
        collection: &str,
        column: &str,
        filter: &Filter,
        session: Option<&Session>,
    ) -> Result<Vec<Value>> {
        self.observe(session);
        let collections = self.collections.read();
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut seen: HashSet<String> = HashSet::new();
        let mut values = Vec::new();
        for position in Self::matching_positions(docs, filter)? {
            for value in get_path_values(&docs[position], column) {
                // Array fields contribute their elements
                let items = match value {
                    Value::Array(items) => items.iter().collect::<Vec<_>>(),
                    other => vec![other],
                };
                for item in items {
                    if seen.insert(canonical_json_string(item)) {
                        values.push(item.clone());
                    }
                }
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(value: Value) -> Filter {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_object_id() {
        let executor = MemoryExecutor::new();
        let stored = executor.insert("users", json!({"name": "Ada"}), None).await.unwrap();
        assert!(stored["_id"].is_string());

        let kept = executor
            .insert("users", json!({"_id": "fixed", "name": "Bob"}), None)
            .await
            .unwrap();
        assert_eq!(kept["_id"], "fixed");
        assert_eq!(executor.documents("users").len(), 2);
    }

    #[tokio::test]
    async fn test_insert_rejects_scalars() {
        let executor = MemoryExecutor::new();
        assert!(executor.insert("users", json!(5), None).await.is_err());
    }

    #[tokio::test]
    async fn test_replace_keeps_object_id() {
        let executor = MemoryExecutor::new();
        executor.seed("users", vec![json!({"_id": "u1", "name": "Ada"})]);

        let replaced = executor
            .replace("users", &filter(json!({"_id": "u1"})), json!({"name": "Grace"}), None)
            .await
            .unwrap();
        assert_eq!(replaced, 1);
        assert_eq!(executor.documents("users")[0], json!({"_id": "u1", "name": "Grace"}));
    }

    #[tokio::test]
    async fn test_update_many_counts_modified_only() {
        let executor = MemoryExecutor::new();
        executor.seed(
            "users",
            vec![
                json!({"_id": 1, "role": "admin", "active": false}),
                json!({"_id": 2, "role": "admin", "active": true}),
                json!({"_id": 3, "role": "guest", "active": false}),
            ],
        );

        let modified = executor
            .update_many(
                "users",
                &filter(json!({"role": "admin"})),
                &[json!({"$set": {"active": true}})],
                None,
            )
            .await
            .unwrap();

        assert_eq!(modified, 1);
        let docs = executor.documents("users");
        assert_eq!(docs[0]["active"], true);
        assert_eq!(docs[2]["active"], false);
    }

    #[tokio::test]
    async fn test_update_many_rejects_group_stage() {
        let executor = MemoryExecutor::new();
        executor.seed("users", vec![json!({"a": 1})]);
        let result = executor
            .update_many("users", &Filter::new(), &[json!({"$group": {"_id": null}})], None)
            .await;
        assert!(matches!(result, Err(IronSyncError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_delete_one_and_many() {
        let executor = MemoryExecutor::new();
        executor.seed("items", (0..5).map(|i| json!({"n": i, "even": i % 2 == 0})).collect());

        let one = executor
            .delete_one("items", &filter(json!({"even": true})), None)
            .await
            .unwrap();
        assert_eq!(one, 1);

        let many = executor
            .delete_many("items", &filter(json!({"even": true})), None)
            .await
            .unwrap();
        assert_eq!(many, 2);
        assert_eq!(executor.count("items", &Filter::new(), None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_find_and_distinct_traverse_arrays() {
        let executor = MemoryExecutor::new();
        executor.seed(
            "orders",
            vec![
                json!({"customer": {"id": 1}, "tags": ["a", "b"]}),
                json!({"customer": {"id": 2}, "tags": ["b", "c"]}),
            ],
        );

        let found = executor
            .find_one("orders", &filter(json!({"customer.id": 2})), None)
            .await
            .unwrap();
        assert_eq!(found.unwrap()["tags"], json!(["b", "c"]));

        let tags = executor
            .distinct("orders", "tags", &Filter::new(), None)
            .await
            .unwrap();
        assert_eq!(tags, vec![json!("a"), json!("b"), json!("c")]);
    }

    #[tokio::test]
    async fn test_missing_collection_is_empty() {
        let executor = MemoryExecutor::new();
        assert!(executor.run_pipeline("ghost", &[], None).await.unwrap().is_empty());
        assert_eq!(executor.delete_many("ghost", &Filter::new(), None).await.unwrap(), 0);
        assert!(executor.find_one("ghost", &Filter::new(), None).await.unwrap().is_none());
    }

    #[test]
    fn test_drop_collection() {
        let executor = MemoryExecutor::new();
        executor.seed("users", vec![json!({"name": "Ada"})]);
        executor.seed("audit", vec![]);
        assert_eq!(executor.list_collections(), vec!["audit", "users"]);

        executor.drop_collection("users").unwrap();
        assert!(executor.documents("users").is_empty());
        assert!(matches!(
            executor.drop_collection("users"),
            Err(IronSyncError::CollectionNotFound(name)) if name == "users"
        ));
    }

    #[tokio::test]
    async fn test_records_session() {
        let executor = MemoryExecutor::new();
        let session = Session::new();
        executor.count("users", &Filter::new(), Some(&session)).await.unwrap();
        assert_eq!(executor.last_session(), Some(session));
        executor.count("users", &Filter::new(), None).await.unwrap();
        assert_eq!(executor.last_session(), None);
    }
}
