//! Model layer
//!
//! A [`Model`] binds a collection to its executor, casts, embed config,
//! declared joins and relations, listener registry and sync rules. Records
//! are plain data; persistence goes through the model that owns them.
//!
//! `save` and `destroy` return boxed futures because syncing a record saves
//! (or destroys) records of other models, which may sync in turn.

pub mod casts;
pub mod events;
mod model_aggregate;
pub mod record;

pub use casts::Cast;
pub use events::{ModelEvent, ModelEvents};
pub use model_aggregate::ModelAggregate;
pub use record::{EmbedConfig, Joined, Record};

use crate::aggregate::Aggregate;
use crate::config::IronSyncConfig;
use crate::counters::{CounterOptions, Counters};
use crate::error::{IronSyncError, Result};
use crate::executor::{current_session, QueryExecutor};
use crate::expression::{compile_eq, date_value, Filter};
use crate::joinable::{Joinable, Relation};
use crate::sync::SyncRule;
use crate::{log_debug, log_error, log_warn};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Named alternative to `embedded_data` used by sync rules
pub type Embedder = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Apply casts (dirty columns only, unless `force_cast`)
    pub cast: bool,
    pub force_cast: bool,
    pub trigger_events: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            cast: true,
            force_cast: false,
            trigger_events: true,
        }
    }
}

impl SaveOptions {
    /// Persist the data as it is, without casting
    pub fn uncast() -> Self {
        SaveOptions {
            cast: false,
            ..Default::default()
        }
    }

    pub fn silent() -> Self {
        SaveOptions {
            trigger_events: false,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Create,
    Update,
}

pub struct Model {
    collection: String,
    executor: Arc<dyn QueryExecutor>,
    config: Arc<IronSyncConfig>,
    casts: Vec<(String, Cast)>,
    embed: Arc<EmbedConfig>,
    embedders: HashMap<String, Embedder>,
    sync_rules: Vec<SyncRule>,
    joinings: HashMap<String, Joinable>,
    relations: HashMap<String, Relation>,
    events: ModelEvents,
    counter: CounterOptions,
    default_values: Map<String, Value>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("collection", &self.collection)
            .field("casts", &self.casts)
            .field("embed", &self.embed)
            .field("sync_rules", &self.sync_rules.len())
            .field("joinings", &self.joinings.keys().collect::<Vec<_>>())
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Declarative setup of a [`Model`]; finished with [`ModelBuilder::build`]
pub struct ModelBuilder {
    model: Model,
}

impl ModelBuilder {
    pub fn with_cast(mut self, column: &str, cast: Cast) -> Self {
        self.model.casts.push((column.to_string(), cast));
        self
    }

    pub fn with_embedded(mut self, columns: &[&str]) -> Self {
        Arc::make_mut(&mut self.model.embed).embedded = to_strings(columns);
        self
    }

    pub fn with_embed_all_except(mut self, columns: &[&str]) -> Self {
        Arc::make_mut(&mut self.model.embed).embed_all_except = to_strings(columns);
        self
    }

    pub fn with_embedder<F>(mut self, name: &str, embedder: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.model.embedders.insert(name.to_string(), Arc::new(embedder));
        self
    }

    pub fn with_sync(mut self, rule: SyncRule) -> Self {
        self.model.sync_rules.push(rule);
        self
    }

    pub fn with_joining(mut self, name: &str, joinable: Joinable) -> Self {
        self.model.joinings.insert(name.to_string(), joinable);
        self
    }

    pub fn with_relation(mut self, alias: &str, relation: Relation) -> Self {
        self.model.relations.insert(alias.to_string(), relation);
        self
    }

    pub fn with_counter(mut self, counter: CounterOptions) -> Self {
        self.model.counter = counter;
        self
    }

    /// Value merged into new records that lack `column`
    pub fn with_default(mut self, column: &str, value: Value) -> Self {
        self.model.default_values.insert(column.to_string(), value);
        self
    }

    pub fn build(self) -> Arc<Model> {
        Arc::new(self.model)
    }
}

fn to_strings(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

impl Model {
    pub fn builder(
        collection: impl Into<String>,
        executor: Arc<dyn QueryExecutor>,
        config: Arc<IronSyncConfig>,
    ) -> ModelBuilder {
        ModelBuilder {
            model: Model {
                collection: collection.into(),
                executor,
                config,
                casts: Vec::new(),
                embed: Arc::default(),
                embedders: HashMap::new(),
                sync_rules: Vec::new(),
                joinings: HashMap::new(),
                relations: HashMap::new(),
                events: ModelEvents::new(),
                counter: CounterOptions::default(),
                default_values: Map::new(),
            },
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn executor(&self) -> &Arc<dyn QueryExecutor> {
        &self.executor
    }

    pub fn config(&self) -> &Arc<IronSyncConfig> {
        &self.config
    }

    pub fn events(&self) -> &ModelEvents {
        &self.events
    }

    pub fn sync_rules(&self) -> &[SyncRule] {
        &self.sync_rules
    }

    /// Plain builder over this collection
    pub fn query(&self) -> Aggregate {
        Aggregate::new(self.collection.clone(), self.executor.clone(), self.config.clone())
    }

    pub fn aggregate(&self) -> ModelAggregate<'_> {
        ModelAggregate::new(self)
    }

    /// Joinable over this collection, for declaring joins on other models
    pub fn joinable(&self) -> Joinable {
        Joinable::new(self.query()).with_embed(self.embed.clone())
    }

    pub(crate) fn declared_joining(&self, name: &str) -> Result<Joinable> {
        self.joinings
            .get(name)
            .cloned()
            .ok_or_else(|| IronSyncError::UnknownJoining(name.to_string()))
    }

    pub(crate) fn relation(&self, alias: &str) -> Option<&Relation> {
        self.relations.get(alias)
    }

    /// Unsaved record carrying this model's embed config
    pub fn new_record(&self, data: Map<String, Value>) -> Record {
        Record::new(data)
            .with_embed(self.embed.clone())
            .with_id_column(&self.config.primary_id_column)
    }

    /// Record for a stored document
    pub fn record(&self, document: Map<String, Value>) -> Record {
        Record::from_document(document)
            .with_embed(self.embed.clone())
            .with_id_column(&self.config.primary_id_column)
    }

    /// Embedded identity of a record
    pub fn record_id<'r>(&self, record: &'r Record) -> Option<&'r Value> {
        record
            .get(&self.config.primary_id_column)
            .filter(|id| !id.is_null())
    }

    /// Payload stored in other documents: the named embedder when one is
    /// registered, else `embedded_data`
    pub fn embed_payload(&self, record: &Record, method: Option<&str>) -> Value {
        let Some(name) = method else {
            return record.embedded_data();
        };
        match self.embedders.get(name) {
            Some(embedder) => embedder(record),
            None => {
                log_warn!(
                    "Embedder '{}' is not registered on {}, using embedded data",
                    name,
                    self.collection
                );
                record.embedded_data()
            }
        }
    }

    pub async fn find(&self, id: Value) -> Result<Option<Record>> {
        let mut query = self.aggregate();
        query.where_raw(compile_eq(&self.config.primary_id_column, id));
        query.first().await
    }

    pub async fn find_or_fail(&self, id: Value) -> Result<Record> {
        self.find(id).await?.ok_or(IronSyncError::DocumentNotFound)
    }

    pub async fn first(&self, filter: Filter) -> Result<Option<Record>> {
        let mut query = self.aggregate();
        query.where_raw(filter);
        query.first().await
    }

    pub async fn create(&self, data: Map<String, Value>) -> Result<Record> {
        let mut record = self.new_record(data);
        self.save(&mut record, SaveOptions::default()).await?;
        Ok(record)
    }

    /// Insert a new record or replace a stored one, then sync
    pub fn save<'a>(&'a self, record: &'a mut Record, options: SaveOptions) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let (mode, old) = if record.is_new() {
                self.insert_record(record, options).await?;
                (SaveMode::Create, None)
            } else {
                match self.replace_record(record, options).await? {
                    Some(old) => (SaveMode::Update, Some(old)),
                    None => return Ok(()),
                }
            };

            record.sync_original();
            self.run_sync(record, mode, old.as_ref()).await
        })
    }

    async fn insert_record(&self, record: &mut Record, options: SaveOptions) -> Result<()> {
        for (column, value) in &self.default_values {
            if !record.has(column) {
                record.set(column, value.clone());
            }
        }

        let id_column = self.config.primary_id_column.clone();
        if self.record_id(record).is_none() {
            let id = Counters::new(self.executor.clone(), self.config.counters_collection.clone())
                .next_id(&self.collection, self.counter)
                .await?;
            record.set(&id_column, json!(id));
        }

        let now = date_value(&Utc::now());
        let timestamps = &self.config.timestamps;
        for column in [&timestamps.created_at, &timestamps.updated_at].into_iter().flatten() {
            record.set(column, now.clone());
        }

        if options.cast {
            self.cast_data(record, true);
        }

        if options.trigger_events {
            self.events.trigger(ModelEvent::Creating, record, None)?;
            self.events.trigger(ModelEvent::Saving, record, None)?;
        }

        let session = current_session();
        let stored = self
            .executor
            .insert(&self.collection, record.to_value(), session.as_ref())
            .await
            .inspect_err(|e| log_error!("insert into {} failed: {}", self.collection, e))?;
        if let Value::Object(stored) = stored {
            record.merge(stored);
        }
        log_debug!("created {} in {}", record.get(&id_column).unwrap_or(&Value::Null), self.collection);

        if options.trigger_events {
            self.events.trigger(ModelEvent::Created, record, None)?;
            self.events.trigger(ModelEvent::Saved, record, None)?;
        }
        Ok(())
    }

    /// Returns the pre-save snapshot, or `None` when nothing changed
    async fn replace_record(&self, record: &mut Record, options: SaveOptions) -> Result<Option<Record>> {
        if options.cast {
            self.cast_data(record, options.force_cast);
        }
        if !record.is_dirty(None) {
            return Ok(None);
        }

        let old = record.snapshot();
        if let Some(column) = &self.config.timestamps.updated_at {
            record.set(column, date_value(&Utc::now()));
        }

        if options.trigger_events {
            self.events.trigger(ModelEvent::Updating, record, Some(&old))?;
            self.events.trigger(ModelEvent::Saving, record, Some(&old))?;
        }

        let object_id = record.object_id().cloned().ok_or(IronSyncError::DocumentNotFound)?;
        let session = current_session();
        self.executor
            .replace(&self.collection, &compile_eq("_id", object_id), record.to_value(), session.as_ref())
            .await
            .inspect_err(|e| log_error!("replace in {} failed: {}", self.collection, e))?;

        if options.trigger_events {
            self.events.trigger(ModelEvent::Updated, record, Some(&old))?;
            self.events.trigger(ModelEvent::Saved, record, Some(&old))?;
        }
        Ok(Some(old))
    }

    fn cast_data(&self, record: &mut Record, all_columns: bool) {
        for (column, cast) in &self.casts {
            if !all_columns && !record.is_dirty(Some(column)) {
                continue;
            }
            if let Some(value) = record.get(column).cloned() {
                record.set(column, cast.apply(value));
            }
        }
    }

    /// Run every sync rule; a failing rule does not stop the others
    async fn run_sync(&self, record: &Record, mode: SaveMode, old: Option<&Record>) -> Result<()> {
        let mut first_error = None;
        for rule in &self.sync_rules {
            let outcome = match mode {
                SaveMode::Create => rule.sync_create(self, record).await,
                SaveMode::Update => rule.sync_update(self, record, old).await,
            };
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Delete a stored record, then run the delete transition of every rule
    pub fn destroy<'a>(&'a self, record: &'a mut Record) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let Some(object_id) = record.object_id().cloned() else {
                return Ok(());
            };

            self.events.trigger(ModelEvent::Deleting, record, None)?;
            let session = current_session();
            self.executor
                .delete_one(&self.collection, &compile_eq("_id", object_id), session.as_ref())
                .await
                .inspect_err(|e| log_error!("delete from {} failed: {}", self.collection, e))?;
            self.events.trigger(ModelEvent::Deleted, record, None)?;

            let mut first_error = None;
            for rule in &self.sync_rules {
                if let Err(e) = rule.sync_delete(self, record).await {
                    first_error.get_or_insert(e);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MemoryExecutor;
    use parking_lot::Mutex;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn users(executor: Arc<MemoryExecutor>) -> Arc<Model> {
        Model::builder("users", executor, Arc::new(IronSyncConfig::default()))
            .with_cast("age", Cast::Integer)
            .with_cast("name", Cast::String)
            .with_default("active", json!(true))
            .with_embedded(&["id", "name"])
            .build()
    }

    #[tokio::test]
    async fn test_create_assigns_id_timestamps_and_defaults() {
        let executor = Arc::new(MemoryExecutor::new());
        let users = users(executor.clone());

        let ada = users.create(map(json!({"name": " Ada ", "age": "36"}))).await.unwrap();
        let grace = users.create(map(json!({"name": "Grace"}))).await.unwrap();

        assert_eq!(ada.get("id"), Some(&json!(1)));
        assert_eq!(grace.get("id"), Some(&json!(2)));
        assert_eq!(ada.get("name"), Some(&json!("Ada")));
        assert_eq!(ada.get("age"), Some(&json!(36)));
        assert_eq!(ada.get("active"), Some(&json!(true)));
        assert!(ada.get("createdAt").is_some());
        assert!(!ada.is_new());
        assert!(!ada.is_dirty(None));
        assert_eq!(executor.documents("users").len(), 2);
        assert_eq!(ada.embedded_data(), json!({"id": 1, "name": "Ada"}));
    }

    #[tokio::test]
    async fn test_update_skips_clean_records() {
        let executor = Arc::new(MemoryExecutor::new());
        let users = users(executor.clone());
        let updates = Arc::new(Mutex::new(0));
        let counter = updates.clone();
        users.events().on(ModelEvent::Updated, move |_, _| {
            *counter.lock() += 1;
            Ok(())
        });

        let mut ada = users.create(map(json!({"name": "Ada"}))).await.unwrap();
        users.save(&mut ada, SaveOptions::default()).await.unwrap();
        assert_eq!(*updates.lock(), 0);

        ada.set("name", json!("Ada L."));
        users.save(&mut ada, SaveOptions::default()).await.unwrap();
        assert_eq!(*updates.lock(), 1);

        let stored = users.find(json!(1)).await.unwrap().unwrap();
        assert_eq!(stored.get("name"), Some(&json!("Ada L.")));
    }

    #[tokio::test]
    async fn test_updating_listener_gets_pre_save_snapshot() {
        let executor = Arc::new(MemoryExecutor::new());
        let users = users(executor);
        users.events().on(ModelEvent::Updating, |record, old| {
            let old = old.expect("update passes the snapshot");
            assert_eq!(old.get("name"), Some(&json!("Ada")));
            assert_eq!(record.get("name"), Some(&json!("Grace")));
            Ok(())
        });

        let mut record = users.create(map(json!({"name": "Ada"}))).await.unwrap();
        record.set("name", json!("Grace"));
        users.save(&mut record, SaveOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_error_aborts_save() {
        let executor = Arc::new(MemoryExecutor::new());
        let users = users(executor.clone());
        users.events().on(ModelEvent::Creating, |_, _| {
            Err(IronSyncError::InvalidQuery("rejected".into()))
        });

        assert!(users.create(map(json!({"name": "Ada"}))).await.is_err());
        assert!(executor.documents("users").is_empty());

        let mut silent = users.new_record(map(json!({"name": "Ada"})));
        users.save(&mut silent, SaveOptions::silent()).await.unwrap();
        assert_eq!(executor.documents("users").len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_and_find_or_fail() {
        let executor = Arc::new(MemoryExecutor::new());
        let users = users(executor.clone());
        let mut ada = users.create(map(json!({"name": "Ada"}))).await.unwrap();

        users.destroy(&mut ada).await.unwrap();
        assert!(executor.documents("users").is_empty());
        assert!(matches!(
            users.find_or_fail(json!(1)).await,
            Err(IronSyncError::DocumentNotFound)
        ));

        // Unsaved records have nothing to delete
        let mut fresh = users.new_record(Map::new());
        users.destroy(&mut fresh).await.unwrap();
    }

    #[tokio::test]
    async fn test_named_embedder() {
        let executor = Arc::new(MemoryExecutor::new());
        let users = Model::builder("users", executor, Arc::new(IronSyncConfig::default()))
            .with_embedder("summary", |record| json!({"label": record.get("name")}))
            .build();
        let record = users.new_record(map(json!({"id": 1, "name": "Ada"})));

        assert_eq!(users.embed_payload(&record, Some("summary")), json!({"label": "Ada"}));
        assert_eq!(users.embed_payload(&record, Some("missing")), json!({"id": 1, "name": "Ada"}));
    }
}
