//! Denormalization sync engine
//!
//! A [`SyncRule`] is declared on the model whose records get embedded
//! elsewhere (the source) and names the model holding the copies (the
//! target) plus the target columns they live under. Saving or destroying a
//! source record runs one transition per rule:
//!
//! - create: only with `embed_on_create_from`; the target referenced by that
//!   column receives the new copy
//! - update: every target referencing the record gets the fresh copy
//! - delete: every referencing target is unset, removed or left alone
//!
//! Fan-out over targets is sequential. A failing target is logged with the
//! source record; the [`FanOutPolicy`] decides whether the rest still run.

pub mod embedded_path;

pub use embedded_path::EmbeddedPath;

use crate::aggregate::Aggregate;
use crate::config::FanOutPolicy;
use crate::error::{IronSyncError, Result};
use crate::expression::{compile_eq, Filter};
use crate::model::{Model, Record, SaveOptions};
use crate::stage::OrWhere;
use crate::{log_debug, log_error};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Extra conditions on the target query
pub type Refiner = Arc<dyn Fn(&mut Aggregate) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDelete {
    /// Drop the embedded copy from the target
    #[default]
    Unset,
    /// Destroy the target record
    Remove,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// The column holds one embedded copy
    #[default]
    Single,
    /// The column is an array of embedded copies
    Many,
}

#[derive(Clone, Copy)]
enum Transition<'p> {
    Update(&'p Value),
    Delete,
}

#[derive(Clone)]
pub struct SyncRule {
    target: Arc<Model>,
    columns: Vec<String>,
    embed_method: Option<String>,
    on_delete: OnDelete,
    mode: SyncMode,
    embed_on_create_from: Option<String>,
    update_when_change: Vec<String>,
    refiner: Option<Refiner>,
    fan_out: Option<FanOutPolicy>,
}

impl fmt::Debug for SyncRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncRule")
            .field("target", &self.target.collection())
            .field("columns", &self.columns)
            .field("mode", &self.mode)
            .field("on_delete", &self.on_delete)
            .field("embed_on_create_from", &self.embed_on_create_from)
            .field("update_when_change", &self.update_when_change)
            .field("fan_out", &self.fan_out)
            .finish()
    }
}

impl SyncRule {
    /// Keep copies under `columns` of `target` records in sync
    pub fn new(target: Arc<Model>, columns: &[&str]) -> Self {
        SyncRule {
            target,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            embed_method: None,
            on_delete: OnDelete::default(),
            mode: SyncMode::default(),
            embed_on_create_from: None,
            update_when_change: Vec::new(),
            refiner: None,
            fan_out: None,
        }
    }

    pub fn many(mut self) -> Self {
        self.mode = SyncMode::Many;
        self
    }

    /// Embed through a named embedder of the source model
    pub fn with_embed_method(mut self, name: &str) -> Self {
        self.embed_method = Some(name.to_string());
        self
    }

    pub fn on_delete(mut self, on_delete: OnDelete) -> Self {
        self.on_delete = on_delete;
        self
    }

    /// On create, embed into the target referenced by `<column>.id` of the
    /// new record
    pub fn embed_on_create_from(mut self, column: &str) -> Self {
        self.embed_on_create_from = Some(column.to_string());
        self
    }

    /// Skip update transitions unless one of `columns` changed
    pub fn update_when_change(mut self, columns: &[&str]) -> Self {
        self.update_when_change = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn refine<F>(mut self, refiner: F) -> Self
    where
        F: Fn(&mut Aggregate) + Send + Sync + 'static,
    {
        self.refiner = Some(Arc::new(refiner));
        self
    }

    /// Override the configured fan-out policy for this rule
    pub fn with_fan_out(mut self, policy: FanOutPolicy) -> Self {
        self.fan_out = Some(policy);
        self
    }

    pub fn target(&self) -> &Arc<Model> {
        &self.target
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// `<target collection>.<columns>`, used in logs and errors
    pub fn name(&self) -> String {
        format!("{}.{}", self.target.collection(), self.columns.join(","))
    }

    fn policy(&self, source: &Model) -> FanOutPolicy {
        self.fan_out.unwrap_or(source.config().fan_out)
    }

    pub(crate) async fn sync_create(&self, source: &Model, record: &Record) -> Result<()> {
        let Some(column) = &self.embed_on_create_from else {
            return Ok(());
        };
        let id_column = &source.config().primary_id_column;
        let Some(target_id) = record.get(&format!("{}.{}", column, id_column)).cloned() else {
            return Ok(());
        };
        let Some(mut target) = self
            .target
            .first(compile_eq(&self.target.config().primary_id_column, target_id))
            .await?
        else {
            return Ok(());
        };

        let payload = source.embed_payload(record, self.embed_method.as_deref());
        for column in &self.columns {
            match self.mode {
                SyncMode::Single => target.set(column, payload.clone()),
                SyncMode::Many => target.associate(column, payload.clone()),
            };
        }

        let saved = self.target.save(&mut target, SaveOptions::default()).await;
        if let Err(e) = &saved {
            self.log_failure(source, record, &target, e);
        }
        saved
    }

    pub(crate) async fn sync_update(&self, source: &Model, record: &Record, old: Option<&Record>) -> Result<()> {
        if let Some(old) = old {
            if !self.update_when_change.is_empty()
                && self
                    .update_when_change
                    .iter()
                    .all(|column| record.get(column) == old.get(column))
            {
                log_debug!("sync {} skipped: watched columns unchanged", self.name());
                return Ok(());
            }
        }

        let payload = source.embed_payload(record, self.embed_method.as_deref());
        self.fan_out(source, record, Transition::Update(&payload)).await
    }

    pub(crate) async fn sync_delete(&self, source: &Model, record: &Record) -> Result<()> {
        if self.on_delete == OnDelete::Ignore {
            return Ok(());
        }
        self.fan_out(source, record, Transition::Delete).await
    }

    /// Targets referencing `id` under any of the rule's columns
    async fn referencing(&self, id: &Value, id_column: &str) -> Result<Vec<Record>> {
        let clauses: Filter = self
            .columns
            .iter()
            .map(|column| (format!("{}.{}", column, id_column), id.clone()))
            .collect();

        let mut query = self.target.aggregate();
        query.or_where(OrWhere::Object(clauses));
        if let Some(refiner) = &self.refiner {
            refiner(&mut *query);
        }
        query.get().await
    }

    async fn fan_out(&self, source: &Model, record: &Record, transition: Transition<'_>) -> Result<()> {
        let id_column = source.config().primary_id_column.clone();
        let Some(id) = source.record_id(record).cloned() else {
            return Ok(());
        };

        let targets = self.referencing(&id, &id_column).await?;
        let total = targets.len();
        let policy = self.policy(source);
        let mut failed = 0;
        let mut first_error = None;

        for mut target in targets {
            let outcome = match transition {
                Transition::Update(payload) => {
                    self.embed_update(&mut target, &id, &id_column, payload);
                    self.target.save(&mut target, SaveOptions::uncast()).await
                }
                Transition::Delete => self.apply_delete(&mut target, &id, &id_column).await,
            };

            if let Err(e) = outcome {
                self.log_failure(source, record, &target, &e);
                if policy == FanOutPolicy::AbortOnFirstError {
                    return Err(e);
                }
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        log_debug!("sync {}: {} target(s), {} failed", self.name(), total, failed);
        match first_error {
            None => Ok(()),
            Some(first) => Err(IronSyncError::SyncFanOut {
                rule: self.name(),
                failed,
                total,
                first: Box::new(first),
            }),
        }
    }

    /// Whether the single-mode column of `target` embeds `id`
    fn embeds(target: &Record, column: &str, id: &Value, id_column: &str) -> bool {
        target.get(&format!("{}.{}", column, id_column)) == Some(id)
    }

    /// Overwrite only the copies whose embedded id is `id`; a target may
    /// embed other records under the rule's remaining columns
    fn embed_update(&self, target: &mut Record, id: &Value, id_column: &str, payload: &Value) {
        for column in &self.columns {
            match self.mode {
                SyncMode::Single => {
                    if Self::embeds(target, column, id, id_column) {
                        target.set(column, payload.clone());
                    }
                }
                SyncMode::Many => {
                    EmbeddedPath::parse(column).replace(target, id, id_column, payload);
                }
            }
        }
    }

    async fn apply_delete(&self, target: &mut Record, id: &Value, id_column: &str) -> Result<()> {
        match self.on_delete {
            OnDelete::Unset => {
                for column in &self.columns {
                    match self.mode {
                        SyncMode::Single => {
                            if Self::embeds(target, column, id, id_column) {
                                target.unset(column);
                            }
                        }
                        SyncMode::Many => {
                            EmbeddedPath::parse(column).remove(target, id, id_column);
                        }
                    }
                }
                self.target.save(target, SaveOptions::default()).await
            }
            OnDelete::Remove => self.target.destroy(target).await,
            OnDelete::Ignore => Ok(()),
        }
    }

    fn log_failure(&self, source: &Model, record: &Record, target: &Record, error: &IronSyncError) {
        log_error!(
            "sync {} failed for {} {} (target {}): {}; source record: {}",
            self.name(),
            source.collection(),
            source.record_id(record).unwrap_or(&Value::Null),
            target.object_id().unwrap_or(&Value::Null),
            error,
            record.to_value()
        );
    }
}
