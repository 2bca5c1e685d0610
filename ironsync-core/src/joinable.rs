// src/joinable.rs
// Named joins and relations resolved into `$lookup` stages

use crate::aggregate::Aggregate;
use crate::error::Result;
use crate::expression::Filter;
use crate::model::EmbedConfig;
use crate::stage::{LookupStage, Stage};
use serde_json::{Map, Value};
use std::sync::Arc;

/// A declared join against another collection
///
/// The nested sub-pipeline is a full [`Aggregate`] over the joined
/// collection. Cloning copies its stage list, so resolving one declared
/// joining twice never mixes stages between the two lookups.
#[derive(Debug, Clone)]
pub struct Joinable {
    from: String,
    local_field: Option<String>,
    foreign_field: String,
    as_field: Option<String>,
    single: bool,
    let_vars: Option<Map<String, Value>>,
    pipeline: Aggregate,
    embed: Arc<EmbedConfig>,
}

impl Joinable {
    /// Join the collection `pipeline` runs on
    pub fn new(pipeline: Aggregate) -> Self {
        Joinable {
            from: pipeline.collection().to_string(),
            local_field: None,
            foreign_field: "id".to_string(),
            as_field: None,
            single: false,
            let_vars: None,
            pipeline,
            embed: Arc::default(),
        }
    }

    pub fn with_local_field(mut self, local_field: impl Into<String>) -> Self {
        self.local_field = Some(local_field.into());
        self
    }

    pub fn with_foreign_field(mut self, foreign_field: impl Into<String>) -> Self {
        self.foreign_field = foreign_field.into();
        self
    }

    pub fn with_as(mut self, as_field: impl Into<String>) -> Self {
        self.as_field = Some(as_field.into());
        self
    }

    pub fn with_single(mut self, single: bool) -> Self {
        self.single = single;
        self
    }

    pub fn with_let(mut self, let_vars: Map<String, Value>) -> Self {
        self.let_vars = Some(let_vars);
        self
    }

    pub(crate) fn with_embed(mut self, embed: Arc<EmbedConfig>) -> Self {
        self.embed = embed;
        self
    }

    pub fn set_as(&mut self, as_field: impl Into<String>) -> &mut Self {
        self.as_field = Some(as_field.into());
        self
    }

    /// The nested builder; stages added here run inside the lookup
    pub fn pipeline_mut(&mut self) -> &mut Aggregate {
        &mut self.pipeline
    }

    pub fn where_raw(&mut self, filter: Filter) -> &mut Self {
        self.pipeline.where_raw(filter);
        self
    }

    pub fn where_op(&mut self, column: &str, operator: &str, value: Value) -> Result<&mut Self> {
        self.pipeline.where_op(column, operator, value)?;
        Ok(self)
    }

    pub fn select(&mut self, columns: &[&str]) -> &mut Self {
        self.pipeline.select(columns);
        self
    }

    pub fn add_stages(&mut self, stages: impl IntoIterator<Item = Stage>) -> &mut Self {
        self.pipeline.add_stages(stages);
        self
    }

    pub fn is_single(&self) -> bool {
        self.single
    }

    pub(crate) fn embed(&self) -> &Arc<EmbedConfig> {
        &self.embed
    }

    /// Output alias: explicit `as`, else the collection name (without a
    /// trailing `s` for single joins)
    pub fn alias(&self) -> String {
        if let Some(as_field) = &self.as_field {
            return as_field.clone();
        }
        if self.single {
            self.from
                .strip_suffix('s')
                .unwrap_or(&self.from)
                .to_string()
        } else {
            self.from.clone()
        }
    }

    /// Lookup stage with defaults filled in
    pub fn parse(&self) -> LookupStage {
        let alias = self.alias();
        let local_field = self
            .local_field
            .clone()
            .unwrap_or_else(|| format!("{}.id", alias));

        LookupStage {
            from: self.from.clone(),
            local_field: Some(local_field),
            foreign_field: Some(self.foreign_field.clone()),
            as_field: alias,
            let_vars: self.let_vars.clone(),
            pipeline: self.pipeline.compile(),
        }
    }
}

/// Refinements applied when a declared joining is used in one query
#[derive(Debug, Clone, Default)]
pub struct JoinOptions {
    pub filter: Option<Filter>,
    pub select: Option<Vec<String>>,
    pub as_field: Option<String>,
    pub stages: Vec<Stage>,
}

impl JoinOptions {
    pub(crate) fn apply(self, joinable: &mut Joinable) {
        if let Some(filter) = self.filter {
            joinable.where_raw(filter);
        }
        if let Some(select) = self.select {
            let columns: Vec<&str> = select.iter().map(String::as_str).collect();
            joinable.select(&columns);
        }
        if let Some(as_field) = self.as_field {
            joinable.set_as(as_field);
        }
        joinable.add_stages(self.stages);
    }
}

/// A relation reachable through `ModelAggregate::with(alias)`
#[derive(Debug, Clone)]
pub struct Relation {
    pub from: String,
    /// Column of the current model; defaults to `id`
    pub local_field: Option<String>,
    /// Column of the joined collection; defaults to `<alias>.id`
    pub foreign_field: Option<String>,
    pub single: bool,
    pub select: Vec<String>,
    pub stages: Vec<Stage>,
}

impl Relation {
    pub fn new(from: impl Into<String>) -> Self {
        Relation {
            from: from.into(),
            local_field: None,
            foreign_field: None,
            single: false,
            select: Vec::new(),
            stages: Vec::new(),
        }
    }

    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    pub fn with_local_field(mut self, local_field: impl Into<String>) -> Self {
        self.local_field = Some(local_field.into());
        self
    }

    pub fn with_foreign_field(mut self, foreign_field: impl Into<String>) -> Self {
        self.foreign_field = Some(foreign_field.into());
        self
    }

    pub fn with_select(mut self, columns: &[&str]) -> Self {
        self.select = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_stages(mut self, stages: Vec<Stage>) -> Self {
        self.stages = stages;
        self
    }

    /// Lookup stage for `alias`
    pub fn parse(&self, alias: &str) -> LookupStage {
        let mut pipeline: Vec<Value> = self.stages.iter().map(Stage::to_json).collect();
        if !self.select.is_empty() {
            let projection = self
                .select
                .iter()
                .map(|column| (column.clone(), Value::from(1)))
                .collect();
            pipeline.push(Stage::Project(projection).to_json());
        }

        LookupStage {
            from: self.from.clone(),
            local_field: Some(self.local_field.clone().unwrap_or_else(|| "id".to_string())),
            foreign_field: Some(
                self.foreign_field
                    .clone()
                    .unwrap_or_else(|| format!("{}.id", alias)),
            ),
            as_field: alias.to_string(),
            let_vars: None,
            pipeline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IronSyncConfig;
    use crate::executor::MemoryExecutor;
    use serde_json::json;

    fn joinable(collection: &str) -> Joinable {
        Joinable::new(Aggregate::new(
            collection,
            Arc::new(MemoryExecutor::new()),
            Arc::new(IronSyncConfig::default()),
        ))
    }

    #[test]
    fn test_defaults() {
        let lookup = joinable("categories").parse();
        assert_eq!(lookup.as_field, "categories");
        assert_eq!(lookup.local_field.as_deref(), Some("categories.id"));
        assert_eq!(lookup.foreign_field.as_deref(), Some("id"));
        assert!(lookup.pipeline.is_empty());

        let single = joinable("categories").with_single(true).parse();
        assert_eq!(single.as_field, "categorie");
        assert_eq!(single.local_field.as_deref(), Some("categorie.id"));

        let author = joinable("users").with_single(true).with_as("author").parse();
        assert_eq!(author.local_field.as_deref(), Some("author.id"));
    }

    #[test]
    fn test_clones_do_not_share_stages() {
        let mut declared = joinable("comments");
        declared.where_raw(json!({"published": true}).as_object().cloned().unwrap());

        let mut first = declared.clone();
        first.select(&["body"]);
        let second = declared.clone();

        assert_eq!(first.parse().pipeline.len(), 2);
        assert_eq!(second.parse().pipeline.len(), 1);
        assert_eq!(declared.parse().pipeline.len(), 1);
    }

    #[test]
    fn test_join_options() {
        let mut joining = joinable("comments");
        JoinOptions {
            filter: Some(json!({"spam": false}).as_object().cloned().unwrap()),
            select: Some(vec!["body".into()]),
            as_field: Some("latestComments".into()),
            stages: vec![Stage::Limit(3)],
        }
        .apply(&mut joining);

        let lookup = joining.parse();
        assert_eq!(lookup.as_field, "latestComments");
        assert_eq!(
            lookup.pipeline,
            vec![
                json!({"$match": {"spam": false}}),
                json!({"$project": {"body": 1}}),
                json!({"$limit": 3}),
            ]
        );
    }

    #[test]
    fn test_relation_defaults() {
        let lookup = Relation::new("posts").with_select(&["title"]).parse("posts");
        assert_eq!(lookup.local_field.as_deref(), Some("id"));
        assert_eq!(lookup.foreign_field.as_deref(), Some("posts.id"));
        assert_eq!(lookup.pipeline, vec![json!({"$project": {"title": 1}})]);
    }
}
