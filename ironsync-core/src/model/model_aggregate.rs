// src/model/model_aggregate.rs
// Aggregate builder that hands back records of its model

use super::record::{EmbedConfig, Joined, Record};
use super::Model;
use crate::aggregate::pagination::page_count;
use crate::aggregate::{Aggregate, PaginationInfo, PaginationListing};
use crate::error::{IronSyncError, Result};
use crate::expression::agg::column_name;
use crate::expression::Filter;
use crate::joinable::{JoinOptions, Joinable};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// How the documents joined under one alias come back
#[derive(Debug, Clone)]
struct ReturnAs {
    single: bool,
    embed: Arc<EmbedConfig>,
}

impl ReturnAs {
    fn record(&self, value: Value) -> Option<Record> {
        match value {
            Value::Object(map) => Some(Record::from_document(map).with_embed(self.embed.clone())),
            _ => None,
        }
    }

    fn wrap(&self, raw: Value) -> Joined {
        match raw {
            Value::Array(items) if !self.single => {
                Joined::Many(items.into_iter().filter_map(|item| self.record(item)).collect())
            }
            Value::Array(items) => {
                Joined::One(items.into_iter().next().and_then(|item| self.record(item)).map(Box::new))
            }
            _ if !self.single => Joined::Many(Vec::new()),
            other => Joined::One(self.record(other).map(Box::new)),
        }
    }
}

/// [`Aggregate`] bound to a model
///
/// Builder methods come through `Deref`; the reading methods defined here
/// return [`Record`]s with joined aliases attached.
#[derive(Debug, Clone)]
pub struct ModelAggregate<'m> {
    model: &'m Model,
    inner: Aggregate,
    returns: BTreeMap<String, ReturnAs>,
}

impl<'m> Deref for ModelAggregate<'m> {
    type Target = Aggregate;

    fn deref(&self) -> &Aggregate {
        &self.inner
    }
}

impl<'m> DerefMut for ModelAggregate<'m> {
    fn deref_mut(&mut self) -> &mut Aggregate {
        &mut self.inner
    }
}

impl<'m> ModelAggregate<'m> {
    pub(crate) fn new(model: &'m Model) -> Self {
        ModelAggregate {
            model,
            inner: model.query(),
            returns: BTreeMap::new(),
        }
    }

    pub fn into_inner(self) -> Aggregate {
        self.inner
    }

    fn hydrate(&self, document: Value) -> Record {
        let mut data = match document {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let joined: Vec<(String, Joined)> = self
            .returns
            .iter()
            .map(|(alias, shape)| {
                let raw = data.remove(alias).unwrap_or(Value::Null);
                (alias.clone(), shape.wrap(raw))
            })
            .collect();

        let mut record = self.model.record(data);
        for (alias, joined) in joined {
            record.attach_joined(alias, joined);
        }
        record
    }

    fn hydrate_all(&self, documents: Vec<Value>) -> Result<Vec<Record>> {
        self.model.events().trigger_fetching(&documents)?;
        Ok(documents.into_iter().map(|doc| self.hydrate(doc)).collect())
    }

    pub async fn get(&self) -> Result<Vec<Record>> {
        let documents = self.inner.get().await?;
        self.hydrate_all(documents)
    }

    pub async fn first(&mut self) -> Result<Option<Record>> {
        self.inner.limit(1);
        Ok(self.get().await?.into_iter().next())
    }

    pub async fn last(&mut self, filter: Option<Filter>) -> Result<Option<Record>> {
        if let Some(filter) = filter {
            self.inner.where_raw(filter);
        }
        let id_column = self.model.config().primary_id_column.clone();
        self.inner.order_by_desc(&id_column).limit(1);
        Ok(self.get().await?.into_iter().next())
    }

    /// Page of records; see [`Aggregate::paginate`]
    pub async fn paginate(&mut self, page: u64, limit: Option<u64>) -> Result<PaginationListing<Record>> {
        let listing = self.inner.paginate(page, limit).await?;
        Ok(PaginationListing {
            documents: self.hydrate_all(listing.documents)?,
            pagination_info: listing.pagination_info,
        })
    }

    pub async fn chunk<F, Fut>(&self, limit: u64, mut callback: F) -> Result<()>
    where
        F: FnMut(Vec<Record>, PaginationInfo) -> Fut,
        Fut: Future<Output = bool>,
    {
        let total = self.inner.clone().count().await?;
        for page in 1..=page_count(total, limit) {
            let listing = self.clone().paginate(page, Some(limit)).await?;
            if !callback(listing.documents, listing.pagination_info).await {
                break;
            }
        }
        Ok(())
    }

    /// Destroy every matched record one by one, so delete syncing runs
    pub async fn delete(&mut self) -> Result<u64> {
        let mut records = self.get().await?;
        for record in records.iter_mut() {
            self.model.destroy(record).await?;
        }
        Ok(records.len() as u64)
    }

    /// Join through a joining declared on the model
    pub fn joining(&mut self, name: &str, options: JoinOptions) -> Result<&mut Self> {
        let mut joinable = self.model.declared_joining(name)?;
        options.apply(&mut joinable);
        Ok(self.joining_with(joinable))
    }

    /// Join through an ad-hoc joinable
    pub fn joining_with(&mut self, joinable: Joinable) -> &mut Self {
        let lookup = joinable.parse();
        self.returns.insert(
            lookup.as_field.clone(),
            ReturnAs {
                single: joinable.is_single(),
                embed: joinable.embed().clone(),
            },
        );
        self.inner.lookup(lookup, joinable.is_single());
        self
    }

    /// Join, then add `<alias>Count` holding the number of joined documents
    pub fn count_joining(&mut self, name: &str, options: JoinOptions) -> Result<&mut Self> {
        let mut joinable = self.model.declared_joining(name)?;
        options.apply(&mut joinable);
        let alias = joinable.alias();
        self.joining_with(joinable);
        self.inner
            .add_field(&format!("{}Count", alias), json!({ "$size": column_name(&alias) }));
        Ok(self)
    }

    /// Join a relation declared on the model under `alias`
    pub fn with(&mut self, alias: &str) -> Result<&mut Self> {
        let relation = self
            .model
            .relation(alias)
            .ok_or_else(|| IronSyncError::UnknownRelation(alias.to_string()))?;
        let lookup = relation.parse(alias);
        self.returns.insert(
            alias.to_string(),
            ReturnAs {
                single: relation.single,
                embed: Arc::default(),
            },
        );
        self.inner.lookup(lookup, relation.single);
        Ok(self)
    }
}
