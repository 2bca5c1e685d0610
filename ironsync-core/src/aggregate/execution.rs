// src/aggregate/execution.rs
// Executing operations of the aggregate builder

use super::pagination::{page_count, page_offset, PaginationInfo, PaginationListing};
use super::Aggregate;
use crate::error::Result;
use crate::executor::current_session;
use crate::expression::agg;
use crate::expression::{normalize_dates, Filter};
use crate::logging::{should_log, LogLevel};
use crate::stage::GroupKey;
use crate::value_utils::get_nested_value;
use crate::{log_debug, log_error, log_trace};
use serde_json::{json, Map, Value};
use std::future::Future;

impl Aggregate {
    /// Run the compiled pipeline and return raw documents
    pub async fn execute(&self) -> Result<Vec<Value>> {
        let stages = self.compile();
        if should_log(LogLevel::Trace) {
            log_trace!(
                "aggregate on {}: {}",
                self.collection,
                Value::Array(stages.clone())
            );
        }

        let session = current_session();
        self.executor
            .run_pipeline(&self.collection, &stages, session.as_ref())
            .await
    }

    pub async fn get(&self) -> Result<Vec<Value>> {
        self.execute().await
    }

    /// `get()` with a per-document transform
    pub async fn get_with<T, F>(&self, mapper: F) -> Result<Vec<T>>
    where
        F: FnMut(Value) -> T,
    {
        Ok(self.execute().await?.into_iter().map(mapper).collect())
    }

    pub async fn first(&mut self) -> Result<Option<Value>> {
        self.limit(1);
        Ok(self.get().await?.into_iter().next())
    }

    /// Last document by primary id, ignoring any sort already added
    pub async fn last(&mut self, filter: Option<Filter>) -> Result<Option<Value>> {
        if let Some(filter) = filter {
            self.where_raw(filter);
        }
        let id_column = self.config.primary_id_column.clone();
        self.order_by_desc(&id_column).limit(1);
        Ok(self.get().await?.into_iter().next())
    }

    /// Appends a `{_id: null, total: {$sum: 1}}` group and reads `total`
    pub async fn count(&mut self) -> Result<u64> {
        let mut accumulators = Map::new();
        accumulators.insert("total".to_string(), agg::count());
        self.group_by(GroupKey::Null, accumulators);

        let results = self.execute().await?;
        Ok(results
            .first()
            .and_then(|doc| doc.get("total"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    /// Fetch one 1-based page, then count the pre-page pipeline
    ///
    /// `limit` defaults to the configured `per_page`. The builder's stages
    /// are restored afterwards. Page 0 is read as page 1.
    pub async fn paginate(&mut self, page: u64, limit: Option<u64>) -> Result<PaginationListing<Value>> {
        let page = page.max(1);
        let limit = limit.unwrap_or(self.config.per_page);
        let snapshot = self.stages.clone();

        self.skip(page_offset(page, limit)).limit(limit);
        let documents = self.get().await;
        self.replace_stages(snapshot.clone());
        let documents = documents?;

        let total = self.count().await;
        self.replace_stages(snapshot);
        let total = total?;

        let result = documents.len() as u64;
        Ok(PaginationListing {
            documents,
            pagination_info: PaginationInfo::new(page, limit, result, total),
        })
    }

    /// Walk every page sequentially; the callback returns `false` to stop
    pub async fn chunk<F, Fut>(&self, limit: u64, mut callback: F) -> Result<()>
    where
        F: FnMut(Vec<Value>, PaginationInfo) -> Fut,
        Fut: Future<Output = bool>,
    {
        let total = self.clone().count().await?;
        let pages = page_count(total, limit);

        for page in 1..=pages {
            let listing = self.clone().paginate(page, Some(limit)).await?;
            if !callback(listing.documents, listing.pagination_info).await {
                break;
            }
        }
        Ok(())
    }

    /// Set `data` on every document the pipeline's filters match
    ///
    /// All `$match` stages merge into the update filter; other stages run
    /// ahead of the trailing `$set`.
    pub async fn update(&self, data: Map<String, Value>) -> Result<u64> {
        let (filter, mut pipeline) = self.split_for_update();
        pipeline.push(json!({ "$set": normalize_dates(Value::Object(data)) }));
        self.bulk_update("update", filter, pipeline).await
    }

    /// Remove `columns` from every document the pipeline's filters match
    pub async fn unset(&self, columns: &[&str]) -> Result<u64> {
        let (filter, mut pipeline) = self.split_for_update();
        pipeline.push(json!({ "$unset": columns }));
        self.bulk_update("unset", filter, pipeline).await
    }

    async fn bulk_update(&self, operation: &str, filter: Filter, pipeline: Vec<Value>) -> Result<u64> {
        let session = current_session();
        match self
            .executor
            .update_many(&self.collection, &filter, &pipeline, session.as_ref())
            .await
        {
            Ok(modified) => {
                log_debug!("{} on {}: {} modified", operation, self.collection, modified);
                Ok(modified)
            }
            Err(e) => {
                log_error!("{} on {} failed: {}", operation, self.collection, e);
                Err(e)
            }
        }
    }

    /// Delete every matched document: fetch the `_id`s, then delete by id
    pub async fn delete(&mut self) -> Result<u64> {
        let ids = self.select(&["_id"]).pluck("_id").await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let mut filter = Filter::new();
        filter.insert("_id".to_string(), json!({ "$in": ids }));

        let session = current_session();
        let deleted = self
            .executor
            .delete_many(&self.collection, &filter, session.as_ref())
            .await?;
        log_debug!("delete on {}: {} removed", self.collection, deleted);
        Ok(deleted)
    }

    /// Values of one (dotted) column; missing values come back as null
    pub async fn pluck(&mut self, column: &str) -> Result<Vec<Value>> {
        self.select(&[column]);
        self.get_with(|doc| get_nested_value(&doc, column).cloned().unwrap_or(Value::Null))
            .await
    }

    async fn single_aggregate(&mut self, name: &str, accumulator: Value) -> Result<Value> {
        let mut accumulators = Map::new();
        accumulators.insert(name.to_string(), accumulator);
        self.group_by(GroupKey::Null, accumulators);

        let value = self
            .first()
            .await?
            .and_then(|mut doc| doc.get_mut(name).map(Value::take))
            .unwrap_or(Value::Null);
        Ok(value)
    }

    async fn scalar(&mut self, name: &str, accumulator: Value) -> Result<Value> {
        let value = self.single_aggregate(name, accumulator).await?;
        Ok(if value.is_null() { json!(0) } else { value })
    }

    /// Average of a column; 0 when nothing matched
    pub async fn avg(&mut self, column: &str) -> Result<Value> {
        self.scalar("avg", agg::avg(column)).await
    }

    pub async fn sum(&mut self, column: &str) -> Result<Value> {
        self.scalar("sum", agg::sum(column)).await
    }

    pub async fn min(&mut self, column: &str) -> Result<Value> {
        self.scalar("min", agg::min(column)).await
    }

    pub async fn max(&mut self, column: &str) -> Result<Value> {
        self.scalar("max", agg::max(column)).await
    }

    /// Distinct values through `$addToSet`, honoring earlier stages
    pub async fn distinct(&mut self, column: &str) -> Result<Vec<Value>> {
        // Group output field names cannot contain dots
        let field = column.replace('.', "_");
        let mut accumulators = Map::new();
        accumulators.insert(field.clone(), agg::add_to_set(column));
        self.group_by(GroupKey::Null, accumulators)
            .select(&[field.as_str()]);

        Ok(array_field(self.get().await?, &field))
    }

    /// Distinct non-null values
    pub async fn distinct_heavy(&mut self, column: &str) -> Result<Vec<Value>> {
        self.where_not_null(column)?;
        self.distinct(column).await
    }

    /// Every value of a column via `$push`
    pub async fn values(&mut self, column: &str) -> Result<Vec<Value>> {
        let mut accumulators = Map::new();
        accumulators.insert("values".to_string(), agg::push(json!(column)));
        self.group_by(GroupKey::Null, accumulators).select(&["values"]);

        Ok(array_field(self.get().await?, "values"))
    }
}

fn array_field(docs: Vec<Value>, field: &str) -> Vec<Value> {
    docs.into_iter()
        .next()
        .and_then(|mut doc| match doc.get_mut(field).map(Value::take) {
            Some(Value::Array(values)) => Some(values),
            _ => None,
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IronSyncConfig;
    use crate::executor::{with_session, MemoryExecutor, Session};
    use std::sync::Arc;

    fn setup(docs: Vec<Value>) -> (Arc<MemoryExecutor>, Aggregate) {
        let executor = Arc::new(MemoryExecutor::new());
        executor.seed("items", docs);
        let agg = Aggregate::new("items", executor.clone(), Arc::new(IronSyncConfig::default()));
        (executor, agg)
    }

    fn numbered(n: i64) -> Vec<Value> {
        (1..=n).map(|i| json!({"id": i, "n": i, "even": i % 2 == 0})).collect()
    }

    #[tokio::test]
    async fn test_count_empty_is_zero() {
        let (_, mut agg) = setup(vec![]);
        assert_eq!(agg.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_first_and_last() {
        let (_, agg) = setup(numbered(5));

        let first = agg.clone().first().await.unwrap().unwrap();
        assert_eq!(first["id"], 1);

        let mut sorted = agg.clone();
        sorted.order_by("n", crate::stage::SortDirection::Asc);
        let last = sorted.last(None).await.unwrap().unwrap();
        assert_eq!(last["id"], 5);
    }

    #[tokio::test]
    async fn test_paginate_restores_stages() {
        let (_, mut agg) = setup(numbered(7));
        agg.where_eq("even", json!(false));

        let listing = agg.paginate(2, Some(3)).await.unwrap();
        assert_eq!(listing.documents.len(), 1);
        assert_eq!(listing.pagination_info, PaginationInfo::new(2, 3, 1, 4));
        assert_eq!(agg.stages().len(), 1);
    }

    #[tokio::test]
    async fn test_scalar_aggregates() {
        let (_, agg) = setup(numbered(4));
        assert_eq!(agg.clone().sum("n").await.unwrap(), json!(10));
        assert_eq!(agg.clone().avg("n").await.unwrap(), json!(2.5));
        assert_eq!(agg.clone().min("n").await.unwrap(), json!(1));
        assert_eq!(agg.clone().max("n").await.unwrap(), json!(4));

        let (_, empty) = setup(vec![]);
        assert_eq!(empty.clone().sum("n").await.unwrap(), json!(0));
    }

    #[tokio::test]
    async fn test_distinct_values_and_pluck() {
        let (_, agg) = setup(vec![
            json!({"city": "Rome", "meta": {"tag": "a"}}),
            json!({"city": "Oslo", "meta": {"tag": "b"}}),
            json!({"city": "Rome"}),
        ]);

        assert_eq!(
            agg.clone().distinct("city").await.unwrap(),
            vec![json!("Rome"), json!("Oslo")]
        );
        assert_eq!(
            agg.clone().distinct_heavy("meta.tag").await.unwrap(),
            vec![json!("a"), json!("b")]
        );
        assert_eq!(agg.clone().values("city").await.unwrap().len(), 3);
        assert_eq!(
            agg.clone().pluck("meta.tag").await.unwrap(),
            vec![json!("a"), json!("b"), Value::Null]
        );
    }

    #[tokio::test]
    async fn test_execute_passes_ambient_session() {
        let (executor, agg) = setup(numbered(1));
        let session = Session::new();
        with_session(session, async { agg.get().await.unwrap() }).await;
        assert_eq!(executor.last_session(), Some(session));
    }
}
