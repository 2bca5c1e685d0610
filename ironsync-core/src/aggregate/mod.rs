//! Aggregate builder
//!
//! [`Aggregate`] accumulates [`Stage`]s in call order. Chainable methods
//! append exactly one stage (or a fixed pair, for `where_size` and single
//! lookups) and hand the builder back; methods that compile a filter return
//! `Result` so a bad operator token fails at the call that introduced it.
//!
//! Execution lives in `execution.rs`; every round trip goes through the
//! builder's [`QueryExecutor`] with the ambient session.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use serde_json::json;
//! # use ironsync_core::{Aggregate, MemoryExecutor, IronSyncConfig};
//! # async fn demo() -> ironsync_core::Result<()> {
//! let executor = Arc::new(MemoryExecutor::new());
//! let mut users = Aggregate::new("users", executor, Arc::new(IronSyncConfig::default()));
//! let adults = users
//!     .where_op("age", ">=", json!(18))?
//!     .order_by_desc("createdAt")
//!     .limit(10)
//!     .get()
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod execution;
pub mod pagination;

pub use pagination::{PaginationInfo, PaginationListing};

use crate::config::IronSyncConfig;
use crate::error::{IronSyncError, Result};
use crate::executor::QueryExecutor;
use crate::expression::agg::{self, column_name};
use crate::expression::{compile, compile_eq, compile_raw, date_value, Filter, WhereOperator};
use crate::stage::{
    compile_stages, GroupKey, GroupStage, LookupStage, OrWhere, SortDirection, Stage, UnwindOptions,
    UnwindStage,
};
use chrono::{DateTime, TimeZone};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;

/// Fluent aggregation pipeline over one collection
///
/// Cloning copies the stage list; stages appended to a clone never show up
/// in the original.
#[derive(Clone)]
pub struct Aggregate {
    collection: String,
    stages: Vec<Stage>,
    executor: Arc<dyn QueryExecutor>,
    config: Arc<IronSyncConfig>,
}

impl fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregate")
            .field("collection", &self.collection)
            .field("stages", &self.stages)
            .finish()
    }
}

impl Aggregate {
    pub fn new(
        collection: impl Into<String>,
        executor: Arc<dyn QueryExecutor>,
        config: Arc<IronSyncConfig>,
    ) -> Self {
        Aggregate {
            collection: collection.into(),
            stages: Vec::new(),
            executor,
            config,
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

    // ========== raw stages ==========

    pub fn add_stage(&mut self, stage: Stage) -> &mut Self {
        self.stages.push(stage);
        self
    }

    pub fn add_stages(&mut self, stages: impl IntoIterator<Item = Stage>) -> &mut Self {
        self.stages.extend(stages);
        self
    }

    /// Append a wire-form stage such as `{"$facet": {...}}`
    pub fn add_raw_stage(&mut self, stage: &Value) -> Result<&mut Self> {
        let stage = Stage::from_json(stage)?;
        Ok(self.add_stage(stage))
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Compile the accumulated stages to wire form
    pub fn compile(&self) -> Vec<Value> {
        compile_stages(&self.stages)
    }

    pub fn reset(&mut self) -> &mut Self {
        self.stages.clear();
        self
    }

    pub(crate) fn replace_stages(&mut self, stages: Vec<Stage>) {
        self.stages = stages;
    }

    // ========== sorting ==========

    pub fn sort(&mut self, column: &str, direction: SortDirection) -> &mut Self {
        self.add_stage(Stage::Sort(vec![(column.to_string(), direction)]))
    }

    pub fn order_by(&mut self, column: &str, direction: SortDirection) -> &mut Self {
        self.sort(column, direction)
    }

    pub fn sort_desc(&mut self, column: &str) -> &mut Self {
        self.sort(column, SortDirection::Desc)
    }

    pub fn order_by_desc(&mut self, column: &str) -> &mut Self {
        self.sort_desc(column)
    }

    /// Multi-column sort, applied in the given order
    pub fn sort_by(&mut self, columns: &[(&str, SortDirection)]) -> &mut Self {
        self.add_stage(Stage::Sort(
            columns
                .iter()
                .map(|(column, direction)| (column.to_string(), *direction))
                .collect(),
        ))
    }

    pub fn latest(&mut self, column: &str) -> &mut Self {
        self.sort(column, SortDirection::Desc)
    }

    pub fn oldest(&mut self, column: &str) -> &mut Self {
        self.sort(column, SortDirection::Asc)
    }

    /// `$sample` of `limit` documents, or of the size of an earlier `limit()`
    pub fn random(&mut self, limit: Option<u64>) -> Result<&mut Self> {
        let size = limit
            .filter(|n| *n > 0)
            .or_else(|| {
                self.stages.iter().find_map(|stage| match stage {
                    Stage::Limit(n) if *n > 0 => Some(*n),
                    _ => None,
                })
            })
            .ok_or(IronSyncError::MissingLimit)?;
        Ok(self.add_stage(Stage::Sample(size)))
    }

    // ========== grouping ==========

    pub fn group_by(&mut self, key: impl Into<GroupKey>, accumulators: Map<String, Value>) -> &mut Self {
        self.add_stage(Stage::Group(GroupStage {
            key: key.into(),
            accumulators,
        }))
    }

    fn group_by_parts(
        &mut self,
        parts: Vec<(&str, Value)>,
        accumulators: Option<Map<String, Value>>,
    ) -> &mut Self {
        let key: Map<String, Value> = parts
            .into_iter()
            .map(|(name, part)| (name.to_string(), part))
            .collect();
        self.group_by(
            GroupKey::Expression(Value::Object(key)),
            accumulators.unwrap_or_default(),
        )
    }

    pub fn group_by_year(&mut self, column: &str, accumulators: Option<Map<String, Value>>) -> &mut Self {
        self.group_by_parts(vec![("year", agg::year(column))], accumulators)
    }

    pub fn group_by_month(&mut self, column: &str, accumulators: Option<Map<String, Value>>) -> &mut Self {
        self.group_by_parts(vec![("month", agg::month(column))], accumulators)
    }

    pub fn group_by_month_and_year(
        &mut self,
        column: &str,
        accumulators: Option<Map<String, Value>>,
    ) -> &mut Self {
        self.group_by_parts(
            vec![("year", agg::year(column)), ("month", agg::month(column))],
            accumulators,
        )
    }

    pub fn group_by_date(&mut self, column: &str, accumulators: Option<Map<String, Value>>) -> &mut Self {
        self.group_by_parts(
            vec![
                ("year", agg::year(column)),
                ("month", agg::month(column)),
                ("day", agg::day_of_month(column)),
            ],
            accumulators,
        )
    }

    pub fn group_by_week(&mut self, column: &str, accumulators: Option<Map<String, Value>>) -> &mut Self {
        self.group_by_parts(
            vec![("year", agg::year(column)), ("week", agg::week(column))],
            accumulators,
        )
    }

    pub fn group_by_day_of_month(
        &mut self,
        column: &str,
        accumulators: Option<Map<String, Value>>,
    ) -> &mut Self {
        self.group_by_parts(vec![("day", agg::day_of_month(column))], accumulators)
    }

    // ========== paging & projection ==========

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.add_stage(Stage::Limit(limit))
    }

    pub fn skip(&mut self, skip: u64) -> &mut Self {
        self.add_stage(Stage::Skip(skip))
    }

    /// Inclusion projection of the given columns
    pub fn select(&mut self, columns: &[&str]) -> &mut Self {
        self.add_stage(Stage::Project(
            columns.iter().map(|column| (column.to_string(), json!(1))).collect(),
        ))
    }

    /// Explicit projection map (`0`/`1`/`true`/`false` or expressions)
    pub fn select_map(&mut self, projection: Map<String, Value>) -> &mut Self {
        self.add_stage(Stage::Project(projection))
    }

    pub fn deselect(&mut self, columns: &[&str]) -> &mut Self {
        self.add_stage(Stage::Project(
            columns.iter().map(|column| (column.to_string(), json!(0))).collect(),
        ))
    }

    pub fn project(&mut self, projection: Map<String, Value>) -> &mut Self {
        self.select_map(projection)
    }

    pub fn unwind(&mut self, column: &str, options: UnwindOptions) -> &mut Self {
        self.add_stage(Stage::Unwind(UnwindStage {
            column: column.to_string(),
            options,
        }))
    }

    pub fn add_field(&mut self, field: &str, value: Value) -> &mut Self {
        let mut fields = Map::new();
        fields.insert(field.to_string(), value);
        self.add_fields(fields)
    }

    pub fn add_fields(&mut self, fields: Map<String, Value>) -> &mut Self {
        self.add_stage(Stage::AddFields(fields))
    }

    /// `$lookup`; a single join collapses the joined array to its first element
    pub fn lookup(&mut self, lookup: LookupStage, single: bool) -> &mut Self {
        let alias = lookup.as_field.clone();
        self.add_stage(Stage::Lookup(lookup));
        if single {
            self.add_field(&alias, json!({ "$first": column_name(&alias) }));
        }
        self
    }

    // ========== filters ==========

    fn push_filter(&mut self, filter: Filter) -> &mut Self {
        self.add_stage(Stage::Match(filter))
    }

    /// `column == value`
    pub fn where_eq(&mut self, column: &str, value: Value) -> &mut Self {
        self.push_filter(compile_eq(column, value))
    }

    /// `column <operator token> value`, e.g. `(">=", 18)` or `("like", "ann")`
    pub fn where_op(&mut self, column: &str, operator: &str, value: Value) -> Result<&mut Self> {
        let operator: WhereOperator = operator.parse()?;
        self.where_operator(column, operator, value)
    }

    pub fn where_operator(
        &mut self,
        column: &str,
        operator: WhereOperator,
        value: Value,
    ) -> Result<&mut Self> {
        let filter = compile(column, operator, value)?;
        Ok(self.push_filter(filter))
    }

    /// Pre-built native filter, passed through after date normalization
    pub fn where_raw(&mut self, filter: Filter) -> &mut Self {
        self.push_filter(compile_raw(filter))
    }

    /// Compare a column against other columns through `$expr`
    pub fn where_columns(&mut self, column: &str, operator: &str, others: &[&str]) -> Result<&mut Self> {
        let operator: WhereOperator = operator.parse()?;
        let operands: Vec<Value> = std::iter::once(column)
            .chain(others.iter().copied())
            .map(|c| Value::String(column_name(c)))
            .collect();

        let mut comparison = Map::new();
        comparison.insert(operator.native().to_string(), Value::Array(operands));
        let filter = match agg::expr(Value::Object(comparison)) {
            Value::Object(filter) => filter,
            _ => Filter::new(),
        };
        Ok(self.push_filter(filter))
    }

    pub fn or_where(&mut self, clauses: OrWhere) -> &mut Self {
        self.add_stage(clauses.into_stage())
    }

    pub fn where_null(&mut self, column: &str) -> &mut Self {
        self.where_eq(column, Value::Null)
    }

    pub fn where_not_null(&mut self, column: &str) -> Result<&mut Self> {
        self.where_operator(column, WhereOperator::Ne, Value::Null)
    }

    pub fn where_like(&mut self, column: &str, value: &str) -> Result<&mut Self> {
        self.where_operator(column, WhereOperator::Like, json!(value))
    }

    pub fn where_not_like(&mut self, column: &str, value: &str) -> Result<&mut Self> {
        self.where_operator(column, WhereOperator::NotLike, json!(value))
    }

    pub fn where_starts_with(&mut self, column: &str, value: Value) -> Result<&mut Self> {
        self.where_operator(column, WhereOperator::StartsWith, value)
    }

    pub fn where_not_starts_with(&mut self, column: &str, value: Value) -> Result<&mut Self> {
        self.where_operator(column, WhereOperator::NotStartsWith, value)
    }

    pub fn where_ends_with(&mut self, column: &str, value: Value) -> Result<&mut Self> {
        self.where_operator(column, WhereOperator::EndsWith, value)
    }

    pub fn where_not_ends_with(&mut self, column: &str, value: Value) -> Result<&mut Self> {
        self.where_operator(column, WhereOperator::NotEndsWith, value)
    }

    pub fn where_between(&mut self, column: &str, min: Value, max: Value) -> Result<&mut Self> {
        self.where_operator(column, WhereOperator::Between, json!([min, max]))
    }

    pub fn where_not_between(&mut self, column: &str, min: Value, max: Value) -> Result<&mut Self> {
        self.where_operator(column, WhereOperator::NotBetween, json!([min, max]))
    }

    pub fn where_date_between<Tz: TimeZone>(
        &mut self,
        column: &str,
        from: &DateTime<Tz>,
        to: &DateTime<Tz>,
    ) -> Result<&mut Self> {
        self.where_between(column, date_value(from), date_value(to))
    }

    pub fn where_date_not_between<Tz: TimeZone>(
        &mut self,
        column: &str,
        from: &DateTime<Tz>,
        to: &DateTime<Tz>,
    ) -> Result<&mut Self> {
        self.where_not_between(column, date_value(from), date_value(to))
    }

    pub fn where_exists(&mut self, column: &str) -> Result<&mut Self> {
        self.where_operator(column, WhereOperator::Exists, json!(true))
    }

    pub fn where_not_exists(&mut self, column: &str) -> Result<&mut Self> {
        self.where_operator(column, WhereOperator::Exists, json!(false))
    }

    /// A string value names another column to compare against
    pub fn where_in(&mut self, column: &str, values: Value) -> Result<&mut Self> {
        self.where_operator(column, WhereOperator::In, values)
    }

    pub fn where_not_in(&mut self, column: &str, values: Value) -> Result<&mut Self> {
        self.where_operator(column, WhereOperator::NotIn, values)
    }

    /// `$near` on a `[lng, lat]` point
    pub fn where_near(&mut self, column: &str, point: [f64; 2]) -> Result<&mut Self> {
        self.where_operator(column, WhereOperator::Near, json!(point))
    }

    /// Filter on array length via a computed `<column>_size` field
    ///
    /// The helper column stays in the output unless the caller deselects it.
    pub fn where_size(&mut self, column: &str, operator: &str, size: u64) -> Result<&mut Self> {
        let operator: WhereOperator = operator.parse()?;
        let size_column = format!("{}_size", column);
        self.add_field(&size_column, json!({ "$size": column_name(column) }));
        self.where_operator(&size_column, operator, json!(size))
    }

    /// Leading filter plus remaining stages, for update pipelines
    ///
    /// Every `$match` payload is merged into one filter; all other stages
    /// keep their order.
    pub(crate) fn split_for_update(&self) -> (Filter, Vec<Value>) {
        let mut filter = Filter::new();
        let mut rest = Vec::new();
        for stage in &self.stages {
            match stage {
                Stage::Match(clauses) => {
                    filter.extend(clauses.iter().map(|(k, v)| (k.clone(), v.clone())))
                }
                other => rest.push(other.to_json()),
            }
        }
        (filter, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MemoryExecutor;

    fn users() -> Aggregate {
        Aggregate::new(
            "users",
            Arc::new(MemoryExecutor::new()),
            Arc::new(IronSyncConfig::default()),
        )
    }

    // ========== stage accumulation tests ==========

    #[test]
    fn test_chain_appends_in_order() {
        let mut agg = users();
        agg.where_eq("active", json!(true)).order_by_desc("age").skip(5).limit(10);

        assert_eq!(
            agg.compile(),
            vec![
                json!({"$match": {"active": {"$eq": true}}}),
                json!({"$sort": {"age": -1}}),
                json!({"$skip": 5}),
                json!({"$limit": 10}),
            ]
        );
    }

    #[test]
    fn test_clone_is_independent() {
        let mut original = users();
        original.where_eq("a", json!(1)).limit(3);

        let mut copy = original.clone();
        copy.skip(1);

        assert_eq!(original.stages().len(), 2);
        assert_eq!(copy.stages().len(), 3);
    }

    #[test]
    fn test_where_op_rejects_unknown_token() {
        let mut agg = users();
        let err = agg.where_op("age", "~", json!(1)).unwrap_err();
        assert!(matches!(err, IronSyncError::UnknownOperator(_)));
        assert!(agg.stages().is_empty());
    }

    #[test]
    fn test_random_reuses_limit_or_fails() {
        let mut agg = users();
        let err = agg.random(None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "You must provide a limit when using random() or use limit() pipeline"
        );

        agg.limit(4);
        agg.random(None).unwrap();
        assert_eq!(agg.compile()[1], json!({"$sample": {"size": 4}}));

        agg.random(Some(2)).unwrap();
        assert_eq!(agg.compile()[2], json!({"$sample": {"size": 2}}));
    }

    #[test]
    fn test_where_size_adds_helper_column() {
        let mut agg = users();
        agg.where_size("tags", ">=", 2).unwrap();
        assert_eq!(
            agg.compile(),
            vec![
                json!({"$addFields": {"tags_size": {"$size": "$tags"}}}),
                json!({"$match": {"tags_size": {"$gte": 2}}}),
            ]
        );
    }

    #[test]
    fn test_where_columns_uses_expr() {
        let mut agg = users();
        agg.where_columns("spent", ">", &["budget"]).unwrap();
        assert_eq!(
            agg.compile()[0],
            json!({"$match": {"$expr": {"$gt": ["$spent", "$budget"]}}})
        );
    }

    #[test]
    fn test_group_by_month_and_year() {
        let mut agg = users();
        let mut accumulators = Map::new();
        accumulators.insert("total".to_string(), agg::count());
        agg.group_by_month_and_year("createdAt", Some(accumulators));
        assert_eq!(
            agg.compile()[0],
            json!({"$group": {
                "_id": {"year": {"$year": "$createdAt"}, "month": {"$month": "$createdAt"}},
                "total": {"$sum": 1}
            }})
        );
    }

    #[test]
    fn test_single_lookup_collapses_alias() {
        let mut agg = users();
        agg.lookup(
            LookupStage {
                from: "teams".to_string(),
                local_field: Some("team.id".to_string()),
                foreign_field: Some("id".to_string()),
                as_field: "team".to_string(),
                ..Default::default()
            },
            true,
        );
        let compiled = agg.compile();
        assert_eq!(compiled.len(), 2);
        assert_eq!(compiled[1], json!({"$addFields": {"team": {"$first": "$team"}}}));
    }

    #[test]
    fn test_split_for_update_merges_matches() {
        let mut agg = users();
        agg.where_eq("role", json!("admin"))
            .add_field("flag", json!(true))
            .where_eq("active", json!(true));

        let (filter, rest) = agg.split_for_update();
        assert_eq!(
            Value::Object(filter),
            json!({"role": {"$eq": "admin"}, "active": {"$eq": true}})
        );
        assert_eq!(rest, vec![json!({"$addFields": {"flag": true}})]);
    }

    #[test]
    fn test_or_where_object_shape() {
        let mut agg = users();
        let mut clauses = Filter::new();
        clauses.insert("customer.id".to_string(), json!(1));
        clauses.insert("seller.id".to_string(), json!(1));
        agg.or_where(OrWhere::Object(clauses));
        assert_eq!(
            agg.compile()[0],
            json!({"$match": {"$or": [{"customer.id": 1}, {"seller.id": 1}]}})
        );
    }
}
