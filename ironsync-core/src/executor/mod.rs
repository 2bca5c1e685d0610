//! Query executor abstraction
//!
//! Builders and the sync engine never talk to a database directly. Every
//! round trip goes through a [`QueryExecutor`], which receives compiled wire
//! stages and filters plus the ambient [`Session`] (if any).
//!
//! [`MemoryExecutor`] evaluates the same wire format in process and backs
//! the test suite.

pub mod expr_eval;
pub mod memory;
pub mod operators;
pub mod pipeline;
pub mod session;

pub use memory::MemoryExecutor;
pub use session::{current_session, with_session, Session};

use crate::error::Result;
use crate::expression::Filter;
use async_trait::async_trait;
use serde_json::Value;

/// Document database collaborator.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run an aggregation pipeline and return the resulting documents.
    async fn run_pipeline(
        &self,
        collection: &str,
        stages: &[Value],
        session: Option<&Session>,
    ) -> Result<Vec<Value>>;

    /// Insert one document, returning it as stored (with `_id`).
    async fn insert(&self, collection: &str, document: Value, session: Option<&Session>)
        -> Result<Value>;

    /// Replace the first document matching `filter`.
    async fn replace(
        &self,
        collection: &str,
        filter: &Filter,
        document: Value,
        session: Option<&Session>,
    ) -> Result<u64>;

    /// Apply an update pipeline to every matching document.
    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &[Value],
        session: Option<&Session>,
    ) -> Result<u64>;

    async fn delete_one(&self, collection: &str, filter: &Filter, session: Option<&Session>)
        -> Result<u64>;

    async fn delete_many(&self, collection: &str, filter: &Filter, session: Option<&Session>)
        -> Result<u64>;

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        session: Option<&Session>,
    ) -> Result<Option<Value>>;

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        session: Option<&Session>,
    ) -> Result<Vec<Value>>;

    async fn count(&self, collection: &str, filter: &Filter, session: Option<&Session>)
        -> Result<u64>;

    /// Distinct values of `column` among matching documents.
    async fn distinct(
        &self,
        collection: &str,
        column: &str,
        filter: &Filter,
        session: Option<&Session>,
    ) -> Result<Vec<Value>>;
}
