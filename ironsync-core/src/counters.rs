// src/counters.rs
// Per-collection auto-increment ids kept in a counters collection

use crate::error::Result;
use crate::executor::{current_session, QueryExecutor};
use crate::expression::Filter;
use crate::log_trace;
use serde_json::{json, Value};
use std::sync::Arc;

/// Id sequence settings of one model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterOptions {
    /// First id handed out for an empty collection
    pub initial_id: u64,
    pub increment_by: u64,
}

impl Default for CounterOptions {
    fn default() -> Self {
        CounterOptions {
            initial_id: 1,
            increment_by: 1,
        }
    }
}

/// Counters stored as `{collection, id}` documents, one per collection
#[derive(Clone)]
pub struct Counters {
    executor: Arc<dyn QueryExecutor>,
    collection: String,
}

impl Counters {
    pub fn new(executor: Arc<dyn QueryExecutor>, collection: impl Into<String>) -> Self {
        Counters {
            executor,
            collection: collection.into(),
        }
    }

    fn filter_for(collection: &str) -> Filter {
        let mut filter = Filter::new();
        filter.insert("collection".to_string(), json!(collection));
        filter
    }

    /// Last id handed out for `collection` (0 before the first one)
    pub async fn last_id(&self, collection: &str) -> Result<u64> {
        let session = current_session();
        let counter = self
            .executor
            .find_one(&self.collection, &Self::filter_for(collection), session.as_ref())
            .await?;
        Ok(counter
            .as_ref()
            .and_then(|doc| doc.get("id"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    /// Advance and return the next id for `collection`
    pub async fn next_id(&self, collection: &str, options: CounterOptions) -> Result<u64> {
        let session = current_session();
        let filter = Self::filter_for(collection);
        let counter = self
            .executor
            .find_one(&self.collection, &filter, session.as_ref())
            .await?;

        let next = match counter.as_ref().and_then(|doc| doc.get("id")).and_then(Value::as_u64) {
            Some(last) => {
                let next = last + options.increment_by;
                self.executor
                    .update_many(
                        &self.collection,
                        &filter,
                        &[json!({ "$set": { "id": next } })],
                        session.as_ref(),
                    )
                    .await?;
                next
            }
            None => {
                self.executor
                    .insert(
                        &self.collection,
                        json!({ "collection": collection, "id": options.initial_id }),
                        session.as_ref(),
                    )
                    .await?;
                options.initial_id
            }
        };

        log_trace!("next id for {}: {}", collection, next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MemoryExecutor;

    #[tokio::test]
    async fn test_sequence_starts_at_initial_id() {
        let executor = Arc::new(MemoryExecutor::new());
        let counters = Counters::new(executor.clone(), "MasterMind");
        let options = CounterOptions {
            initial_id: 100,
            increment_by: 5,
        };

        assert_eq!(counters.last_id("users").await.unwrap(), 0);
        assert_eq!(counters.next_id("users", options).await.unwrap(), 100);
        assert_eq!(counters.next_id("users", options).await.unwrap(), 105);
        assert_eq!(counters.last_id("users").await.unwrap(), 105);
        assert_eq!(executor.documents("MasterMind").len(), 1);
    }

    #[tokio::test]
    async fn test_collections_count_independently() {
        let counters = Counters::new(Arc::new(MemoryExecutor::new()), "MasterMind");
        let options = CounterOptions::default();

        counters.next_id("users", options).await.unwrap();
        counters.next_id("users", options).await.unwrap();
        assert_eq!(counters.next_id("orders", options).await.unwrap(), 1);
        assert_eq!(counters.last_id("users").await.unwrap(), 2);
    }
}
