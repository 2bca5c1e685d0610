// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IronSyncError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Document not found")]
    DocumentNotFound,

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid stage: {0}")]
    InvalidStage(String),

    #[error("You must provide a limit when using random() or use limit() pipeline")]
    MissingLimit,

    #[error("Relation {0} not found")]
    UnknownRelation(String),

    #[error("Joining '{0}' is not declared on this model")]
    UnknownJoining(String),

    #[error("Aggregation error: {0}")]
    AggregationError(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Sync rule '{rule}' failed on {failed} of {total} target(s): {first}")]
    SyncFanOut {
        rule: String,
        failed: usize,
        total: usize,
        first: Box<IronSyncError>,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, IronSyncError>;
