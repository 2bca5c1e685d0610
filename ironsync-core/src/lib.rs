// ironsync-core/src/lib.rs
// Aggregation pipeline compiler, model layer and denormalization sync engine

pub mod aggregate;
pub mod config;
pub mod counters;
pub mod error;
pub mod executor;
pub mod expression;
pub mod joinable;
pub mod logging;
pub mod model;
pub mod stage;
pub mod sync;
pub mod value_utils;

// Public exports
pub use aggregate::{Aggregate, PaginationInfo, PaginationListing};
pub use config::{FanOutPolicy, IronSyncConfig, TimestampColumns};
pub use counters::{CounterOptions, Counters};
pub use error::{IronSyncError, Result};
pub use executor::{current_session, with_session, MemoryExecutor, QueryExecutor, Session};
pub use expression::{compile, Filter, WhereOperator};
pub use joinable::{JoinOptions, Joinable, Relation};
pub use logging::{get_log_level, set_log_level, set_log_sink, LogLevel, LogSink};
pub use model::{
    Cast, EmbedConfig, Joined, Model, ModelAggregate, ModelBuilder, ModelEvent, ModelEvents, Record,
    SaveMode, SaveOptions,
};
pub use stage::{GroupKey, LookupStage, OrWhere, SortDirection, Stage, UnwindOptions};
pub use sync::{OnDelete, SyncMode, SyncRule};
