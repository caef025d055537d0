pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod resolver;
pub mod store;
pub mod worker;

pub use config::{load_config, load_config_from_str, EngineConfig};
pub use db::{Database, DatabaseError};
pub use engine::{JobProgressBroadcaster, JobRunner, ProgressReporter, RetryPolicy};
pub use error::{ConfigError, EngineError, Result, WorkerError};
pub use logging::init_logging;
pub use model::{
    Candidate, ErrorKind, Job, JobOutcome, JobRow, JobStats, JobStatus, NewRow, RowCursor,
    RowStatus,
};
pub use resolver::{ResolutionResult, ResolveError, ResolveInput, Resolver};
pub use store::{JobUpdate, LeaseChange, RecordStore, RowTally, RowUpdate};
pub use worker::{JobRunResult, JobWorkerPool};
