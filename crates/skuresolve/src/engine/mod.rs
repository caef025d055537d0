//! The job engine: row processing, batch driving and status finalization.

pub mod driver;
pub mod finalizer;
pub mod processor;
pub mod progress;
pub mod retry;

pub use driver::JobRunner;
pub use finalizer::{classify, StatusFinalizer};
pub use processor::{RowOutcome, RowProcessor};
pub use progress::{
    BroadcastProgress, JobPhase, JobProgressBroadcaster, JobProgressEvent, NoopProgress,
    ProgressEvent, ProgressReporter,
};
pub use retry::RetryPolicy;
