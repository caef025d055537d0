pub mod job;
pub mod pool;

pub use job::JobRunResult;
pub use pool::JobWorkerPool;
