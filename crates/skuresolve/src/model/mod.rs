pub mod job;
pub mod row;

pub use job::{Job, JobOutcome, JobStats, JobStatus};
pub use row::{Candidate, ErrorKind, JobRow, NewRow, RowCursor, RowStatus};
