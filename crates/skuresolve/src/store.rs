//! The record store the engine runs against.
//!
//! `RecordStore` is the engine's only view of persistence. `Database`
//! implements it on SQLite; tests wrap it to inject faults.

use crate::db::{job_repo, row_repo, stats_repo, Database, DatabaseError};
use crate::model::{Candidate, ErrorKind, Job, JobRow, JobStats, JobStatus, NewRow, RowCursor, RowStatus};

pub use crate::db::stats_repo::RowTally;

/// How a job update treats the driver lease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LeaseChange {
    #[default]
    Keep,
    Renew {
        expires_at_ms: i64,
    },
    Release,
}

/// Fields to change on a job. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub stats: Option<JobStats>,
    pub lease: LeaseChange,
    /// Apply only while this owner holds the lease on a running job.
    pub owner: Option<String>,
}

impl JobUpdate {
    /// Running counts plus a lease renewal, written after each page.
    pub fn progress(owner: &str, stats: JobStats, expires_at_ms: i64) -> Self {
        Self {
            status: None,
            stats: Some(stats),
            lease: LeaseChange::Renew { expires_at_ms },
            owner: Some(owner.to_string()),
        }
    }

    /// Lease renewal alone, written while a page is still in flight.
    pub fn heartbeat(owner: &str, expires_at_ms: i64) -> Self {
        Self {
            lease: LeaseChange::Renew { expires_at_ms },
            owner: Some(owner.to_string()),
            ..Default::default()
        }
    }

    /// Terminal status and final counts in a single write.
    pub fn finalize(owner: &str, status: JobStatus, stats: JobStats) -> Self {
        Self {
            status: Some(status),
            stats: Some(stats),
            lease: LeaseChange::Release,
            owner: Some(owner.to_string()),
        }
    }

    /// Counts only, without an ownership guard.
    pub fn counts(stats: JobStats) -> Self {
        Self {
            stats: Some(stats),
            ..Default::default()
        }
    }
}

/// A row transition with every outcome field it writes.
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub status: RowStatus,
    pub resolved_url: Option<String>,
    pub resolved_domain: Option<String>,
    pub confidence: Option<f64>,
    pub matched_by: Option<String>,
    pub reasons: Vec<String>,
    pub candidates: Vec<Candidate>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl RowUpdate {
    pub fn running() -> Self {
        Self {
            status: RowStatus::Running,
            resolved_url: None,
            resolved_domain: None,
            confidence: None,
            matched_by: None,
            reasons: Vec::new(),
            candidates: Vec::new(),
            error_message: None,
            error_kind: None,
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: RowStatus::Error,
            error_message: Some(message.into()),
            error_kind: Some(kind),
            ..Self::running()
        }
    }
}

/// Durable storage for jobs and their rows.
///
/// Every method is a single round trip; callers own retry policy.
pub trait RecordStore: Send + Sync {
    fn create_job(&self, tenant_id: &str, rows: &[NewRow]) -> Result<Job, DatabaseError>;

    fn get_job(&self, id: &str) -> Result<Option<Job>, DatabaseError>;

    /// Conditional `queued → running` (or expired-lease takeover).
    fn try_claim_job(
        &self,
        id: &str,
        owner: &str,
        now_ms: i64,
        lease_ms: i64,
    ) -> Result<bool, DatabaseError>;

    fn update_job(&self, id: &str, update: &JobUpdate) -> Result<(), DatabaseError>;

    fn request_cancel(&self, id: &str) -> Result<bool, DatabaseError>;

    /// Up to `limit` queued rows in creation order, strictly after `after`.
    fn get_queued_rows(
        &self,
        job_id: &str,
        after: Option<RowCursor>,
        limit: usize,
    ) -> Result<Vec<JobRow>, DatabaseError>;

    fn update_row(&self, id: &str, update: &RowUpdate) -> Result<(), DatabaseError>;

    /// Fails every row still `running`, returning how many were moved.
    fn interrupt_running_rows(&self, job_id: &str, message: &str) -> Result<u64, DatabaseError>;

    fn tally_rows(&self, job_id: &str) -> Result<RowTally, DatabaseError>;
}

impl RecordStore for Database {
    fn create_job(&self, tenant_id: &str, rows: &[NewRow]) -> Result<Job, DatabaseError> {
        job_repo::create_with_rows(self, tenant_id, rows)
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        job_repo::find_by_id(self, id)
    }

    fn try_claim_job(
        &self,
        id: &str,
        owner: &str,
        now_ms: i64,
        lease_ms: i64,
    ) -> Result<bool, DatabaseError> {
        job_repo::try_claim(self, id, owner, now_ms, lease_ms)
    }

    fn update_job(&self, id: &str, update: &JobUpdate) -> Result<(), DatabaseError> {
        job_repo::update(self, id, update)
    }

    fn request_cancel(&self, id: &str) -> Result<bool, DatabaseError> {
        job_repo::request_cancel(self, id)
    }

    fn get_queued_rows(
        &self,
        job_id: &str,
        after: Option<RowCursor>,
        limit: usize,
    ) -> Result<Vec<JobRow>, DatabaseError> {
        row_repo::queued_page(self, job_id, after, limit)
    }

    fn update_row(&self, id: &str, update: &RowUpdate) -> Result<(), DatabaseError> {
        row_repo::update(self, id, update)
    }

    fn interrupt_running_rows(&self, job_id: &str, message: &str) -> Result<u64, DatabaseError> {
        row_repo::interrupt_running(self, job_id, message)
    }

    fn tally_rows(&self, job_id: &str) -> Result<RowTally, DatabaseError> {
        stats_repo::tally_rows(self, job_id)
    }
}
