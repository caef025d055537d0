//! Job records and job-level outcomes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::row::RowStatus;

/// Lifecycle status of a resolution job.
///
/// `queued → running → {succeeded | partial | failed}`. `cancelled` is reached
/// only through an explicit cancel request. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Partial,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Partial => "partial",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses whose counts are final and must add up to `input_count`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Partial | JobStatus::Succeeded | JobStatus::Failed
        )
    }

    /// Statuses from which no driver will ever pick the job up again.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || *self == JobStatus::Cancelled
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "partial" => Ok(JobStatus::Partial),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Per-category row counts for a job.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobStats {
    pub resolved: u64,
    pub review: u64,
    pub unresolved: u64,
    pub errors: u64,
}

impl JobStats {
    /// Counts one row that reached `status`. Non-terminal statuses are ignored.
    pub fn record(&mut self, status: RowStatus) {
        match status {
            RowStatus::ResolvedConfident => self.resolved += 1,
            RowStatus::ResolvedNeedsReview => self.review += 1,
            RowStatus::Unresolved => self.unresolved += 1,
            RowStatus::Error => self.errors += 1,
            RowStatus::Queued | RowStatus::Running => {}
        }
    }

    /// Rows that produced a usable resolver answer.
    pub fn successes(&self) -> u64 {
        self.resolved + self.review + self.unresolved
    }

    pub fn total(&self) -> u64 {
        self.successes() + self.errors
    }
}

/// A persisted job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub tenant_id: String,
    pub status: JobStatus,
    pub input_count: u64,
    pub resolved_count: u64,
    pub review_count: u64,
    pub unresolved_count: u64,
    pub error_count: u64,
    /// Owner token of the driver currently holding the job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<String>,
    /// Lease expiry in epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl Job {
    pub fn stats(&self) -> JobStats {
        JobStats {
            resolved: self.resolved_count,
            review: self.review_count,
            unresolved: self.unresolved_count,
            errors: self.error_count,
        }
    }

    /// Whether another driver currently holds an unexpired lease.
    pub fn lease_is_live(&self, now_ms: i64) -> bool {
        self.status == JobStatus::Running
            && self.lease_expires_at.is_some_and(|expires| expires > now_ms)
    }
}

/// Result of `run_job`, shaped after the engine's public entry point:
/// `{ ok, stats, status }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub job_id: String,
    /// True when the job sits in a terminal status after the call.
    pub ok: bool,
    pub status: JobStatus,
    pub stats: JobStats,
    /// True when the call found the job already settled and changed nothing.
    pub noop: bool,
}

impl JobOutcome {
    pub fn finished(job_id: &str, status: JobStatus, stats: JobStats) -> Self {
        Self {
            job_id: job_id.to_string(),
            ok: status.is_terminal(),
            status,
            stats,
            noop: false,
        }
    }

    /// Outcome for a job that was already settled before the call.
    pub fn unchanged(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            ok: job.status.is_terminal(),
            status: job.status,
            stats: job.stats(),
            noop: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Partial,
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_and_settled() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_settled());
        assert!(JobStatus::Partial.is_terminal());
        assert!(!JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Cancelled.is_settled());
    }

    #[test]
    fn test_stats_record_row_statuses() {
        let mut stats = JobStats::default();
        for status in [
            RowStatus::ResolvedConfident,
            RowStatus::ResolvedNeedsReview,
            RowStatus::Error,
            RowStatus::Error,
            RowStatus::Running,
        ] {
            stats.record(status);
        }

        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.review, 1);
        assert_eq!(stats.unresolved, 0);
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.successes(), 2);
        assert_eq!(stats.total(), 4);
    }

    #[test]
    fn test_lease_is_live() {
        let mut job = Job {
            id: "j".to_string(),
            tenant_id: "t".to_string(),
            status: JobStatus::Running,
            input_count: 0,
            resolved_count: 0,
            review_count: 0,
            unresolved_count: 0,
            error_count: 0,
            lease_owner: Some("owner".to_string()),
            lease_expires_at: Some(1_000),
            created_at: String::new(),
            updated_at: String::new(),
            completed_at: None,
        };
        assert!(job.lease_is_live(999));
        assert!(!job.lease_is_live(1_000));

        job.status = JobStatus::Succeeded;
        assert!(!job.lease_is_live(0));
    }
}
