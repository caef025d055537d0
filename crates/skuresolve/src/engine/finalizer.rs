use std::sync::Arc;

use tracing::{info, warn};

use super::retry::RetryPolicy;
use crate::db::DatabaseError;
use crate::error::EngineError;
use crate::model::{Job, JobOutcome, JobStats, JobStatus};
use crate::store::{JobUpdate, RecordStore};

/// Terminal job status for a set of final counts.
///
/// Any error with no success is `failed`, errors mixed with successes are
/// `partial`, and no errors at all (including an empty job) is `succeeded`.
pub fn classify(stats: &JobStats) -> JobStatus {
    match (stats.errors, stats.successes()) {
        (0, _) => JobStatus::Succeeded,
        (_, 0) => JobStatus::Failed,
        _ => JobStatus::Partial,
    }
}

/// Writes a job's terminal status and counts.
pub struct StatusFinalizer {
    store: Arc<dyn RecordStore>,
    retry: RetryPolicy,
}

impl StatusFinalizer {
    pub fn new(store: Arc<dyn RecordStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Moves the job out of `running` in a single guarded write.
    ///
    /// If the job was cancelled while the last page ran, the counts are kept
    /// and the cancelled outcome is returned instead.
    pub fn finalize(
        &self,
        job: &Job,
        owner: &str,
        stats: JobStats,
    ) -> Result<JobOutcome, EngineError> {
        let status = classify(&stats);
        if stats.total() != job.input_count {
            warn!(
                job_id = %job.id,
                input_count = job.input_count,
                counted = stats.total(),
                "Final counts do not add up to the job's input count"
            );
        }

        let update = JobUpdate::finalize(owner, status, stats);
        match self
            .retry
            .run("finalize job", || self.store.update_job(&job.id, &update))
        {
            Ok(()) => {
                info!(
                    job_id = %job.id,
                    status = %status,
                    resolved = stats.resolved,
                    review = stats.review,
                    unresolved = stats.unresolved,
                    errors = stats.errors,
                    "Job finished"
                );
                Ok(JobOutcome::finished(&job.id, status, stats))
            }
            Err(DatabaseError::LeaseLost { job_id }) => {
                self.settle_cancelled(&job_id, stats)?
                    .ok_or(EngineError::Store(DatabaseError::LeaseLost { job_id }))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Records the counts of a job that was cancelled under a running driver.
    ///
    /// Returns `None` when the job is not cancelled, meaning the lease went
    /// to another driver.
    pub fn settle_cancelled(
        &self,
        job_id: &str,
        stats: JobStats,
    ) -> Result<Option<JobOutcome>, EngineError> {
        let current = self
            .retry
            .run("reload job", || self.store.get_job(job_id))?
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
        if current.status != JobStatus::Cancelled {
            return Ok(None);
        }

        self.retry.run("record cancelled counts", || {
            self.store.update_job(job_id, &JobUpdate::counts(stats))
        })?;
        info!(job_id = %job_id, settled = stats.total(), "Job cancelled");
        Ok(Some(JobOutcome::finished(job_id, JobStatus::Cancelled, stats)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{job_repo, Database};
    use crate::model::NewRow;

    fn stats(resolved: u64, review: u64, unresolved: u64, errors: u64) -> JobStats {
        JobStats {
            resolved,
            review,
            unresolved,
            errors,
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&stats(0, 0, 0, 0)), JobStatus::Succeeded);
        assert_eq!(classify(&stats(5, 0, 0, 0)), JobStatus::Succeeded);
        assert_eq!(classify(&stats(0, 0, 3, 0)), JobStatus::Succeeded);
        assert_eq!(classify(&stats(1, 1, 0, 1)), JobStatus::Partial);
        assert_eq!(classify(&stats(0, 0, 1, 4)), JobStatus::Partial);
        assert_eq!(classify(&stats(0, 0, 0, 3)), JobStatus::Failed);
    }

    fn claimed_job(db: &Database, rows: usize) -> Job {
        let new_rows: Vec<NewRow> = (0..rows)
            .map(|i| NewRow {
                sku: format!("S{}", i),
                ..Default::default()
            })
            .collect();
        let job = job_repo::create_with_rows(db, "tenant", &new_rows).unwrap();
        assert!(job_repo::try_claim(db, &job.id, "owner-1", 0, 60_000).unwrap());
        job_repo::find_by_id(db, &job.id).unwrap().unwrap()
    }

    #[test]
    fn test_finalize_writes_status_and_counts() {
        let db = Database::open_in_memory().unwrap();
        let job = claimed_job(&db, 3);
        let finalizer = StatusFinalizer::new(Arc::new(db.clone()), RetryPolicy::none());

        let outcome = finalizer.finalize(&job, "owner-1", stats(1, 1, 0, 1)).unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.status, JobStatus::Partial);

        let stored = job_repo::find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Partial);
        assert_eq!(stored.stats(), stats(1, 1, 0, 1));
        assert!(stored.completed_at.is_some());
        assert!(stored.lease_expires_at.is_none());
    }

    #[test]
    fn test_finalize_after_cancel_keeps_cancelled() {
        let db = Database::open_in_memory().unwrap();
        let job = claimed_job(&db, 2);
        assert!(job_repo::request_cancel(&db, &job.id).unwrap());
        let finalizer = StatusFinalizer::new(Arc::new(db.clone()), RetryPolicy::none());

        let outcome = finalizer.finalize(&job, "owner-1", stats(2, 0, 0, 0)).unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.status, JobStatus::Cancelled);

        let stored = job_repo::find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert_eq!(stored.resolved_count, 2);
    }

    #[test]
    fn test_finalize_by_stale_owner_fails() {
        let db = Database::open_in_memory().unwrap();
        let job = claimed_job(&db, 1);
        let finalizer = StatusFinalizer::new(Arc::new(db.clone()), RetryPolicy::none());

        let err = finalizer
            .finalize(&job, "someone-else", stats(1, 0, 0, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Store(DatabaseError::LeaseLost { .. })
        ));
        let stored = job_repo::find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
    }
}
