use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError};
use tracing::{debug, info, info_span, warn};

use super::finalizer::StatusFinalizer;
use super::processor::{RowOutcome, RowProcessor};
use super::progress::{NoopProgress, ProgressEvent, ProgressReporter};
use super::retry::RetryPolicy;
use crate::config::EngineConfig;
use crate::db::DatabaseError;
use crate::error::{EngineError, Result};
use crate::model::{Job, JobOutcome, JobRow, JobStats, JobStatus, NewRow, RowCursor};
use crate::resolver::Resolver;
use crate::store::{JobUpdate, RecordStore};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Bounds on how often a page renews its lease.
const MIN_HEARTBEAT: Duration = Duration::from_millis(50);
const MAX_HEARTBEAT: Duration = Duration::from_secs(600);

/// The batch driver: pages through a job's queued rows and settles the job.
///
/// One `JobRunner` can drive any number of jobs, one per call to
/// [`JobRunner::run_job`], from as many threads as needed.
pub struct JobRunner {
    store: Arc<dyn RecordStore>,
    processor: RowProcessor,
    finalizer: StatusFinalizer,
    progress: Arc<dyn ProgressReporter>,
    retry: RetryPolicy,
    page_size: usize,
    row_concurrency: usize,
    max_rows_per_job: usize,
    lease_ms: i64,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: Arc<dyn Resolver>,
        config: &EngineConfig,
    ) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        Self {
            processor: RowProcessor::new(Arc::clone(&store), resolver, retry),
            finalizer: StatusFinalizer::new(Arc::clone(&store), retry),
            store,
            progress: Arc::new(NoopProgress),
            retry,
            page_size: config.page_size.max(1),
            row_concurrency: config.row_concurrency.max(1),
            max_rows_per_job: config.max_rows_per_job,
            lease_ms: i64::try_from(config.lease().as_millis()).unwrap_or(i64::MAX),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Creates a queued job holding `rows` in the given order.
    pub fn submit_job(&self, tenant_id: &str, rows: &[NewRow]) -> Result<Job> {
        if rows.len() > self.max_rows_per_job {
            return Err(EngineError::TooManyRows {
                count: rows.len(),
                limit: self.max_rows_per_job,
            });
        }
        let job = self
            .retry
            .run("create job", || self.store.create_job(tenant_id, rows))?;
        info!(job_id = %job.id, tenant_id, rows = rows.len(), "Job submitted");
        Ok(job)
    }

    /// Requests cancellation. Returns `false` if the job was already settled.
    pub fn cancel_job(&self, job_id: &str) -> Result<bool> {
        match self
            .retry
            .run("cancel job", || self.store.request_cancel(job_id))
        {
            Ok(cancelled) => {
                if cancelled {
                    info!(job_id, "Cancellation requested");
                }
                Ok(cancelled)
            }
            Err(DatabaseError::NotFound { .. }) => Err(EngineError::JobNotFound(job_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Runs a job to a terminal status.
    ///
    /// A job that is already settled is returned untouched with `noop` set.
    /// A job held by another live driver is rejected with `AlreadyRunning`.
    /// A job whose driver died (expired lease) is taken over and resumed.
    pub fn run_job(&self, job_id: &str) -> Result<JobOutcome> {
        let _job_span = info_span!("job", job_id = %job_id).entered();

        let job = self.load_job(job_id)?;
        if job.status.is_settled() {
            debug!(status = %job.status, "Job already settled");
            return Ok(JobOutcome::unchanged(&job));
        }

        let owner = uuid::Uuid::new_v4().to_string();
        let claimed = self.retry.run("claim job", || {
            self.store
                .try_claim_job(job_id, &owner, now_ms(), self.lease_ms)
        })?;
        if !claimed {
            let current = self.load_job(job_id)?;
            if current.status.is_settled() {
                return Ok(JobOutcome::unchanged(&current));
            }
            warn!("Job is held by another driver");
            return Err(EngineError::AlreadyRunning(job_id.to_string()));
        }

        let resumed = job.status == JobStatus::Running;
        let mut stats = JobStats::default();
        let mut interrupted = 0;
        if resumed {
            interrupted = self.retry.run("interrupt running rows", || {
                self.store
                    .interrupt_running_rows(job_id, "row was running when its driver stopped")
            })?;
            stats = self
                .retry
                .run("tally rows", || self.store.tally_rows(job_id))?
                .terminal_stats();
            warn!(
                interrupted,
                settled = stats.total(),
                "Took over job from an expired driver"
            );
        }

        info!(
            tenant_id = %job.tenant_id,
            input_count = job.input_count,
            resumed,
            "Job started"
        );
        self.progress.report(
            job_id,
            ProgressEvent::Started {
                input_count: job.input_count,
                resumed,
                interrupted,
            },
        );

        let mut cursor: Option<RowCursor> = None;
        loop {
            let current = self.load_job(job_id)?;
            if current.status == JobStatus::Cancelled {
                return self.stop_cancelled(job_id, stats);
            }
            if current.lease_owner.as_deref() != Some(owner.as_str()) {
                return Err(EngineError::Store(DatabaseError::LeaseLost {
                    job_id: job_id.to_string(),
                }));
            }

            let page = self.retry.run("fetch queued rows", || {
                self.store.get_queued_rows(job_id, cursor, self.page_size)
            })?;
            if page.is_empty() {
                break;
            }

            for outcome in self.process_page(job_id, &owner, &job.tenant_id, &page)? {
                stats.record(outcome.status);
                self.progress.report(
                    job_id,
                    ProgressEvent::RowFinished {
                        row_id: outcome.row_id,
                        status: outcome.status,
                    },
                );
            }
            cursor = page.last().map(JobRow::cursor);

            let update = JobUpdate::progress(&owner, stats, self.lease_expiry());
            match self
                .retry
                .run("record progress", || self.store.update_job(job_id, &update))
            {
                Ok(()) => {}
                Err(DatabaseError::LeaseLost { .. }) => {
                    return self.stop_cancelled(job_id, stats);
                }
                Err(e) => return Err(e.into()),
            }
            debug!(rows = page.len(), settled = stats.total(), "Page completed");
            self.progress.report(
                job_id,
                ProgressEvent::PageCompleted {
                    rows: page.len(),
                    stats,
                },
            );

            if page.len() < self.page_size {
                break;
            }
        }

        let stats = self.recount(job_id, stats)?;
        let outcome = self.finalizer.finalize(&job, &owner, stats)?;
        self.report_settled(&outcome);
        Ok(outcome)
    }

    fn load_job(&self, job_id: &str) -> Result<Job> {
        self.retry
            .run("load job", || self.store.get_job(job_id))?
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))
    }

    fn lease_expiry(&self) -> i64 {
        now_ms().saturating_add(self.lease_ms)
    }

    /// Resolves a page, up to `row_concurrency` rows at a time.
    ///
    /// Outcomes come back in page order. The first store failure stops the
    /// page: rows not yet started stay queued. The lease is renewed in the
    /// background for as long as rows are in flight, so a slow page never
    /// looks like a dead driver.
    fn process_page(
        &self,
        job_id: &str,
        owner: &str,
        tenant_id: &str,
        page: &[JobRow],
    ) -> Result<Vec<RowOutcome>> {
        let workers = self.row_concurrency.min(page.len()).max(1);

        let (work_tx, work_rx) = unbounded::<(usize, &JobRow)>();
        for item in page.iter().enumerate() {
            // Receiver is alive, cannot fail
            let _ = work_tx.send(item);
        }
        drop(work_tx);

        let (done_tx, done_rx) = unbounded::<(usize, Result<RowOutcome>)>();
        let abort = AtomicBool::new(false);

        thread::scope(|scope| {
            let (stop_tx, stop_rx) = bounded::<()>(0);
            let abort = &abort;
            scope.spawn(move || self.heartbeat(job_id, owner, stop_rx, abort));

            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let work_rx = work_rx.clone();
                    let done_tx = done_tx.clone();
                    scope.spawn(move || {
                        for (index, row) in work_rx.iter() {
                            if abort.load(Ordering::Relaxed) {
                                break;
                            }
                            let result = self.processor.process_row(tenant_id, row);
                            if result.is_err() {
                                abort.store(true, Ordering::Relaxed);
                            }
                            if done_tx.send((index, result)).is_err() {
                                break;
                            }
                        }
                    })
                })
                .collect();

            for handle in handles {
                if handle.join().is_err() {
                    abort.store(true, Ordering::Relaxed);
                }
            }
            drop(stop_tx);
        });
        drop(done_tx);

        let mut results: Vec<(usize, Result<RowOutcome>)> = done_rx.iter().collect();
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Renews the lease every third of its length until `stop` closes.
    ///
    /// Losing the lease to a cancel lets the page finish. Losing it to
    /// another driver stops rows that have not started yet.
    fn heartbeat(&self, job_id: &str, owner: &str, stop: Receiver<()>, abort: &AtomicBool) {
        let period = Duration::from_millis(u64::try_from(self.lease_ms / 3).unwrap_or_default())
            .clamp(MIN_HEARTBEAT, MAX_HEARTBEAT);

        loop {
            match stop.recv_timeout(period) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            }

            let renewal = JobUpdate::heartbeat(owner, self.lease_expiry());
            match self.store.update_job(job_id, &renewal) {
                Ok(()) => debug!("Lease renewed mid-page"),
                Err(DatabaseError::LeaseLost { .. }) => {
                    let cancelled = matches!(
                        self.store.get_job(job_id),
                        Ok(Some(job)) if job.status == JobStatus::Cancelled
                    );
                    if !cancelled {
                        warn!("Lease lost mid-page, not starting further rows");
                        abort.store(true, Ordering::Relaxed);
                    }
                    return;
                }
                // The next tick tries again before the lease runs out.
                Err(e) => warn!(error = %e, "Could not renew lease"),
            }
        }
    }

    /// Final counts recomputed from the stored row statuses.
    ///
    /// The in-memory counts are kept if rows are still unsettled.
    fn recount(&self, job_id: &str, stats: JobStats) -> Result<JobStats> {
        let tally = self
            .retry
            .run("tally rows", || self.store.tally_rows(job_id))?;
        if tally.queued + tally.running > 0 {
            warn!(
                queued = tally.queued,
                running = tally.running,
                "Rows left unsettled after the last page"
            );
            return Ok(stats);
        }
        let recounted = tally.terminal_stats();
        if recounted != stats {
            warn!(?stats, ?recounted, "Running counts drifted from stored rows");
        }
        Ok(recounted)
    }

    fn stop_cancelled(&self, job_id: &str, stats: JobStats) -> Result<JobOutcome> {
        match self.finalizer.settle_cancelled(job_id, stats)? {
            Some(outcome) => {
                self.report_settled(&outcome);
                Ok(outcome)
            }
            None => Err(EngineError::Store(DatabaseError::LeaseLost {
                job_id: job_id.to_string(),
            })),
        }
    }

    fn report_settled(&self, outcome: &JobOutcome) {
        let event = if outcome.status == JobStatus::Cancelled {
            ProgressEvent::Cancelled {
                stats: outcome.stats,
            }
        } else {
            ProgressEvent::Finished {
                status: outcome.status,
                stats: outcome.stats,
            }
        };
        self.progress.report(&outcome.job_id, event);
    }
}
