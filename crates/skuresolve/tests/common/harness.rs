//! Test harness for running jobs end to end.
//!
//! Provides:
//! - `TestHarness`: a temp-dir SQLite store and a scripted resolver
//! - `ScriptedResolver`: per-SKU canned answers with call counting
//! - `FlakyStore`: a `RecordStore` wrapper that injects store failures

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use skuresolve::config::EngineConfig;
use skuresolve::db::{job_repo, row_repo};
use skuresolve::model::{Candidate, Job, JobRow, NewRow, RowCursor, RowStatus};
use skuresolve::resolver::{ResolutionResult, ResolveError, ResolveInput, Resolver};
use skuresolve::store::{JobUpdate, RecordStore, RowTally, RowUpdate};
use skuresolve::{Database, DatabaseError, JobRunner};

/// Canned resolver behaviour for one SKU.
#[derive(Debug, Clone)]
pub enum Script {
    Confident { url: String, confidence: f64 },
    Review { candidates: usize },
    Unresolved,
    Timeout,
    Fail(String),
    Panic,
}

impl Script {
    pub fn confident(url: &str, confidence: f64) -> Self {
        Script::Confident {
            url: url.to_string(),
            confidence,
        }
    }
}

/// Resolver answering from a per-SKU script. Unknown SKUs are `unresolved`.
pub struct ScriptedResolver {
    scripts: HashMap<String, Script>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Duration,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
        }
    }

    /// Every SKU resolves confidently to a URL derived from it.
    pub fn all_confident(skus: &[String]) -> Self {
        let mut resolver = Self::new();
        for sku in skus {
            resolver = resolver.with(
                sku,
                Script::confident(&format!("https://www.brand.example/p/{}", sku), 0.9),
            );
        }
        resolver
    }

    pub fn with(mut self, sku: &str, script: Script) -> Self {
        self.scripts.insert(sku.to_string(), script);
        self
    }

    /// Sleep before answering, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls_for(&self, sku: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(sku)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn call_counts(&self) -> HashMap<String, usize> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for ScriptedResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for ScriptedResolver {
    fn resolve(&self, input: &ResolveInput) -> Result<ResolutionResult, ResolveError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(input.sku.clone())
            .or_default() += 1;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        match self.scripts.get(&input.sku) {
            Some(Script::Confident { url, confidence }) => Ok(ResolutionResult::ResolvedConfident {
                resolved_url: url.clone(),
                confidence: *confidence,
                matched_by: "sku_exact".to_string(),
                signals: Some(vec![format!("sku={}", input.sku)]),
            }),
            Some(Script::Review { candidates }) => Ok(ResolutionResult::ResolvedNeedsReview {
                candidates: (0..*candidates)
                    .map(|i| {
                        Candidate::new(format!("https://c{}.example/{}", i, input.sku))
                            .with_score(0.5)
                    })
                    .collect(),
            }),
            Some(Script::Unresolved) | None => {
                Ok(ResolutionResult::Unresolved { candidates: vec![] })
            }
            Some(Script::Timeout) => Err(ResolveError::Timeout(Duration::from_secs(30))),
            Some(Script::Fail(message)) => Err(ResolveError::Failed(message.clone())),
            Some(Script::Panic) => panic!("scripted resolver panic for {}", input.sku),
        }
    }
}

/// Store wrapper that fails selected calls.
pub struct FlakyStore {
    inner: Database,
    /// The next N `update_row` calls fail with a transient error.
    transient_row_failures: AtomicUsize,
    /// The next N `update_job` calls fail with a transient error.
    transient_job_failures: AtomicUsize,
    /// Every `update_row` call fails while set.
    row_writes_down: AtomicBool,
    /// Non-error results for these row ids can never be written.
    rejected_results: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn new(inner: Database) -> Self {
        Self {
            inner,
            transient_row_failures: AtomicUsize::new(0),
            transient_job_failures: AtomicUsize::new(0),
            row_writes_down: AtomicBool::new(false),
            rejected_results: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_next_row_writes(&self, n: usize) {
        self.transient_row_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_job_updates(&self, n: usize) {
        self.transient_job_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_row_writes_down(&self, down: bool) {
        self.row_writes_down.store(down, Ordering::SeqCst);
    }

    pub fn reject_results_for(&self, row_id: &str) {
        self.rejected_results
            .lock()
            .unwrap()
            .insert(row_id.to_string());
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl RecordStore for FlakyStore {
    fn create_job(&self, tenant_id: &str, rows: &[NewRow]) -> Result<Job, DatabaseError> {
        self.inner.create_job(tenant_id, rows)
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        self.inner.get_job(id)
    }

    fn try_claim_job(
        &self,
        id: &str,
        owner: &str,
        now_ms: i64,
        lease_ms: i64,
    ) -> Result<bool, DatabaseError> {
        self.inner.try_claim_job(id, owner, now_ms, lease_ms)
    }

    fn update_job(&self, id: &str, update: &JobUpdate) -> Result<(), DatabaseError> {
        if Self::take_failure(&self.transient_job_failures) {
            return Err(DatabaseError::Unavailable("injected job write failure".to_string()));
        }
        self.inner.update_job(id, update)
    }

    fn request_cancel(&self, id: &str) -> Result<bool, DatabaseError> {
        self.inner.request_cancel(id)
    }

    fn get_queued_rows(
        &self,
        job_id: &str,
        after: Option<RowCursor>,
        limit: usize,
    ) -> Result<Vec<JobRow>, DatabaseError> {
        self.inner.get_queued_rows(job_id, after, limit)
    }

    fn update_row(&self, id: &str, update: &RowUpdate) -> Result<(), DatabaseError> {
        if self.row_writes_down.load(Ordering::SeqCst) {
            return Err(DatabaseError::Unavailable("row writes are down".to_string()));
        }
        if Self::take_failure(&self.transient_row_failures) {
            return Err(DatabaseError::Unavailable("injected row write failure".to_string()));
        }
        if update.status.is_terminal()
            && update.status != RowStatus::Error
            && self.rejected_results.lock().unwrap().contains(id)
        {
            return Err(DatabaseError::Unavailable("result column rejected".to_string()));
        }
        self.inner.update_row(id, update)
    }

    fn interrupt_running_rows(&self, job_id: &str, message: &str) -> Result<u64, DatabaseError> {
        self.inner.interrupt_running_rows(job_id, message)
    }

    fn tally_rows(&self, job_id: &str) -> Result<RowTally, DatabaseError> {
        self.inner.tally_rows(job_id)
    }
}

/// Isolated environment: a SQLite file in a temp dir plus a resolver.
pub struct TestHarness {
    temp_dir: TempDir,
    pub db: Database,
    pub resolver: Arc<ScriptedResolver>,
}

impl TestHarness {
    pub fn new(resolver: ScriptedResolver) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("data").join("jobs.db"))
            .expect("Failed to open test database");
        Self {
            temp_dir,
            db,
            resolver: Arc::new(resolver),
        }
    }

    pub fn runner(&self, config: &EngineConfig) -> JobRunner {
        JobRunner::new(Arc::new(self.db.clone()), self.resolver.clone(), config)
    }

    pub fn runner_on(&self, store: Arc<dyn RecordStore>, config: &EngineConfig) -> JobRunner {
        JobRunner::new(store, self.resolver.clone(), config)
    }

    pub fn job(&self, job_id: &str) -> Job {
        job_repo::find_by_id(&self.db, job_id)
            .unwrap()
            .expect("job should exist")
    }

    pub fn rows(&self, job_id: &str) -> Vec<JobRow> {
        row_repo::list_by_job(&self.db, job_id).unwrap()
    }

    pub fn row_by_sku(&self, job_id: &str, sku: &str) -> JobRow {
        self.rows(job_id)
            .into_iter()
            .find(|r| r.sku == sku)
            .expect("row should exist")
    }
}

/// Final counts of a terminal job add up to its input count.
pub fn assert_conserved(job: &Job) {
    assert!(job.status.is_terminal(), "job is {}", job.status);
    assert_eq!(
        job.resolved_count + job.review_count + job.unresolved_count + job.error_count,
        job.input_count,
        "counts do not add up for job {:?}",
        job
    );
}
