use crate::error::EngineError;
use crate::model::JobOutcome;

/// What a pool worker reports back for one submitted job id.
#[derive(Debug)]
pub struct JobRunResult {
    pub job_id: String,
    pub worker_id: usize,
    pub result: Result<JobOutcome, EngineError>,
}

impl JobRunResult {
    /// The job reached a terminal status during or before this run.
    pub fn is_success(&self) -> bool {
        matches!(self.result, Ok(ref outcome) if outcome.ok)
    }

    pub fn outcome(&self) -> Option<&JobOutcome> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<String> {
        self.result.as_ref().err().map(|e| e.to_string())
    }
}
