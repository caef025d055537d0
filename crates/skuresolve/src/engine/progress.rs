//! Job progress reporting for live status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{JobStats, JobStatus, RowStatus};

/// Phase of a job run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Started,
    Resumed,
    RowFinished,
    PageCompleted,
    Finished,
    Cancelled,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Started => write!(f, "Started"),
            JobPhase::Resumed => write!(f, "Resumed"),
            JobPhase::RowFinished => write!(f, "Row finished"),
            JobPhase::PageCompleted => write!(f, "Page completed"),
            JobPhase::Finished => write!(f, "Finished"),
            JobPhase::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Events emitted by the driver while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The driver claimed the job. `interrupted` counts rows a previous
    /// driver left running.
    Started {
        input_count: u64,
        resumed: bool,
        interrupted: u64,
    },
    RowFinished {
        row_id: String,
        status: RowStatus,
    },
    PageCompleted {
        rows: usize,
        stats: JobStats,
    },
    Finished {
        status: JobStatus,
        stats: JobStats,
    },
    Cancelled {
        stats: JobStats,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, job_id: &str, event: ProgressEvent);
}

/// Discards every event.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _job_id: &str, _event: ProgressEvent) {}
}

/// Serializable progress record sent to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub phase: JobPhase,
    /// Human-readable description of the event.
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Counts so far (final counts on `finished`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<JobStats>,
    /// Job status, set once the job is settled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_status: Option<RowStatus>,
}

impl JobProgressEvent {
    pub fn new(job_id: &str, phase: JobPhase, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            phase,
            message: message.into(),
            timestamp: Utc::now(),
            stats: None,
            status: None,
            row_id: None,
            row_status: None,
        }
    }

    pub fn from_event(job_id: &str, event: ProgressEvent) -> Self {
        match event {
            ProgressEvent::Started {
                input_count,
                resumed: false,
                ..
            } => Self::new(
                job_id,
                JobPhase::Started,
                format!("Processing {} rows", input_count),
            ),
            ProgressEvent::Started {
                input_count,
                resumed: true,
                interrupted,
            } => Self::new(
                job_id,
                JobPhase::Resumed,
                format!(
                    "Resumed job of {} rows, {} interrupted rows failed",
                    input_count, interrupted
                ),
            ),
            ProgressEvent::RowFinished { row_id, status } => {
                let mut e = Self::new(job_id, JobPhase::RowFinished, format!("Row {}", status));
                e.row_id = Some(row_id);
                e.row_status = Some(status);
                e
            }
            ProgressEvent::PageCompleted { rows, stats } => {
                let mut e = Self::new(
                    job_id,
                    JobPhase::PageCompleted,
                    format!("Page of {} rows done, {} rows settled", rows, stats.total()),
                );
                e.stats = Some(stats);
                e
            }
            ProgressEvent::Finished { status, stats } => {
                let mut e = Self::new(job_id, JobPhase::Finished, format!("Job {}", status));
                e.stats = Some(stats);
                e.status = Some(status);
                e
            }
            ProgressEvent::Cancelled { stats } => {
                let mut e = Self::new(job_id, JobPhase::Cancelled, "Job cancelled");
                e.stats = Some(stats);
                e.status = Some(JobStatus::Cancelled);
                e
            }
        }
    }
}

/// Fans job progress out to any number of subscribers.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// A reporter that feeds this broadcaster.
    pub fn reporter(&self) -> BroadcastProgress {
        BroadcastProgress::new(Arc::clone(&self.sender))
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Bridges driver events onto a broadcast channel.
pub struct BroadcastProgress {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl BroadcastProgress {
    pub fn new(sender: Arc<broadcast::Sender<JobProgressEvent>>) -> Self {
        Self { sender }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, job_id: &str, event: ProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(JobProgressEvent::from_event(job_id, event));
    }
}
