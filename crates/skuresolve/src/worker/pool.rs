use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::engine::JobRunner;
use crate::error::WorkerError;
use crate::worker::job::JobRunResult;

/// Runs whole jobs on a fixed set of threads.
///
/// Different jobs run side by side. Submitting the same job twice is safe:
/// the second run finds the job claimed or settled.
pub struct JobWorkerPool {
    queue: Sender<String>,
    results: Receiver<JobRunResult>,
    threads: Vec<JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
}

/// One pool thread's view of the shared channels.
struct Worker {
    id: usize,
    queue: Receiver<String>,
    results: Sender<JobRunResult>,
    stopping: Arc<AtomicBool>,
    runner: Arc<JobRunner>,
}

impl Worker {
    /// Takes job ids until the queue closes. Ids still queued after a
    /// shutdown request are dropped unrun.
    fn run(self) {
        debug!("Job worker {} started", self.id);

        for job_id in self.queue.iter() {
            if self.stopping.load(Ordering::Acquire) {
                warn!("Job worker {} dropping job {} after shutdown", self.id, job_id);
                continue;
            }

            let result = self.runner.run_job(&job_id);
            match &result {
                Ok(outcome) => debug!(
                    "Job worker {} finished job {} as {}",
                    self.id, job_id, outcome.status
                ),
                Err(e) => error!("Job worker {} failed job {}: {}", self.id, job_id, e),
            }

            let report = JobRunResult {
                job_id,
                worker_id: self.id,
                result,
            };
            if self.results.send(report).is_err() {
                // Nobody is listening any more; keep draining so wait() returns.
                debug!("Job worker {} has no result listener", self.id);
            }
        }

        debug!("Job worker {} stopped", self.id);
    }
}

impl JobWorkerPool {
    pub fn new(runner: Arc<JobRunner>, worker_count: usize) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be at least 1".to_string(),
            ));
        }

        let (queue, queue_rx) = bounded::<String>(worker_count * 2);
        let (results_tx, results) = unbounded::<JobRunResult>();
        let stopping = Arc::new(AtomicBool::new(false));

        let threads = (0..worker_count)
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: queue_rx.clone(),
                    results: results_tx.clone(),
                    stopping: Arc::clone(&stopping),
                    runner: Arc::clone(&runner),
                };
                thread::Builder::new()
                    .name(format!("skuresolve-worker-{}", id))
                    .spawn(move || worker.run())
                    .map_err(|e| WorkerError::SpawnFailed(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!("Started {} job workers", worker_count);
        Ok(Self {
            queue,
            results,
            threads,
            stopping,
        })
    }

    /// Queues a job id. Blocks while the queue is full.
    pub fn submit(&self, job_id: &str) -> Result<(), WorkerError> {
        if self.is_shutdown() {
            return Err(WorkerError::ChannelClosed);
        }
        self.queue
            .send(job_id.to_string())
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn try_recv_result(&self) -> Option<JobRunResult> {
        self.results.try_recv().ok()
    }

    /// Blocks until a worker reports. `None` once every worker has exited.
    pub fn recv_result(&self) -> Option<JobRunResult> {
        self.results.recv().ok()
    }

    /// Stops accepting jobs. Jobs already running finish normally.
    pub fn shutdown(&self) {
        info!("Shutting down job worker pool");
        self.stopping.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Closes the queue and joins every worker.
    pub fn wait(self) {
        let JobWorkerPool {
            queue,
            results,
            threads,
            ..
        } = self;
        drop(queue);
        drop(results);

        for handle in threads {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                error!("{} panicked", name);
            }
        }
        info!("All job workers have stopped");
    }
}
