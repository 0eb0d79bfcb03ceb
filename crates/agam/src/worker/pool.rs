use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::jobs::{JobId, JobStatus};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Final state a worker reached for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    pub error: Option<String>,
}

/// Executes one queued job to a terminal state.
pub trait JobRunner: Send + Sync + 'static {
    fn run(&self, job_id: &JobId) -> JobOutcome;
}

/// Fixed set of OS threads fed by a bounded queue of job ids.
pub struct WorkerPool {
    job_sender: Sender<JobId>,
    result_receiver: Receiver<JobOutcome>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` workers (at least one) with room for
    /// `queue_capacity` waiting jobs.
    pub fn new(runner: Arc<dyn JobRunner>, worker_count: usize, queue_capacity: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (job_sender, job_receiver) = bounded::<JobId>(queue_capacity.max(1));
        let (result_sender, result_receiver) = bounded::<JobOutcome>(queue_capacity.max(1) * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let runner = Arc::clone(&runner);

            let handle = thread::Builder::new()
                .name(format!("agam-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, job_rx, result_tx, shutdown_flag, runner));
            match handle {
                Ok(handle) => workers.push(handle),
                Err(e) => error!("Failed to spawn worker {}: {}", worker_id, e),
            }
        }

        info!("Started {} workers", workers.len());

        Self {
            job_sender,
            result_receiver,
            workers,
            shutdown,
        }
    }

    /// Queues a job without blocking.
    pub fn try_submit(&self, job_id: JobId) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender.try_send(job_id).map_err(|e| match e {
            TrySendError::Full(_) => WorkerError::QueueFull,
            TrySendError::Disconnected(_) => WorkerError::ChannelClosed,
        })
    }

    pub fn try_recv_result(&self) -> Option<JobOutcome> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting jobs. Workers finish what is already queued.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Drop sender so workers see a disconnect once the queue drains.
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<JobId>,
    result_sender: Sender<JobOutcome>,
    shutdown: Arc<AtomicBool>,
    runner: Arc<dyn JobRunner>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        match job_receiver.recv_timeout(POLL_INTERVAL) {
            Ok(job_id) => {
                debug!("Worker {} processing job {}", worker_id, job_id);

                let outcome = catch_unwind(AssertUnwindSafe(|| runner.run(&job_id)))
                    .unwrap_or_else(|_| {
                        error!("Worker {} caught a panic while running job {}", worker_id, job_id);
                        JobOutcome {
                            job_id: job_id.clone(),
                            status: JobStatus::Failed,
                            error: Some("Job runner panicked".to_string()),
                        }
                    });

                // Nobody listening is fine; outcomes are already persisted.
                let _ = result_sender.try_send(outcome);
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) {
                    debug!("Worker {} received shutdown signal", worker_id);
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
