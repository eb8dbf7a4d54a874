//! Execution engine: a fixed pool of OS worker threads supervising processes.
//!
//! Workers block on a `crossbeam-channel` receiver for released jobs and then
//! block again for the whole life of the job's process, so one busy worker is
//! one running job. The admission sweep only releases a job after reserving
//! its cores on the shared [`CapacityPool`], which bounds concurrency in core
//! units; the worker count only needs to cover the most jobs that can run at
//! once (one per unit).
//!
//! On every terminal transition the worker returns the job's cores and raises
//! the [`SweepSignal`] so waiting jobs are re-evaluated straight away.

mod process;

pub use process::output_paths;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::admission::Dispatch;
use super::capacity::CapacityPool;
use super::job::{JobRecord, JobStatus, Outcome};
use super::wake::SweepSignal;
use super::SchedulerError;

/// Settings for the worker pool.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Stack size for each worker thread.
    pub thread_stack_size: usize,
    /// How often a worker checks its child for exit between cancel checks.
    pub poll_interval: Duration,
    /// How long `shutdown` waits for each worker to exit.
    pub join_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            thread_stack_size: 2 * 1024 * 1024,
            poll_interval: Duration::from_millis(50),
            join_timeout: Duration::from_secs(2),
        }
    }
}

/// Worker pool running released jobs.
pub struct ExecutionEngine {
    settings: EngineSettings,
    /// Dropping the sender unblocks idle workers.
    task_tx: Mutex<Option<Sender<Arc<JobRecord>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutionEngine {
    /// Spawn `settings.worker_count` worker threads.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidRequest`] for a zero worker count and
    /// [`SchedulerError::Backend`] if a thread cannot be spawned.
    pub fn start(
        settings: EngineSettings,
        capacity: Arc<CapacityPool>,
        signal: Arc<SweepSignal>,
    ) -> Result<Self, SchedulerError> {
        if settings.worker_count == 0 {
            return Err(SchedulerError::InvalidRequest(
                "worker_count must be greater than 0".into(),
            ));
        }

        let (task_tx, task_rx) = unbounded::<Arc<JobRecord>>();
        let mut workers = Vec::with_capacity(settings.worker_count);
        for worker_id in 0..settings.worker_count {
            let worker = spawn_worker(
                worker_id,
                task_rx.clone(),
                Arc::clone(&capacity),
                Arc::clone(&signal),
                &settings,
            );
            match worker {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Closing the channel lets the already spawned workers exit.
                    drop(task_tx);
                    return Err(e);
                }
            }
        }

        info!(
            worker_count = settings.worker_count,
            total_units = capacity.total(),
            "execution engine started"
        );

        Ok(Self {
            settings,
            task_tx: Mutex::new(Some(task_tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.settings.worker_count
    }

    /// Whether the engine still accepts jobs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task_tx.lock().is_some()
    }

    /// Stop accepting jobs and join the workers, giving each
    /// `join_timeout` before detaching it.
    ///
    /// Running processes are not touched here; cancel them first.
    pub fn shutdown(&self) {
        if self.task_tx.lock().take().is_none() {
            return;
        }
        info!("shutting down execution engine");

        let mut workers = self.workers.lock();
        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = std::sync::mpsc::channel();
            let joiner = thread::spawn(move || {
                let _ = tx.send(worker.join().is_ok());
            });
            match rx.recv_timeout(self.settings.join_timeout) {
                Ok(true) => debug!(worker_id = idx, "worker joined"),
                Ok(false) => warn!(worker_id = idx, "worker panicked"),
                Err(_) => {
                    warn!(worker_id = idx, "worker did not exit within timeout - detaching");
                    continue;
                }
            }
            let _ = joiner.join();
        }
    }
}

impl Dispatch for ExecutionEngine {
    fn dispatch(&self, job: Arc<JobRecord>) -> Result<(), SchedulerError> {
        let guard = self.task_tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(SchedulerError::Shutdown);
        };
        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(SchedulerError::Shutdown),
            Err(TrySendError::Full(_)) => Err(SchedulerError::QueueFull("worker channel".into())),
        }
    }
}

impl Drop for ExecutionEngine {
    fn drop(&mut self) {
        // Detach rather than join; explicit shutdown() does the graceful part.
        if self.task_tx.lock().take().is_some() {
            debug!("execution engine dropped without shutdown - workers detached");
        }
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("settings", &self.settings)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn spawn_worker(
    worker_id: usize,
    task_rx: Receiver<Arc<JobRecord>>,
    capacity: Arc<CapacityPool>,
    signal: Arc<SweepSignal>,
    settings: &EngineSettings,
) -> Result<JoinHandle<()>, SchedulerError> {
    let poll = settings.poll_interval;
    thread::Builder::new()
        .name(format!("oddjob-worker-{worker_id}"))
        .stack_size(settings.thread_stack_size)
        .spawn(move || {
            debug!(worker_id, "worker started");
            while let Ok(job) = task_rx.recv() {
                run_job(worker_id, &job, poll);
                capacity.release(job.requested_cores());
                signal.notify();
            }
            debug!(worker_id, "worker channel closed, exiting");
        })
        .map_err(|e| SchedulerError::Backend(format!("failed to spawn worker {worker_id}: {e}")))
}

/// Supervise `job` and record exactly one terminal outcome.
fn run_job(worker_id: usize, job: &JobRecord, poll: Duration) {
    debug_assert_eq!(job.status(), JobStatus::Running);
    debug!(worker_id, job_id = %job.id(), cores = job.requested_cores(), "worker picked up job");

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| process::supervise(job, poll))) {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            error!(worker_id, job_id = %job.id(), error = %e, "job failed");
            Outcome::Failed(e.to_string())
        }
        Err(_) => {
            error!(worker_id, job_id = %job.id(), "job supervisor panicked");
            Outcome::Failed("supervisor panicked".into())
        }
    };

    if let Outcome::Failed(reason) = &outcome {
        info!(job_id = %job.id(), reason = %reason, "job failed");
    }
    job.finish(outcome);
}
