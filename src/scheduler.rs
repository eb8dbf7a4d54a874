//! The scheduler facade hosts talk to.
//!
//! [`JobScheduler`] is the public contract; [`ProcessScheduler`] implements it
//! on top of the registry, admission controller and execution engine.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use oddjob::{JobScheduler, ProcessScheduler, SchedulerConfig, SubmitRequest};
//!
//! let scheduler = ProcessScheduler::start(SchedulerConfig::new().with_total_capacity(2))?;
//! let build = scheduler.submit(
//!     SubmitRequest::new("build", "make")
//!         .with_cores(2)
//!         .with_working_dir("/src/project"),
//! )?;
//! let test = scheduler.submit(
//!     SubmitRequest::new("test", "make")
//!         .arg("test")
//!         .with_working_dir("/src/project")
//!         .depends_on(build.id),
//! )?;
//! let done = scheduler.wait(test.id, Duration::from_secs(600))?;
//! println!("{} finished as {}", done.name, done.status);
//! scheduler.shutdown();
//! # Ok::<(), oddjob::SchedulerError>(())
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::core::{
    AdmissionController, CapacityPool, CounterStore, EngineSettings, ExecutionEngine,
    FileCounterStore, IdAllocator, JobId, JobInfo, JobRecord, JobRegistry, JobStatus,
    LaunchSpec, Outcome, SchedulerError, SweepSignal, WakeReason,
};

/// Everything needed to submit one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Human-readable label.
    pub name: String,
    /// Program to run.
    pub command: String,
    /// Capacity units to reserve while running.
    pub requested_cores: u32,
    /// Program arguments, in order.
    pub args: Vec<String>,
    /// Working directory; output files are written here.
    pub working_dir: PathBuf,
    /// Jobs that must be terminal before this one starts.
    pub dependencies: Vec<JobId>,
}

impl SubmitRequest {
    /// One-core job with no arguments, running in the current directory.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            requested_cores: 1,
            args: Vec::new(),
            working_dir: PathBuf::from("."),
            dependencies: Vec::new(),
        }
    }

    /// Set the number of cores to reserve.
    #[must_use]
    pub const fn with_cores(mut self, cores: u32) -> Self {
        self.requested_cores = cores;
        self
    }

    /// Replace the argument list.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Replace the dependency list.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = JobId>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    /// Add one dependency.
    #[must_use]
    pub fn depends_on(mut self, dep: JobId) -> Self {
        self.dependencies.push(dep);
        self
    }
}

/// Point-in-time scheduler utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Capacity units managed.
    pub total_capacity: u32,
    /// Capacity units reserved by running jobs.
    pub used_capacity: u32,
    /// Worker threads, zero before `initialize`.
    pub worker_count: usize,
    /// Jobs in the waiting queue.
    pub waiting: usize,
    /// Jobs running.
    pub running: usize,
    /// Jobs ended.
    pub ended: usize,
    /// Jobs failed or cancelled.
    pub failed: usize,
    /// Jobs ever submitted.
    pub submitted: usize,
}

/// Public scheduler contract.
pub trait JobScheduler: Send + Sync {
    /// Start worker threads and the background sweeper. Idempotent.
    ///
    /// # Errors
    ///
    /// Fails if threads cannot be spawned or after shutdown.
    fn initialize(&self) -> Result<(), SchedulerError>;

    /// Stop the scheduler: queued jobs fail, running jobs are cancelled and
    /// the worker threads are released.
    fn shutdown(&self);

    /// Register a job and queue it. Returns the (usually `Waiting`) snapshot
    /// without waiting for execution.
    ///
    /// # Errors
    ///
    /// Rejects malformed requests, requests for more cores than exist, a full
    /// queue, and submissions after shutdown.
    fn submit(&self, request: SubmitRequest) -> Result<JobInfo, SchedulerError>;

    /// Whether the job is terminal. Unknown IDs count as finished.
    fn is_finished(&self, id: JobId) -> bool;

    /// Cancel a job. Queued jobs are failed without launching; running jobs
    /// have their process interrupted on a best-effort basis. Returns whether
    /// a cancellation was issued.
    fn cancel(&self, id: JobId) -> bool;

    /// Snapshot of the job, `None` for unknown IDs.
    fn info(&self, id: JobId) -> Option<JobInfo>;
}

struct Inner {
    config: SchedulerConfig,
    ids: IdAllocator,
    registry: Arc<JobRegistry>,
    capacity: Arc<CapacityPool>,
    admission: AdmissionController,
    engine: OnceLock<ExecutionEngine>,
    signal: Arc<SweepSignal>,
    shut_down: AtomicBool,
}

impl Inner {
    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Release ready jobs. Nothing is released once shutdown has begun.
    fn sweep(&self) -> usize {
        if self.is_shut_down() {
            return 0;
        }
        self.engine
            .get()
            .map_or(0, |engine| self.admission.sweep(engine))
    }

    fn fail_queued(&self, reason: &str) {
        for job in self.admission.drain() {
            job.finish(Outcome::Failed(reason.to_string()));
        }
    }

    fn cancel_running(&self) {
        for job in self.registry.records() {
            if job.status() == JobStatus::Running {
                job.cancel_token().cancel();
            }
        }
    }
}

/// Scheduler running jobs as local OS processes.
pub struct ProcessScheduler {
    inner: Arc<Inner>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessScheduler {
    /// Build a scheduler without starting any threads. Jobs submitted before
    /// [`JobScheduler::initialize`] wait in the queue.
    ///
    /// A configured `id_counter_path` makes job IDs durable.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidRequest`] if the configuration is invalid.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let ids = match &config.id_counter_path {
            Some(path) => IdAllocator::with_store(Box::new(FileCounterStore::new(path))),
            None => IdAllocator::new(),
        };
        Self::build(config, ids)
    }

    /// Like [`ProcessScheduler::new`] with an explicit counter store.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidRequest`] if the configuration is invalid.
    pub fn with_counter_store(
        config: SchedulerConfig,
        store: Box<dyn CounterStore>,
    ) -> Result<Self, SchedulerError> {
        Self::build(config, IdAllocator::with_store(store))
    }

    /// Build and initialize in one step.
    ///
    /// # Errors
    ///
    /// Invalid configuration or thread spawn failure.
    pub fn start(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let scheduler = Self::new(config)?;
        scheduler.initialize()?;
        Ok(scheduler)
    }

    fn build(config: SchedulerConfig, ids: IdAllocator) -> Result<Self, SchedulerError> {
        config
            .validate()
            .map_err(|e| SchedulerError::InvalidRequest(format!("configuration: {e}")))?;

        let registry = Arc::new(JobRegistry::new());
        let capacity = Arc::new(CapacityPool::new(config.total_capacity));
        let admission = AdmissionController::new(
            Arc::clone(&registry),
            Arc::clone(&capacity),
            config.max_queue_depth,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                ids,
                registry,
                capacity,
                admission,
                engine: OnceLock::new(),
                signal: Arc::new(SweepSignal::new()),
                shut_down: AtomicBool::new(false),
            }),
            sweeper: Mutex::new(None),
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Run a sweep now. Returns how many jobs were released.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Block until the job is terminal.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::JobNotFound`] for unknown IDs and
    /// [`SchedulerError::Timeout`] if the job is still live after `timeout`.
    pub fn wait(&self, id: JobId, timeout: Duration) -> Result<JobInfo, SchedulerError> {
        let job = self
            .inner
            .registry
            .get(id)
            .ok_or(SchedulerError::JobNotFound(id))?;
        if job.wait_terminal(timeout) {
            Ok(job.info())
        } else {
            Err(SchedulerError::Timeout)
        }
    }

    /// Async variant of [`ProcessScheduler::wait`]; the blocking wait runs on
    /// tokio's blocking pool.
    ///
    /// # Errors
    ///
    /// Same as [`ProcessScheduler::wait`], plus [`SchedulerError::Backend`] if
    /// the blocking task is lost.
    #[cfg(feature = "tokio-runtime")]
    pub async fn wait_async(
        &self,
        id: JobId,
        timeout: Duration,
    ) -> Result<JobInfo, SchedulerError> {
        let job = self
            .inner
            .registry
            .get(id)
            .ok_or(SchedulerError::JobNotFound(id))?;
        let done = tokio::task::spawn_blocking(move || {
            if job.wait_terminal(timeout) {
                Some(job.info())
            } else {
                None
            }
        })
        .await
        .map_err(|e| SchedulerError::Backend(format!("wait task failed: {e}")))?;
        done.ok_or(SchedulerError::Timeout)
    }

    /// Current utilization.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let registry = &self.inner.registry;
        SchedulerStats {
            total_capacity: self.inner.capacity.total(),
            used_capacity: self.inner.capacity.reserved(),
            worker_count: self.inner.engine.get().map_or(0, ExecutionEngine::worker_count),
            waiting: self.inner.admission.len(),
            running: registry.count_by_status(JobStatus::Running),
            ended: registry.count_by_status(JobStatus::Ended),
            failed: registry.count_by_status(JobStatus::Failed),
            submitted: registry.len(),
        }
    }

    /// Snapshots of every job, ordered by ID.
    #[must_use]
    pub fn jobs(&self) -> Vec<JobInfo> {
        self.inner.registry.snapshot()
    }

    fn validate_request(&self, request: &SubmitRequest) -> Result<(), SchedulerError> {
        if request.command.trim().is_empty() {
            return Err(SchedulerError::InvalidRequest("command must not be empty".into()));
        }
        if request.requested_cores == 0 {
            return Err(SchedulerError::InvalidRequest(
                "requested_cores must be at least 1".into(),
            ));
        }
        let total = self.inner.capacity.total();
        if request.requested_cores > total {
            return Err(SchedulerError::CapacityExceeded {
                requested: request.requested_cores,
                total,
            });
        }
        Ok(())
    }
}

fn spawn_sweeper(inner: Arc<Inner>) -> Result<JoinHandle<()>, SchedulerError> {
    let interval = inner.config.sweep_interval();
    thread::Builder::new()
        .name("oddjob-sweeper".into())
        .spawn(move || {
            debug!(interval_ms = inner.config.sweep_interval_ms, "sweeper started");
            loop {
                match inner.signal.wait(interval) {
                    WakeReason::Shutdown => break,
                    WakeReason::Requested | WakeReason::Timer => {
                        inner.sweep();
                    }
                }
            }
            debug!("sweeper exiting");
        })
        .map_err(|e| SchedulerError::Backend(format!("failed to spawn sweeper: {e}")))
}

impl JobScheduler for ProcessScheduler {
    fn initialize(&self) -> Result<(), SchedulerError> {
        if self.inner.is_shut_down() {
            return Err(SchedulerError::Shutdown);
        }
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return Ok(());
        }

        if self.inner.engine.get().is_none() {
            let settings = EngineSettings {
                worker_count: self.inner.config.effective_worker_count(),
                thread_stack_size: self.inner.config.thread_stack_size,
                poll_interval: self.inner.config.poll_interval(),
                ..EngineSettings::default()
            };
            let engine = ExecutionEngine::start(
                settings,
                Arc::clone(&self.inner.capacity),
                Arc::clone(&self.inner.signal),
            )?;
            if let Err(unused) = self.inner.engine.set(engine) {
                unused.shutdown();
            }
        }

        *sweeper = Some(spawn_sweeper(Arc::clone(&self.inner))?);
        drop(sweeper);

        info!(
            total_capacity = self.inner.capacity.total(),
            last_job_id = self.inner.ids.last_issued(),
            "scheduler initialized"
        );
        // Pick up anything submitted before initialization.
        self.inner.sweep();
        Ok(())
    }

    fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down scheduler");

        self.inner.signal.shutdown();
        if let Some(handle) = self.sweeper.lock().take() {
            if handle.join().is_err() {
                warn!("sweeper thread panicked");
            }
        }

        self.inner.fail_queued("scheduler shut down");
        self.inner.cancel_running();
        if let Some(engine) = self.inner.engine.get() {
            engine.shutdown();
        }
        // A submission racing with shutdown may have slipped in.
        self.inner.fail_queued("scheduler shut down");
    }

    fn submit(&self, request: SubmitRequest) -> Result<JobInfo, SchedulerError> {
        if self.inner.is_shut_down() {
            return Err(SchedulerError::Shutdown);
        }
        self.validate_request(&request)?;

        let id = self.inner.ids.next();
        let job = Arc::new(JobRecord::new(
            id,
            request.name,
            request.requested_cores,
            request.dependencies,
            LaunchSpec {
                command: request.command,
                args: request.args,
                working_dir: request.working_dir,
            },
        ));
        self.inner.registry.insert(Arc::clone(&job));
        if let Err(e) = self.inner.admission.enqueue(Arc::clone(&job)) {
            warn!(job_id = %id, error = %e, "job rejected");
            job.finish(Outcome::Failed(e.to_string()));
            return Err(e);
        }
        if self.inner.is_shut_down() && self.inner.admission.remove(id).is_some() {
            // Shutdown began after the check above and may already have drained the queue.
            job.finish(Outcome::Failed("scheduler shut down".into()));
            return Err(SchedulerError::Shutdown);
        }

        info!(
            job_id = %id,
            name = job.name(),
            cores = job.requested_cores(),
            dependencies = ?job.dependencies(),
            "job submitted"
        );

        self.inner.sweep();
        Ok(job.info())
    }

    fn is_finished(&self, id: JobId) -> bool {
        self.inner
            .registry
            .get(id)
            .is_none_or(|job| job.is_terminal())
    }

    fn cancel(&self, id: JobId) -> bool {
        let Some(job) = self.inner.registry.get(id) else {
            debug!(job_id = %id, "cancel ignored: unknown job");
            return false;
        };

        match job.status() {
            JobStatus::Waiting if self.inner.admission.cancel_queued(id) => {
                info!(job_id = %id, "cancelled queued job");
                // Dependents treat a cancelled job as terminal.
                self.inner.signal.notify();
                true
            }
            JobStatus::Waiting | JobStatus::Running => {
                job.cancel_token().cancel();
                info!(job_id = %id, "cancellation requested");
                true
            }
            JobStatus::Ended | JobStatus::Failed => {
                debug!(job_id = %id, "cancel ignored: job already finished");
                false
            }
        }
    }

    fn info(&self, id: JobId) -> Option<JobInfo> {
        self.inner.registry.get(id).map(|job| job.info())
    }
}

impl Drop for ProcessScheduler {
    /// Same teardown as [`JobScheduler::shutdown`] minus the joins: the
    /// sweeper and workers are left to exit on their own.
    fn drop(&mut self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("scheduler dropped without shutdown - detaching threads");
        self.inner.signal.shutdown();
        self.inner.fail_queued("scheduler shut down");
        self.inner.cancel_running();
    }
}

impl std::fmt::Debug for ProcessScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessScheduler")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
