//! Admission control: the waiting queue and the readiness sweep.
//!
//! A sweep walks the waiting queue in submission order and releases every job
//! whose dependencies are terminal (or unknown) and whose requested cores fit
//! in the free capacity. Jobs that are not ready stay queued in place and do
//! not hold up later, independent jobs.
//!
//! The queue mutex is held for the whole pass, which serializes concurrent
//! sweeps and keeps `Waiting` status and queue membership in lockstep.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::capacity::CapacityPool;
use super::job::{JobId, JobRecord, JobStatus, Outcome};
use super::registry::JobRegistry;
use super::SchedulerError;

/// Hands a released job to whatever runs it.
///
/// Called inside the sweep with the job already marked `Running` and its
/// capacity reserved. Must not block on the job's execution.
pub trait Dispatch: Send + Sync {
    /// Take ownership of running `job`.
    ///
    /// # Errors
    ///
    /// An error fails the job and returns its capacity.
    fn dispatch(&self, job: Arc<JobRecord>) -> Result<(), SchedulerError>;
}

/// Owner of the waiting queue.
#[derive(Debug)]
pub struct AdmissionController {
    queue: Mutex<VecDeque<Arc<JobRecord>>>,
    registry: Arc<JobRegistry>,
    capacity: Arc<CapacityPool>,
    max_queue_depth: usize,
}

impl AdmissionController {
    /// Controller over a shared registry and capacity pool.
    #[must_use]
    pub fn new(
        registry: Arc<JobRegistry>,
        capacity: Arc<CapacityPool>,
        max_queue_depth: usize,
    ) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            registry,
            capacity,
            max_queue_depth,
        }
    }

    /// Append a `Waiting` job to the back of the queue.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::QueueFull`] when the queue is at its maximum depth.
    pub fn enqueue(&self, job: Arc<JobRecord>) -> Result<(), SchedulerError> {
        let mut queue = self.queue.lock();
        if queue.len() >= self.max_queue_depth {
            return Err(SchedulerError::QueueFull(format!(
                "max queue depth {} reached",
                self.max_queue_depth
            )));
        }
        debug!(job_id = %job.id(), depth = queue.len() + 1, "job enqueued");
        queue.push_back(job);
        Ok(())
    }

    /// Remove a queued job, keeping the order of the rest.
    pub fn remove(&self, id: JobId) -> Option<Arc<JobRecord>> {
        let mut queue = self.queue.lock();
        let position = queue.iter().position(|job| job.id() == id)?;
        queue.remove(position)
    }

    /// Remove `id` from the queue and fail it without launching.
    /// Returns `false` if the job was not queued.
    pub fn cancel_queued(&self, id: JobId) -> bool {
        let mut queue = self.queue.lock();
        let Some(position) = queue.iter().position(|job| job.id() == id) else {
            return false;
        };
        if let Some(job) = queue.remove(position) {
            job.finish(Outcome::Failed("cancelled before start".into()));
        }
        true
    }

    /// Take every queued job out, oldest first.
    pub fn drain(&self) -> Vec<Arc<JobRecord>> {
        self.queue.lock().drain(..).collect()
    }

    /// Queued job IDs, in queue order.
    #[must_use]
    pub fn queued_ids(&self) -> Vec<JobId> {
        self.queue.lock().iter().map(|job| job.id()).collect()
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Release every ready job to `dispatcher`. Returns how many were released.
    pub fn sweep(&self, dispatcher: &dyn Dispatch) -> usize {
        let mut queue = self.queue.lock();
        let mut released = 0;
        let mut index = 0;

        while index < queue.len() {
            let candidate = &queue[index];
            if candidate.status() != JobStatus::Waiting {
                // Left the waiting state behind our back; it no longer belongs here.
                queue.remove(index);
                continue;
            }
            if !self.registry.dependencies_satisfied(candidate) {
                index += 1;
                continue;
            }
            if !self.capacity.try_reserve(candidate.requested_cores()) {
                index += 1;
                continue;
            }

            let Some(job) = queue.remove(index) else {
                break;
            };
            let cores = job.requested_cores();
            if !job.mark_running() {
                self.capacity.release(cores);
                continue;
            }

            info!(
                job_id = %job.id(),
                name = job.name(),
                cores,
                free = self.capacity.available(),
                "releasing job"
            );
            if let Err(e) = dispatcher.dispatch(Arc::clone(&job)) {
                error!(job_id = %job.id(), error = %e, "dispatch failed");
                job.finish(Outcome::Failed(e.to_string()));
                self.capacity.release(cores);
                continue;
            }
            released += 1;
        }

        if released > 0 || !queue.is_empty() {
            debug!(released, waiting = queue.len(), "sweep complete");
        }
        released
    }
}
