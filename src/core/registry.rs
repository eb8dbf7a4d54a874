//! Concurrent job registry: the single source of truth for job lookups.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::job::{JobId, JobInfo, JobRecord, JobStatus};

/// Whether a dependency allows its dependents to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyState {
    /// Unknown ID; treated as satisfied so a stale ID cannot deadlock a job.
    Missing,
    /// Known and still `Waiting` or `Running`.
    Pending,
    /// Known and terminal, whatever the outcome.
    Done,
}

impl DependencyState {
    /// Whether dependents may proceed.
    #[must_use]
    pub const fn is_satisfied(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Map from job ID to the shared job record. Read-heavy, so an `RwLock`.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<JobRecord>>>,
}

impl JobRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record. IDs come from the allocator so collisions indicate a
    /// bug; the existing record is kept and `false` returned.
    pub fn insert(&self, job: Arc<JobRecord>) -> bool {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id()) {
            return false;
        }
        jobs.insert(job.id(), job);
        true
    }

    /// Look up a record.
    #[must_use]
    pub fn get(&self, id: JobId) -> Option<Arc<JobRecord>> {
        self.jobs.read().get(&id).cloned()
    }

    /// Classify a dependency ID for readiness checks.
    #[must_use]
    pub fn dependency_state(&self, id: JobId) -> DependencyState {
        match self.jobs.read().get(&id) {
            None => DependencyState::Missing,
            Some(job) if job.is_terminal() => DependencyState::Done,
            Some(_) => DependencyState::Pending,
        }
    }

    /// Whether every dependency of `job` is satisfied.
    #[must_use]
    pub fn dependencies_satisfied(&self, job: &JobRecord) -> bool {
        job.dependencies()
            .iter()
            .all(|dep| self.dependency_state(*dep).is_satisfied())
    }

    /// Number of registered jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    /// Whether nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Count of jobs per status.
    #[must_use]
    pub fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs
            .read()
            .values()
            .filter(|job| job.status() == status)
            .count()
    }

    /// Handles to every record, ordered by ID.
    #[must_use]
    pub fn records(&self) -> Vec<Arc<JobRecord>> {
        let mut all: Vec<_> = self.jobs.read().values().cloned().collect();
        all.sort_by_key(|job| job.id());
        all
    }

    /// Snapshots of every record, ordered by ID.
    #[must_use]
    pub fn snapshot(&self) -> Vec<JobInfo> {
        self.records().iter().map(|job| job.info()).collect()
    }
}
