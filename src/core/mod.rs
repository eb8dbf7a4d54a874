//! Scheduling engine: job records, ID allocation, admission and execution.

pub mod admission;
pub mod capacity;
pub mod engine;
pub mod error;
pub mod ids;
pub mod job;
pub mod registry;
pub mod wake;

pub use admission::{AdmissionController, Dispatch};
pub use capacity::CapacityPool;
pub use engine::{output_paths, EngineSettings, ExecutionEngine};
pub use error::{AppResult, SchedulerError};
pub use ids::{CounterStore, FileCounterStore, IdAllocator, InMemoryCounterStore};
pub use job::{CancelToken, JobId, JobInfo, JobRecord, JobStatus, LaunchSpec, Outcome};
pub use registry::{DependencyState, JobRegistry};
pub use wake::{SweepSignal, WakeReason};
