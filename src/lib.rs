//! # oddjob
//!
//! An embeddable job scheduler that runs external processes as managed jobs.
//!
//! Hosts submit work items (command, arguments, working directory, a core
//! count and optional prerequisite job IDs) and later poll, wait or cancel.
//! The scheduler keeps every job in an in-memory registry, holds new jobs in a
//! waiting queue and releases them once their dependencies are terminal and
//! enough capacity units are free.
//!
//! ## Key Features
//!
//! - **Core-aware admission**: a job reserves its requested cores for its
//!   whole run on a counting semaphore sized to the machine
//! - **Dependencies**: a job starts only after its prerequisites ended or
//!   failed; unknown IDs never block
//! - **Live output capture**: stdout and stderr are written line by line to
//!   `<command>.o<id>` / `<command>.e<id>` in the working directory
//! - **Durable IDs**: an optional counter file keeps IDs unique across restarts
//! - **Cancellation**: queued jobs are dropped without launching, running
//!   processes are killed
//!
//! ```rust,no_run
//! use oddjob::{JobScheduler, ProcessScheduler, SchedulerConfig, SubmitRequest};
//!
//! let scheduler = ProcessScheduler::start(SchedulerConfig::from_env()?)?;
//! let job = scheduler.submit(SubmitRequest::new("greet", "echo").arg("hello"))?;
//! while !scheduler.is_finished(job.id) {
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//! }
//! println!("{:?}", scheduler.info(job.id));
//! scheduler.shutdown();
//! # Ok::<(), anyhow::Error>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Configuration models for the scheduler.
pub mod config;
/// Core scheduling engine: jobs, IDs, admission and execution.
pub mod core;
/// Public scheduler facade.
pub mod scheduler;
/// Shared utilities.
pub mod util;

pub use crate::config::SchedulerConfig;
pub use crate::core::{JobId, JobInfo, JobStatus, SchedulerError};
pub use crate::scheduler::{JobScheduler, ProcessScheduler, SchedulerStats, SubmitRequest};
