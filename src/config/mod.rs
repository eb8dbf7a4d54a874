//! Configuration for the scheduler: capacity, queue limits and timings.

pub mod scheduler;

pub use scheduler::SchedulerConfig;
