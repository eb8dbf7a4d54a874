//! Tests for error types

use oddjob::{JobId, SchedulerError};

#[test]
fn test_queue_full_error() {
    let err = SchedulerError::QueueFull("max queue depth 10 reached".to_string());
    assert_eq!(format!("{}", err), "queue full: max queue depth 10 reached");
}

#[test]
fn test_capacity_exceeded_error() {
    let err = SchedulerError::CapacityExceeded {
        requested: 8,
        total: 4,
    };
    assert_eq!(
        format!("{}", err),
        "capacity exceeded: requested 8 units, total 4"
    );
}

#[test]
fn test_job_not_found_error() {
    let err = SchedulerError::JobNotFound(JobId(17));
    assert_eq!(format!("{}", err), "job not found: 17");
}

#[test]
fn test_launch_error() {
    let err = SchedulerError::Launch("make: No such file or directory".to_string());
    assert_eq!(
        format!("{}", err),
        "launch error: make: No such file or directory"
    );
}

#[test]
fn test_errors_convert_to_anyhow() {
    let result: oddjob::core::AppResult<()> = Err(SchedulerError::Shutdown.into());
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "scheduler has been shut down");
    assert!(err.downcast_ref::<SchedulerError>().is_some());
}
