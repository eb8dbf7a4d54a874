//! End-to-end scheduling scenarios against real processes.
//!
//! These tests validate:
//! 1. Dependencies hold jobs back until prerequisites are terminal
//! 2. Unknown dependency IDs never block
//! 3. Core reservations cap concurrency
//! 4. Output is captured line by line while the process runs
//! 5. Cancellation of queued and running jobs
//! 6. Failed prerequisites do not block dependents
//! 7. Durable job IDs across a restart

#![cfg(unix)]

use std::path::Path;
use std::time::{Duration, Instant};

use oddjob::core::output_paths;
use oddjob::{
    JobId, JobInfo, JobScheduler, JobStatus, ProcessScheduler, SchedulerConfig, SchedulerError,
    SubmitRequest,
};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

const LONG: Duration = Duration::from_secs(20);

fn scheduler(units: u32) -> ProcessScheduler {
    oddjob::util::init_tracing();
    ProcessScheduler::start(
        SchedulerConfig::new()
            .with_total_capacity(units)
            .with_sweep_interval(Duration::from_millis(500))
            .with_poll_interval(Duration::from_millis(10)),
    )
    .unwrap()
}

fn shell(name: &str, script: &str, dir: &Path) -> SubmitRequest {
    SubmitRequest::new(name, "sh")
        .arg("-c")
        .arg(script)
        .with_working_dir(dir)
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn status(s: &ProcessScheduler, id: JobId) -> JobStatus {
    s.info(id).unwrap().status
}

fn rank(status: JobStatus) -> u8 {
    match status {
        JobStatus::Waiting => 0,
        JobStatus::Running => 1,
        JobStatus::Failed | JobStatus::Ended => 2,
    }
}

// ============================================================================
// DEPENDENCIES
// ============================================================================

#[test]
fn test_dependent_waits_for_multicore_prerequisite() {
    let dir = tempfile::tempdir().unwrap();
    let s = scheduler(2);

    let a = s
        .submit(shell("a", "sleep 0.5", dir.path()).with_cores(2))
        .unwrap();
    let b = s
        .submit(shell("b", "echo b", dir.path()).depends_on(a.id))
        .unwrap();

    assert!(wait_until(LONG, || status(&s, a.id) == JobStatus::Running));
    assert_eq!(status(&s, b.id), JobStatus::Waiting);

    let a_done = s.wait(a.id, LONG).unwrap();
    let b_done = s.wait(b.id, LONG).unwrap();
    assert_eq!(a_done.status, JobStatus::Ended);
    assert_eq!(b_done.status, JobStatus::Ended);
    assert!(b_done.time_started_ms.unwrap() >= a_done.time_ended_ms.unwrap());
    s.shutdown();
}

#[test]
fn test_unknown_dependency_does_not_block() {
    let dir = tempfile::tempdir().unwrap();
    let s = scheduler(1);

    let c = s
        .submit(shell("c", "true", dir.path()).depends_on(JobId(999)))
        .unwrap();
    let done = s.wait(c.id, LONG).unwrap();
    assert_eq!(done.status, JobStatus::Ended);
    s.shutdown();
}

#[test]
fn test_failed_prerequisite_still_releases_dependent() {
    let dir = tempfile::tempdir().unwrap();
    let s = scheduler(1);

    // A working directory that does not exist fails the job at setup.
    let broken = s
        .submit(shell("broken", "true", &dir.path().join("missing")))
        .unwrap();
    let dependent = s
        .submit(shell("dependent", "echo ran", dir.path()).depends_on(broken.id))
        .unwrap();

    let broken_done = s.wait(broken.id, LONG).unwrap();
    assert_eq!(broken_done.status, JobStatus::Failed);
    assert!(broken_done.failure.is_some());

    let dependent_done = s.wait(dependent.id, LONG).unwrap();
    assert_eq!(dependent_done.status, JobStatus::Ended);
    s.shutdown();
}

// ============================================================================
// CAPACITY
// ============================================================================

#[test]
fn test_three_single_core_jobs_on_two_cores() {
    let dir = tempfile::tempdir().unwrap();
    let s = scheduler(2);

    let ids: Vec<JobId> = (0..3)
        .map(|i| {
            s.submit(shell(&format!("j{i}"), "sleep 0.4", dir.path()))
                .unwrap()
                .id
        })
        .collect();

    let mut max_running = 0;
    assert!(wait_until(LONG, || {
        let stats = s.stats();
        max_running = max_running.max(stats.running);
        assert!(stats.used_capacity <= 2);
        ids.iter().all(|id| s.is_finished(*id))
    }));
    assert_eq!(max_running, 2);

    let mut infos: Vec<JobInfo> = ids.iter().map(|id| s.info(*id).unwrap()).collect();
    infos.sort_by_key(|i| i.time_started_ms);
    let first_end = infos[0]
        .time_ended_ms
        .unwrap()
        .min(infos[1].time_ended_ms.unwrap());
    assert!(infos[2].time_started_ms.unwrap() >= first_end);
    s.shutdown();
}

#[test]
fn test_capacity_blocked_job_starts_after_release() {
    let dir = tempfile::tempdir().unwrap();
    let s = scheduler(2);

    let small = s.submit(shell("small", "sleep 0.3", dir.path())).unwrap();
    let big = s
        .submit(shell("big", "true", dir.path()).with_cores(2))
        .unwrap();

    assert!(wait_until(LONG, || status(&s, small.id) == JobStatus::Running));
    assert_eq!(status(&s, big.id), JobStatus::Waiting);

    let small_done = s.wait(small.id, LONG).unwrap();
    let big_done = s.wait(big.id, LONG).unwrap();
    assert_eq!(big_done.status, JobStatus::Ended);
    assert!(big_done.time_started_ms.unwrap() >= small_done.time_ended_ms.unwrap());
    s.shutdown();
}

#[test]
fn test_oversized_request_rejected() {
    let s = scheduler(2);
    let err = s
        .submit(SubmitRequest::new("huge", "true").with_cores(8))
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::CapacityExceeded {
            requested: 8,
            total: 2
        }
    ));
    s.shutdown();
}

// ============================================================================
// EXECUTION
// ============================================================================

#[test]
fn test_output_captured_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let s = scheduler(1);

    let job = s
        .submit(shell(
            "progress",
            "echo first; sleep 1; echo second; echo warn >&2",
            dir.path(),
        ))
        .unwrap();
    let (out, err) = output_paths(&job.launch, job.id);
    assert_eq!(out, dir.path().join(format!("sh.o{}", job.id)));

    assert!(wait_until(LONG, || {
        std::fs::read_to_string(&out).is_ok_and(|text| text.contains("first"))
    }));
    assert!(!s.is_finished(job.id));

    s.wait(job.id, LONG).unwrap();
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "first\nsecond\n");
    assert_eq!(std::fs::read_to_string(&err).unwrap(), "warn\n");
    s.shutdown();
}

#[test]
fn test_non_zero_exit_still_ends() {
    let dir = tempfile::tempdir().unwrap();
    let s = scheduler(1);

    let job = s.submit(shell("exit3", "exit 3", dir.path())).unwrap();
    let done = s.wait(job.id, LONG).unwrap();
    assert_eq!(done.status, JobStatus::Ended);
    assert_eq!(done.exit_code, Some(3));
    assert!(done.failure.is_none());
    s.shutdown();
}

#[test]
fn test_missing_program_fails() {
    let dir = tempfile::tempdir().unwrap();
    let s = scheduler(1);

    let job = s
        .submit(SubmitRequest::new("ghost", "oddjob-no-such-program").with_working_dir(dir.path()))
        .unwrap();
    let done = s.wait(job.id, LONG).unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.time_ended_ms.is_some());
    assert!(wait_until(LONG, || s.stats().used_capacity == 0));
    s.shutdown();
}

#[test]
fn test_background_descendant_does_not_delay_completion() {
    let dir = tempfile::tempdir().unwrap();
    let s = scheduler(1);

    let started = Instant::now();
    let job = s
        .submit(shell("spawner", "echo hi; sleep 4 &", dir.path()))
        .unwrap();
    let done = s.wait(job.id, Duration::from_secs(3)).unwrap();
    assert_eq!(done.status, JobStatus::Ended);
    assert_eq!(done.exit_code, Some(0));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(wait_until(LONG, || s.stats().used_capacity == 0));

    let (out, _) = output_paths(&done.launch, done.id);
    assert_eq!(std::fs::read_to_string(out).unwrap(), "hi\n");
    s.shutdown();
}

#[test]
fn test_status_only_moves_forward() {
    let dir = tempfile::tempdir().unwrap();
    let s = scheduler(1);

    let blocker = s.submit(shell("blocker", "sleep 0.2", dir.path())).unwrap();
    let job = s.submit(shell("observed", "sleep 0.2", dir.path())).unwrap();

    let mut last = JobStatus::Waiting;
    let mut seen = vec![last];
    assert!(wait_until(LONG, || {
        let now = status(&s, job.id);
        assert!(rank(now) >= rank(last), "{last} -> {now}");
        if now != last {
            seen.push(now);
            last = now;
        }
        now.is_terminal()
    }));
    assert_eq!(seen, vec![JobStatus::Waiting, JobStatus::Running, JobStatus::Ended]);
    assert!(s.is_finished(blocker.id));
    s.shutdown();
}

// ============================================================================
// QUERIES
// ============================================================================

#[test]
fn test_unknown_ids() {
    let s = scheduler(1);
    assert!(s.is_finished(JobId(4242)));
    assert!(s.info(JobId(4242)).is_none());
    assert!(!s.cancel(JobId(4242)));
    assert!(matches!(
        s.wait(JobId(4242), Duration::from_millis(10)),
        Err(SchedulerError::JobNotFound(JobId(4242)))
    ));
    s.shutdown();
}

#[test]
fn test_time_taken_frozen_after_end() {
    let dir = tempfile::tempdir().unwrap();
    let s = scheduler(1);

    let job = s.submit(shell("quick", "true", dir.path())).unwrap();
    let done = s.wait(job.id, LONG).unwrap();
    std::thread::sleep(Duration::from_millis(30));
    let later = s.info(job.id).unwrap();
    assert_eq!(done.time_taken_ms, later.time_taken_ms);
    assert_eq!(
        later.time_taken_ms,
        later.time_ended_ms.unwrap() - later.time_submitted_ms
    );
    s.shutdown();
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[test]
fn test_cancel_running_job() {
    let dir = tempfile::tempdir().unwrap();
    let s = scheduler(1);

    let job = s
        .submit(
            SubmitRequest::new("sleeper", "sleep")
                .arg("30")
                .with_working_dir(dir.path()),
        )
        .unwrap();
    assert!(wait_until(LONG, || status(&s, job.id) == JobStatus::Running));

    let started = Instant::now();
    assert!(s.cancel(job.id));
    let done = s.wait(job.id, LONG).unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!s.cancel(job.id));
    s.shutdown();
}

#[test]
fn test_cancel_queued_job_never_launches() {
    let dir = tempfile::tempdir().unwrap();
    let s = scheduler(1);

    let blocker = s
        .submit(
            SubmitRequest::new("blocker", "sleep")
                .arg("30")
                .with_working_dir(dir.path()),
        )
        .unwrap();
    let queued = s.submit(shell("queued", "echo never", dir.path())).unwrap();
    let dependent = s
        .submit(shell("dependent", "true", dir.path()).depends_on(queued.id))
        .unwrap();
    assert_eq!(status(&s, queued.id), JobStatus::Waiting);

    assert!(s.cancel(queued.id));
    let info = s.info(queued.id).unwrap();
    assert_eq!(info.status, JobStatus::Failed);
    assert!(info.time_started_ms.is_none());
    let (out, _) = output_paths(&info.launch, info.id);
    assert!(!out.exists());

    s.cancel(blocker.id);
    // The dependent sees the cancelled job as terminal and runs.
    assert_eq!(s.wait(dependent.id, LONG).unwrap().status, JobStatus::Ended);
    s.shutdown();
}

#[test]
fn test_shutdown_fails_outstanding_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let s = scheduler(1);

    let running = s
        .submit(
            SubmitRequest::new("long", "sleep")
                .arg("30")
                .with_working_dir(dir.path()),
        )
        .unwrap();
    let waiting = s.submit(shell("queued", "true", dir.path())).unwrap();
    assert!(wait_until(LONG, || status(&s, running.id) == JobStatus::Running));

    s.shutdown();
    assert!(s.wait(running.id, LONG).is_ok());
    assert_eq!(status(&s, running.id), JobStatus::Failed);
    assert_eq!(status(&s, waiting.id), JobStatus::Failed);
}

// ============================================================================
// DURABLE IDS
// ============================================================================

#[test]
fn test_ids_resume_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("oddjob.counter");
    let config = SchedulerConfig::new()
        .with_total_capacity(1)
        .with_id_counter_path(&counter);

    let first = ProcessScheduler::start(config.clone()).unwrap();
    let a = first.submit(shell("a", "true", dir.path())).unwrap();
    let b = first.submit(shell("b", "true", dir.path())).unwrap();
    first.wait(b.id, LONG).unwrap();
    first.shutdown();
    drop(first);

    let second = ProcessScheduler::start(config).unwrap();
    let c = second.submit(shell("c", "true", dir.path())).unwrap();
    assert!(a.id < b.id);
    assert!(b.id < c.id);
    second.wait(c.id, LONG).unwrap();

    // Output files from both runs coexist.
    for id in [a.id, b.id, c.id] {
        assert!(dir.path().join(format!("sh.o{id}")).exists());
    }
    second.shutdown();
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_submit_and_cancel() {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    let dir = tempfile::tempdir().unwrap();
    let s = Arc::new(scheduler(2));
    let stop = Arc::new(AtomicBool::new(false));
    let peak = Arc::new(AtomicU32::new(0));

    let monitor = {
        let s = Arc::clone(&s);
        let stop = Arc::clone(&stop);
        let peak = Arc::clone(&peak);
        std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                peak.fetch_max(s.stats().used_capacity, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(1));
            }
        })
    };

    let submitters: Vec<_> = (0..4u32)
        .map(|t| {
            let s = Arc::clone(&s);
            let dir = dir.path().to_path_buf();
            std::thread::spawn(move || {
                let mut ids = Vec::new();
                for i in 0..10u32 {
                    let job = s
                        .submit(shell(&format!("t{t}-{i}"), "true", &dir).with_cores(i % 2 + 1))
                        .unwrap();
                    if i % 3 == 0 {
                        s.cancel(job.id);
                    }
                    ids.push(job.id);
                }
                ids
            })
        })
        .collect();

    let ids: Vec<JobId> = submitters
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    assert!(wait_until(LONG, || ids.iter().all(|id| s.is_finished(*id))));
    assert!(wait_until(LONG, || s.stats().used_capacity == 0));
    stop.store(true, Ordering::SeqCst);
    monitor.join().unwrap();

    assert!(peak.load(Ordering::SeqCst) <= 2);
    let stats = s.stats();
    assert_eq!(stats.submitted, 40);
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.running, 0);
    assert_eq!(stats.ended + stats.failed, 40);

    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 40);
    s.shutdown();
}

// ============================================================================
// ASYNC
// ============================================================================

#[tokio::test]
async fn test_wait_async() {
    let dir = tempfile::tempdir().unwrap();
    let s = scheduler(1);

    let job = s.submit(shell("async", "echo hi", dir.path())).unwrap();
    let done = s.wait_async(job.id, LONG).await.unwrap();
    assert_eq!(done.status, JobStatus::Ended);

    let pending = s
        .submit(
            SubmitRequest::new("slow", "sleep")
                .arg("5")
                .with_working_dir(dir.path()),
        )
        .unwrap();
    assert!(matches!(
        s.wait_async(pending.id, Duration::from_millis(20)).await,
        Err(SchedulerError::Timeout)
    ));
    s.shutdown();
}
