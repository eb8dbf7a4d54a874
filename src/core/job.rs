//! Job records, the job state machine and the snapshots handed to hosts.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;

/// Unique job identifier, rendered as a decimal string.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Lifecycle status of a job.
///
/// Moves forward only: `Waiting -> Running -> {Ended, Failed}`, or straight
/// from `Waiting` to `Failed` when a queued job is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted, sitting in the waiting queue.
    Waiting,
    /// Released to a worker; the process is being launched or supervised.
    Running,
    /// Supervision broke down (spawn/I-O/wait error) or the job was cancelled.
    Failed,
    /// The process exited. A non-zero exit code still counts as ended.
    Ended,
}

impl JobStatus {
    /// Whether no further transitions can happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Ended)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Running => write!(f, "running"),
            Self::Failed => write!(f, "failed"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// What to launch: program, ordered arguments and working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Program to execute.
    pub command: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Directory the process runs in; output files land here too.
    pub working_dir: PathBuf,
}

/// How a job left the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The process exited on its own.
    Ended {
        /// Exit code, absent when the process was killed by a signal.
        exit_code: Option<i32>,
    },
    /// Supervision failed or the job was cancelled.
    Failed(String),
}

/// Serializable point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Job identifier.
    pub id: JobId,
    /// Human-readable label.
    pub name: String,
    /// Status at snapshot time.
    pub status: JobStatus,
    /// Capacity units reserved while running.
    pub requested_cores: u32,
    /// Prerequisite job IDs.
    pub dependencies: Vec<JobId>,
    /// Launch specification.
    pub launch: LaunchSpec,
    /// Submission time, ms since epoch.
    pub time_submitted_ms: u128,
    /// Start time, ms since epoch.
    pub time_started_ms: Option<u128>,
    /// Terminal time, ms since epoch.
    pub time_ended_ms: Option<u128>,
    /// Elapsed time since submission; frozen once terminal.
    pub time_taken_ms: u128,
    /// Process exit code, when it exited normally.
    pub exit_code: Option<i32>,
    /// Reason the job failed.
    pub failure: Option<String>,
}

/// Cooperative cancellation signal shared between the facade and a worker.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancelToken {
    /// Request cancellation and wake anyone waiting on the token.
    pub fn cancel(&self) {
        *self.cancelled.lock() = true;
        self.signal.notify_all();
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    /// Block for up to `timeout`, returning early on cancellation.
    /// Returns `true` if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut cancelled = self.cancelled.lock();
        if !*cancelled {
            let _ = self.signal.wait_for(&mut cancelled, timeout);
        }
        *cancelled
    }
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    started_ms: Option<u128>,
    ended_ms: Option<u128>,
    taken_ms: Option<u128>,
    exit_code: Option<i32>,
    failure: Option<String>,
}

/// A submitted job: immutable launch data plus lock-protected mutable state.
///
/// Records are shared as `Arc<JobRecord>`; the registry owns them and every
/// other component only holds another handle to the same record.
#[derive(Debug)]
pub struct JobRecord {
    id: JobId,
    name: String,
    requested_cores: u32,
    dependencies: Vec<JobId>,
    launch: LaunchSpec,
    submitted_ms: u128,
    state: Mutex<JobState>,
    terminal: Condvar,
    cancel: CancelToken,
}

impl JobRecord {
    /// Create a `Waiting` record stamped with the current time.
    #[must_use]
    pub fn new(
        id: JobId,
        name: impl Into<String>,
        requested_cores: u32,
        dependencies: Vec<JobId>,
        launch: LaunchSpec,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            requested_cores,
            dependencies,
            launch,
            submitted_ms: now_ms(),
            state: Mutex::new(JobState {
                status: JobStatus::Waiting,
                started_ms: None,
                ended_ms: None,
                taken_ms: None,
                exit_code: None,
                failure: None,
            }),
            terminal: Condvar::new(),
            cancel: CancelToken::default(),
        }
    }

    /// Job identifier.
    #[must_use]
    pub const fn id(&self) -> JobId {
        self.id
    }

    /// Human-readable label.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capacity units this job reserves.
    #[must_use]
    pub const fn requested_cores(&self) -> u32 {
        self.requested_cores
    }

    /// Prerequisite job IDs.
    #[must_use]
    pub fn dependencies(&self) -> &[JobId] {
        &self.dependencies
    }

    /// Launch specification.
    #[must_use]
    pub const fn launch(&self) -> &LaunchSpec {
        &self.launch
    }

    /// Cancellation signal for the in-flight run.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.state.lock().status
    }

    /// Whether the job reached `Ended` or `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// `Waiting -> Running`. Returns `false` (and changes nothing) from any
    /// other state.
    pub fn mark_running(&self) -> bool {
        let mut state = self.state.lock();
        if state.status != JobStatus::Waiting {
            return false;
        }
        state.status = JobStatus::Running;
        state.started_ms = Some(now_ms().max(self.submitted_ms));
        true
    }

    /// Enter a terminal state. Status, end time, time taken, exit code and
    /// failure reason are written under one lock acquisition, and only the
    /// first call has any effect.
    pub fn finish(&self, outcome: Outcome) -> bool {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return false;
        }
        let floor = state.started_ms.unwrap_or(self.submitted_ms);
        let ended = now_ms().max(floor);
        match outcome {
            Outcome::Ended { exit_code } => {
                state.status = JobStatus::Ended;
                state.exit_code = exit_code;
            }
            Outcome::Failed(reason) => {
                state.status = JobStatus::Failed;
                state.failure = Some(reason);
            }
        }
        state.ended_ms = Some(ended);
        state.taken_ms = Some(ended - self.submitted_ms);
        drop(state);
        self.terminal.notify_all();
        true
    }

    /// Elapsed time since submission, frozen at the terminal transition.
    #[must_use]
    pub fn time_taken_ms(&self) -> u128 {
        let state = self.state.lock();
        self.time_taken_locked(&state)
    }

    fn time_taken_locked(&self, state: &JobState) -> u128 {
        match (state.status.is_terminal(), state.taken_ms) {
            (true, Some(taken)) => taken,
            _ => now_ms().saturating_sub(self.submitted_ms),
        }
    }

    /// Snapshot with a freshly computed `time_taken_ms`.
    #[must_use]
    pub fn info(&self) -> JobInfo {
        let state = self.state.lock();
        JobInfo {
            id: self.id,
            name: self.name.clone(),
            status: state.status,
            requested_cores: self.requested_cores,
            dependencies: self.dependencies.clone(),
            launch: self.launch.clone(),
            time_submitted_ms: self.submitted_ms,
            time_started_ms: state.started_ms,
            time_ended_ms: state.ended_ms,
            time_taken_ms: self.time_taken_locked(&state),
            exit_code: state.exit_code,
            failure: state.failure.clone(),
        }
    }

    /// Block until the job is terminal or `timeout` elapses.
    /// Returns whether the job is terminal.
    pub fn wait_terminal(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.status.is_terminal() {
            if self.terminal.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.status.is_terminal()
    }
}
