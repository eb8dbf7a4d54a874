//! Launching and supervising one external process.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::core::job::{JobId, JobRecord, LaunchSpec, Outcome};
use crate::core::SchedulerError;

/// Paths of the stdout and stderr capture files for a job:
/// `<working_dir>/<command>.o<id>` and `<working_dir>/<command>.e<id>`.
///
/// Only the file-name part of `command` is used, so `/usr/bin/env` yields
/// `env.o7`.
#[must_use]
pub fn output_paths(spec: &LaunchSpec, id: JobId) -> (PathBuf, PathBuf) {
    let stem = Path::new(&spec.command)
        .file_name()
        .map_or_else(|| spec.command.clone(), |n| n.to_string_lossy().into_owned());
    (
        spec.working_dir.join(format!("{stem}.o{id}")),
        spec.working_dir.join(format!("{stem}.e{id}")),
    )
}

/// How long captured output may keep flowing after the process exits.
/// Background descendants can hold the pipes open indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Run `job` to completion, honouring its cancel token.
///
/// Setup, spawn and wait errors come back as `Err`; the caller turns them into
/// a failed job. Once spawned, the process is killed and reaped on every path
/// that does not observe its exit, including a panic.
pub(crate) fn supervise(job: &JobRecord, poll: Duration) -> Result<Outcome, SchedulerError> {
    let token = job.cancel_token();
    if token.is_cancelled() {
        return Ok(Outcome::Failed("cancelled before launch".into()));
    }

    let spec = job.launch();
    let (out_path, err_path) = output_paths(spec, job.id());
    let out_file = create_capture_file(&out_path)?;
    let err_file = create_capture_file(&err_path)?;

    let child = Command::new(&spec.command)
        .args(&spec.args)
        .current_dir(&spec.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SchedulerError::Launch(format!("{}: {e}", spec.command)))?;
    let mut child = ChildGuard::new(child, job.id());

    info!(job_id = %job.id(), pid = child.pid(), command = %spec.command, "process started");

    let mut catchers = Vec::with_capacity(2);
    if let Some(stdout) = child.take_stdout() {
        catchers.push(spawn_catcher(job.id(), "stdout", stdout, out_file)?);
    }
    if let Some(stderr) = child.take_stderr() {
        catchers.push(spawn_catcher(job.id(), "stderr", stderr, err_file)?);
    }

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => return Err(SchedulerError::Backend(format!("wait failed: {e}"))),
        }
        if token.wait_timeout(poll) {
            child.kill();
            // Descendants may still hold the pipes open; don't wait on the catchers.
            drop(catchers);
            return Ok(Outcome::Failed("cancelled".into()));
        }
    };

    join_catchers(job.id(), catchers, OUTPUT_DRAIN_GRACE);
    log_exit(job.id(), status);
    Ok(Outcome::Ended {
        exit_code: status.code(),
    })
}

/// Owns a spawned child and kills and reaps it on drop unless its exit was
/// already observed.
pub(crate) struct ChildGuard {
    child: Child,
    job_id: JobId,
    reaped: bool,
}

impl ChildGuard {
    pub(crate) const fn new(child: Child, job_id: JobId) -> Self {
        Self {
            child,
            job_id,
            reaped: false,
        }
    }

    pub(crate) fn pid(&self) -> u32 {
        self.child.id()
    }

    fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        let status = self.child.try_wait()?;
        self.reaped = status.is_some();
        Ok(status)
    }

    fn kill(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(e) = self.child.kill() {
            // Usually means it already exited.
            debug!(job_id = %self.job_id, error = %e, "kill failed");
        }
        let _ = self.child.wait();
        self.reaped = true;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            warn!(job_id = %self.job_id, pid = self.child.id(), "killing orphaned process");
            self.kill();
        }
    }
}

/// Join the capture threads, detaching any still running once `grace` has
/// passed. A detached catcher keeps appending to its file until the pipe
/// closes.
fn join_catchers(id: JobId, catchers: Vec<JoinHandle<io::Result<usize>>>, grace: Duration) {
    let deadline = Instant::now() + grace;
    for catcher in catchers {
        while !catcher.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if !catcher.is_finished() {
            let stream = catcher.thread().name().unwrap_or("output").to_string();
            warn!(
                job_id = %id,
                stream = %stream,
                "output still open after exit, detaching capture"
            );
            continue;
        }
        match catcher.join() {
            Ok(Ok(lines)) => debug!(job_id = %id, lines, "output stream closed"),
            Ok(Err(e)) => warn!(job_id = %id, error = %e, "output capture failed"),
            Err(_) => warn!(job_id = %id, "output capture thread panicked"),
        }
    }
}

fn create_capture_file(path: &Path) -> Result<File, SchedulerError> {
    File::create(path).map_err(|e| SchedulerError::Launch(format!("{}: {e}", path.display())))
}

fn log_exit(id: JobId, status: ExitStatus) {
    match status.code() {
        Some(0) => info!(job_id = %id, "process finished"),
        Some(code) => info!(job_id = %id, exit_code = code, "process finished with non-zero exit"),
        None => info!(job_id = %id, "process terminated by signal"),
    }
}

/// Copy `stream` into `file` line by line on a dedicated thread.
fn spawn_catcher<R>(
    id: JobId,
    stream_name: &'static str,
    stream: R,
    file: File,
) -> Result<JoinHandle<io::Result<usize>>, SchedulerError>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("oddjob-{stream_name}-{id}"))
        .spawn(move || copy_lines(BufReader::new(stream), BufWriter::new(file)))
        .map_err(|e| SchedulerError::Backend(format!("failed to spawn {stream_name} catcher: {e}")))
}

/// Copy raw lines, flushing after each so tailing the file shows progress
/// while the process runs. Returns the number of lines written.
pub(crate) fn copy_lines<R, W>(mut reader: R, mut writer: W) -> io::Result<usize>
where
    R: BufRead,
    W: Write,
{
    let mut line = Vec::with_capacity(256);
    let mut count = 0;
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if line.last() != Some(&b'\n') {
            line.push(b'\n');
        }
        writer.write_all(&line)?;
        writer.flush()?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}
