//! Forked-process strategy.
//!
//! The child runs the operation and writes one length-prefixed JSON envelope
//! into a pipe, then `_exit`s. A reader thread in the parent drains the pipe
//! so a large result never blocks the child on a full pipe buffer.
//! Cancellation is `SIGKILL` followed by a blocking `waitpid`.
//!
//! The reader stops after the announced payload rather than at EOF. A child
//! forked by another runner in the same window inherits the write end, so EOF
//! can lag behind the result by however long that sibling lives.

use super::channel::result_channel;
use super::poll::{CancelPoll, PollOutcome};
use super::{panic_message, ContextFate, StopToken, Task, TaskError, TaskOp, TaskOutcome};
use crate::signal::CancellationSignal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::ExitStatusExt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process::ExitStatus;
use std::thread;
use std::time::Duration;

/// Exit code used when the child could not deliver its envelope.
const CHILD_WRITE_FAILED: i32 = 101;
/// Little-endian `u64` payload length ahead of every envelope.
const ENVELOPE_HEADER_LEN: usize = 8;

#[derive(Serialize, Deserialize)]
enum Envelope<T> {
    Completed(T),
    Failed(String),
    Panicked(String),
}

/// Owns the child pid until it is reaped. Dropping it unreaped kills the child.
struct ChildGuard {
    pid: libc::pid_t,
    task: String,
}

impl ChildGuard {
    /// Blocking `waitpid`. Returns `None` if the child was already reaped or
    /// the wait failed.
    fn reap(&mut self) -> Option<ExitStatus> {
        if self.pid <= 0 {
            return None;
        }
        let mut status = 0;
        loop {
            // SAFETY: pid is our own unreaped child; status is a stack local.
            let ret = unsafe { libc::waitpid(self.pid, &mut status, 0) };
            if ret == self.pid {
                self.pid = -1;
                return Some(ExitStatus::from_raw(status));
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            tracing::warn!(task = %self.task, pid = self.pid, %err, "waitpid failed");
            self.pid = -1;
            return None;
        }
    }

    fn kill(&mut self) -> Option<ExitStatus> {
        if self.pid <= 0 {
            return None;
        }
        // SAFETY: signalling our own child; ESRCH is harmless if it already exited.
        if unsafe { libc::kill(self.pid, libc::SIGKILL) } != 0 {
            tracing::debug!(
                task = %self.task,
                pid = self.pid,
                err = %io::Error::last_os_error(),
                "SIGKILL failed"
            );
        }
        self.reap()
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.pid > 0 {
            tracing::debug!(task = %self.task, pid = self.pid, "killing orphaned task process");
            self.kill();
        }
    }
}

fn close_fd(fd: RawFd) {
    // SAFETY: fd came from pipe() and is closed at most once by the caller.
    unsafe {
        libc::close(fd);
    }
}

fn open_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds: [RawFd; 2] = [-1, -1];
    // SAFETY: pipe writes two descriptors into a valid two-element array.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // Keep the pipe out of any program the operation execs.
    for fd in fds {
        // SAFETY: fd is a freshly created, valid descriptor.
        if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } != 0 {
            let err = io::Error::last_os_error();
            close_fd(fds[0]);
            close_fd(fds[1]);
            return Err(err);
        }
    }
    Ok((fds[0], fds[1]))
}

fn encode_envelope<T: Serialize>(envelope: &Envelope<T>) -> Vec<u8> {
    serde_json::to_vec(envelope).unwrap_or_else(|err| {
        let fallback: Envelope<()> = Envelope::Failed(format!("failed to encode result: {err}"));
        serde_json::to_vec(&fallback).unwrap_or_default()
    })
}

fn write_envelope<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&(payload.len() as u64).to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Read exactly one envelope. `Ok(None)` means the pipe closed before any
/// header byte arrived, i.e. the child died without reporting.
fn read_envelope<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; ENVELOPE_HEADER_LEN];
    let mut filled = 0;
    while filled < ENVELOPE_HEADER_LEN {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("envelope header cut short after {filled} bytes"),
                ))
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    let len = u64::from_le_bytes(header);
    let mut payload = Vec::new();
    reader.take(len).read_to_end(&mut payload)?;
    if payload.len() as u64 != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("envelope truncated: {} of {len} bytes", payload.len()),
        ));
    }
    Ok(Some(payload))
}

/// Body of the forked child. Never returns.
fn child_main<T: Serialize>(op: TaskOp<T>, write_fd: RawFd) -> ! {
    let token = StopToken::new();
    let envelope = match catch_unwind(AssertUnwindSafe(|| op(&token))) {
        Ok(Ok(value)) => Envelope::Completed(value),
        Ok(Err(err)) => Envelope::Failed(format!("{err:#}")),
        Err(payload) => Envelope::Panicked(panic_message(payload.as_ref())),
    };
    let bytes = encode_envelope(&envelope);
    // SAFETY: write_fd is the child's copy of the pipe's write end.
    let mut pipe = unsafe { File::from_raw_fd(write_fd) };
    let code = match write_envelope(&mut pipe, &bytes) {
        Ok(()) => 0,
        Err(_) => CHILD_WRITE_FAILED,
    };
    // SAFETY: _exit skips destructors and atexit handlers inherited from the parent.
    unsafe { libc::_exit(code) }
}

fn describe_exit(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "exit status unavailable".to_string(),
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8], status: Option<ExitStatus>) -> TaskOutcome<T> {
    match serde_json::from_slice::<Envelope<T>>(bytes) {
        Ok(Envelope::Completed(value)) => TaskOutcome::Completed(value),
        Ok(Envelope::Failed(message)) => TaskOutcome::Failed(anyhow::anyhow!(message)),
        Ok(Envelope::Panicked(message)) => TaskOutcome::Failed(TaskError::Panicked(message).into()),
        Err(err) => TaskOutcome::Failed(
            TaskError::Transport(format!(
                "undecodable result ({} bytes, {}): {err}",
                bytes.len(),
                describe_exit(status)
            ))
            .into(),
        ),
    }
}

/// Run `task` in a forked child, polling `signal` every `poll_interval`.
///
/// Unix only. The operation runs in a copy of this process with a single
/// thread, so it must not depend on locks held elsewhere at fork time.
pub fn run_in_process<T>(
    task: Task<T>,
    signal: &dyn CancellationSignal,
    poll_interval: Duration,
) -> TaskOutcome<T>
where
    T: Serialize + DeserializeOwned,
{
    let (name, op) = task.into_parts();
    let (read_fd, write_fd) = match open_pipe() {
        Ok(fds) => fds,
        Err(err) => return TaskOutcome::Failed(TaskError::Spawn(err).into()),
    };

    // SAFETY: the child only runs `op`, writes to the pipe and calls _exit.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        let err = io::Error::last_os_error();
        close_fd(read_fd);
        close_fd(write_fd);
        return TaskOutcome::Failed(TaskError::Spawn(err).into());
    }
    if pid == 0 {
        close_fd(read_fd);
        child_main(op, write_fd);
    }
    drop(op);
    close_fd(write_fd);
    tracing::debug!(task = %name, pid, "task process forked");

    let mut child = ChildGuard { pid, task: name };
    // SAFETY: read_fd is the parent's end of the pipe and is owned from here on.
    let mut pipe = unsafe { File::from_raw_fd(read_fd) };
    let (sender, results) = result_channel::<io::Result<Option<Vec<u8>>>>();
    let reader = thread::Builder::new()
        .name(format!("task-pipe-{pid}"))
        .spawn(move || {
            sender.send(read_envelope(&mut pipe));
        });
    let reader = match reader {
        Ok(handle) => handle,
        Err(err) => return TaskOutcome::Failed(TaskError::Spawn(err).into()),
    };

    let mut poll = CancelPoll::new(signal, poll_interval);
    let outcome = match poll.wait(&results) {
        PollOutcome::Ready(Ok(Some(bytes))) => {
            let status = child.reap();
            if reader.join().is_err() {
                tracing::debug!(task = %child.task, "pipe reader panicked");
            }
            decode(&bytes, status)
        }
        PollOutcome::Ready(Ok(None)) => {
            let status = child.reap();
            TaskOutcome::Failed(TaskError::ContextExited(describe_exit(status)).into())
        }
        PollOutcome::Ready(Err(err)) => {
            child.kill();
            TaskOutcome::Failed(TaskError::Transport(err.to_string()).into())
        }
        PollOutcome::Cancelled => {
            let status = child.kill();
            tracing::debug!(task = %child.task, status = %describe_exit(status), "task process killed");
            TaskOutcome::Cancelled(ContextFate::Terminated)
        }
        PollOutcome::SignalPanicked(msg) => {
            child.kill();
            TaskOutcome::Failed(TaskError::SignalPanicked(msg).into())
        }
        PollOutcome::Disconnected => {
            let status = child.kill();
            TaskOutcome::Failed(TaskError::ContextExited(describe_exit(status)).into())
        }
    };
    tracing::debug!(task = %child.task, ticks = poll.ticks(), "process task settled");
    outcome
}
