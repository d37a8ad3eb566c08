//! Worker-thread strategy. Cancellation raises the stop token and waits a
//! bounded grace period; a thread cannot be killed.

use super::channel::{result_channel, ResultReceiver};
use super::poll::{CancelPoll, PollOutcome};
use super::{panic_message, ContextFate, StopToken, Task, TaskError, TaskOutcome};
use crate::lock_or_recover;
use crate::signal::CancellationSignal;
use crossbeam_channel::RecvTimeoutError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

type WorkerResult<T> = anyhow::Result<T>;

struct DetachedWorker {
    task: String,
    handle: JoinHandle<()>,
}

fn detached_workers() -> &'static Mutex<Vec<DetachedWorker>> {
    static DETACHED: OnceLock<Mutex<Vec<DetachedWorker>>> = OnceLock::new();
    DETACHED.get_or_init(|| Mutex::new(Vec::new()))
}

/// Join detached workers that have since returned. Returns how many are
/// still running.
pub fn reap_detached_workers() -> usize {
    let mut workers = lock_or_recover(detached_workers(), "detached workers");
    let (finished, running): (Vec<_>, Vec<_>) = workers
        .drain(..)
        .partition(|worker| worker.handle.is_finished());
    *workers = running;
    for worker in finished {
        if worker.handle.join().is_err() {
            tracing::debug!(task = %worker.task, "detached worker panicked");
        } else {
            tracing::debug!(task = %worker.task, "detached worker reaped");
        }
    }
    workers.len()
}

/// Owns the worker until it is joined. Dropping it unjoined raises the stop
/// token and parks the handle in the detached list.
struct WorkerGuard {
    task: String,
    token: StopToken,
    handle: Option<JoinHandle<()>>,
}

impl WorkerGuard {
    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::debug!(task = %self.task, "worker thread panicked outside the task");
            }
        }
    }

    fn stop<R>(&mut self, results: &ResultReceiver<R>, grace: Duration) -> ContextFate {
        self.token.stop();
        match results.recv_timeout(grace) {
            Ok(_) | Err(RecvTimeoutError::Disconnected) => {
                self.join();
                ContextFate::Stopped
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    task = %self.task,
                    grace_ms = grace.as_millis() as u64,
                    "worker ignored stop request; detaching"
                );
                self.detach();
                ContextFate::Detached
            }
        }
    }

    fn detach(&mut self) {
        if let Some(handle) = self.handle.take() {
            lock_or_recover(detached_workers(), "detached workers").push(DetachedWorker {
                task: self.task.clone(),
                handle,
            });
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.token.stop();
            self.detach();
        }
    }
}

/// Run `task` on a dedicated thread, polling `signal` every `poll_interval`.
///
/// On cancellation the stop token is raised and the worker gets `stop_grace`
/// to return before it is detached.
pub fn run_in_thread<T>(
    task: Task<T>,
    signal: &dyn CancellationSignal,
    poll_interval: Duration,
    stop_grace: Duration,
) -> TaskOutcome<T>
where
    T: Send + 'static,
{
    let (name, op) = task.into_parts();
    let token = StopToken::new();
    let (sender, results) = result_channel::<WorkerResult<T>>();

    let worker_token = token.clone();
    let spawned = thread::Builder::new()
        .name(format!("task-{name}"))
        .spawn(move || {
            let result = match catch_unwind(AssertUnwindSafe(|| op(&worker_token))) {
                Ok(result) => result,
                Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref())).into()),
            };
            sender.send(result);
        });
    let handle = match spawned {
        Ok(handle) => handle,
        Err(err) => return TaskOutcome::Failed(TaskError::Spawn(err).into()),
    };
    let mut worker = WorkerGuard {
        task: name,
        token,
        handle: Some(handle),
    };

    let mut poll = CancelPoll::new(signal, poll_interval);
    let outcome = match poll.wait(&results) {
        PollOutcome::Ready(result) => {
            worker.join();
            match result {
                Ok(value) => TaskOutcome::Completed(value),
                Err(err) => TaskOutcome::Failed(err),
            }
        }
        PollOutcome::Cancelled => TaskOutcome::Cancelled(worker.stop(&results, stop_grace)),
        PollOutcome::SignalPanicked(msg) => {
            worker.stop(&results, stop_grace);
            TaskOutcome::Failed(TaskError::SignalPanicked(msg).into())
        }
        PollOutcome::Disconnected => {
            worker.join();
            TaskOutcome::Failed(
                TaskError::ContextExited("worker dropped its result slot".into()).into(),
            )
        }
    };
    tracing::debug!(task = %worker.task, ticks = poll.ticks(), "thread task settled");
    outcome
}
