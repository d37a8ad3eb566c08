//! Cancellable execution of blocking work.
//!
//! A [`TaskRunner`] starts an operation in an isolated context (a forked
//! process or a worker thread), then polls a [`CancellationSignal`] from the
//! caller's thread until the operation finishes or the signal goes inactive.
//! Either way the caller gets exactly one [`TaskOutcome`].

mod channel;
mod fallback;
mod poll;
#[cfg(unix)]
mod process;
mod thread;

use crate::config::{
    default_strategy, AppConfig, DEFAULT_POLL_INTERVAL_MS, DEFAULT_STOP_GRACE_MS,
};
use crate::signal::CancellationSignal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use fallback::run_with_fallback;
#[cfg(unix)]
pub use process::run_in_process;
pub use thread::{reap_detached_workers, run_in_thread};

/// Boxed operation run by a [`Task`].
pub type TaskOp<T> = Box<dyn FnOnce(&StopToken) -> anyhow::Result<T> + Send + 'static>;

/// Cooperative stop flag handed to every operation.
///
/// Thread-strategy cancellation only works if the operation checks it. In a
/// forked child it is never raised; the child is killed instead.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Sleep for `total`, waking early if stopped. Returns `true` when the
    /// full duration elapsed.
    pub fn sleep(&self, total: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(10);
        let deadline = Instant::now() + total;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLICE.min(deadline - now));
        }
    }
}

/// A named deferred invocation. Nothing runs until it is handed to a runner.
pub struct Task<T> {
    name: String,
    op: TaskOp<T>,
}

impl<T> Task<T> {
    pub fn new<F>(name: impl Into<String>, op: F) -> Self
    where
        F: FnOnce(&StopToken) -> anyhow::Result<T> + Send + 'static,
    {
        Self {
            name: name.into(),
            op: Box::new(op),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A task that has not been run is always pending.
    pub fn state(&self) -> TaskState {
        TaskState::Pending
    }

    pub(crate) fn into_parts(self) -> (String, TaskOp<T>) {
        (self.name, self.op)
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// What became of the execution context after cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextFate {
    /// Child process killed and reaped.
    Terminated,
    /// Worker thread saw its stop token and was joined within the grace period.
    Stopped,
    /// Worker thread was still running when the grace period ran out. It keeps
    /// running in the background until the operation returns.
    Detached,
}

#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    Failed(anyhow::Error),
    Cancelled(ContextFate),
}

impl<T> TaskOutcome<T> {
    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Completed(_) => TaskState::Completed,
            TaskOutcome::Failed(_) => TaskState::Failed,
            TaskOutcome::Cancelled(_) => TaskState::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            TaskOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// `Ok(None)` means cancelled.
    pub fn into_result(self) -> anyhow::Result<Option<T>> {
        match self {
            TaskOutcome::Completed(value) => Ok(Some(value)),
            TaskOutcome::Failed(err) => Err(err),
            TaskOutcome::Cancelled(_) => Ok(None),
        }
    }
}

/// Failures owned by the runner rather than the operation.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("failed to start execution context")]
    Spawn(#[source] io::Error),
    #[error("result transport failed: {0}")]
    Transport(String),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("execution context exited without a result ({0})")]
    ContextExited(String),
    #[error("cancellation signal panicked: {0}")]
    SignalPanicked(String),
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Strategy {
    /// Fork a child process; cancellation kills it.
    Process,
    /// Run on a worker thread; cancellation is cooperative.
    Thread,
}

impl Strategy {
    pub fn label(self) -> &'static str {
        match self {
            Strategy::Process => "process",
            Strategy::Thread => "thread",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub strategy: Strategy,
    pub poll_interval: Duration,
    /// Thread strategy only: how long to wait for a stopped worker to return.
    pub stop_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            stop_grace: Duration::from_millis(DEFAULT_STOP_GRACE_MS),
        }
    }
}

impl From<&AppConfig> for RunnerConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            strategy: cfg.strategy,
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            stop_grace: Duration::from_millis(cfg.stop_grace_ms),
        }
    }
}

/// Runs tasks under a cancellation signal with a fixed strategy.
#[derive(Debug, Clone, Default)]
pub struct TaskRunner {
    config: RunnerConfig,
}

impl TaskRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `task` to a terminal state. Blocks the calling thread, which hosts
    /// the poll loop.
    ///
    /// With the process strategy the operation runs in a forked child. It must
    /// be fork-safe: no reliance on locks other threads might hold.
    pub fn run<T>(&self, task: Task<T>, signal: &dyn CancellationSignal) -> TaskOutcome<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let name = task.name().to_string();
        let strategy = self.config.strategy;
        let started = Instant::now();
        tracing::info!(task = %name, %strategy, state = ?TaskState::Running, "task started");

        let outcome = match strategy {
            Strategy::Process => self.run_isolated(task, signal),
            Strategy::Thread => run_in_thread(
                task,
                signal,
                self.config.poll_interval,
                self.config.stop_grace,
            ),
        };

        log_outcome(&name, &outcome, started.elapsed());
        outcome
    }

    pub fn run_fn<T, F>(
        &self,
        name: impl Into<String>,
        op: F,
        signal: &dyn CancellationSignal,
    ) -> TaskOutcome<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(&StopToken) -> anyhow::Result<T> + Send + 'static,
    {
        self.run(Task::new(name, op), signal)
    }

    #[cfg(unix)]
    fn run_isolated<T>(&self, task: Task<T>, signal: &dyn CancellationSignal) -> TaskOutcome<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        run_in_process(task, signal, self.config.poll_interval)
    }

    #[cfg(not(unix))]
    fn run_isolated<T>(&self, task: Task<T>, signal: &dyn CancellationSignal) -> TaskOutcome<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        tracing::warn!(task = task.name(), "process strategy needs fork; using a thread");
        run_in_thread(
            task,
            signal,
            self.config.poll_interval,
            self.config.stop_grace,
        )
    }
}

fn log_outcome<T>(name: &str, outcome: &TaskOutcome<T>, elapsed: Duration) {
    let elapsed_ms = elapsed.as_millis() as u64;
    match outcome {
        TaskOutcome::Completed(_) => {
            tracing::info!(task = name, elapsed_ms, state = ?TaskState::Completed, "task finished");
        }
        TaskOutcome::Failed(err) => {
            let detail = format!("{err:#}");
            tracing::warn!(task = name, elapsed_ms, error = %detail, state = ?TaskState::Failed, "task failed");
        }
        TaskOutcome::Cancelled(fate) => {
            tracing::info!(task = name, elapsed_ms, ?fate, state = ?TaskState::Cancelled, "task cancelled");
        }
    }
}
