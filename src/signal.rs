//! Cancellation predicates polled by the task runner.
//!
//! A signal reports `true` while work may continue. On the appliance this is
//! the handset: lifted means active, put down means cancel everything.

use std::io::{self, BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// External predicate sampled once per poll tick.
///
/// Must be cheap and free of side effects; several runners may poll the same
/// signal concurrently.
pub trait CancellationSignal: Send + Sync {
    fn is_active(&self) -> bool;
}

impl<F> CancellationSignal for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_active(&self) -> bool {
        self()
    }
}

/// Shared hook state. A hardware poller (or a test) flips it; runners read it.
#[derive(Debug, Clone)]
pub struct HookSwitch {
    off_hook: Arc<AtomicBool>,
}

impl Default for HookSwitch {
    fn default() -> Self {
        Self::new(true)
    }
}

impl HookSwitch {
    pub fn new(off_hook: bool) -> Self {
        Self {
            off_hook: Arc::new(AtomicBool::new(off_hook)),
        }
    }

    pub fn pick_up(&self) {
        self.off_hook.store(true, Ordering::SeqCst);
    }

    pub fn hang_up(&self) {
        self.off_hook.store(false, Ordering::SeqCst);
    }

    pub fn is_off_hook(&self) -> bool {
        self.off_hook.load(Ordering::SeqCst)
    }
}

impl CancellationSignal for HookSwitch {
    fn is_active(&self) -> bool {
        self.is_off_hook()
    }
}

/// Active until a fixed deadline.
#[derive(Debug, Clone, Copy)]
pub struct CancelAfter {
    deadline: Instant,
}

impl CancelAfter {
    pub fn new(after: Duration) -> Self {
        Self {
            deadline: Instant::now() + after,
        }
    }

    pub fn at(deadline: Instant) -> Self {
        Self { deadline }
    }
}

impl CancellationSignal for CancelAfter {
    fn is_active(&self) -> bool {
        Instant::now() < self.deadline
    }
}

/// Keyboard stand-in for the hook on machines without one: typing `q`
/// (then Enter) hangs up. End of input leaves the line open.
#[derive(Debug, Clone)]
pub struct StdinHookSwitch {
    switch: HookSwitch,
}

impl StdinHookSwitch {
    pub fn spawn() -> io::Result<Self> {
        Self::from_reader(BufReader::new(io::stdin()))
    }

    /// Watch any line-oriented reader. The reader thread is detached; a
    /// blocking read cannot be interrupted.
    pub fn from_reader<R>(reader: R) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let switch = HookSwitch::new(true);
        let watcher = switch.clone();
        thread::Builder::new()
            .name("hook-stdin".into())
            .spawn(move || watch_lines(reader, &watcher))?;
        Ok(Self { switch })
    }

    pub fn switch(&self) -> &HookSwitch {
        &self.switch
    }
}

fn watch_lines<R: BufRead>(reader: R, switch: &HookSwitch) {
    for line in reader.lines() {
        match line {
            Ok(line) if line.trim().eq_ignore_ascii_case("q") => {
                tracing::info!("hang-up requested from stdin");
                switch.hang_up();
                return;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(%err, "stdin hook watcher stopped");
                return;
            }
        }
    }
}

impl CancellationSignal for StdinHookSwitch {
    fn is_active(&self) -> bool {
        self.switch.is_off_hook()
    }
}
