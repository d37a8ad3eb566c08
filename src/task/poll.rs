use super::channel::ResultReceiver;
use super::panic_message;
use crate::signal::CancellationSignal;
use crossbeam_channel::RecvTimeoutError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub(crate) enum PollOutcome<R> {
    Ready(R),
    Cancelled,
    SignalPanicked(String),
    /// The context dropped its sender without delivering anything.
    Disconnected,
}

/// Samples a cancellation signal at `start + k * interval` (k = 0, 1, ...)
/// while waiting for a result.
///
/// A result already in the slot when a tick comes due wins over the signal.
pub(crate) struct CancelPoll<'a> {
    signal: &'a dyn CancellationSignal,
    interval: Duration,
    next_tick: Instant,
    ticks: u64,
}

impl<'a> CancelPoll<'a> {
    pub(crate) fn new(signal: &'a dyn CancellationSignal, interval: Duration) -> Self {
        Self {
            signal,
            interval: interval.max(MIN_POLL_INTERVAL),
            next_tick: Instant::now(),
            ticks: 0,
        }
    }

    pub(crate) fn ticks(&self) -> u64 {
        self.ticks
    }

    pub(crate) fn wait<R>(&mut self, results: &ResultReceiver<R>) -> PollOutcome<R> {
        loop {
            match results.recv_deadline(self.next_tick) {
                Ok(value) => return PollOutcome::Ready(value),
                Err(RecvTimeoutError::Disconnected) => return PollOutcome::Disconnected,
                Err(RecvTimeoutError::Timeout) => {}
            }
            self.ticks += 1;
            match catch_unwind(AssertUnwindSafe(|| self.signal.is_active())) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(ticks = self.ticks, "cancellation signal tripped");
                    return PollOutcome::Cancelled;
                }
                Err(payload) => {
                    return PollOutcome::SignalPanicked(panic_message(payload.as_ref()));
                }
            }
            self.advance();
        }
    }

    // A slow signal must not cause a burst of back-to-back catch-up ticks.
    fn advance(&mut self) {
        let now = Instant::now();
        self.next_tick += self.interval;
        while self.next_tick <= now {
            self.next_tick += self.interval;
        }
    }
}
