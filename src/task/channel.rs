//! Single-slot hand-off from an execution context back to its runner.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Instant;

pub(crate) fn result_channel<R>() -> (ResultSender<R>, ResultReceiver<R>) {
    let (tx, rx) = bounded(1);
    (ResultSender { tx }, ResultReceiver { rx })
}

pub(crate) struct ResultSender<R> {
    tx: Sender<R>,
}

impl<R> ResultSender<R> {
    /// Deliver the one and only result. Never blocks: the slot is empty until
    /// this call and the sender is consumed by it. Returns `false` when the
    /// runner has already stopped listening.
    pub(crate) fn send(self, value: R) -> bool {
        self.tx.try_send(value).is_ok()
    }
}

pub(crate) struct ResultReceiver<R> {
    rx: Receiver<R>,
}

impl<R> ResultReceiver<R> {
    /// Returns immediately when a value is already waiting, even if the
    /// deadline has passed.
    pub(crate) fn recv_deadline(&self, deadline: Instant) -> Result<R, RecvTimeoutError> {
        self.rx.recv_deadline(deadline)
    }

    pub(crate) fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<R, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}
