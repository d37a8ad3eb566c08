//! Callback-side half of the microphone pipeline. Runs on the audio thread,
//! so nothing here may block.

use crossbeam_channel::{Sender, TrySendError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Average each interleaved group of `channels` samples into one mono sample.
/// A short trailing group is averaged over the samples it has.
pub(super) fn downmix_into<T: Copy>(
    out: &mut Vec<f32>,
    interleaved: &[T],
    channels: usize,
    to_f32: impl Fn(T) -> f32,
) {
    out.extend(interleaved.chunks(channels.max(1)).map(|group| {
        let sum: f32 = group.iter().map(|&sample| to_f32(sample)).sum();
        sum / group.len() as f32
    }));
}

/// Re-chunks device callbacks into fixed device-rate frames and queues them
/// for the reader. A full queue drops the frame and bumps `overflow`.
pub(super) struct FrameDispatcher {
    channels: usize,
    frame_len: usize,
    carry: Vec<f32>,
    queue: Sender<Vec<f32>>,
    overflow: Arc<AtomicUsize>,
}

impl FrameDispatcher {
    pub(super) fn new(
        channels: usize,
        frame_len: usize,
        queue: Sender<Vec<f32>>,
        overflow: Arc<AtomicUsize>,
    ) -> Self {
        let frame_len = frame_len.max(1);
        Self {
            channels: channels.max(1),
            frame_len,
            carry: Vec::with_capacity(frame_len * 2),
            queue,
            overflow,
        }
    }

    pub(super) fn feed<T: Copy>(&mut self, interleaved: &[T], to_f32: impl Fn(T) -> f32) {
        downmix_into(&mut self.carry, interleaved, self.channels, to_f32);

        let mut consumed = 0;
        while self.carry.len() - consumed >= self.frame_len {
            let frame = self.carry[consumed..consumed + self.frame_len].to_vec();
            consumed += self.frame_len;
            match self.queue.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.overflow.fetch_add(1, Ordering::Relaxed);
                }
                // Reader is gone; nothing left to deliver to.
                Err(TrySendError::Disconnected(_)) => {
                    consumed = self.carry.len();
                    break;
                }
            }
        }
        self.carry.drain(..consumed);
    }
}
