//! Frame sources feeding the segmenter.
//!
//! A source hands out fixed-size mono frames at the session rate. The live
//! microphone lives in `device.rs`; this file holds the trait and the
//! in-memory source used for offline runs and tests.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One fixed-size frame of signed 16-bit mono PCM.
///
/// Sample rate and frame duration are session-wide and live in
/// [`super::SegmenterConfig`], not on the frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// A frame of digital silence.
    pub fn silent(len: usize) -> Self {
        Self {
            samples: vec![0; len],
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub(crate) fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

impl From<Vec<i16>> for AudioFrame {
    fn from(samples: Vec<i16>) -> Self {
        Self::new(samples)
    }
}

/// Result of one blocking read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePoll {
    Frame(AudioFrame),
    /// No frame arrived within one frame period. The session clock still
    /// advances and the slot counts as non-speech.
    Stalled,
    /// The source has no more frames.
    Closed,
}

/// Supplies frames to [`super::AudioSegmenter`].
///
/// `read_frame` blocks for at most about one frame period. Errors are fatal to
/// the capture in progress; the segmenter does not retry.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<FramePoll>;

    /// Stop producing frames and free the underlying device. Called exactly
    /// once per capture, on every exit path.
    fn release(&mut self) {}

    fn name(&self) -> &'static str {
        "unknown_source"
    }
}

/// Replays pre-recorded PCM as fixed-size frames, then reports `Closed`.
#[derive(Debug, Clone)]
pub struct PcmFrameSource {
    frames: VecDeque<AudioFrame>,
    released: bool,
}

impl PcmFrameSource {
    /// Split `samples` into `frame_samples`-sized frames. A short final chunk
    /// is zero-padded.
    pub fn from_samples(samples: &[i16], frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        let frames = samples
            .chunks(frame_samples)
            .map(|chunk| {
                let mut frame = chunk.to_vec();
                frame.resize(frame_samples, 0);
                AudioFrame::new(frame)
            })
            .collect();
        Self {
            frames,
            released: false,
        }
    }

    pub fn from_frames(frames: impl IntoIterator<Item = AudioFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            released: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl FrameSource for PcmFrameSource {
    fn read_frame(&mut self) -> Result<FramePoll> {
        if self.released {
            return Ok(FramePoll::Closed);
        }
        Ok(match self.frames.pop_front() {
            Some(frame) => FramePoll::Frame(frame),
            None => FramePoll::Closed,
        })
    }

    fn release(&mut self) {
        self.released = true;
    }

    fn name(&self) -> &'static str {
        "pcm_source"
    }
}
