use super::capture::StopReason;
use super::source::AudioFrame;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) enum FrameLabel {
    Speech,
    Silence,
}

impl FrameLabel {
    pub(super) fn from_speech(is_speech: bool) -> Self {
        if is_speech {
            FrameLabel::Speech
        } else {
            FrameLabel::Silence
        }
    }
}

/// One finalized utterance: contiguous mono PCM plus where it sits on the
/// session clock and why recording ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    samples: Vec<i16>,
    sample_rate: u32,
    started_at_ms: u64,
    frame_count: usize,
    pre_speech_frames: usize,
    stop_reason: StopReason,
}

impl Segment {
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Session-clock time of the first sample, pre-speech frames included.
    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    pub fn duration_ms(&self) -> u64 {
        (self.samples.len() as u64 * 1000) / u64::from(self.sample_rate.max(1))
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Frames carried over from before onset was confirmed.
    pub fn pre_speech_frames(&self) -> usize {
        self.pre_speech_frames
    }

    pub fn stop_reason(&self) -> StopReason {
        self.stop_reason
    }
}

/// Bounded window of the most recent non-speech frames before onset.
pub(super) struct PreSpeechRing {
    frames: VecDeque<AudioFrame>,
    capacity: usize,
}

impl PreSpeechRing {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(super) fn push(&mut self, frame: AudioFrame) {
        if self.capacity == 0 {
            return;
        }
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub(super) fn len(&self) -> usize {
        self.frames.len()
    }

    pub(super) fn take(&mut self) -> VecDeque<AudioFrame> {
        std::mem::take(&mut self.frames)
    }
}

struct FrameRecord {
    frame: AudioFrame,
    label: FrameLabel,
}

/// The open segment while recording. Grows monotonically until finalized.
pub(super) struct SegmentAccumulator {
    records: Vec<FrameRecord>,
    started_at_ms: u64,
    pre_speech_frames: usize,
}

impl SegmentAccumulator {
    /// Seed with the pre-speech window followed by the frame that triggered onset.
    pub(super) fn open(
        started_at_ms: u64,
        pre_speech: VecDeque<AudioFrame>,
        trigger: AudioFrame,
    ) -> Self {
        let pre_speech_frames = pre_speech.len();
        let mut records: Vec<FrameRecord> = pre_speech
            .into_iter()
            .map(|frame| FrameRecord {
                frame,
                label: FrameLabel::Silence,
            })
            .collect();
        records.push(FrameRecord {
            frame: trigger,
            label: FrameLabel::Speech,
        });
        Self {
            records,
            started_at_ms,
            pre_speech_frames,
        }
    }

    pub(super) fn push(&mut self, frame: AudioFrame, label: FrameLabel) {
        self.records.push(FrameRecord { frame, label });
    }

    pub(super) fn frame_count(&self) -> usize {
        self.records.len()
    }

    /// Drop trailing non-speech frames beyond `keep_frames`. Pre-speech frames
    /// and the onset frame are never trimmed.
    pub(super) fn trim_trailing_silence(&mut self, keep_frames: usize) {
        let floor = self.pre_speech_frames + 1;
        let trailing = self
            .records
            .iter()
            .skip(floor)
            .rev()
            .take_while(|record| record.label == FrameLabel::Silence)
            .count();
        let excess = trailing.saturating_sub(keep_frames);
        let keep = self.records.len().saturating_sub(excess).max(floor);
        self.records.truncate(keep);
    }

    pub(super) fn finalize(self, sample_rate: u32, stop_reason: StopReason) -> Segment {
        let frame_count = self.records.len();
        let total: usize = self.records.iter().map(|r| r.frame.len()).sum();
        let mut samples = Vec::with_capacity(total);
        for record in self.records {
            samples.extend(record.frame.into_samples());
        }
        Segment {
            samples,
            sample_rate,
            started_at_ms: self.started_at_ms,
            frame_count,
            pre_speech_frames: self.pre_speech_frames,
            stop_reason,
        }
    }
}
