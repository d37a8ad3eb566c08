//! Speech segmentation: frame sources, voice activity classification, and the
//! capture state machine that turns a live stream into one bounded utterance.
//!
//! Audio is 16-bit mono at a fixed session rate (16 kHz by default), split
//! into fixed-duration frames.

/// Default session sample rate.
pub const TARGET_RATE: u32 = 16_000;

mod capture;
mod device;
mod dispatch;
mod resample;
mod segment;
mod source;
#[cfg(test)]
mod tests;
mod vad;
mod wav;

pub use capture::{
    capture_from_pcm, AudioSegmenter, Capture, CaptureError, CaptureMetrics, CaptureResult,
    Segmenter, SegmenterConfig, SegmenterState, StopReason,
};
pub use device::{list_input_devices, DeviceFrameSource};
pub use segment::Segment;
pub use source::{AudioFrame, FramePoll, FrameSource, PcmFrameSource};
pub use vad::{
    rms_dbfs, BufferedClassifier, EnergyClassifier, SpeechDurationEstimator,
    VoiceActivityClassifier,
};
pub use wav::{read_wav_mono, write_segment_wav};
