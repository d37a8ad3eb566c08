//! Earshot-powered voice activity classifier.

use crate::audio::{SegmenterConfig, VoiceActivityClassifier};
use earshot::{VoiceActivityDetector, VoiceActivityProfile};

/// Adapts `earshot` to [`VoiceActivityClassifier`]. Earshot only accepts
/// 10/20/30 ms windows at 16 kHz, so frames are padded or cut to fit.
pub struct EarshotClassifier {
    detector: VoiceActivityDetector,
    frame_samples: usize,
    scratch: Vec<i16>,
}

impl EarshotClassifier {
    /// Map a dBFS threshold onto earshot's fixed aggressiveness profiles.
    /// Lower thresholds mean quieter rooms and stricter filtering.
    pub fn new(cfg: &SegmenterConfig, threshold_db: f32) -> Self {
        let profile = match threshold_db {
            t if t <= -50.0 => VoiceActivityProfile::VERY_AGGRESSIVE,
            t if t <= -40.0 => VoiceActivityProfile::AGGRESSIVE,
            t if t <= -30.0 => VoiceActivityProfile::LBR,
            _ => VoiceActivityProfile::QUALITY,
        };
        let frame_ms = cfg.frame_ms.clamp(10, 30) as usize;
        let frame_samples = (16_000 * frame_ms) / 1000;
        Self {
            detector: VoiceActivityDetector::new(profile),
            frame_samples,
            scratch: Vec::with_capacity(frame_samples),
        }
    }
}

impl VoiceActivityClassifier for EarshotClassifier {
    fn is_speech(&mut self, window: &[i16]) -> bool {
        if window.is_empty() {
            return false;
        }
        self.scratch.clear();
        self.scratch.extend_from_slice(window);
        self.scratch.resize(self.frame_samples, 0);
        self.detector.predict_16khz(&self.scratch).unwrap_or(false)
    }

    fn reset(&mut self) {
        self.detector.reset();
    }

    fn name(&self) -> &'static str {
        "earshot_vad"
    }
}
