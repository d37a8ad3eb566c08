//! Voice activity classification for speech/silence decisions.
//!
//! The segmenter only asks one question per frame: does this window contain
//! speech? Detectors that report speech *duration* over a longer window are
//! adapted through [`BufferedClassifier`].

use std::collections::VecDeque;
use std::time::Duration;

/// Decides whether a window of 16-bit mono audio contains speech.
///
/// # Frame Size Contract
/// Implementations may require specific window sizes. Earshot expects 10, 20
/// or 30 ms at 16 kHz; `(sample_rate * frame_ms) / 1000` samples. The
/// segmenter always passes exactly one session frame.
pub trait VoiceActivityClassifier {
    fn is_speech(&mut self, window: &[i16]) -> bool;

    /// Drop any internal history. Called at the start of every capture so no
    /// state leaks between invocations.
    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "unknown_vad"
    }
}

/// RMS level of a 16-bit window in dBFS, floored at -120 dB.
pub fn rms_dbfs(window: &[i16]) -> f32 {
    if window.is_empty() {
        return -120.0;
    }
    let energy: f64 = window
        .iter()
        .map(|&s| {
            let v = f64::from(s) / 32_768.0;
            v * v
        })
        .sum::<f64>()
        / window.len() as f64;
    let rms = energy.sqrt().max(1e-6);
    (20.0 * rms.log10()).max(-120.0) as f32
}

/// Energy-threshold fallback used when Earshot is disabled or unavailable.
#[derive(Debug, Clone)]
pub struct EnergyClassifier {
    threshold_db: f32,
}

impl EnergyClassifier {
    pub fn new(threshold_db: f32) -> Self {
        Self { threshold_db }
    }
}

impl VoiceActivityClassifier for EnergyClassifier {
    fn is_speech(&mut self, window: &[i16]) -> bool {
        if window.is_empty() {
            return false;
        }
        rms_dbfs(window) >= self.threshold_db
    }

    fn name(&self) -> &'static str {
        "energy_vad"
    }
}

/// A detector that reports how much speech a window holds, rather than a yes/no.
pub trait SpeechDurationEstimator {
    fn speech_duration(&mut self, window: &[i16], sample_rate: u32) -> Duration;

    fn reset(&mut self) {}
}

/// Adapts a [`SpeechDurationEstimator`] to the per-frame classifier interface.
///
/// Keeps the most recent `window` of audio and calls it speech once the
/// estimator finds more than `threshold` of speech in it. Until the window has
/// filled, every frame is non-speech.
pub struct BufferedClassifier<E> {
    estimator: E,
    sample_rate: u32,
    window_samples: usize,
    threshold: Duration,
    history: VecDeque<i16>,
    scratch: Vec<i16>,
}

impl<E: SpeechDurationEstimator> BufferedClassifier<E> {
    pub fn new(estimator: E, sample_rate: u32, window: Duration, threshold: Duration) -> Self {
        let window_samples =
            ((window.as_millis() as u64 * u64::from(sample_rate)) / 1000).max(1) as usize;
        Self {
            estimator,
            sample_rate,
            window_samples,
            threshold,
            history: VecDeque::with_capacity(window_samples),
            scratch: Vec::with_capacity(window_samples),
        }
    }
}

impl<E: SpeechDurationEstimator> VoiceActivityClassifier for BufferedClassifier<E> {
    fn is_speech(&mut self, window: &[i16]) -> bool {
        self.history.extend(window.iter().copied());
        let excess = self.history.len().saturating_sub(self.window_samples);
        self.history.drain(..excess);
        if self.history.len() < self.window_samples {
            return false;
        }
        self.scratch.clear();
        self.scratch.extend(self.history.iter().copied());
        self.estimator.speech_duration(&self.scratch, self.sample_rate) > self.threshold
    }

    fn reset(&mut self) {
        self.history.clear();
        self.estimator.reset();
    }

    fn name(&self) -> &'static str {
        "buffered_vad"
    }
}
