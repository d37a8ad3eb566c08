//! Speech segmentation state machine.
//!
//! Pulls frames from a [`FrameSource`], classifies each one, and decides when
//! an utterance starts and stops. Three budgets apply: onset timeout (no
//! speech at all), maximum duration (hard cap while recording) and trailing
//! silence (user stopped talking, honoured only after the minimum duration).

use super::segment::{FrameLabel, PreSpeechRing, Segment, SegmentAccumulator};
use super::source::{AudioFrame, FramePoll, FrameSource, PcmFrameSource};
use super::vad::VoiceActivityClassifier;
use crate::config::{
    AppConfig, DEFAULT_FRAME_MS, DEFAULT_MAX_DURATION_MS, DEFAULT_MIN_DURATION_MS,
    DEFAULT_ONSET_TIMEOUT_MS, DEFAULT_PRE_SPEECH_FRAMES, DEFAULT_SAMPLE_RATE,
    DEFAULT_SILENCE_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Timing budgets for one capture. All durations are in milliseconds of
/// session clock (audio time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmenterConfig {
    pub sample_rate: u32,
    pub frame_ms: u64,
    pub onset_timeout_ms: u64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub silence_timeout_ms: u64,
    pub pre_speech_frames: usize,
    /// When set, a segment ending on silence keeps at most this much trailing
    /// non-speech.
    pub trailing_silence_keep_ms: Option<u64>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_ms: DEFAULT_FRAME_MS,
            onset_timeout_ms: DEFAULT_ONSET_TIMEOUT_MS,
            min_duration_ms: DEFAULT_MIN_DURATION_MS,
            max_duration_ms: DEFAULT_MAX_DURATION_MS,
            silence_timeout_ms: DEFAULT_SILENCE_TIMEOUT_MS,
            pre_speech_frames: DEFAULT_PRE_SPEECH_FRAMES,
            trailing_silence_keep_ms: None,
        }
    }
}

impl From<&AppConfig> for SegmenterConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            sample_rate: cfg.sample_rate,
            frame_ms: cfg.frame_ms,
            onset_timeout_ms: cfg.onset_timeout_ms,
            min_duration_ms: cfg.min_duration_ms,
            max_duration_ms: cfg.max_duration_ms,
            silence_timeout_ms: cfg.silence_timeout_ms,
            pre_speech_frames: cfg.pre_speech_frames,
            trailing_silence_keep_ms: cfg.trailing_silence_keep_ms,
        }
    }
}

impl SegmenterConfig {
    pub fn validate(&self) -> Result<(), CaptureError> {
        let invalid =
            |msg: String| -> Result<(), CaptureError> { Err(CaptureError::InvalidConfig(msg)) };
        if self.sample_rate == 0 {
            return invalid("sample_rate must be positive".into());
        }
        for (name, value) in [
            ("frame_ms", self.frame_ms),
            ("onset_timeout_ms", self.onset_timeout_ms),
            ("min_duration_ms", self.min_duration_ms),
            ("max_duration_ms", self.max_duration_ms),
            ("silence_timeout_ms", self.silence_timeout_ms),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be positive"));
            }
        }
        if self.max_duration_ms < self.min_duration_ms {
            return invalid(format!(
                "max_duration_ms ({}) must be >= min_duration_ms ({})",
                self.max_duration_ms, self.min_duration_ms
            ));
        }
        if self.frame_samples() == 0 {
            return invalid(format!(
                "frame_ms {} is shorter than one sample at {} Hz",
                self.frame_ms, self.sample_rate
            ));
        }
        Ok(())
    }

    pub fn frame_samples(&self) -> usize {
        ((u64::from(self.sample_rate) * self.frame_ms) / 1000) as usize
    }

    /// Number of frame labels needed to cover `silence_timeout_ms`.
    pub fn silence_window_frames(&self) -> usize {
        self.silence_timeout_ms.div_ceil(self.frame_ms.max(1)).max(1) as usize
    }
}

/// Why a capture reached `Done`. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopReason {
    SilenceTimeout,
    MaxDurationReached,
    OnsetTimeout,
    StreamClosed,
}

impl StopReason {
    pub fn label(&self) -> &'static str {
        match self {
            StopReason::SilenceTimeout => "silence_timeout",
            StopReason::MaxDurationReached => "max_duration",
            StopReason::OnsetTimeout => "onset_timeout",
            StopReason::StreamClosed => "stream_closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    AwaitingOnset,
    Recording,
    Done(StopReason),
}

/// Counters collected during one capture, logged as a single line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMetrics {
    pub capture_ms: u64,
    pub recording_ms: u64,
    pub speech_ms: u64,
    pub silence_tail_ms: u64,
    pub frames_processed: usize,
    pub frames_stalled: usize,
    pub stop_reason: StopReason,
}

impl CaptureMetrics {
    /// `capture_metrics|capture_ms=...|...|stop=...`
    pub fn log_line(&self) -> String {
        format!(
            "capture_metrics|capture_ms={}|recording_ms={}|speech_ms={}|silence_tail_ms={}|frames_processed={}|frames_stalled={}|stop={}",
            self.capture_ms,
            self.recording_ms,
            self.speech_ms,
            self.silence_tail_ms,
            self.frames_processed,
            self.frames_stalled,
            self.stop_reason.label()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capture {
    Utterance(Segment),
    NoSpeech,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureResult {
    pub outcome: Capture,
    pub metrics: CaptureMetrics,
}

impl CaptureResult {
    pub fn stop_reason(&self) -> StopReason {
        self.metrics.stop_reason
    }

    pub fn segment(&self) -> Option<&Segment> {
        match &self.outcome {
            Capture::Utterance(segment) => Some(segment),
            Capture::NoSpeech => None,
        }
    }

    pub fn into_segment(self) -> Option<Segment> {
        match self.outcome {
            Capture::Utterance(segment) => Some(segment),
            Capture::NoSpeech => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("invalid segmenter config: {0}")]
    InvalidConfig(String),
    #[error("frame source read failed")]
    FrameRead(#[source] anyhow::Error),
}

/// Frame-by-frame state machine behind [`AudioSegmenter::capture`].
///
/// The session clock advances one frame per `on_frame`/`on_stall`. Onset
/// happens at most once; `Recording` never returns to `AwaitingOnset`.
pub struct Segmenter<'a> {
    cfg: &'a SegmenterConfig,
    state: SegmenterState,
    ring: PreSpeechRing,
    segment: Option<SegmentAccumulator>,
    silence_window: VecDeque<FrameLabel>,
    window_frames: usize,
    clock_ms: u64,
    recording_ms: u64,
    speech_ms: u64,
    silence_streak_ms: u64,
    frames_processed: usize,
    frames_stalled: usize,
}

impl<'a> Segmenter<'a> {
    pub fn new(cfg: &'a SegmenterConfig) -> Self {
        let window_frames = cfg.silence_window_frames();
        Self {
            cfg,
            state: SegmenterState::AwaitingOnset,
            ring: PreSpeechRing::new(cfg.pre_speech_frames),
            segment: None,
            silence_window: VecDeque::with_capacity(window_frames),
            window_frames,
            clock_ms: 0,
            recording_ms: 0,
            speech_ms: 0,
            silence_streak_ms: 0,
            frames_processed: 0,
            frames_stalled: 0,
        }
    }

    pub fn state(&self) -> SegmenterState {
        self.state
    }

    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    pub fn recording_ms(&self) -> u64 {
        self.recording_ms
    }

    /// Frames currently held in the pre-speech window.
    pub fn buffered_pre_speech(&self) -> usize {
        self.ring.len()
    }

    /// Feed one classified frame. Returns the stop reason once `Done`.
    pub fn on_frame(&mut self, frame: AudioFrame, is_speech: bool) -> Option<StopReason> {
        if let SegmenterState::Done(reason) = self.state {
            return Some(reason);
        }
        let frame_start_ms = self.clock_ms;
        self.clock_ms = self.clock_ms.saturating_add(self.cfg.frame_ms);
        self.frames_processed += 1;
        let label = FrameLabel::from_speech(is_speech);

        match self.state {
            SegmenterState::AwaitingOnset => {
                if label == FrameLabel::Speech {
                    self.begin_recording(frame_start_ms, frame);
                    self.check_recording()
                } else {
                    self.ring.push(frame);
                    self.check_onset()
                }
            }
            SegmenterState::Recording => {
                if let Some(segment) = self.segment.as_mut() {
                    segment.push(frame, label);
                }
                self.record_label(label);
                self.check_recording()
            }
            SegmenterState::Done(reason) => Some(reason),
        }
    }

    /// The source produced nothing for one frame period.
    pub fn on_stall(&mut self) -> Option<StopReason> {
        if let SegmenterState::Done(reason) = self.state {
            return Some(reason);
        }
        self.clock_ms = self.clock_ms.saturating_add(self.cfg.frame_ms);
        self.frames_stalled += 1;
        match self.state {
            SegmenterState::AwaitingOnset => self.check_onset(),
            _ => {
                self.record_label(FrameLabel::Silence);
                self.check_recording()
            }
        }
    }

    pub fn on_closed(&mut self) -> StopReason {
        match self.state {
            SegmenterState::Done(reason) => reason,
            _ => self.finish_with(StopReason::StreamClosed),
        }
    }

    fn begin_recording(&mut self, frame_start_ms: u64, trigger: AudioFrame) {
        let pre_speech = self.ring.take();
        let lead_ms = pre_speech.len() as u64 * self.cfg.frame_ms;
        let started_at_ms = frame_start_ms.saturating_sub(lead_ms);
        tracing::debug!(
            onset_ms = frame_start_ms,
            pre_speech_frames = pre_speech.len(),
            "speech onset"
        );
        self.segment = Some(SegmentAccumulator::open(started_at_ms, pre_speech, trigger));
        self.state = SegmenterState::Recording;
        self.silence_window.clear();
        self.record_label(FrameLabel::Speech);
    }

    fn record_label(&mut self, label: FrameLabel) {
        self.recording_ms = self.recording_ms.saturating_add(self.cfg.frame_ms);
        match label {
            FrameLabel::Speech => {
                self.speech_ms = self.speech_ms.saturating_add(self.cfg.frame_ms);
                self.silence_streak_ms = 0;
            }
            FrameLabel::Silence => {
                self.silence_streak_ms = self.silence_streak_ms.saturating_add(self.cfg.frame_ms);
            }
        }
        if self.silence_window.len() == self.window_frames {
            self.silence_window.pop_front();
        }
        self.silence_window.push_back(label);
    }

    fn check_onset(&mut self) -> Option<StopReason> {
        if self.clock_ms >= self.cfg.onset_timeout_ms {
            return Some(self.finish_with(StopReason::OnsetTimeout));
        }
        None
    }

    /// Max duration wins over silence; silence only counts once the window
    /// is full and the minimum duration has elapsed.
    fn check_recording(&mut self) -> Option<StopReason> {
        if self.recording_ms >= self.cfg.max_duration_ms {
            return Some(self.finish_with(StopReason::MaxDurationReached));
        }
        let window_silent = self.silence_window.len() == self.window_frames
            && self.silence_window.iter().all(|l| *l == FrameLabel::Silence);
        if window_silent && self.recording_ms >= self.cfg.min_duration_ms {
            return Some(self.finish_with(StopReason::SilenceTimeout));
        }
        None
    }

    fn finish_with(&mut self, reason: StopReason) -> StopReason {
        tracing::debug!(
            reason = reason.label(),
            clock_ms = self.clock_ms,
            recording_ms = self.recording_ms,
            "segmenter done"
        );
        self.state = SegmenterState::Done(reason);
        reason
    }

    /// Finalize the segment. Must only be called after `Done`; an unfinished
    /// machine is closed as `StreamClosed`.
    pub fn finish(mut self) -> CaptureResult {
        let reason = self.on_closed();
        let metrics = CaptureMetrics {
            capture_ms: self.clock_ms,
            recording_ms: self.recording_ms,
            speech_ms: self.speech_ms,
            silence_tail_ms: self.silence_streak_ms,
            frames_processed: self.frames_processed,
            frames_stalled: self.frames_stalled,
            stop_reason: reason,
        };
        let outcome = match self.segment.take() {
            Some(mut segment) => {
                if let (StopReason::SilenceTimeout, Some(keep_ms)) =
                    (reason, self.cfg.trailing_silence_keep_ms)
                {
                    segment.trim_trailing_silence((keep_ms / self.cfg.frame_ms.max(1)) as usize);
                }
                if segment.frame_count() == 0 {
                    Capture::NoSpeech
                } else {
                    Capture::Utterance(segment.finalize(self.cfg.sample_rate, reason))
                }
            }
            None => Capture::NoSpeech,
        };
        CaptureResult { outcome, metrics }
    }
}

/// Converts a live frame stream into at most one bounded utterance per call.
#[derive(Debug, Clone)]
pub struct AudioSegmenter {
    config: SegmenterConfig,
}

impl AudioSegmenter {
    pub fn new(config: SegmenterConfig) -> Result<Self, CaptureError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Read from `source` until a stop condition, then release it.
    ///
    /// Every call starts from a fresh state machine and a reset classifier, so
    /// consecutive captures are independent.
    pub fn capture(
        &self,
        source: &mut dyn FrameSource,
        classifier: &mut dyn VoiceActivityClassifier,
    ) -> Result<CaptureResult, CaptureError> {
        tracing::debug!(
            source = source.name(),
            vad = classifier.name(),
            "capture started"
        );
        classifier.reset();
        let mut machine = Segmenter::new(&self.config);
        let read_result = loop {
            match source.read_frame() {
                Ok(FramePoll::Frame(frame)) => {
                    let speech = classifier.is_speech(frame.samples());
                    if let Some(reason) = machine.on_frame(frame, speech) {
                        break Ok(reason);
                    }
                }
                Ok(FramePoll::Stalled) => {
                    if let Some(reason) = machine.on_stall() {
                        break Ok(reason);
                    }
                }
                Ok(FramePoll::Closed) => break Ok(machine.on_closed()),
                Err(err) => break Err(err),
            }
        };
        source.release();

        match read_result {
            Ok(_) => {
                let result = machine.finish();
                tracing::info!("{}", result.metrics.log_line());
                Ok(result)
            }
            Err(err) => {
                let detail = format!("{err:#}");
                tracing::warn!(error = %detail, "frame source failed; capture aborted");
                Err(CaptureError::FrameRead(err))
            }
        }
    }
}

/// Run the segmenter against pre-recorded PCM. Used for benchmarking and
/// replaying captured audio without a microphone.
pub fn capture_from_pcm(
    samples: &[i16],
    cfg: &SegmenterConfig,
    classifier: &mut dyn VoiceActivityClassifier,
) -> Result<CaptureResult, CaptureError> {
    let segmenter = AudioSegmenter::new(cfg.clone())?;
    let mut source = PcmFrameSource::from_samples(samples, cfg.frame_samples());
    segmenter.capture(&mut source, classifier)
}
