use super::dispatch::{downmix_into, FrameDispatcher};
use super::segment::{FrameLabel, PreSpeechRing, SegmentAccumulator};
use super::{
    capture_from_pcm, AudioFrame, AudioSegmenter, BufferedClassifier, Capture, CaptureError,
    EnergyClassifier, FramePoll, FrameSource, PcmFrameSource, Segmenter, SegmenterConfig,
    SegmenterState, SpeechDurationEstimator, StopReason, VoiceActivityClassifier,
};
use anyhow::{anyhow, Result};
use crossbeam_channel::bounded;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SPEECH_LEVEL: i16 = 1_000;

/// Treats any frame whose first sample is non-zero as speech.
#[derive(Default)]
struct MarkerClassifier {
    resets: usize,
}

impl VoiceActivityClassifier for MarkerClassifier {
    fn is_speech(&mut self, window: &[i16]) -> bool {
        window.first().copied().unwrap_or(0) != 0
    }

    fn reset(&mut self) {
        self.resets += 1;
    }

    fn name(&self) -> &'static str {
        "marker_vad"
    }
}

fn scenario_config() -> SegmenterConfig {
    SegmenterConfig {
        sample_rate: 16_000,
        frame_ms: 20,
        onset_timeout_ms: 5_000,
        min_duration_ms: 2_000,
        max_duration_ms: 10_000,
        silence_timeout_ms: 1_000,
        pre_speech_frames: 10,
        trailing_silence_keep_ms: None,
    }
}

fn frame(cfg: &SegmenterConfig, speech: bool) -> AudioFrame {
    let level = if speech { SPEECH_LEVEL } else { 0 };
    AudioFrame::new(vec![level; cfg.frame_samples()])
}

/// Build a source from `(is_speech, frame_count)` runs.
fn scripted_source(cfg: &SegmenterConfig, runs: &[(bool, usize)]) -> PcmFrameSource {
    PcmFrameSource::from_frames(
        runs.iter()
            .flat_map(|&(speech, count)| std::iter::repeat(speech).take(count))
            .map(|speech| frame(cfg, speech)),
    )
}

fn run(cfg: &SegmenterConfig, source: &mut PcmFrameSource) -> super::CaptureResult {
    let segmenter = AudioSegmenter::new(cfg.clone()).expect("valid config");
    let mut vad = MarkerClassifier::default();
    segmenter.capture(source, &mut vad).expect("capture")
}

#[test]
fn speech_then_silence_stops_on_silence_timeout() {
    let cfg = scenario_config();
    // 200 ms of room tone, 3 s of speech, 1.5 s of silence.
    let mut source = scripted_source(&cfg, &[(false, 10), (true, 150), (false, 75)]);
    let result = run(&cfg, &mut source);

    assert_eq!(result.stop_reason(), StopReason::SilenceTimeout);
    let segment = result.segment().expect("utterance");
    assert_eq!(segment.pre_speech_frames(), 10);
    assert_eq!(segment.frame_count(), 10 + 150 + 50);
    assert_eq!(segment.started_at_ms(), 0);
    assert_eq!(segment.duration_ms(), 4_200);
    assert_eq!(segment.stop_reason(), StopReason::SilenceTimeout);
    assert_eq!(result.metrics.recording_ms, 4_000);
    assert_eq!(result.metrics.speech_ms, 3_000);
    assert_eq!(result.metrics.silence_tail_ms, 1_000);
    assert_eq!(source.remaining(), 25);
    assert!(source.is_released());
}

#[test]
fn continuous_speech_stops_at_max_duration() {
    let cfg = scenario_config();
    let mut source = scripted_source(&cfg, &[(true, 600)]);
    let result = run(&cfg, &mut source);

    assert_eq!(result.stop_reason(), StopReason::MaxDurationReached);
    assert_eq!(result.metrics.recording_ms, 10_000);
    let segment = result.segment().expect("utterance");
    assert_eq!(segment.frame_count(), 500);
    assert_eq!(segment.duration_ms(), 10_000);
    assert_eq!(segment.pre_speech_frames(), 0);
}

#[test]
fn max_duration_overrides_long_silence_timeout() {
    let mut cfg = scenario_config();
    cfg.silence_timeout_ms = 60_000;
    cfg.min_duration_ms = 1_000;
    let mut source = scripted_source(&cfg, &[(true, 50), (false, 1_000)]);
    let result = run(&cfg, &mut source);
    assert_eq!(result.stop_reason(), StopReason::MaxDurationReached);
    assert_eq!(result.metrics.recording_ms, cfg.max_duration_ms);
}

#[test]
fn no_speech_stops_at_onset_timeout() {
    let cfg = scenario_config();
    let mut source = scripted_source(&cfg, &[(false, 600)]);
    let result = run(&cfg, &mut source);

    assert_eq!(result.outcome, Capture::NoSpeech);
    assert_eq!(result.stop_reason(), StopReason::OnsetTimeout);
    assert_eq!(result.metrics.capture_ms, cfg.onset_timeout_ms);
    assert_eq!(result.metrics.frames_processed, 250);
    assert_eq!(result.metrics.recording_ms, 0);
    assert!(source.is_released());
}

#[test]
fn onset_timeout_never_overshoots_by_more_than_one_frame() {
    for onset in [1u64, 19, 20, 21, 999, 1_010] {
        let mut cfg = scenario_config();
        cfg.onset_timeout_ms = onset;
        let mut source = scripted_source(&cfg, &[(false, 200)]);
        let result = run(&cfg, &mut source);
        assert_eq!(result.stop_reason(), StopReason::OnsetTimeout);
        assert!(result.metrics.capture_ms >= onset);
        assert!(result.metrics.capture_ms < onset + cfg.frame_ms);
    }
}

#[test]
fn pre_speech_window_keeps_only_most_recent_frames() {
    let mut cfg = scenario_config();
    cfg.pre_speech_frames = 5;
    let mut source = scripted_source(&cfg, &[(false, 40), (true, 150), (false, 60)]);
    let result = run(&cfg, &mut source);

    let segment = result.segment().expect("utterance");
    assert_eq!(segment.pre_speech_frames(), 5);
    assert_eq!(segment.started_at_ms(), 40 * 20 - 5 * 20);
    assert_eq!(segment.frame_count(), 5 + 150 + 50);
    assert!(segment.samples()[..5 * cfg.frame_samples()]
        .iter()
        .all(|s| *s == 0));
    assert_eq!(segment.samples()[5 * cfg.frame_samples()], SPEECH_LEVEL);
}

#[test]
fn zero_pre_speech_frames_starts_at_trigger() {
    let mut cfg = scenario_config();
    cfg.pre_speech_frames = 0;
    let mut source = scripted_source(&cfg, &[(false, 7), (true, 120), (false, 60)]);
    let result = run(&cfg, &mut source);
    let segment = result.segment().expect("utterance");
    assert_eq!(segment.pre_speech_frames(), 0);
    assert_eq!(segment.started_at_ms(), 140);
    assert_eq!(segment.samples()[0], SPEECH_LEVEL);
}

#[test]
fn silence_before_min_duration_does_not_stop() {
    let cfg = scenario_config();
    // 200 ms of speech; the silence window fills at 1.2 s but min is 2 s.
    let mut source = scripted_source(&cfg, &[(true, 10), (false, 200)]);
    let result = run(&cfg, &mut source);

    assert_eq!(result.stop_reason(), StopReason::SilenceTimeout);
    assert_eq!(result.metrics.recording_ms, cfg.min_duration_ms);
    assert_eq!(result.segment().expect("utterance").frame_count(), 100);
}

#[test]
fn short_pause_inside_utterance_is_kept() {
    let cfg = scenario_config();
    let mut source = scripted_source(
        &cfg,
        &[(true, 100), (false, 30), (true, 100), (false, 60)],
    );
    let result = run(&cfg, &mut source);
    assert_eq!(result.stop_reason(), StopReason::SilenceTimeout);
    assert_eq!(
        result.segment().expect("utterance").frame_count(),
        100 + 30 + 100 + 50
    );
}

#[test]
fn stream_end_while_recording_returns_partial_segment() {
    let cfg = scenario_config();
    let mut source = scripted_source(&cfg, &[(false, 3), (true, 20)]);
    let result = run(&cfg, &mut source);
    assert_eq!(result.stop_reason(), StopReason::StreamClosed);
    let segment = result.segment().expect("utterance");
    assert_eq!(segment.frame_count(), 23);
    assert_eq!(segment.stop_reason(), StopReason::StreamClosed);
}

#[test]
fn stream_end_before_onset_is_no_speech() {
    let cfg = scenario_config();
    let mut source = scripted_source(&cfg, &[(false, 12)]);
    let result = run(&cfg, &mut source);
    assert_eq!(result.outcome, Capture::NoSpeech);
    assert_eq!(result.stop_reason(), StopReason::StreamClosed);
}

struct FailingSource {
    frames_before_error: usize,
    frame: AudioFrame,
    released: Arc<AtomicUsize>,
}

impl FrameSource for FailingSource {
    fn read_frame(&mut self) -> Result<FramePoll> {
        if self.frames_before_error == 0 {
            return Err(anyhow!("device unplugged"));
        }
        self.frames_before_error -= 1;
        Ok(FramePoll::Frame(self.frame.clone()))
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn read_error_releases_source_and_surfaces_error() {
    let cfg = scenario_config();
    let released = Arc::new(AtomicUsize::new(0));
    let mut source = FailingSource {
        frames_before_error: 30,
        frame: frame(&cfg, true),
        released: released.clone(),
    };
    let segmenter = AudioSegmenter::new(cfg).expect("valid config");
    let mut vad = MarkerClassifier::default();
    let err = segmenter
        .capture(&mut source, &mut vad)
        .expect_err("read error should abort capture");

    assert!(matches!(err, CaptureError::FrameRead(_)));
    assert!(format!("{:#}", anyhow::Error::new(err)).contains("device unplugged"));
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

struct StalledSource;

impl FrameSource for StalledSource {
    fn read_frame(&mut self) -> Result<FramePoll> {
        Ok(FramePoll::Stalled)
    }
}

#[test]
fn stalled_source_still_hits_onset_timeout() {
    let cfg = scenario_config();
    let segmenter = AudioSegmenter::new(cfg.clone()).expect("valid config");
    let mut vad = MarkerClassifier::default();
    let result = segmenter
        .capture(&mut StalledSource, &mut vad)
        .expect("capture");
    assert_eq!(result.stop_reason(), StopReason::OnsetTimeout);
    assert_eq!(result.metrics.frames_stalled, 250);
    assert_eq!(result.metrics.frames_processed, 0);
}

#[test]
fn consecutive_captures_are_independent() {
    let cfg = scenario_config();
    let segmenter = AudioSegmenter::new(cfg.clone()).expect("valid config");
    let mut vad = MarkerClassifier::default();

    let mut first = scripted_source(&cfg, &[(false, 4), (true, 120), (false, 60)]);
    let mut second = scripted_source(&cfg, &[(false, 4), (true, 120), (false, 60)]);
    let a = segmenter.capture(&mut first, &mut vad).expect("first");
    let b = segmenter.capture(&mut second, &mut vad).expect("second");

    assert_eq!(a, b);
    assert_eq!(vad.resets, 2);
}

#[test]
fn trailing_silence_is_trimmed_when_configured() {
    let mut cfg = scenario_config();
    cfg.trailing_silence_keep_ms = Some(200);
    let mut source = scripted_source(&cfg, &[(true, 150), (false, 75)]);
    let result = run(&cfg, &mut source);
    let segment = result.segment().expect("utterance");
    assert_eq!(segment.frame_count(), 150 + 10);
    // Metrics still describe what was heard, not what was kept.
    assert_eq!(result.metrics.recording_ms, 4_000);
}

#[test]
fn trailing_trim_never_touches_onset_frame() {
    let mut acc = SegmentAccumulator::open(
        0,
        VecDeque::from(vec![AudioFrame::silent(4), AudioFrame::silent(4)]),
        AudioFrame::new(vec![1; 4]),
    );
    for _ in 0..5 {
        acc.push(AudioFrame::silent(4), FrameLabel::Silence);
    }
    acc.trim_trailing_silence(0);
    assert_eq!(acc.frame_count(), 3);
}

#[test]
fn invalid_configs_are_rejected() {
    let mut cfg = scenario_config();
    cfg.max_duration_ms = 1_000;
    assert!(matches!(
        AudioSegmenter::new(cfg),
        Err(CaptureError::InvalidConfig(_))
    ));

    let mut cfg = scenario_config();
    cfg.silence_timeout_ms = 0;
    assert!(AudioSegmenter::new(cfg).is_err());

    let mut cfg = scenario_config();
    cfg.sample_rate = 10;
    cfg.frame_ms = 20;
    assert!(cfg.validate().is_err());
}

#[test]
fn silence_window_rounds_up() {
    let mut cfg = scenario_config();
    cfg.silence_timeout_ms = 1_010;
    assert_eq!(cfg.silence_window_frames(), 51);
    cfg.silence_timeout_ms = 5;
    assert_eq!(cfg.silence_window_frames(), 1);
}

#[test]
fn segmenter_state_transitions() {
    let cfg = scenario_config();
    let mut machine = Segmenter::new(&cfg);
    assert_eq!(machine.state(), SegmenterState::AwaitingOnset);

    for _ in 0..3 {
        assert_eq!(machine.on_frame(frame(&cfg, false), false), None);
    }
    assert_eq!(machine.buffered_pre_speech(), 3);
    assert_eq!(machine.on_frame(frame(&cfg, true), true), None);
    assert_eq!(machine.state(), SegmenterState::Recording);
    assert_eq!(machine.buffered_pre_speech(), 0);
    assert_eq!(machine.recording_ms(), 20);

    // A stall counts as silence and adds no audio.
    assert_eq!(machine.on_stall(), None);
    assert_eq!(machine.clock_ms(), 100);

    assert_eq!(machine.on_closed(), StopReason::StreamClosed);
    assert_eq!(
        machine.state(),
        SegmenterState::Done(StopReason::StreamClosed)
    );
    // Terminal state is sticky.
    assert_eq!(
        machine.on_frame(frame(&cfg, true), true),
        Some(StopReason::StreamClosed)
    );
    let result = machine.finish();
    assert_eq!(result.segment().expect("utterance").frame_count(), 4);
}

#[test]
fn pre_speech_ring_is_bounded() {
    let mut ring = PreSpeechRing::new(3);
    for i in 0..10 {
        ring.push(AudioFrame::new(vec![i; 2]));
        assert!(ring.len() <= 3);
    }
    let kept: Vec<i16> = ring.take().iter().map(|f| f.samples()[0]).collect();
    assert_eq!(kept, vec![7, 8, 9]);
}

#[test]
fn capture_from_pcm_frames_and_pads_samples() {
    let cfg = scenario_config();
    let fs = cfg.frame_samples();
    let mut samples = vec![SPEECH_LEVEL; fs * 150 + 7];
    samples.extend(std::iter::repeat(0).take(fs * 60));
    let mut vad = EnergyClassifier::new(-40.0);
    let result = capture_from_pcm(&samples, &cfg, &mut vad).expect("capture");
    assert_eq!(result.stop_reason(), StopReason::SilenceTimeout);
    // The padded tail frame is too quiet to count as speech.
    assert_eq!(result.metrics.speech_ms, 150 * 20);
}

#[test]
fn energy_classifier_thresholds() {
    let mut vad = EnergyClassifier::new(-40.0);
    assert!(vad.is_speech(&[SPEECH_LEVEL; 320]));
    assert!(!vad.is_speech(&[3; 320]));
    assert!(!vad.is_speech(&[]));
    assert_eq!(vad.name(), "energy_vad");
}

struct FixedEstimator {
    speech: Duration,
    calls: usize,
}

impl SpeechDurationEstimator for FixedEstimator {
    fn speech_duration(&mut self, window: &[i16], sample_rate: u32) -> Duration {
        assert_eq!(window.len(), sample_rate as usize);
        self.calls += 1;
        self.speech
    }
}

#[test]
fn buffered_classifier_waits_for_full_window() {
    let estimator = FixedEstimator {
        speech: Duration::from_millis(600),
        calls: 0,
    };
    let mut vad = BufferedClassifier::new(
        estimator,
        16_000,
        Duration::from_secs(1),
        Duration::from_millis(500),
    );
    let window = [0i16; 320];
    for _ in 0..49 {
        assert!(!vad.is_speech(&window));
    }
    assert!(vad.is_speech(&window));
    assert!(vad.is_speech(&window));

    vad.reset();
    assert!(!vad.is_speech(&window));
}

#[test]
fn buffered_classifier_requires_threshold() {
    let estimator = FixedEstimator {
        speech: Duration::from_millis(500),
        calls: 0,
    };
    let mut vad = BufferedClassifier::new(
        estimator,
        16_000,
        Duration::from_secs(1),
        Duration::from_millis(500),
    );
    assert!(!vad.is_speech(&[0i16; 16_000]));
}

#[test]
fn downmixes_multi_channel_audio() {
    let mut buf = Vec::new();
    let samples = [1.0f32, -1.0, 0.5, 0.5];
    downmix_into(&mut buf, &samples, 2, |sample| sample);
    assert_eq!(buf, vec![0.0, 0.5]);
}

#[test]
fn downmix_keeps_partial_trailing_frame() {
    let mut buf = Vec::new();
    downmix_into(&mut buf, &[0.3f32, 0.3, 0.3, 0.9], 3, |s| s);
    assert_eq!(buf.len(), 2);
    assert!((buf[1] - 0.9).abs() < 1e-6);
}

#[test]
fn dispatcher_counts_dropped_frames_when_queue_full() {
    let (tx, rx) = bounded(1);
    let dropped = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = FrameDispatcher::new(1, 2, tx, dropped.clone());
    dispatcher.feed(&[0.1f32, 0.2, 0.3, 0.4, 0.5], |s| s);
    assert_eq!(rx.try_recv().expect("first frame"), vec![0.1, 0.2]);
    assert_eq!(dropped.load(Ordering::Relaxed), 1);
    dispatcher.feed(&[0.6f32], |s| s);
    assert_eq!(rx.try_recv().expect("second frame"), vec![0.5, 0.6]);
}
