//! Capture one utterance from the microphone (or a recorded WAV) under the
//! hook-switch kill switch, then report why recording stopped.

use anyhow::{Context, Result};
use handset::audio::{
    self, AudioSegmenter, CaptureResult, DeviceFrameSource, FramePoll, FrameSource,
    PcmFrameSource,
};
use handset::config::AppConfig;
use handset::task::{StopToken, TaskOutcome, TaskRunner};
use handset::{telemetry, StdinHookSwitch};

/// Ends the stream early once the runner raises the stop token, so the
/// thread strategy can cancel a capture cleanly.
struct StopAwareSource<'a, S> {
    inner: S,
    token: &'a StopToken,
}

impl<S: FrameSource> FrameSource for StopAwareSource<'_, S> {
    fn read_frame(&mut self) -> Result<FramePoll> {
        if self.token.is_stopped() {
            return Ok(FramePoll::Closed);
        }
        self.inner.read_frame()
    }

    fn release(&mut self) {
        self.inner.release();
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    telemetry::init_tracing(&config);

    if config.list_input_devices {
        return print_input_devices();
    }

    let hook = StdinHookSwitch::spawn().context("failed to watch stdin for hang-up")?;
    let runner = TaskRunner::new(config.runner_config());
    if config.replay.is_none() {
        eprintln!("Listening... type q then Enter to hang up.");
    }

    let task_config = config.clone();
    let outcome = runner.run_fn(
        "capture",
        move |token| capture_once(&task_config, token),
        &hook,
    );
    match outcome {
        TaskOutcome::Completed(result) => report(&config, &result),
        TaskOutcome::Cancelled(fate) => {
            println!("cancelled: hung up ({fate:?})");
            Ok(())
        }
        TaskOutcome::Failed(err) => Err(err.context("capture failed")),
    }
}

fn print_input_devices() -> Result<()> {
    match audio::list_input_devices() {
        Ok(devices) if devices.is_empty() => {
            println!("No audio input devices detected.");
        }
        Ok(devices) => {
            println!("Detected audio input devices:");
            for device in devices {
                println!("  - {device}");
            }
        }
        Err(err) => {
            eprintln!("Failed to list audio input devices: {err:#}");
        }
    }
    Ok(())
}

fn capture_once(config: &AppConfig, token: &StopToken) -> Result<CaptureResult> {
    let segmenter = AudioSegmenter::new(config.segmenter_config())?;
    let mut classifier = config.create_classifier();
    let result = match &config.replay {
        Some(path) => {
            let samples = audio::read_wav_mono(path, config.sample_rate)?;
            let mut source = StopAwareSource {
                inner: PcmFrameSource::from_samples(&samples, segmenter.config().frame_samples()),
                token,
            };
            segmenter.capture(&mut source, classifier.as_mut())?
        }
        None => {
            let device =
                DeviceFrameSource::open(config.input_device.as_deref(), segmenter.config())?;
            tracing::info!(device = device.device_name(), "capturing from microphone");
            let mut source = StopAwareSource {
                inner: device,
                token,
            };
            segmenter.capture(&mut source, classifier.as_mut())?
        }
    };
    Ok(result)
}

fn report(config: &AppConfig, result: &CaptureResult) -> Result<()> {
    println!("stop_reason: {}", result.stop_reason().label());
    match result.segment() {
        Some(segment) => {
            println!(
                "segment: {} ms starting at {} ms ({} frames, {} pre-speech)",
                segment.duration_ms(),
                segment.started_at_ms(),
                segment.frame_count(),
                segment.pre_speech_frames()
            );
            if let Some(path) = &config.output {
                audio::write_segment_wav(path, segment)?;
                println!("wrote {}", path.display());
            }
        }
        None => {
            println!("segment: none (no speech)");
        }
    }
    println!("{}", result.metrics.log_line());
    Ok(())
}
