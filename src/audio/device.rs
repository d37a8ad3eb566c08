//! Live microphone frame source via CPAL.
//!
//! Opens the input stream on construction. The callback downmixes to mono and
//! queues device-rate frames; `read_frame` converts them to session-rate PCM.

use super::capture::SegmenterConfig;
use super::dispatch::FrameDispatcher;
use super::resample::FrameConverter;
use super::source::{AudioFrame, FramePoll, FrameSource};
use crate::lock_or_recover;
use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const FRAME_QUEUE_CAPACITY: usize = 64;
/// Frame periods without audio before a read reports `Stalled`. Devices
/// deliver in bursts, so one period is too tight.
const STALL_PERIODS: u32 = 3;

/// First error the cpal error callback reported. Once set, every read fails;
/// a stream that errored never delivers again.
#[derive(Debug, Clone, Default)]
struct StreamFault {
    slot: Arc<Mutex<Option<String>>>,
}

impl StreamFault {
    fn record(&self, err: impl std::fmt::Display) {
        let mut slot = lock_or_recover(&self.slot, "stream fault");
        if slot.is_none() {
            *slot = Some(err.to_string());
        }
    }

    fn check(&self, device: &str) -> Result<()> {
        match lock_or_recover(&self.slot, "stream fault").as_deref() {
            Some(err) => bail!("audio stream from '{device}' failed: {err}"),
            None => Ok(()),
        }
    }

    fn callback(&self) -> impl FnMut(cpal::StreamError) + Send + 'static {
        let fault = self.clone();
        move |err| {
            tracing::warn!(%err, "audio stream error");
            fault.record(err);
        }
    }
}

/// List input device names so the CLI can offer a selector.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices().context("no input devices available")?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

fn find_device(preferred: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match preferred {
        Some(name) => {
            let mut devices = host.input_devices().context("no input devices available")?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| anyhow!("input device '{name}' not found"))
        }
        None => host
            .default_input_device()
            .context("no default input device available"),
    }
}

fn mic_permission_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: System Settings > Privacy & Security > Microphone."
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: check PipeWire/PulseAudio/ALSA permissions and that the device is not muted."
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        "Check OS microphone permissions."
    }
}

/// Microphone-backed [`FrameSource`]. Owns the device for its lifetime;
/// `release` (or drop) stops the stream.
pub struct DeviceFrameSource {
    stream: Option<cpal::Stream>,
    receiver: Receiver<Vec<f32>>,
    converter: FrameConverter,
    stall_after: Duration,
    dropped: Arc<AtomicUsize>,
    fault: StreamFault,
    device_name: String,
}

impl DeviceFrameSource {
    pub fn open(preferred_device: Option<&str>, cfg: &SegmenterConfig) -> Result<Self> {
        let device = find_device(preferred_device)?;
        let device_name = device
            .name()
            .unwrap_or_else(|_| "unknown input device".to_string());
        let default_config = device
            .default_input_config()
            .with_context(|| format!("'{device_name}' has no input config"))?;
        let format = default_config.sample_format();
        let stream_config: StreamConfig = default_config.into();
        let device_rate = stream_config.sample_rate.0;
        let channels = usize::from(stream_config.channels.max(1));
        let device_frame_samples = ((u64::from(device_rate) * cfg.frame_ms) / 1000).max(1) as usize;

        tracing::info!(
            device = %device_name,
            ?format,
            device_rate,
            channels,
            "opening input stream"
        );

        let (sender, receiver) = bounded::<Vec<f32>>(FRAME_QUEUE_CAPACITY);
        let dropped = Arc::new(AtomicUsize::new(0));
        let dispatcher = Arc::new(Mutex::new(FrameDispatcher::new(
            channels,
            device_frame_samples,
            sender,
            dropped.clone(),
        )));
        let fault = StreamFault::default();

        let stream = match format {
            SampleFormat::F32 => {
                let dispatcher = dispatcher.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _| {
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.feed(data, |sample| sample);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    fault.callback(),
                    None,
                )?
            }
            SampleFormat::I16 => {
                let dispatcher = dispatcher.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _| {
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.feed(data, |sample| f32::from(sample) / 32_768.0);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    fault.callback(),
                    None,
                )?
            }
            SampleFormat::U16 => {
                let dispatcher = dispatcher.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &stream_config,
                    move |data: &[u16], _| {
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.feed(data, |sample| {
                                (f32::from(sample) - 32_768.0) / 32_768.0
                            });
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    fault.callback(),
                    None,
                )?
            }
            other => return Err(anyhow!("unsupported sample format: {other:?}")),
        };
        stream
            .play()
            .with_context(|| format!("failed to start '{device_name}'. {}", mic_permission_hint()))?;

        Ok(Self {
            stream: Some(stream),
            receiver,
            converter: FrameConverter::new(device_rate, cfg.sample_rate, cfg.frame_samples()),
            stall_after: Duration::from_millis(cfg.frame_ms) * STALL_PERIODS,
            dropped,
            fault,
            device_name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Frames discarded because the reader fell behind the device.
    pub fn frames_dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl FrameSource for DeviceFrameSource {
    fn read_frame(&mut self) -> Result<FramePoll> {
        if self.stream.is_none() {
            return Ok(FramePoll::Closed);
        }
        self.fault.check(&self.device_name)?;
        match self.receiver.recv_timeout(self.stall_after) {
            Ok(frame) => Ok(FramePoll::Frame(AudioFrame::new(
                self.converter.convert(&frame),
            ))),
            Err(RecvTimeoutError::Timeout) => {
                self.fault.check(&self.device_name)?;
                Ok(FramePoll::Stalled)
            }
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!(
                "audio stream from '{}' disconnected",
                self.device_name
            )),
        }
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                tracing::debug!(%err, "failed to pause audio stream");
            }
            let dropped = self.frames_dropped();
            if dropped > 0 {
                tracing::warn!(dropped, device = %self.device_name, "frames dropped during capture");
            }
        }
    }

    fn name(&self) -> &'static str {
        "cpal_device"
    }
}

impl Drop for DeviceFrameSource {
    fn drop(&mut self) {
        self.release();
    }
}
