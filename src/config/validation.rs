use super::defaults::{
    EARSHOT_FRAME_MS, EARSHOT_SAMPLE_RATE, MAX_CAPTURE_HARD_LIMIT_MS, MAX_DEVICE_NAME_LEN,
    MAX_PRE_SPEECH_MS,
};
use super::{AppConfig, VadEngineKind};
use crate::audio::{SegmenterConfig, VoiceActivityClassifier};
use crate::task::RunnerConfig;
use anyhow::{bail, Result};
use clap::Parser;

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize the device name.
    pub fn validate(&mut self) -> Result<()> {
        if !(8_000..=96_000).contains(&self.sample_rate) {
            bail!(
                "--sample-rate must be between 8000 and 96000 Hz, got {}",
                self.sample_rate
            );
        }
        if !(5..=100).contains(&self.frame_ms) {
            bail!("--frame-ms must be between 5 and 100, got {}", self.frame_ms);
        }
        for (flag, value) in [
            ("--onset-timeout-ms", self.onset_timeout_ms),
            ("--max-duration-ms", self.max_duration_ms),
        ] {
            if value == 0 || value > MAX_CAPTURE_HARD_LIMIT_MS {
                bail!("{flag} must be between 1 and {MAX_CAPTURE_HARD_LIMIT_MS} ms, got {value}");
            }
        }
        if self.min_duration_ms == 0 || self.min_duration_ms > self.max_duration_ms {
            bail!(
                "--min-duration-ms must be between 1 and --max-duration-ms ({}), got {}",
                self.max_duration_ms,
                self.min_duration_ms
            );
        }
        if self.silence_timeout_ms < self.frame_ms || self.silence_timeout_ms > self.max_duration_ms
        {
            bail!(
                "--silence-timeout-ms must be between --frame-ms ({}) and --max-duration-ms ({}), got {}",
                self.frame_ms,
                self.max_duration_ms,
                self.silence_timeout_ms
            );
        }
        let pre_speech_ms = self.pre_speech_frames as u64 * self.frame_ms;
        if pre_speech_ms > MAX_PRE_SPEECH_MS {
            bail!(
                "--pre-speech-frames covers {pre_speech_ms} ms; limit is {MAX_PRE_SPEECH_MS} ms"
            );
        }
        if let Some(keep) = self.trailing_silence_keep_ms {
            if keep > self.silence_timeout_ms {
                bail!(
                    "--trailing-silence-keep-ms ({keep}) cannot exceed --silence-timeout-ms ({})",
                    self.silence_timeout_ms
                );
            }
        }
        if !(-120.0..=0.0).contains(&self.vad_threshold_db) {
            bail!(
                "--vad-threshold-db must be between -120.0 and 0.0 dB, got {}",
                self.vad_threshold_db
            );
        }
        if self.vad_engine == VadEngineKind::Earshot {
            if cfg!(not(feature = "vad_earshot")) {
                bail!("--vad-engine earshot requires the 'vad_earshot' feature");
            }
            if self.sample_rate != EARSHOT_SAMPLE_RATE {
                bail!(
                    "--vad-engine earshot only classifies {EARSHOT_SAMPLE_RATE} Hz audio, got --sample-rate {}; use --vad-engine energy",
                    self.sample_rate
                );
            }
            if !EARSHOT_FRAME_MS.contains(&self.frame_ms) {
                bail!(
                    "--vad-engine earshot needs --frame-ms 10, 20 or 30, got {}",
                    self.frame_ms
                );
            }
        }
        if !(10..=5_000).contains(&self.poll_interval_ms) {
            bail!(
                "--poll-interval-ms must be between 10 and 5000, got {}",
                self.poll_interval_ms
            );
        }
        if self.stop_grace_ms > 60_000 {
            bail!(
                "--stop-grace-ms must be at most 60000, got {}",
                self.stop_grace_ms
            );
        }
        if let Some(device) = self.input_device.take() {
            self.input_device = Some(sanitize_device_name(&device)?);
        }
        Ok(())
    }

    pub fn segmenter_config(&self) -> SegmenterConfig {
        SegmenterConfig::from(self)
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::from(self)
    }

    /// Build the configured classifier for one capture.
    pub fn create_classifier(&self) -> Box<dyn VoiceActivityClassifier> {
        match self.vad_engine {
            VadEngineKind::Energy => {
                Box::new(crate::audio::EnergyClassifier::new(self.vad_threshold_db))
            }
            VadEngineKind::Earshot => {
                #[cfg(feature = "vad_earshot")]
                {
                    Box::new(crate::vad_earshot::EarshotClassifier::new(
                        &self.segmenter_config(),
                        self.vad_threshold_db,
                    ))
                }
                #[cfg(not(feature = "vad_earshot"))]
                {
                    tracing::warn!("earshot unavailable; using energy classifier");
                    Box::new(crate::audio::EnergyClassifier::new(self.vad_threshold_db))
                }
            }
        }
    }
}

pub(super) fn sanitize_device_name(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("--input-device cannot be empty");
    }
    if trimmed.len() > MAX_DEVICE_NAME_LEN {
        bail!("--input-device must be at most {MAX_DEVICE_NAME_LEN} bytes");
    }
    if trimmed.chars().any(char::is_control) {
        bail!("--input-device cannot contain control characters");
    }
    Ok(trimmed.to_string())
}
