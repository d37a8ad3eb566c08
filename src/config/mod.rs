//! Command-line parsing and validation helpers.

mod defaults;
mod validation;

use crate::task::Strategy;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

pub use defaults::{
    default_strategy, default_vad_engine, DEFAULT_FRAME_MS, DEFAULT_MAX_DURATION_MS,
    DEFAULT_MIN_DURATION_MS, DEFAULT_ONSET_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_PRE_SPEECH_FRAMES, DEFAULT_SAMPLE_RATE, DEFAULT_SILENCE_TIMEOUT_MS,
    DEFAULT_STOP_GRACE_MS, DEFAULT_VAD_THRESHOLD_DB,
};

/// CLI options for `handset-listen`. Every field can also come from the
/// environment so the appliance can be configured without flags.
#[derive(Debug, Parser, Clone)]
#[command(about = "Capture one spoken utterance under a hook-switch kill switch", author, version)]
pub struct AppConfig {
    /// Preferred audio input device name
    #[arg(long, env = "HANDSET_INPUT_DEVICE")]
    pub input_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Segment a recorded 16-bit WAV at the session rate instead of the microphone
    #[arg(long, value_name = "WAV")]
    pub replay: Option<PathBuf>,

    /// Write the captured utterance to this WAV file
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Session sample rate (Hz)
    #[arg(long, env = "HANDSET_SAMPLE_RATE", default_value_t = DEFAULT_SAMPLE_RATE)]
    pub sample_rate: u32,

    /// Frame duration (milliseconds)
    #[arg(long, env = "HANDSET_FRAME_MS", default_value_t = DEFAULT_FRAME_MS)]
    pub frame_ms: u64,

    /// Give up when no speech starts within this time (milliseconds)
    #[arg(long, env = "HANDSET_ONSET_TIMEOUT_MS", default_value_t = DEFAULT_ONSET_TIMEOUT_MS)]
    pub onset_timeout_ms: u64,

    /// Silence never ends an utterance shorter than this (milliseconds)
    #[arg(long, env = "HANDSET_MIN_DURATION_MS", default_value_t = DEFAULT_MIN_DURATION_MS)]
    pub min_duration_ms: u64,

    /// Hard cap on utterance length (milliseconds)
    #[arg(long, env = "HANDSET_MAX_DURATION_MS", default_value_t = DEFAULT_MAX_DURATION_MS)]
    pub max_duration_ms: u64,

    /// Trailing silence that ends an utterance (milliseconds)
    #[arg(
        long,
        env = "HANDSET_SILENCE_TIMEOUT_MS",
        default_value_t = DEFAULT_SILENCE_TIMEOUT_MS
    )]
    pub silence_timeout_ms: u64,

    /// Frames of audio kept from just before speech starts
    #[arg(
        long,
        env = "HANDSET_PRE_SPEECH_FRAMES",
        default_value_t = DEFAULT_PRE_SPEECH_FRAMES
    )]
    pub pre_speech_frames: usize,

    /// Keep at most this much trailing silence in the segment (milliseconds)
    #[arg(long, env = "HANDSET_TRAILING_SILENCE_KEEP_MS")]
    pub trailing_silence_keep_ms: Option<u64>,

    /// Voice activity detector implementation to use
    #[arg(
        long = "vad-engine",
        env = "HANDSET_VAD_ENGINE",
        value_enum,
        default_value_t = default_vad_engine()
    )]
    pub vad_engine: VadEngineKind,

    /// Voice activity detection threshold (decibels)
    #[arg(
        long = "vad-threshold-db",
        env = "HANDSET_VAD_THRESHOLD_DB",
        default_value_t = DEFAULT_VAD_THRESHOLD_DB,
        allow_hyphen_values = true
    )]
    pub vad_threshold_db: f32,

    /// Where cancellable work runs
    #[arg(
        long,
        env = "HANDSET_STRATEGY",
        value_enum,
        default_value_t = default_strategy()
    )]
    pub strategy: Strategy,

    /// How often the hook switch is checked (milliseconds)
    #[arg(
        long = "poll-interval-ms",
        env = "HANDSET_POLL_INTERVAL_MS",
        default_value_t = DEFAULT_POLL_INTERVAL_MS
    )]
    pub poll_interval_ms: u64,

    /// Thread strategy: wait this long for a stopped task (milliseconds)
    #[arg(
        long = "stop-grace-ms",
        env = "HANDSET_STOP_GRACE_MS",
        default_value_t = DEFAULT_STOP_GRACE_MS
    )]
    pub stop_grace_ms: u64,

    /// Enable JSON trace logging to a file
    #[arg(long = "logs", env = "HANDSET_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Trace log path (defaults to $TMPDIR/handset_trace.jsonl)
    #[arg(long = "trace-log", env = "HANDSET_TRACE_LOG", value_name = "PATH")]
    pub trace_log: Option<PathBuf>,
}

/// Available runtime-selectable VAD implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VadEngineKind {
    Earshot,
    Energy,
}

impl VadEngineKind {
    pub fn label(self) -> &'static str {
        match self {
            VadEngineKind::Earshot => "earshot",
            VadEngineKind::Energy => "energy",
        }
    }
}
