use crate::audio::TARGET_RATE;
use crate::task::Strategy;

use super::VadEngineKind;

pub const DEFAULT_SAMPLE_RATE: u32 = TARGET_RATE;
pub const DEFAULT_FRAME_MS: u64 = 20;
pub const DEFAULT_ONSET_TIMEOUT_MS: u64 = 8_000;
pub const DEFAULT_MIN_DURATION_MS: u64 = 1_000;
pub const DEFAULT_MAX_DURATION_MS: u64 = 15_000;
pub const DEFAULT_SILENCE_TIMEOUT_MS: u64 = 1_200;
pub const DEFAULT_PRE_SPEECH_FRAMES: usize = 15;
pub const DEFAULT_VAD_THRESHOLD_DB: f32 = -40.0;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_STOP_GRACE_MS: u64 = 100;

pub(super) const MAX_CAPTURE_HARD_LIMIT_MS: u64 = 120_000;
pub(super) const MAX_PRE_SPEECH_MS: u64 = 5_000;
pub(super) const MAX_DEVICE_NAME_LEN: usize = 256;
/// Earshot's detector is fixed at 16 kHz with 10/20/30 ms windows.
pub(super) const EARSHOT_SAMPLE_RATE: u32 = 16_000;
pub(super) const EARSHOT_FRAME_MS: [u64; 3] = [10, 20, 30];

pub fn default_vad_engine() -> VadEngineKind {
    if cfg!(feature = "vad_earshot") {
        VadEngineKind::Earshot
    } else {
        VadEngineKind::Energy
    }
}

pub fn default_strategy() -> Strategy {
    if cfg!(unix) {
        Strategy::Process
    } else {
        Strategy::Thread
    }
}
