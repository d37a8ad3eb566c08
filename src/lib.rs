pub mod audio;
pub mod config;
mod lock;
pub mod signal;
pub mod task;
pub mod telemetry;
#[cfg(feature = "vad_earshot")]
pub mod vad_earshot;

pub(crate) use lock::lock_or_recover;
pub use audio::{
    AudioSegmenter, Capture, CaptureError, CaptureResult, Segment, SegmenterConfig, StopReason,
};
pub use signal::{CancelAfter, CancellationSignal, HookSwitch, StdinHookSwitch};
pub use task::{
    run_with_fallback, ContextFate, RunnerConfig, StopToken, Strategy, Task, TaskError,
    TaskOutcome, TaskRunner, TaskState,
};
