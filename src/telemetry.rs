use crate::config::AppConfig;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::fmt::time::UtcTime;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// `--trace-log` wins; otherwise a JSONL file in the temp dir.
pub fn tracing_log_path(config: &AppConfig) -> PathBuf {
    config
        .trace_log
        .clone()
        .unwrap_or_else(|| env::temp_dir().join("handset_trace.jsonl"))
}

/// Install the JSON file subscriber once per process. A no-op unless
/// `--logs` is set; an unwritable log path silently disables tracing.
pub fn init_tracing(config: &AppConfig) {
    if !config.logs {
        return;
    }
    TRACING_INIT.get_or_init(|| {
        let path = tracing_log_path(config);
        let Ok(file) = OpenOptions::new().create(true).append(true).open(&path) else {
            return;
        };
        // Task workers and pipe readers are named threads; keep the names.
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_thread_names(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_writer(file)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn trace_log_flag_overrides_default_path() {
        let cfg = AppConfig::parse_from(["test-app", "--trace-log", "/tmp/custom.jsonl"]);
        assert_eq!(tracing_log_path(&cfg), PathBuf::from("/tmp/custom.jsonl"));
    }

    #[test]
    fn default_path_lives_in_temp_dir() {
        let mut cfg = AppConfig::parse_from(["test-app"]);
        cfg.trace_log = None;
        let path = tracing_log_path(&cfg);
        assert!(path.starts_with(env::temp_dir()));
        assert!(path.ends_with("handset_trace.jsonl"));
    }

    #[test]
    fn disabled_logging_leaves_no_file() {
        let dir = env::temp_dir().join(format!("handset-telemetry-{}", std::process::id()));
        let path = dir.join("never.jsonl");
        let mut cfg = AppConfig::parse_from(["test-app"]);
        cfg.logs = false;
        cfg.trace_log = Some(path.clone());
        init_tracing(&cfg);
        assert!(!path.exists());
    }
}
