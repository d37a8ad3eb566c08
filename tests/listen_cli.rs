use std::path::{Path, PathBuf};
use std::process::Command;

const RATE: u32 = 16_000;

fn combined_output(output: &std::process::Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn listen_bin() -> &'static str {
    option_env!("CARGO_BIN_EXE_handset-listen").expect("handset-listen test binary not built")
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("handset-cli-{}-{name}", std::process::id()))
}

/// `silence_ms` of digital silence, `speech_ms` of a loud square wave, then
/// `tail_ms` of silence.
fn write_clip(path: &Path, silence_ms: u32, speech_ms: u32, tail_ms: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let per_ms = RATE / 1000;
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
    for _ in 0..silence_ms * per_ms {
        writer.write_sample(0i16).expect("write");
    }
    for i in 0..speech_ms * per_ms {
        let level: i16 = if (i / 20) % 2 == 0 { 4_000 } else { -4_000 };
        writer.write_sample(level).expect("write");
    }
    for _ in 0..tail_ms * per_ms {
        writer.write_sample(0i16).expect("write");
    }
    writer.finalize().expect("finalize wav");
}

fn replay(clip: &Path, extra: &[&str]) -> std::process::Output {
    Command::new(listen_bin())
        .arg("--replay")
        .arg(clip)
        .args([
            "--vad-engine",
            "energy",
            "--min-duration-ms",
            "2000",
            "--silence-timeout-ms",
            "1000",
            "--max-duration-ms",
            "10000",
            "--onset-timeout-ms",
            "5000",
        ])
        .args(extra)
        .output()
        .expect("run handset-listen --replay")
}

#[test]
fn help_mentions_hook_switch() {
    let output = Command::new(listen_bin())
        .arg("--help")
        .output()
        .expect("run handset-listen --help");
    assert!(output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("hook-switch"));
    assert!(combined.contains("--strategy"));
}

#[test]
fn list_input_devices_prints_message() {
    let output = Command::new(listen_bin())
        .arg("--list-input-devices")
        .output()
        .expect("run handset-listen --list-input-devices");
    assert!(output.status.success());
    let combined = combined_output(&output);
    assert!(
        combined.contains("audio input devices")
            || combined.contains("Failed to list audio input devices")
    );
}

#[test]
fn invalid_durations_are_rejected() {
    let output = Command::new(listen_bin())
        .args(["--min-duration-ms", "5000", "--max-duration-ms", "4000"])
        .output()
        .expect("run handset-listen");
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("--min-duration-ms"));
}

#[test]
fn replay_stops_on_silence_and_writes_wav() {
    let clip = temp_path("speech.wav");
    let out = temp_path("segment.wav");
    write_clip(&clip, 200, 3_000, 1_500);

    for strategy in ["process", "thread"] {
        let _ = std::fs::remove_file(&out);
        let output = replay(
            &clip,
            &["--strategy", strategy, "--output", out.to_str().expect("utf8 path")],
        );
        let combined = combined_output(&output);
        assert!(output.status.success(), "{strategy}: {combined}");
        assert!(combined.contains("stop_reason: silence_timeout"), "{combined}");
        assert!(combined.contains("capture_metrics|"), "{combined}");

        let reader = hound::WavReader::open(&out).expect("segment wav");
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, RATE);
        // 3 s of speech plus 1 s of silence, with up to 15 pre-speech frames.
        let seconds = reader.duration() as f32 / RATE as f32;
        assert!((4.0..=4.3).contains(&seconds), "{strategy}: {seconds}s");
    }

    let _ = std::fs::remove_file(&clip);
    let _ = std::fs::remove_file(&out);
}

#[test]
fn replay_of_silence_reports_no_speech() {
    let clip = temp_path("silence.wav");
    write_clip(&clip, 6_000, 0, 0);
    let output = replay(&clip, &[]);
    let _ = std::fs::remove_file(&clip);
    let combined = combined_output(&output);
    assert!(output.status.success(), "{combined}");
    assert!(combined.contains("stop_reason: onset_timeout"), "{combined}");
    assert!(combined.contains("segment: none"), "{combined}");
}

#[test]
fn replay_with_wrong_rate_fails() {
    let clip = temp_path("rate.wav");
    write_clip(&clip, 100, 500, 100);
    let output = replay(&clip, &["--sample-rate", "48000"]);
    let _ = std::fs::remove_file(&clip);
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("does not match session rate"));
}
