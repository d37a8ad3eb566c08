//! WAV files in and out: saving captured segments and replaying recordings
//! through the segmenter.

use super::segment::Segment;
use anyhow::{bail, Context, Result};
use std::path::Path;

/// Write a segment as 16-bit mono PCM at its own sample rate.
pub fn write_segment_wav(path: &Path, segment: &Segment) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: segment.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for &sample in segment.samples() {
        writer.write_sample(sample)?;
    }
    writer
        .finalize()
        .with_context(|| format!("failed to finalize {}", path.display()))?;
    Ok(())
}

/// Load 16-bit integer PCM at `sample_rate`, averaging channels down to mono.
/// The file is not resampled; a rate mismatch is an error.
pub fn read_wav_mono(path: &Path, sample_rate: u32) -> Result<Vec<i16>> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        bail!(
            "{}: expected 16-bit integer PCM, got {} bit {:?}",
            path.display(),
            spec.bits_per_sample,
            spec.sample_format
        );
    }
    if spec.sample_rate != sample_rate {
        bail!(
            "{}: sample rate {} Hz does not match session rate {} Hz",
            path.display(),
            spec.sample_rate,
            sample_rate
        );
    }
    let samples = reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to decode {}", path.display()))?;
    let channels = usize::from(spec.channels.max(1));
    if channels == 1 {
        return Ok(samples);
    }
    Ok(samples
        .chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect())
}
