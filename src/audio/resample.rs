//! Per-frame conversion from device audio to session-rate 16-bit PCM.

use std::cmp::Ordering as CmpOrdering;
use std::f32::consts::PI;

const MAX_LOW_PASS_TAPS: usize = 129;

/// Converts device-rate f32 frames into exact-length i16 frames at the session
/// rate. Decimation runs a windowed-sinc low-pass first so 44.1/48 kHz
/// microphones do not alias into the speech band.
pub(super) struct FrameConverter {
    ratio: f32,
    target_len: usize,
    taps: Vec<f32>,
}

impl FrameConverter {
    pub(super) fn new(device_rate: u32, target_rate: u32, target_len: usize) -> Self {
        let device_rate = device_rate.max(1);
        let ratio = target_rate as f32 / device_rate as f32;
        let taps = if device_rate > target_rate {
            let cutoff = (target_rate as f32 * 0.5 / device_rate as f32).min(0.499);
            low_pass_taps(cutoff, tap_count(device_rate, target_rate))
        } else {
            Vec::new()
        };
        Self {
            ratio,
            target_len,
            taps,
        }
    }

    pub(super) fn convert(&self, frame: &[f32]) -> Vec<i16> {
        let resampled = if (self.ratio - 1.0).abs() < f32::EPSILON {
            frame.to_vec()
        } else if self.taps.is_empty() {
            interpolate(frame, self.ratio)
        } else {
            interpolate(&fir(frame, &self.taps), self.ratio)
        };
        let mut pcm: Vec<i16> = resampled.into_iter().map(to_pcm16).collect();
        match pcm.len().cmp(&self.target_len) {
            CmpOrdering::Greater => pcm.truncate(self.target_len),
            CmpOrdering::Less => {
                let pad = pcm.last().copied().unwrap_or(0);
                pcm.resize(self.target_len, pad);
            }
            CmpOrdering::Equal => {}
        }
        pcm
    }
}

pub(super) fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

fn tap_count(device_rate: u32, target_rate: u32) -> usize {
    let decimation = device_rate as f32 / target_rate.max(1) as f32;
    let mut taps = (decimation * 4.0).ceil().max(11.0) as usize;
    if taps % 2 == 0 {
        taps += 1;
    }
    taps.min(MAX_LOW_PASS_TAPS)
}

/// Hamming-windowed sinc, normalized to unity DC gain.
fn low_pass_taps(normalized_cutoff: f32, taps: usize) -> Vec<f32> {
    let m = (taps - 1) as f32;
    let mut coeffs: Vec<f32> = (0..taps)
        .map(|n| {
            let centered = n as f32 - m / 2.0;
            let sinc = if centered == 0.0 {
                2.0 * normalized_cutoff
            } else {
                (2.0 * PI * normalized_cutoff * centered).sin() / (PI * centered)
            };
            let window = 0.54 - 0.46 * ((2.0 * PI * n as f32) / m).cos();
            sinc * window
        })
        .collect();
    let sum: f32 = coeffs.iter().sum();
    if sum != 0.0 {
        coeffs.iter_mut().for_each(|c| *c /= sum);
    }
    coeffs
}

fn fir(input: &[f32], taps: &[f32]) -> Vec<f32> {
    let half = taps.len() / 2;
    (0..input.len())
        .map(|n| {
            taps.iter()
                .enumerate()
                .filter_map(|(k, coeff)| {
                    (n + k)
                        .checked_sub(half)
                        .and_then(|idx| input.get(idx))
                        .map(|s| s * coeff)
                })
                .sum()
        })
        .collect()
}

fn interpolate(input: &[f32], ratio: f32) -> Vec<f32> {
    let out_len = (input.len() as f32 * ratio).round() as usize;
    let last = input.last().copied().unwrap_or(0.0);
    (0..out_len)
        .map(|i| {
            let src = i as f32 / ratio;
            let idx = src.floor() as usize;
            let frac = src - idx as f32;
            match (input.get(idx), input.get(idx + 1)) {
                (Some(a), Some(b)) => a * (1.0 - frac) + b * frac,
                _ => last,
            }
        })
        .collect()
}
