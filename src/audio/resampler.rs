//! Sample rate conversion
//!
//! High quality conversion goes through rubato's FFT resampler. Linear
//! interpolation is used when configured, or when rubato rejects the input.

use rubato::{FftFixedIn, Resampler as _};
use serde::{Deserialize, Serialize};

use super::frame::PcmFrame;

const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// Resampling method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleMethod {
    #[default]
    Fft,
    Linear,
}

/// Converts frames to a target sample rate
#[derive(Debug, Clone, Copy, Default)]
pub struct Resampler {
    method: ResampleMethod,
}

impl Resampler {
    pub fn new(method: ResampleMethod) -> Self {
        Self { method }
    }

    pub fn linear() -> Self {
        Self::new(ResampleMethod::Linear)
    }

    pub fn method(&self) -> ResampleMethod {
        self.method
    }

    /// Return a new frame at `target_rate`
    pub fn resample(&self, frame: &PcmFrame, target_rate: u32) -> PcmFrame {
        let from = frame.sample_rate();
        if from == target_rate || from == 0 || target_rate == 0 {
            return PcmFrame::new(frame.samples().to_vec(), target_rate.max(from));
        }

        let samples = match self.method {
            ResampleMethod::Linear => resample_linear(frame.samples(), from, target_rate),
            ResampleMethod::Fft => match resample_fft(frame.samples(), from, target_rate) {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::debug!("FFT resampling failed ({}), using linear interpolation", e);
                    resample_linear(frame.samples(), from, target_rate)
                }
            },
        };

        PcmFrame::new(samples, target_rate)
    }
}

/// Number of output samples for `len` input samples: `round(len * to / from)`
pub fn output_len(len: usize, from: u32, to: u32) -> usize {
    (len as f64 * to as f64 / from as f64).round() as usize
}

/// Linear interpolation over evenly spaced query points in `[0, len - 1]`
pub fn resample_linear(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    let out_len = output_len(samples.len(), from, to);
    if out_len == 0 || samples.is_empty() {
        return Vec::new();
    }
    if out_len == 1 {
        return vec![samples[0]];
    }

    let last = (samples.len() - 1) as f64;
    let step = last / (out_len - 1) as f64;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let lower = pos.floor() as usize;
            let upper = (lower + 1).min(samples.len() - 1);
            let frac = (pos - lower as f64) as f32;
            samples[lower] * (1.0 - frac) + samples[upper] * frac
        })
        .collect()
}

fn resample_fft(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>, String> {
    let expected = output_len(samples.len(), from, to);
    if expected == 0 {
        return Ok(Vec::new());
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLER_CHUNK_SIZE, 1, 1)
            .map_err(|e| e.to_string())?;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay);

    let mut chunks = samples.chunks_exact(RESAMPLER_CHUNK_SIZE);
    for chunk in &mut chunks {
        let out = resampler.process(&[chunk], None).map_err(|e| e.to_string())?;
        output.extend_from_slice(&out[0]);
    }

    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let out = resampler
            .process_partial(Some(&[remainder][..]), None)
            .map_err(|e| e.to_string())?;
        output.extend_from_slice(&out[0]);
    }

    // Flush the delay line until the compensated output is complete.
    while output.len() < expected + delay {
        let out = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| e.to_string())?;
        if out[0].is_empty() {
            break;
        }
        output.extend_from_slice(&out[0]);
    }

    output.drain(..delay.min(output.len()));
    output.resize(expected, 0.0);
    Ok(output)
}
