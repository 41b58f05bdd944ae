//! Sample-rate conversion with rubato's `FastFixedIn`.
//!
//! Two shapes are needed:
//!
//! - **Streaming** (`RateConverter`): the microphone runs at the device's
//!   native rate (often 44.1 or 48 kHz) and must reach the 16 kHz the live
//!   model expects. Input arrives in arbitrary slices from the ring buffer.
//! - **One-shot** (`resample_once`): a whole decoded playback buffer or WAV
//!   file converted in one call, with the tail flushed.
//!
//! When the two rates match, no rubato session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

use crate::error::{MentoraError, Result};

/// Default rubato input block for streaming conversion.
pub const DEFAULT_CHUNK: usize = 1024;

fn build(capture_rate: u32, target_rate: u32, chunk_size: usize) -> Result<FastFixedIn<f32>> {
    if capture_rate == 0 || target_rate == 0 {
        return Err(MentoraError::AudioDevice(format!(
            "invalid sample rates {capture_rate} -> {target_rate}"
        )));
    }
    FastFixedIn::<f32>::new(
        target_rate as f64 / capture_rate as f64,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )
    .map_err(|e| MentoraError::AudioDevice(format!("resampler init: {e}")))
}

/// Streaming mono converter between two fixed rates.
pub struct RateConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
    chunk_size: usize,
    out: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `MentoraError::AudioDevice` if either rate is zero or rubato rejects
    /// the ratio.
    pub fn new(capture_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                chunk_size,
                out: Vec::new(),
            });
        }

        let resampler = build(capture_rate, target_rate, chunk_size)?;
        let out = vec![vec![0f32; resampler.output_frames_max()]; 1];
        debug!(capture_rate, target_rate, chunk_size, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            out,
        })
    }

    /// Convert `samples`, appending any output to `dst`.
    ///
    /// Input shorter than one rubato block is held until the next call.
    pub fn process_into(&mut self, samples: &[f32], dst: &mut Vec<f32>) {
        let Some(resampler) = self.resampler.as_mut() else {
            dst.extend_from_slice(samples);
            return;
        };

        self.pending.extend_from_slice(samples);
        let mut offset = 0;
        while self.pending.len() - offset >= self.chunk_size {
            let block = &self.pending[offset..offset + self.chunk_size];
            match resampler.process_into_buffer(&[block], &mut self.out, None) {
                Ok((_, produced)) => dst.extend_from_slice(&self.out[0][..produced]),
                Err(e) => error!("resampler process error: {e}"),
            }
            offset += self.chunk_size;
        }
        self.pending.drain(..offset);
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        self.process_into(samples, &mut out);
        out
    }

    /// Convert whatever is still held, padding the final block with silence.
    pub fn flush_into(&mut self, dst: &mut Vec<f32>) {
        let Some(resampler) = self.resampler.as_mut() else {
            return;
        };
        if self.pending.is_empty() {
            return;
        }
        let held = self.pending.len();
        self.pending.resize(self.chunk_size, 0.0);
        match resampler.process_into_buffer(&[&self.pending[..]], &mut self.out, None) {
            Ok((_, produced)) => {
                // Only keep output proportional to the real input.
                let keep = (produced as f64 * held as f64 / self.chunk_size as f64).round() as usize;
                dst.extend_from_slice(&self.out[0][..keep.min(produced)]);
            }
            Err(e) => error!("resampler flush error: {e}"),
        }
        self.pending.clear();
    }

    /// Samples waiting for a full block.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Convert a complete mono buffer from `from` Hz to `to` Hz.
pub fn resample_once(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to {
        return Ok(samples.to_vec());
    }
    let mut converter = RateConverter::new(from, to, DEFAULT_CHUNK)?;
    let mut out = Vec::with_capacity(samples.len() * to as usize / from as usize + DEFAULT_CHUNK);
    converter.process_into(samples, &mut out);
    converter.flush_into(&mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_returns_input() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
    }

    #[test]
    fn downsample_48k_to_16k_length() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let out = rc.process(&vec![0.0f32; 960]);
        assert!(
            (out.len() as isize - 320).unsigned_abs() <= 10,
            "output len={}",
            out.len()
        );
    }

    #[test]
    fn partial_blocks_are_held() {
        let mut rc = RateConverter::new(44_100, 16_000, 1024).unwrap();
        assert!(rc.process(&vec![0.0f32; 600]).is_empty());
        assert_eq!(rc.pending_len(), 600);
        assert!(!rc.process(&vec![0.0f32; 600]).is_empty());
        assert_eq!(rc.pending_len(), 176);
    }

    #[test]
    fn one_shot_upsample_keeps_duration() {
        // 0.5 s at 24 kHz -> 0.5 s at 48 kHz
        let out = resample_once(&vec![0.1f32; 12_000], 24_000, 48_000).unwrap();
        assert!(
            (out.len() as isize - 24_000).unsigned_abs() <= 1_100,
            "output len={}",
            out.len()
        );
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(RateConverter::new(0, 16_000, 512).is_err());
    }
}
