//! Fixed-size capture frames.

/// Samples per outbound frame (256 ms at 16 kHz).
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// A fixed-length block of mono f32 samples at a known sample rate.
///
/// Created once per assembled block on the pipeline thread, encoded, then dropped.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Returns the duration of this frame in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Root-mean-square level of the frame.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }
}

/// Cuts a continuous sample stream into `frame_size` blocks.
///
/// Holds at most `frame_size - 1` samples between calls; nothing else is queued.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameAssembler {
    /// # Panics
    /// Panics if `frame_size` is zero.
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        assert!(frame_size > 0, "frame_size must be non-zero");
        Self {
            frame_size,
            sample_rate,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples and move every completed frame into `out`.
    pub fn push(&mut self, mut samples: &[f32], out: &mut Vec<AudioFrame>) {
        while !samples.is_empty() {
            let room = self.frame_size - self.pending.len();
            let take = room.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.frame_size {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                out.push(AudioFrame::new(full, self.sample_rate));
            }
        }
    }

    /// Samples waiting for the next frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_only_full_frames() {
        let mut asm = FrameAssembler::new(4, 16_000);
        let mut out = Vec::new();

        asm.push(&[0.1, 0.2, 0.3], &mut out);
        assert!(out.is_empty());
        assert_eq!(asm.pending_len(), 3);

        asm.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9], &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].samples, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(out[1].samples, vec![0.5, 0.6, 0.7, 0.8]);
        assert_eq!(asm.pending_len(), 1);
    }

    #[test]
    fn frame_duration_uses_sample_rate() {
        let frame = AudioFrame::new(vec![0.0; DEFAULT_FRAME_SIZE], 16_000);
        assert!((frame.duration_secs() - 0.256).abs() < 1e-9);
    }

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let frame = AudioFrame::new(samples, 16_000);
        assert!((frame.rms() - 0.5).abs() < 1e-5);
        assert_eq!(AudioFrame::new(vec![], 16_000).rms(), 0.0);
    }
}
