//! WAV files as a stand-in microphone.
//!
//! Lets the app (and tests) drive a full session from a recorded question:
//! the file is fed into the capture ring at real-time pace once the gate
//! opens, followed by a stretch of silence so the live model's turn
//! detection notices the student stopped talking.

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{AudioBackend, InputStream};
use crate::buffering::{AudioProducer, Producer};
use crate::error::{MentoraError, Result};
use crate::playback::PlaybackOutput;

/// Feed block length.
const BLOCK_MS: u64 = 20;
/// Silence appended after the file.
const TRAILING_SILENCE_MS: u64 = 1_500;

/// Read a WAV file as mono f32 samples plus its sample rate.
pub fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| MentoraError::AudioDevice(format!("{}: {e}", path.display())))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));
    let wav_err = |e: hound::Error| MentoraError::AudioDevice(format!("{}: {e}", path.display()));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(wav_err)?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.clamp(2, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(wav_err)?
        }
    };

    if channels == 1 {
        return Ok((interleaved, spec.sample_rate));
    }
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

/// A WAV file being fed into the capture ring by a background thread.
pub struct WavInput {
    sample_rate: u32,
    stopped: Arc<AtomicBool>,
    feeder: Option<JoinHandle<()>>,
}

impl WavInput {
    /// Start feeding `samples` into `producer` once `gate` is raised.
    ///
    /// With `pace` off the file is pushed as fast as the ring accepts it.
    pub fn start(
        samples: Vec<f32>,
        sample_rate: u32,
        mut producer: AudioProducer,
        gate: Arc<AtomicBool>,
        pace: bool,
    ) -> Result<Self> {
        let stopped = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stopped);
        let block = (sample_rate as u64 * BLOCK_MS / 1000).max(1) as usize;
        let silence = vec![0.0f32; (sample_rate as u64 * TRAILING_SILENCE_MS / 1000) as usize];

        let feeder = std::thread::Builder::new()
            .name("mentora-wav-input".into())
            .spawn(move || {
                while !gate.load(Ordering::Acquire) {
                    if stop.load(Ordering::Acquire) {
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                let total = samples.len();
                for chunk in samples.chunks(block).chain(silence.chunks(block)) {
                    if stop.load(Ordering::Acquire) || !gate.load(Ordering::Acquire) {
                        debug!("wav feed stopped early");
                        return;
                    }
                    if !push_until_stopped(&mut producer, chunk, &stop, &gate) {
                        debug!("wav feed stopped while the ring was full");
                        return;
                    }
                    if pace {
                        std::thread::sleep(Duration::from_millis(BLOCK_MS));
                    }
                }
                info!(samples = total, "wav input finished");
            })
            .map_err(MentoraError::Io)?;

        Ok(Self {
            sample_rate,
            stopped,
            feeder: Some(feeder),
        })
    }
}

/// Push all of `chunk`, waiting for ring space. Returns `false` if the input
/// was stopped or gated off first.
fn push_until_stopped(
    producer: &mut AudioProducer,
    chunk: &[f32],
    stop: &AtomicBool,
    gate: &AtomicBool,
) -> bool {
    let mut offset = 0;
    loop {
        offset += producer.push_slice(&chunk[offset..]);
        if offset == chunk.len() {
            return true;
        }
        if stop.load(Ordering::Acquire) || !gate.load(Ordering::Acquire) {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

impl InputStream for WavInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

impl Drop for WavInput {
    fn drop(&mut self) {
        self.stop();
        if let Some(feeder) = self.feeder.take() {
            if feeder.join().is_err() {
                warn!("wav feeder thread panicked");
            }
        }
    }
}

/// Reads the microphone from a file; speaker output comes from `output`.
pub struct WavBackend {
    path: PathBuf,
    pace: bool,
    output: Arc<dyn AudioBackend>,
}

impl WavBackend {
    pub fn new(path: impl Into<PathBuf>, output: Arc<dyn AudioBackend>) -> Self {
        Self {
            path: path.into(),
            pace: true,
            output,
        }
    }

    /// Feed as fast as possible instead of in real time.
    pub fn unpaced(mut self) -> Self {
        self.pace = false;
        self
    }
}

impl AudioBackend for WavBackend {
    fn open_input(
        &self,
        producer: AudioProducer,
        gate: Arc<AtomicBool>,
        _preferred: Option<&str>,
    ) -> Result<Box<dyn InputStream>> {
        let (samples, rate) = read_wav_mono(&self.path)
            .map_err(|e| MentoraError::MicrophonePermission(e.to_string()))?;
        info!(
            path = %self.path.display(),
            rate,
            secs = format_args!("{:.2}", samples.len() as f64 / rate.max(1) as f64),
            "using wav file as microphone"
        );
        Ok(Box::new(WavInput::start(
            samples, rate, producer, gate, self.pace,
        )?))
    }

    fn open_output(&self, preferred: Option<&str>) -> Result<Box<dyn PlaybackOutput>> {
        self.output.open_output(preferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{create_audio_ring, RING_CAPACITY};
    use ringbuf::traits::Observer;

    fn write_wav(path: &Path, rate: u32, channels: u16, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for c in 0..channels {
                let v = if c == 0 { 16_384 } else { 0 };
                writer.write_sample((v * (i % 2) as i32) as i16).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mentora-{}-{name}.wav", std::process::id()))
    }

    #[test]
    fn stereo_file_is_mixed_to_mono() {
        let path = temp_path("stereo");
        write_wav(&path, 16_000, 2, 100);
        let (mono, rate) = read_wav_mono(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(rate, 16_000);
        assert_eq!(mono.len(), 100);
        assert_eq!(mono[0], 0.0);
        assert!((mono[1] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_wav_mono(Path::new("/definitely/not/here.wav")).is_err());
    }

    #[test]
    fn feeds_nothing_until_gate_opens() {
        let (producer, mut consumer) = create_audio_ring();
        let gate = Arc::new(AtomicBool::new(false));
        let input =
            WavInput::start(vec![0.5; 1_600], 16_000, producer, Arc::clone(&gate), false).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(consumer.occupied_len(), 0);

        gate.store(true, Ordering::Release);
        let mut received = 0;
        for _ in 0..200 {
            received = consumer.occupied_len();
            if received >= 1_600 + 24_000 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(received, 1_600 + 24_000);
        assert_eq!(input.sample_rate(), 16_000);
    }

    #[test]
    fn stop_releases_feeder_blocked_on_full_ring() {
        let (producer, consumer) = create_audio_ring();
        let gate = Arc::new(AtomicBool::new(true));
        // Longer than the ring, and nobody drains it.
        let input = WavInput::start(
            vec![0.1; RING_CAPACITY * 2],
            16_000,
            producer,
            Arc::clone(&gate),
            false,
        )
        .unwrap();
        for _ in 0..200 {
            if consumer.is_full() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(consumer.is_full());

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        std::thread::spawn(move || {
            input.stop();
            drop(input);
            let _ = done_tx.send(());
        });
        assert!(
            done_rx.recv_timeout(Duration::from_secs(2)).is_ok(),
            "dropping a stopped input must not hang"
        );
    }
}
