//! Microphone capture via cpal.
//!
//! # Real-time constraints
//!
//! The input callback runs on an OS audio thread. It must not block, do I/O
//! or allocate after warm-up. It mixes interleaved channels down to mono in
//! a scratch buffer and writes into the SPSC ring with `push_slice`. Samples
//! that do not fit are only counted; the capture pipeline logs them.
//!
//! # Gate
//!
//! The microphone is opened before the session channel exists, so a
//! permission failure surfaces before any network traffic. Samples are only
//! pushed while the shared `gate` flag is set, which the engine raises once
//! the channel reports open.
//!
//! # Threading
//!
//! `cpal::Stream` is `!Send` on Windows and macOS. `CpalInput` must be
//! created and dropped on the same OS thread, which is why the engine opens
//! it inside the capture pipeline's `spawn_blocking` task.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};
use tracing::{error, info, warn};

use super::InputStream;
use crate::buffering::{AudioProducer, Producer};
use crate::error::{MentoraError, Result};

/// An open microphone stream.
pub struct CpalInput {
    _stream: Stream,
    gate: Arc<AtomicBool>,
    overruns: Arc<AtomicUsize>,
    sample_rate: u32,
}

impl CpalInput {
    /// Open `preferred` if it exists, else the default input, else the first
    /// input found.
    ///
    /// # Errors
    /// `MentoraError::NoDefaultInputDevice` when the host has no microphone;
    /// `MentoraError::MicrophonePermission` when the OS refuses to open or
    /// start it.
    pub fn open(
        producer: AudioProducer,
        gate: Arc<AtomicBool>,
        preferred: Option<&str>,
    ) -> Result<Self> {
        let device = select_device(preferred)?;
        let name = device.name().unwrap_or_default();

        let supported = device
            .default_input_config()
            .map_err(|e| MentoraError::MicrophonePermission(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let config = StreamConfig {
            channels,
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        info!(device = %name, sample_rate, channels, "opening microphone");

        let overruns = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&overruns);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build::<f32>(&device, &config, producer, Arc::clone(&gate), counter),
            SampleFormat::I16 => build::<i16>(&device, &config, producer, Arc::clone(&gate), counter),
            SampleFormat::U16 => build::<u16>(&device, &config, producer, Arc::clone(&gate), counter),
            SampleFormat::U8 => build::<u8>(&device, &config, producer, Arc::clone(&gate), counter),
            fmt => {
                return Err(MentoraError::AudioStream(format!(
                    "unsupported input sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| MentoraError::MicrophonePermission(e.to_string()))?;

        stream
            .play()
            .map_err(|e| MentoraError::MicrophonePermission(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            gate,
            overruns,
            sample_rate,
        })
    }
}

impl InputStream for CpalInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn stop(&self) {
        self.gate.store(false, Ordering::Release);
    }

    fn overruns(&self) -> Option<Arc<AtomicUsize>> {
        Some(Arc::clone(&self.overruns))
    }
}

fn select_device(preferred: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    if let Some(wanted) = preferred {
        match host.input_devices() {
            Ok(mut devices) => {
                if let Some(device) =
                    devices.find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                {
                    return Ok(device);
                }
                warn!(device = wanted, "preferred microphone not found, falling back");
            }
            Err(e) => warn!(error = %e, "failed to list microphones"),
        }
    }

    if let Some(device) = host.default_input_device() {
        return Ok(device);
    }
    let mut devices = host
        .input_devices()
        .map_err(|e| MentoraError::MicrophonePermission(e.to_string()))?;
    let fallback = devices.next().ok_or(MentoraError::NoDefaultInputDevice)?;
    warn!("no default microphone, using first available input");
    Ok(fallback)
}

fn build<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    gate: Arc<AtomicBool>,
    overruns: Arc<AtomicUsize>,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let ch = config.channels.max(1) as usize;
    // 8192 frames covers every default buffer size seen in practice.
    let mut mono: Vec<f32> = Vec::with_capacity(8192);

    device.build_input_stream(
        config,
        move |data: &[T], _info| {
            if !gate.load(Ordering::Relaxed) {
                return;
            }
            mono.clear();
            for frame in data.chunks_exact(ch) {
                let sum: f32 = frame.iter().map(|s| s.to_sample::<f32>()).sum();
                mono.push(sum / ch as f32);
            }
            let written = producer.push_slice(&mono);
            if written < mono.len() {
                overruns.fetch_add(mono.len() - written, Ordering::Relaxed);
            }
        },
        |err| error!("microphone stream error: {err}"),
        None,
    )
}
