//! Speaker output.
//!
//! `CpalOutput` implements `PlaybackOutput` on top of a cpal output stream.
//!
//! ```text
//! session task ──CommandFeed──Command ring──► render callback ──Retired channel──► session task
//!                                                 │
//!                                           frames_rendered (AtomicU64) = output clock
//! ```
//!
//! The stream lives on a dedicated owner thread because `cpal::Stream` is
//! `!Send`; the `CpalOutput` handle itself is `Send` and is driven from the
//! session task. Buffers are resampled to the device rate before they are
//! handed to the callback, so the callback only mixes.
//!
//! The callback holds at most `MAX_VOICES` buffers. Starts beyond that wait
//! in the `CommandFeed` backlog on the session side and are admitted as
//! voices retire; their start frame is absolute, so late admission does not
//! move them on the clock.
//!
//! `NullOutput` has the same contract with a wall clock and no device.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender};
use ringbuf::{traits::Split, HeapRb};

use crate::buffering::{Consumer, Producer};
use crate::error::{MentoraError, Result};
use crate::playback::{BufferId, PlaybackBuffer, PlaybackOutput};

use super::resample::resample_once;

/// Voices the callback holds at once.
const MAX_VOICES: usize = 128;
/// Room for a start and a stop per voice.
const COMMAND_CAPACITY: usize = MAX_VOICES * 2;

enum Command {
    Start {
        id: BufferId,
        samples: Vec<f32>,
        at_frame: u64,
    },
    Stop(BufferId),
}

/// A buffer leaving the callback. Samples travel back so the callback never
/// frees memory.
struct Retired {
    id: BufferId,
    finished: bool,
    _samples: Vec<f32>,
}

struct Voice {
    id: BufferId,
    samples: Vec<f32>,
    start_frame: u64,
    pos: usize,
}

/// Everything the render callback owns.
struct Mixer {
    commands: ringbuf::HeapCons<Command>,
    retired: Sender<Retired>,
    voices: Vec<Voice>,
    frames_rendered: Arc<AtomicU64>,
}

impl Mixer {
    fn retire(&mut self, idx: usize, finished: bool) {
        let voice = self.voices.swap_remove(idx);
        // At most one message per admitted voice is outstanding, and the
        // channel holds several times MAX_VOICES.
        let _ = self.retired.try_send(Retired {
            id: voice.id,
            finished,
            _samples: voice.samples,
        });
    }

    fn apply_commands(&mut self) {
        while let Some(command) = self.commands.try_pop() {
            match command {
                // `CommandFeed` admits at most MAX_VOICES, so this never grows
                // past the preallocated capacity.
                Command::Start {
                    id,
                    samples,
                    at_frame,
                } => self.voices.push(Voice {
                    id,
                    samples,
                    start_frame: at_frame,
                    pos: 0,
                }),
                Command::Stop(id) => {
                    if let Some(idx) = self.voices.iter().position(|v| v.id == id) {
                        self.retire(idx, false);
                    }
                }
            }
        }
    }

    /// Mix the next `mono.len()` frames.
    fn render(&mut self, mono: &mut [f32]) {
        self.apply_commands();

        let base = self.frames_rendered.load(Ordering::Relaxed);
        for (i, out) in mono.iter_mut().enumerate() {
            let now = base + i as u64;
            let mut mix = 0.0f32;
            for voice in &mut self.voices {
                if now >= voice.start_frame && voice.pos < voice.samples.len() {
                    mix += voice.samples[voice.pos];
                    voice.pos += 1;
                }
            }
            *out = mix.clamp(-1.0, 1.0);
        }
        self.frames_rendered
            .store(base + mono.len() as u64, Ordering::Release);

        let mut idx = 0;
        while idx < self.voices.len() {
            if self.voices[idx].pos >= self.voices[idx].samples.len() {
                self.retire(idx, true);
            } else {
                idx += 1;
            }
        }
    }
}

/// Session-side half of the command ring.
///
/// Keeps the voice count in the callback at or below `MAX_VOICES` and holds
/// everything that does not fit yet. Stops jump the queue: a start still in
/// the backlog is simply dropped, one already in the ring is followed by its
/// stop.
struct CommandFeed {
    ring: ringbuf::HeapProd<Command>,
    starts: VecDeque<Command>,
    stops: VecDeque<BufferId>,
    /// Starts pushed to the ring and not yet retired.
    in_flight: usize,
}

impl CommandFeed {
    fn new(ring: ringbuf::HeapProd<Command>) -> Self {
        Self {
            ring,
            starts: VecDeque::new(),
            stops: VecDeque::new(),
            in_flight: 0,
        }
    }

    fn start(&mut self, id: BufferId, samples: Vec<f32>, at_frame: u64) {
        self.starts.push_back(Command::Start {
            id,
            samples,
            at_frame,
        });
        self.flush();
    }

    fn stop(&mut self, id: BufferId) {
        let queued = self.starts.len();
        self.starts
            .retain(|c| !matches!(c, Command::Start { id: pending, .. } if *pending == id));
        if self.starts.len() == queued {
            self.stops.push_back(id);
        }
        self.flush();
    }

    /// A voice left the callback.
    fn retired(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    fn backlog(&self) -> usize {
        self.starts.len() + self.stops.len()
    }

    fn flush(&mut self) {
        while let Some(id) = self.stops.pop_front() {
            if self.ring.try_push(Command::Stop(id)).is_err() {
                self.stops.push_front(id);
                return;
            }
        }
        while self.in_flight < MAX_VOICES {
            let Some(command) = self.starts.pop_front() else {
                return;
            };
            match self.ring.try_push(command) {
                Ok(()) => self.in_flight += 1,
                Err(command) => {
                    self.starts.push_front(command);
                    return;
                }
            }
        }
    }
}

/// Speaker output driven by a cpal stream on its own thread.
pub struct CpalOutput {
    feed: CommandFeed,
    retired: Receiver<Retired>,
    frames_rendered: Arc<AtomicU64>,
    device_rate: u32,
    shutdown: Option<Sender<()>>,
    owner: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open `preferred` or the default output device.
    ///
    /// Blocks until the owner thread reports whether the stream started.
    pub fn open(preferred: Option<&str>) -> Result<Self> {
        let (prod, cons) = HeapRb::<Command>::new(COMMAND_CAPACITY).split();
        let (retired_tx, retired_rx) = bounded(MAX_VOICES * 4);
        let (ready_tx, ready_rx) = bounded::<Result<u32>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let frames_rendered = Arc::new(AtomicU64::new(0));

        let mixer = Mixer {
            commands: cons,
            retired: retired_tx,
            voices: Vec::with_capacity(MAX_VOICES),
            frames_rendered: Arc::clone(&frames_rendered),
        };
        let preferred = preferred.map(str::to_owned);

        let owner = std::thread::Builder::new()
            .name("mentora-output".into())
            .spawn(move || match stream::start(mixer, preferred.as_deref()) {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    // Park until close; dropping the stream stops playback.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(MentoraError::Io)?;

        let device_rate = ready_rx
            .recv()
            .map_err(|_| MentoraError::AudioStream("output thread exited".into()))??;
        tracing::info!(device_rate, "speaker output ready");

        Ok(Self {
            feed: CommandFeed::new(prod),
            retired: retired_rx,
            frames_rendered,
            device_rate,
            shutdown: Some(shutdown_tx),
            owner: Some(owner),
        })
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

impl PlaybackOutput for CpalOutput {
    fn current_time(&self) -> f64 {
        self.frames_rendered.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn start(&mut self, id: BufferId, buffer: PlaybackBuffer, at: f64) -> Result<()> {
        if self.shutdown.is_none() {
            return Err(MentoraError::AudioStream("output is closed".into()));
        }
        let samples = if buffer.sample_rate == self.device_rate {
            buffer.samples
        } else {
            resample_once(&buffer.samples, buffer.sample_rate, self.device_rate)?
        };
        let at_frame = (at.max(0.0) * self.device_rate as f64).round() as u64;
        self.feed.start(id, samples, at_frame);
        if self.feed.backlog() > 0 {
            tracing::trace!(
                id,
                backlog = self.feed.backlog(),
                "speaker voices full, start held back"
            );
        }
        Ok(())
    }

    fn stop(&mut self, id: BufferId) -> Result<()> {
        self.feed.stop(id);
        Ok(())
    }

    fn drain_finished(&mut self, finished: &mut Vec<BufferId>) {
        for retired in self.retired.try_iter() {
            self.feed.retired();
            if retired.finished {
                finished.push(retired.id);
            }
        }
        self.feed.flush();
    }

    fn close(&mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(owner) = self.owner.take() {
            owner
                .join()
                .map_err(|_| MentoraError::AudioStream("output thread panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(feature = "audio-cpal")]
mod stream {
    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        SampleFormat, SizedSample, Stream, StreamConfig,
    };
    use tracing::{error, info, warn};

    use super::Mixer;
    use crate::codec::OUTPUT_SAMPLE_RATE;
    use crate::error::{MentoraError, Result};

    fn select_device(preferred: Option<&str>) -> Result<cpal::Device> {
        let host = cpal::default_host();
        if let Some(wanted) = preferred {
            if let Ok(mut devices) = host.output_devices() {
                if let Some(device) =
                    devices.find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                {
                    return Ok(device);
                }
            }
            warn!(device = wanted, "preferred output not found, falling back");
        }
        host.default_output_device()
            .ok_or(MentoraError::NoDefaultOutputDevice)
    }

    /// Build and start the stream. Prefers the model's native 24 kHz when the
    /// device supports it so no resampling happens.
    pub(super) fn start(mixer: Mixer, preferred: Option<&str>) -> Result<(Stream, u32)> {
        let device = select_device(preferred)?;
        let default = device
            .default_output_config()
            .map_err(|e| MentoraError::AudioDevice(e.to_string()))?;

        let native = cpal::SampleRate(OUTPUT_SAMPLE_RATE);
        let supported = device
            .supported_output_configs()
            .ok()
            .and_then(|mut configs| {
                configs.find(|c| {
                    c.sample_format() == default.sample_format()
                        && c.min_sample_rate() <= native
                        && native <= c.max_sample_rate()
                })
            })
            .map(|c| c.with_sample_rate(native))
            .unwrap_or(default);

        let rate = supported.sample_rate().0;
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        info!(
            device = %device.name().unwrap_or_default(),
            rate,
            channels = config.channels,
            resampling = rate != OUTPUT_SAMPLE_RATE,
            "opening speaker"
        );

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build::<f32>(&device, &config, mixer),
            SampleFormat::I16 => build::<i16>(&device, &config, mixer),
            SampleFormat::U16 => build::<u16>(&device, &config, mixer),
            fmt => {
                return Err(MentoraError::AudioStream(format!(
                    "unsupported output sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| MentoraError::AudioStream(e.to_string()))?;
        stream
            .play()
            .map_err(|e| MentoraError::AudioStream(e.to_string()))?;
        Ok((stream, rate))
    }

    fn build<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut mixer: Mixer,
    ) -> std::result::Result<Stream, cpal::BuildStreamError>
    where
        T: SizedSample + cpal::FromSample<f32>,
    {
        let channels = config.channels.max(1) as usize;
        let mut scratch = vec![0f32; 8192];
        device.build_output_stream(
            config,
            move |data: &mut [T], _info| {
                let frames = data.len() / channels;
                if scratch.len() < frames {
                    scratch.resize(frames, 0.0);
                }
                let mono = &mut scratch[..frames];
                mixer.render(mono);
                for (frame, &value) in data.chunks_exact_mut(channels).zip(mono.iter()) {
                    frame.fill(T::from_sample(value));
                }
            },
            |err| error!("speaker stream error: {err}"),
            None,
        )
    }
}

#[cfg(not(feature = "audio-cpal"))]
mod stream {
    use super::Mixer;
    use crate::error::{MentoraError, Result};

    pub(super) struct Stream;

    pub(super) fn start(_mixer: Mixer, _preferred: Option<&str>) -> Result<(Stream, u32)> {
        Err(MentoraError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

/// Device-less output that plays in real time against the wall clock.
#[derive(Debug)]
pub struct NullOutput {
    origin: Instant,
    pending: Vec<(BufferId, f64)>,
    closed: bool,
}

impl NullOutput {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            pending: Vec::new(),
            closed: false,
        }
    }
}

impl Default for NullOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackOutput for NullOutput {
    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn start(&mut self, id: BufferId, buffer: PlaybackBuffer, at: f64) -> Result<()> {
        if self.closed {
            return Err(MentoraError::AudioStream("output is closed".into()));
        }
        self.pending.push((id, at + buffer.duration_secs()));
        Ok(())
    }

    fn stop(&mut self, id: BufferId) -> Result<()> {
        self.pending.retain(|(pending, _)| *pending != id);
        Ok(())
    }

    fn drain_finished(&mut self, finished: &mut Vec<BufferId>) {
        let now = self.current_time();
        self.pending.retain(|&(id, end)| {
            if end <= now {
                finished.push(id);
                false
            } else {
                true
            }
        });
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.pending.clear();
        Ok(())
    }
}
