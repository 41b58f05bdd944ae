//! Gapless scheduling of mentor audio.
//!
//! ## Algorithm
//!
//! ```text
//! clock   = output.current_time()            (at construction)
//! for each decoded buffer, in arrival order:
//!     start = max(clock, output.current_time())
//!     output.start(id, buffer, start)
//!     clock = start + buffer.duration
//! ```
//!
//! Buffers that arrive faster than they play queue back-to-back with no gap
//! and no overlap. A buffer that arrives after the queue ran dry starts "now".
//!
//! The scheduler is owned by the session task, so neither the clock nor the
//! active set needs a lock.

mod interrupt;
pub mod manual;

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::codec::{decode_pcm16_base64, OUTPUT_SAMPLE_RATE};
use crate::error::Result;

/// Identifier handed out by the scheduler, unique per scheduler.
pub type BufferId = u64;

/// A decoded block of mono samples awaiting playback.
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (24 kHz for live model audio).
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decode one inbound base64 PCM16 chunk at the output rate.
    pub fn from_base64(data: &str) -> Result<Self> {
        Ok(Self::new(decode_pcm16_base64(data)?, OUTPUT_SAMPLE_RATE))
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// The output audio graph: a clock plus start/stop of scheduled buffers.
///
/// Implementations report natural completion through `drain_finished`;
/// the session task polls it on a short tick.
pub trait PlaybackOutput: Send {
    /// Current position of the output clock in seconds.
    fn current_time(&self) -> f64;

    /// Schedule `buffer` to begin at `at` seconds on the output clock.
    fn start(&mut self, id: BufferId, buffer: PlaybackBuffer, at: f64) -> Result<()>;

    /// Stop a buffer. Stopping a finished or unknown buffer is a no-op.
    fn stop(&mut self, id: BufferId) -> Result<()>;

    /// Move ids of buffers that finished since the last call into `finished`.
    fn drain_finished(&mut self, finished: &mut Vec<BufferId>);

    /// Release the output device. Further starts may fail.
    fn close(&mut self) -> Result<()>;
}

impl<T: PlaybackOutput + ?Sized> PlaybackOutput for Box<T> {
    fn current_time(&self) -> f64 {
        (**self).current_time()
    }

    fn start(&mut self, id: BufferId, buffer: PlaybackBuffer, at: f64) -> Result<()> {
        (**self).start(id, buffer, at)
    }

    fn stop(&mut self, id: BufferId) -> Result<()> {
        (**self).stop(id)
    }

    fn drain_finished(&mut self, finished: &mut Vec<BufferId>) {
        (**self).drain_finished(finished)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Where a buffer landed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    pub start: f64,
    pub end: f64,
}

/// Result of collecting finished buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reaped {
    /// Buffers removed from the active set.
    pub finished: usize,
    /// `true` when this call emptied the active set.
    pub drained: bool,
}

/// Owns the output, the playback clock and the set of active buffers.
pub struct PlaybackScheduler<O: PlaybackOutput> {
    output: O,
    /// Next available start time, seconds on the output clock.
    clock: f64,
    active: BTreeMap<BufferId, ScheduledBuffer>,
    next_id: BufferId,
    finished_scratch: Vec<BufferId>,
}

impl<O: PlaybackOutput> PlaybackScheduler<O> {
    pub fn new(output: O) -> Self {
        let clock = output.current_time();
        Self {
            output,
            clock,
            active: BTreeMap::new(),
            next_id: 0,
            finished_scratch: Vec::new(),
        }
    }

    /// Schedule a buffer right after everything already queued.
    ///
    /// Returns `None` for an empty buffer: it neither advances the clock nor
    /// enters the active set.
    pub fn schedule(&mut self, buffer: PlaybackBuffer) -> Result<Option<ScheduledBuffer>> {
        if buffer.is_empty() {
            debug!("ignoring zero-length playback buffer");
            return Ok(None);
        }

        let duration = buffer.duration_secs();
        let start = self.clock.max(self.output.current_time());
        let id = self.next_id;

        self.output.start(id, buffer, start)?;

        self.next_id += 1;
        let scheduled = ScheduledBuffer {
            id,
            start,
            end: start + duration,
        };
        self.clock = scheduled.end;
        self.active.insert(id, scheduled);

        trace!(
            id,
            start = format_args!("{:.3}", start),
            duration = format_args!("{:.3}", duration),
            active = self.active.len(),
            "buffer scheduled"
        );
        Ok(Some(scheduled))
    }

    /// Collect completions reported by the output.
    pub fn reap(&mut self) -> Reaped {
        self.finished_scratch.clear();
        self.output.drain_finished(&mut self.finished_scratch);

        let mut reaped = Reaped::default();
        for id in self.finished_scratch.drain(..) {
            if self.active.remove(&id).is_some() {
                reaped.finished += 1;
            }
        }
        reaped.drained = reaped.finished > 0 && self.active.is_empty();
        reaped
    }

    /// Best-effort stop of every active buffer, then clear the set.
    ///
    /// Returns how many buffers were active. Stop failures are logged only.
    pub fn stop_all(&mut self) -> usize {
        let count = self.active.len();
        for id in std::mem::take(&mut self.active).into_keys() {
            if let Err(e) = self.output.stop(id) {
                debug!(id, error = %e, "stop on playback buffer failed; ignoring");
            }
        }
        count
    }

    /// Release the output device.
    pub fn close_output(&mut self) -> Result<()> {
        self.output.close()
    }

    /// Next available start time on the output clock.
    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    /// Active buffers in scheduling order.
    pub fn active(&self) -> impl Iterator<Item = &ScheduledBuffer> {
        self.active.values()
    }

    pub fn output(&self) -> &O {
        &self.output
    }
}
