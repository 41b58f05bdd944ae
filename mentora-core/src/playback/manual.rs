//! `ManualOutput`: a virtual output device driven by an explicit clock.
//!
//! Nothing is rendered; buffers "finish" once the clock passes their end
//! time. Used by tests and by hosts that run without an audio device.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{BufferId, PlaybackBuffer, PlaybackOutput};
use crate::error::{MentoraError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartedBuffer {
    pub id: BufferId,
    pub at: f64,
    pub duration: f64,
}

#[derive(Debug, Default)]
struct Shared {
    now: f64,
    started: Vec<StartedBuffer>,
    stopped: Vec<BufferId>,
    /// Started, neither stopped nor reported finished yet.
    pending: Vec<StartedBuffer>,
    closed: bool,
}

/// Handle for advancing the virtual output clock.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<Mutex<Shared>>);

impl ManualClock {
    pub fn advance(&self, secs: f64) {
        self.0.lock().now += secs;
    }

    pub fn now(&self) -> f64 {
        self.0.lock().now
    }
}

/// Read-only view of what the output was asked to do.
#[derive(Debug, Clone)]
pub struct ManualLog(Arc<Mutex<Shared>>);

impl ManualLog {
    pub fn started(&self) -> Vec<StartedBuffer> {
        self.0.lock().started.clone()
    }

    pub fn stopped(&self) -> Vec<BufferId> {
        self.0.lock().stopped.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.0.lock().closed
    }
}

#[derive(Debug)]
pub struct ManualOutput {
    shared: Arc<Mutex<Shared>>,
}

impl ManualOutput {
    /// Create an output at time zero plus the clock that drives it.
    pub fn new() -> (Self, ManualClock) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            ManualClock(shared),
        )
    }

    pub fn log(&self) -> ManualLog {
        ManualLog(Arc::clone(&self.shared))
    }
}

impl PlaybackOutput for ManualOutput {
    fn current_time(&self) -> f64 {
        self.shared.lock().now
    }

    fn start(&mut self, id: BufferId, buffer: PlaybackBuffer, at: f64) -> Result<()> {
        let mut shared = self.shared.lock();
        if shared.closed {
            return Err(MentoraError::AudioStream("output is closed".into()));
        }
        let started = StartedBuffer {
            id,
            at,
            duration: buffer.duration_secs(),
        };
        shared.started.push(started);
        shared.pending.push(started);
        Ok(())
    }

    fn stop(&mut self, id: BufferId) -> Result<()> {
        let mut shared = self.shared.lock();
        if let Some(pos) = shared.pending.iter().position(|b| b.id == id) {
            shared.pending.remove(pos);
            shared.stopped.push(id);
        }
        Ok(())
    }

    fn drain_finished(&mut self, finished: &mut Vec<BufferId>) {
        let mut shared = self.shared.lock();
        let now = shared.now;
        shared.pending.retain(|b| {
            let done = b.at + b.duration <= now;
            if done {
                finished.push(b.id);
            }
            !done
        });
    }

    fn close(&mut self) -> Result<()> {
        self.shared.lock().closed = true;
        Ok(())
    }
}
