//! Host state shared by the voice command's forwarding tasks.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use mentora_core::{MentoraEngine, SessionState};
use parking_lot::Mutex;
use serde::Serialize;

use crate::settings::AppSettings;

pub struct AppState {
    /// Wrapped in `Arc` so forwarding tasks can hold it.
    pub engine: Arc<MentoraEngine>,
    pub settings: Arc<Mutex<AppSettings>>,
    /// Status events printed.
    pub status_events: Arc<AtomicUsize>,
    /// Level events observed.
    pub level_events: Arc<AtomicUsize>,
    /// Transcript lines printed.
    pub transcript_lines: Arc<AtomicUsize>,
    /// Retries requested by the user.
    pub retries: Arc<AtomicUsize>,
    /// Most recent frame level, scaled to 0..=1000 for the meter.
    pub last_level_milli: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(engine: MentoraEngine, settings: AppSettings) -> Self {
        Self {
            engine: Arc::new(engine),
            settings: Arc::new(Mutex::new(settings)),
            status_events: Arc::new(AtomicUsize::new(0)),
            level_events: Arc::new(AtomicUsize::new(0)),
            transcript_lines: Arc::new(AtomicUsize::new(0)),
            retries: Arc::new(AtomicUsize::new(0)),
            last_level_milli: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn diagnostics_snapshot(&self) -> AppDiagnostics {
        let pipeline = self.engine.diagnostics_snapshot();
        AppDiagnostics {
            state: self.engine.status(),
            status_events: self.status_events.load(Ordering::Relaxed),
            level_events: self.level_events.load(Ordering::Relaxed),
            transcript_lines: self.transcript_lines.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            pipeline_samples_in: pipeline.samples_in,
            pipeline_samples_overrun: pipeline.samples_overrun,
            pipeline_frames_encoded: pipeline.frames_encoded,
            pipeline_frames_sent: pipeline.frames_sent,
            pipeline_frames_dropped: pipeline.frames_dropped,
            pipeline_frames_rejected: pipeline.frames_rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDiagnostics {
    pub state: SessionState,
    pub status_events: usize,
    pub level_events: usize,
    pub transcript_lines: usize,
    pub retries: usize,
    pub pipeline_samples_in: usize,
    pub pipeline_samples_overrun: usize,
    pub pipeline_frames_encoded: usize,
    pub pipeline_frames_sent: usize,
    pub pipeline_frames_dropped: usize,
    pub pipeline_frames_rejected: usize,
}

/// Ten-cell level meter, like the UI's visualiser bars.
pub fn level_meter(rms: f32) -> String {
    // Speech rarely exceeds 0.3 RMS; scale so normal talking fills the bar.
    let filled = ((rms / 0.3).clamp(0.0, 1.0) * 10.0).round() as usize;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(10 - filled))
}
