//! `MentoraEngine`: top-level lifecycle controller for the voice session.
//!
//! ## Lifecycle
//!
//! ```text
//! MentoraEngine::new()
//!     └─► activate()   → mic opened, output opened, channel connecting
//!         │               (state: connecting → listening ↔ responding)
//!         └─► close()  → teardown, state = idle
//!
//! channel error / mic failure → state = error (sticky until retry() or close())
//! ```
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS, so the microphone is opened
//! *inside* the `spawn_blocking` closure that later runs the capture
//! pipeline. A oneshot reports the open result back to `activate()`; the
//! channel's outbound sender is handed to the same thread once the
//! connection has been requested. Everything else (event handling, playback
//! scheduling, teardown) runs in one Tokio task per session, see
//! [`session`].

pub mod pipeline;
pub mod session;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    audio::AudioBackend,
    buffering::{create_audio_ring, frame::DEFAULT_FRAME_SIZE},
    channel::{ChannelConnector, OutboundSender, SessionSetup},
    error::{MentoraError, Result, CONNECTION_FAILURE},
    ipc::events::{AudioLevelEvent, SessionState, SessionStatusEvent, TranscriptEvent},
    session::{SessionCore, SessionStats, StateMachine, Transition},
};

use session::SessionEnd;

/// Broadcast channel capacity for level and transcript events.
const BROADCAST_CAP: usize = 256;

/// How often the capture thread checks for a stop while waiting for the channel.
const OUTBOUND_WAIT_POLL: Duration = Duration::from_millis(50);

/// Configuration for `MentoraEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Samples per outbound frame. Default: 4096 (256 ms at 16 kHz).
    pub frame_size: usize,
    /// Frames that may wait for the socket before new ones are dropped.
    /// Default: 32 (about 8 s of audio).
    pub outbound_queue_frames: usize,
    /// Playback completion polling interval. Default: 10 ms.
    pub playback_poll_ms: u64,
    /// Preferred microphone name; `None` uses the system default.
    pub preferred_input_device: Option<String>,
    /// Preferred speaker name; `None` uses the system default.
    pub preferred_output_device: Option<String>,
    /// Sent to the live model when the channel opens.
    pub setup: SessionSetup,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            outbound_queue_frames: 32,
            playback_poll_ms: 10,
            preferred_input_device: None,
            preferred_output_device: None,
            setup: SessionSetup::default(),
        }
    }
}

struct ActiveSession {
    stop: oneshot::Sender<()>,
    task: JoinHandle<(SessionEnd, SessionStats)>,
}

/// The top-level engine handle.
///
/// `MentoraEngine` is `Send + Sync`; wrap it in `Arc` to share between the
/// UI shell and event-forwarding tasks. At most one voice session is active
/// at a time.
pub struct MentoraEngine {
    config: EngineConfig,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn ChannelConnector>,
    state: StateMachine,
    level_tx: broadcast::Sender<AudioLevelEvent>,
    transcript_tx: broadcast::Sender<TranscriptEvent>,
    level_seq: Arc<AtomicU64>,
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
    active: Mutex<Option<ActiveSession>>,
}

impl MentoraEngine {
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn ChannelConnector>,
    ) -> Self {
        let (level_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (transcript_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config,
            backend,
            connector,
            state: StateMachine::new(),
            level_tx,
            transcript_tx,
            level_seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
            active: Mutex::new(None),
        }
    }

    /// Start a voice session.
    ///
    /// Opens the microphone first: if that fails the state becomes `Error`
    /// with remediation text and no connection is attempted. Returns once
    /// the channel has been requested; `Listening` follows when it opens.
    ///
    /// # Errors
    /// - `MentoraError::AlreadyActive` if a session is running.
    /// - A permission-class error if the microphone is unavailable.
    /// - The connector's error if the channel cannot be requested.
    pub async fn activate(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            if self.is_active() {
                *active = Some(previous);
                return Err(MentoraError::AlreadyActive);
            }
            // Ended on its own (channel error or close); wait out its teardown.
            let _ = previous.stop.send(());
            if let Err(e) = previous.task.await {
                warn!(error = %e, "previous session task failed");
            }
        }

        if self.state.apply(Transition::Activate).is_none() {
            return Err(MentoraError::AlreadyActive);
        }
        self.diagnostics.reset();

        let running = Arc::new(AtomicBool::new(true));
        let gate = Arc::new(AtomicBool::new(false));
        let (producer, consumer) = create_audio_ring();
        let (open_tx, open_rx) = oneshot::channel::<Result<u32>>();
        let (outbound_tx, outbound_rx) = crossbeam_channel::bounded::<OutboundSender>(1);

        let backend = Arc::clone(&self.backend);
        let preferred_input = self.config.preferred_input_device.clone();
        let config = self.config.clone();
        let pipeline_running = Arc::clone(&running);
        let pipeline_gate = Arc::clone(&gate);
        let level_tx = self.level_tx.clone();
        let level_seq = Arc::clone(&self.level_seq);
        let diagnostics = Arc::clone(&self.diagnostics);

        let pipeline_task = tokio::task::spawn_blocking(move || {
            // Must happen on THIS thread: the input stream may be !Send.
            let input = match backend.open_input(producer, pipeline_gate, preferred_input.as_deref())
            {
                Ok(input) => {
                    let _ = open_tx.send(Ok(input.sample_rate()));
                    input
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    pipeline_running.store(false, Ordering::SeqCst);
                    return;
                }
            };
            let capture_sample_rate = input.sample_rate();
            let overruns = input.overruns();

            let outbound = loop {
                if !pipeline_running.load(Ordering::Acquire) {
                    input.stop();
                    return;
                }
                match outbound_rx.recv_timeout(OUTBOUND_WAIT_POLL) {
                    Ok(outbound) => break outbound,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => {
                        debug!("session abandoned before channel was ready");
                        input.stop();
                        return;
                    }
                }
            };

            let exit = pipeline::run(pipeline::PipelineContext {
                config,
                consumer,
                running: pipeline_running,
                outbound,
                level_tx,
                level_seq,
                capture_sample_rate,
                overruns,
                diagnostics,
            });
            debug!(?exit, "capture pipeline exited");

            // Released here, on the thread that opened it.
            input.stop();
            drop(input);
        });

        match open_rx.await {
            Ok(Ok(rate)) => info!(capture_rate = rate, "microphone open"),
            Ok(Err(e)) => {
                warn!(error = %e, "microphone unavailable");
                running.store(false, Ordering::SeqCst);
                self.state.apply(Transition::Failed(e.user_message()));
                return Err(e);
            }
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                let e = MentoraError::AudioStream("capture thread died before opening".into());
                self.state.apply(Transition::Failed(e.user_message()));
                return Err(e);
            }
        }

        let backend = Arc::clone(&self.backend);
        let preferred_output = self.config.preferred_output_device.clone();
        let opened = tokio::task::spawn_blocking(move || {
            backend.open_output(preferred_output.as_deref())
        })
        .await
        .map_err(|e| MentoraError::AudioStream(format!("output open task failed: {e}")))
        .and_then(|r| r);
        let output = match opened {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "speaker output unavailable");
                running.store(false, Ordering::SeqCst);
                self.state.apply(Transition::Failed(e.user_message()));
                return Err(e);
            }
        };

        let handle = match self
            .connector
            .connect(&self.config.setup, self.config.outbound_queue_frames)
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "could not open session channel");
                running.store(false, Ordering::SeqCst);
                let mut output = output;
                if let Err(close_err) = output.close() {
                    warn!(error = %close_err, "output close failed");
                }
                self.state
                    .apply(Transition::Failed(CONNECTION_FAILURE.to_string()));
                return Err(e);
            }
        };

        if outbound_tx.send(handle.outbound.clone()).is_err() {
            // Capture thread already gone; the session loop will still tear down.
            warn!("capture thread exited before channel was ready");
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let core = SessionCore::new(self.state.clone(), output, self.transcript_tx.clone());
        let task = tokio::spawn(session::run(session::SessionTask {
            core,
            events: handle.events,
            outbound: handle.outbound,
            gate,
            running,
            pipeline: pipeline_task,
            stop: stop_rx,
            poll_interval: Duration::from_millis(self.config.playback_poll_ms.max(1)),
        }));

        *active = Some(ActiveSession {
            stop: stop_tx,
            task,
        });
        info!("voice session starting");
        Ok(())
    }

    /// End the session (or dismiss an error) and return to `Idle`.
    ///
    /// # Errors
    /// `MentoraError::NotActive` if there is neither a session nor an error.
    pub async fn close(&self) -> Result<()> {
        let active = self.active.lock().await.take();
        match active {
            Some(session) => {
                let _ = session.stop.send(());
                match session.task.await {
                    Ok((end, stats)) => debug!(?end, ?stats, "session task joined"),
                    Err(e) => warn!(error = %e, "session task failed"),
                }
                self.state.apply(Transition::UserClosed);
                info!("voice session closed");
                Ok(())
            }
            None if self.state.state() == SessionState::Error => {
                self.state.apply(Transition::UserClosed);
                Ok(())
            }
            None => Err(MentoraError::NotActive),
        }
    }

    /// Tear down whatever is left and start a fresh session.
    pub async fn retry(&self) -> Result<()> {
        match self.close().await {
            Ok(()) | Err(MentoraError::NotActive) => {}
            Err(e) => return Err(e),
        }
        self.activate().await
    }

    pub fn status(&self) -> SessionState {
        self.state.state()
    }

    /// User-facing message for the current state, set while in `Error`.
    pub fn status_detail(&self) -> Option<String> {
        self.state.detail()
    }

    /// Whether a session is connecting or live.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state.state(),
            SessionState::Connecting | SessionState::Listening | SessionState::Responding
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.state.subscribe()
    }

    /// Per-frame microphone level events.
    pub fn subscribe_levels(&self) -> broadcast::Receiver<AudioLevelEvent> {
        self.level_tx.subscribe()
    }

    pub fn subscribe_transcripts(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.transcript_tx.subscribe()
    }

    /// Snapshot of capture pipeline counters for the current (or last) session.
    pub fn diagnostics_snapshot(&self) -> pipeline::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

impl std::fmt::Debug for MentoraEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MentoraEngine")
            .field("state", &self.state.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
