//! Session channel abstraction.
//!
//! A channel is one bidirectional streaming session with the remote live
//! model. It is single-use: once closed, `OutboundSender::push` fails with
//! `MentoraError::ChannelClosed` and a new activation must `connect` again.
//!
//! Lifecycle callbacks arrive as a tagged union on one ordered,
//! single-consumer queue:
//!
//! ```text
//! ChannelEvent::Open ─► Message* ─► (Error | Closed)
//! ```

pub mod live;
pub mod protocol;
pub mod stub;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Notify,
};

use crate::codec::EncodedFrame;
use crate::error::{MentoraError, Result};

pub use live::LiveConnector;
pub use stub::ScriptedConnector;

/// Default live model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Default synthesized voice.
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Default mentor persona.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a warm, professional career mentor for \
students. Provide concise, encouraging, and spoken-friendly advice about careers, internships, \
and portfolio building.";

/// Session configuration sent once at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    pub model: String,
    /// Only `AUDIO` is used by the voice mentor.
    pub response_modality: String,
    pub voice_name: String,
    pub system_instruction: String,
    /// Ask the server for transcriptions of both sides.
    pub transcribe: bool,
}

impl Default for SessionSetup {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            response_modality: "AUDIO".into(),
            voice_name: DEFAULT_VOICE.into(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.into(),
            transcribe: false,
        }
    }
}

/// One inbound server message, reduced to what the session acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerMessage {
    /// Base64 PCM16 24 kHz chunks, in part order.
    pub audio: Vec<String>,
    /// The current model turn was interrupted by student speech.
    pub interrupted: bool,
    /// The model finished its turn.
    pub turn_complete: bool,
    /// Transcription of the mentor's speech, if requested.
    pub output_transcript: Option<String>,
    /// Transcription of the student's speech, if requested.
    pub input_transcript: Option<String>,
}

impl ServerMessage {
    pub fn audio(chunk: impl Into<String>) -> Self {
        Self {
            audio: vec![chunk.into()],
            ..Self::default()
        }
    }

    pub fn interruption() -> Self {
        Self {
            interrupted: true,
            ..Self::default()
        }
    }
}

/// Lifecycle events delivered to the session loop, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Setup acknowledged; capture may start.
    Open,
    Message(ServerMessage),
    /// Fatal; the session is unusable.
    Error(String),
    /// Session ended, by either side.
    Closed { reason: Option<String> },
}

/// Establishes channels. One `connect` per activation.
pub trait ChannelConnector: Send + Sync + 'static {
    /// Start connecting. Must not block: progress is reported through the
    /// returned handle's event queue. Requires a Tokio runtime.
    ///
    /// `outbound_capacity` bounds the queue behind `OutboundSender::push`.
    fn connect(&self, setup: &SessionSetup, outbound_capacity: usize) -> Result<ChannelHandle>;
}

/// The two ends of one channel as seen by the engine.
#[derive(Debug)]
pub struct ChannelHandle {
    pub outbound: OutboundSender,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// What happened to a pushed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queue full; the frame was discarded.
    Dropped,
}

#[derive(Debug)]
struct CloseFlag {
    closed: AtomicBool,
    notify: Notify,
}

impl CloseFlag {
    fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_one();
        }
        first
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Cloneable, non-blocking sender for outbound audio frames.
///
/// Backed by a bounded queue. When the transport falls behind, new frames are
/// dropped instead of blocking the capture thread.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<EncodedFrame>,
    flag: Arc<CloseFlag>,
}

impl OutboundSender {
    /// Create a sender/receiver pair with room for `capacity` frames.
    pub fn channel(capacity: usize) -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let flag = Arc::new(CloseFlag {
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        });
        (
            Self {
                tx,
                flag: Arc::clone(&flag),
            },
            OutboundReceiver { rx, flag },
        )
    }

    /// Queue one frame without blocking.
    ///
    /// # Errors
    /// `MentoraError::ChannelClosed` once the channel closed.
    pub fn push(&self, frame: EncodedFrame) -> Result<PushOutcome> {
        if self.flag.is_closed() {
            return Err(MentoraError::ChannelClosed);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(PushOutcome::Queued),
            Err(TrySendError::Full(_)) => Ok(PushOutcome::Dropped),
            Err(TrySendError::Closed(_)) => {
                self.flag.close();
                Err(MentoraError::ChannelClosed)
            }
        }
    }

    /// Ask the transport to close. Idempotent.
    pub fn close(&self) {
        self.flag.close();
    }

    pub fn is_closed(&self) -> bool {
        self.flag.is_closed()
    }
}

/// Transport side of the outbound queue.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<EncodedFrame>,
    flag: Arc<CloseFlag>,
}

impl OutboundReceiver {
    /// Next frame, or `None` once a close was requested. Cancel-safe.
    pub async fn next(&mut self) -> Option<EncodedFrame> {
        if self.flag.is_closed() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.flag.notify.notified() => None,
            frame = self.rx.recv() => frame,
        }
    }

    /// Resolve once a close was requested.
    pub async fn closed(&self) {
        while !self.flag.is_closed() {
            self.flag.notify.notified().await;
        }
    }

    /// Non-async poll, for in-process transports.
    pub fn try_next(&mut self) -> Option<EncodedFrame> {
        if self.flag.is_closed() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Mark the channel closed from the transport side (remote close, error).
    pub fn mark_closed(&self) {
        self.flag.close();
    }

    pub fn is_closed(&self) -> bool {
        self.flag.is_closed()
    }
}
