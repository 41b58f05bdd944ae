//! Event types broadcast by the engine.
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `SessionStatusEvent` | `MentoraEngine::subscribe_status` |
//! | `AudioLevelEvent` | `MentoraEngine::subscribe_levels` |
//! | `TranscriptEvent` | `MentoraEngine::subscribe_transcripts` |

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

/// Lifecycle state of the live voice session, as shown by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session.
    Idle,
    /// Session requested, channel not yet open.
    Connecting,
    /// Channel open, streaming microphone audio, nothing playing.
    Listening,
    /// At least one mentor audio buffer is scheduled or playing.
    Responding,
    /// Fatal failure; the user must retry or close.
    Error,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Responding => "responding",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted whenever the session state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionState,
    /// Human-readable detail; set for `Error`.
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Audio level
// ---------------------------------------------------------------------------

/// Emitted once per captured frame so the UI can animate its level bars.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioLevelEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Root-mean-square level of the frame in [0.0, 1.0].
    pub rms: f32,
}

// ---------------------------------------------------------------------------
// Transcripts
// ---------------------------------------------------------------------------

/// Who said the transcribed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Student,
    Mentor,
}

/// Transcription text forwarded from the live model, when it sends any.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    pub seq: u64,
    pub speaker: Speaker,
    pub text: String,
}
