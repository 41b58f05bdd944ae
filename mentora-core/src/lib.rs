//! # mentora-core
//!
//! Live voice mentor engine SDK.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioBackend input → SPSC RingBuffer → Pipeline(spawn_blocking)
//!                                                        │ resample → 16 kHz
//!                                                        │ 4096-sample frames → PCM16 base64
//!                                                        ▼
//!                                              OutboundSender → live channel
//!
//! live channel → ChannelEvent → session task → SessionCore
//!                                                 ├─ StateMachine (broadcast status)
//!                                                 └─ PlaybackScheduler → speaker (24 kHz)
//! ```
//!
//! The capture callback is zero-alloc. All heap work happens in the
//! pipeline thread and the session task.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod channel;
pub mod codec;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod playback;
pub mod services;
pub mod session;

// Convenience re-exports for downstream crates
pub use audio::{AudioBackend, CpalBackend, InputStream};
pub use channel::{
    live::LiveConnector, stub::ScriptedConnector, ChannelConnector, ChannelEvent, SessionSetup,
};
pub use engine::{EngineConfig, MentoraEngine};
pub use error::{MentoraError, Result};
pub use ipc::events::{AudioLevelEvent, SessionState, SessionStatusEvent, Speaker, TranscriptEvent};
pub use services::{gemini::GeminiClient, ResumeAnalyzer, TextGenerator};
