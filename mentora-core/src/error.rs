use thiserror::Error;

/// Shown when the microphone cannot be opened. Recoverable via an explicit retry.
pub const MICROPHONE_REMEDIATION: &str = "Microphone permission was denied, dismissed, or blocked. \
Please allow microphone access in your system settings to speak with the mentor.";

/// Shown for any transport or remote failure of the live session.
pub const CONNECTION_FAILURE: &str =
    "A connection error occurred with the AI mentor. Please try again.";

/// All errors produced by mentora-core.
#[derive(Debug, Error)]
pub enum MentoraError {
    #[error("microphone unavailable: {0}")]
    MicrophonePermission(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("session channel error: {0}")]
    Channel(String),

    #[error("session channel is closed")]
    ChannelClosed,

    #[error("audio codec error: {0}")]
    Codec(String),

    #[error("service error: {0}")]
    Service(String),

    #[error("a voice session is already active")]
    AlreadyActive,

    #[error("no voice session is active")]
    NotActive,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MentoraError {
    /// Human-readable text for the UI shell.
    ///
    /// Microphone failures carry remediation text; everything that breaks the
    /// live session collapses to one generic connection message.
    pub fn user_message(&self) -> String {
        match self {
            Self::MicrophonePermission(_) | Self::NoDefaultInputDevice => {
                MICROPHONE_REMEDIATION.to_string()
            }
            Self::Channel(_) | Self::ChannelClosed => CONNECTION_FAILURE.to_string(),
            other => other.to_string(),
        }
    }

    /// Whether this error came from the microphone rather than the channel.
    pub fn is_permission(&self) -> bool {
        matches!(
            self,
            Self::MicrophonePermission(_) | Self::NoDefaultInputDevice
        )
    }
}

pub type Result<T> = std::result::Result<T, MentoraError>;
