//! Session state machine.
//!
//! ```text
//!            activate            open            first buffer
//!   idle ───────────► connecting ─────► listening ◄──────────► responding
//!    ▲  ▲                                    drained / interrupted
//!    │  └──── channel close (not from error) ─────────────────────┐
//!    │                                                            │
//!    └──── user close ◄──── error ◄──── channel error / mic failure (any state)
//! ```
//!
//! `StateMachine` is the only writer of `SessionState`. Every change is
//! broadcast as a `SessionStatusEvent`.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::ipc::events::{SessionState, SessionStatusEvent};

/// Broadcast capacity: status changes are rare, 64 covers any slow consumer.
const STATUS_BROADCAST_CAP: usize = 64;

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// User requested a session.
    Activate,
    /// Channel reported open.
    ChannelOpened,
    /// A playback buffer was scheduled.
    PlaybackStarted,
    /// The active playback set became empty.
    PlaybackDrained,
    /// Server signalled barge-in.
    Interrupted,
    /// Fatal failure, with the user-facing message.
    Failed(String),
    /// Channel ended cleanly.
    ChannelClosed,
    /// User dismissed the session.
    UserClosed,
}

/// Pure transition function. `None` means "ignored in this state".
pub fn next_state(current: SessionState, transition: &Transition) -> Option<SessionState> {
    use SessionState::*;

    match (current, transition) {
        (Idle | Error, Transition::Activate) => Some(Connecting),
        (Connecting, Transition::ChannelOpened) => Some(Listening),
        (Listening, Transition::PlaybackStarted) => Some(Responding),
        (Responding, Transition::PlaybackDrained) => Some(Listening),
        (Responding, Transition::Interrupted) => Some(Listening),
        (_, Transition::Failed(_)) => Some(Error),
        // An error stays visible until the user acts on it.
        (Error, Transition::ChannelClosed) => None,
        (_, Transition::ChannelClosed | Transition::UserClosed) => Some(Idle),
        _ => None,
    }
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    detail: Option<String>,
}

/// Shared handle to the session state. Clones observe and drive the same state.
#[derive(Clone)]
pub struct StateMachine {
    inner: Arc<Mutex<Inner>>,
    tx: broadcast::Sender<SessionStatusEvent>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(STATUS_BROADCAST_CAP);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::Idle,
                detail: None,
            })),
            tx,
        }
    }

    /// Apply a transition. Returns the new state if it changed.
    pub fn apply(&self, transition: Transition) -> Option<SessionState> {
        let event = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            let Some(to) = next_state(from, &transition) else {
                debug!(state = %from, ?transition, "transition ignored");
                return None;
            };

            let detail = match transition {
                Transition::Failed(message) => Some(message),
                _ => None,
            };
            if to == from && detail == inner.detail {
                return None;
            }

            inner.state = to;
            inner.detail = detail.clone();
            info!(from = %from, to = %to, "session state changed");
            SessionStatusEvent { status: to, detail }
        };

        let status = event.status;
        let _ = self.tx.send(event);
        Some(status)
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Detail attached to the current state (the error message, if any).
    pub fn detail(&self) -> Option<String> {
        self.inner.lock().detail.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.tx.subscribe()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
