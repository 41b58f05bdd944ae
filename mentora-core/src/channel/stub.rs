//! Scripted channel: replays canned events and records what was sent.
//!
//! Used by tests and by the app's `--offline` mode, where no API key or
//! network is available.

use std::f32::consts::TAU;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    ChannelConnector, ChannelEvent, ChannelHandle, OutboundSender, ServerMessage, SessionSetup,
};
use crate::codec::{encode_pcm16_base64, EncodedFrame, OUTPUT_SAMPLE_RATE};
use crate::error::Result;

#[derive(Default)]
struct Recorded {
    connects: usize,
    setups: Vec<SessionSetup>,
    frames: Vec<EncodedFrame>,
    live: Option<LiveEnds>,
}

struct LiveEnds {
    events: mpsc::UnboundedSender<ChannelEvent>,
    outbound: OutboundSender,
    remote_closed: Arc<Mutex<bool>>,
}

/// A `ChannelConnector` that needs no network.
#[derive(Clone)]
pub struct ScriptedConnector {
    script: Vec<ChannelEvent>,
    recorded: Arc<Mutex<Recorded>>,
}

impl ScriptedConnector {
    /// Every `connect` replays `script` in order.
    pub fn new(script: Vec<ChannelEvent>) -> Self {
        Self {
            script,
            recorded: Arc::new(Mutex::new(Recorded::default())),
        }
    }

    /// Opens, then speaks a short three-part tone as the mentor's "greeting".
    pub fn greeting() -> Self {
        let mut script = vec![ChannelEvent::Open];
        for (i, freq) in [392.0, 494.0, 587.0].into_iter().enumerate() {
            let mut message = ServerMessage::audio(tone_chunk(freq, 0.4));
            message.turn_complete = i == 2;
            script.push(ChannelEvent::Message(message));
        }
        Self::new(script)
    }

    pub fn connect_count(&self) -> usize {
        self.recorded.lock().connects
    }

    /// Setups passed to `connect`, in call order.
    pub fn setups(&self) -> Vec<SessionSetup> {
        self.recorded.lock().setups.clone()
    }

    /// Frames received by the "server" so far.
    pub fn sent_frames(&self) -> Vec<EncodedFrame> {
        self.recorded.lock().frames.clone()
    }

    /// Deliver an extra event on the most recent channel.
    ///
    /// Returns `false` when no channel is connected or its consumer is gone.
    pub fn emit(&self, event: ChannelEvent) -> bool {
        let recorded = self.recorded.lock();
        let Some(live) = recorded.live.as_ref() else {
            return false;
        };
        if matches!(event, ChannelEvent::Error(_) | ChannelEvent::Closed { .. }) {
            *live.remote_closed.lock() = true;
            live.outbound.close();
        }
        live.events.send(event).is_ok()
    }
}

impl std::fmt::Debug for ScriptedConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedConnector")
            .field("script_len", &self.script.len())
            .field("connects", &self.connect_count())
            .finish()
    }
}

impl ChannelConnector for ScriptedConnector {
    fn connect(&self, setup: &SessionSetup, outbound_capacity: usize) -> Result<ChannelHandle> {
        let (outbound, mut outbound_rx) = OutboundSender::channel(outbound_capacity);
        let (events_tx, events) = mpsc::unbounded_channel();
        let remote_closed = Arc::new(Mutex::new(false));

        for event in &self.script {
            if matches!(event, ChannelEvent::Error(_) | ChannelEvent::Closed { .. }) {
                *remote_closed.lock() = true;
                outbound.close();
            }
            let _ = events_tx.send(event.clone());
        }

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let recorded = Arc::clone(&self.recorded);
            let events_tx = events_tx.clone();
            let remote_closed = Arc::clone(&remote_closed);
            runtime.spawn(async move {
                while let Some(frame) = outbound_rx.next().await {
                    recorded.lock().frames.push(frame);
                }
                if !*remote_closed.lock() {
                    debug!("scripted channel closed by client");
                    let _ = events_tx.send(ChannelEvent::Closed { reason: None });
                }
            });
        }

        let mut recorded = self.recorded.lock();
        recorded.connects += 1;
        recorded.setups.push(setup.clone());
        recorded.live = Some(LiveEnds {
            events: events_tx,
            outbound: outbound.clone(),
            remote_closed,
        });

        Ok(ChannelHandle { outbound, events })
    }
}

/// Base64 PCM16 sine tone at the output rate, with a short fade at each end.
pub fn tone_chunk(freq: f32, secs: f32) -> String {
    let len = (secs * OUTPUT_SAMPLE_RATE as f32) as usize;
    let fade = (OUTPUT_SAMPLE_RATE / 100) as usize;
    let samples: Vec<f32> = (0..len)
        .map(|i| {
            let t = i as f32 / OUTPUT_SAMPLE_RATE as f32;
            let edge = i.min(len - 1 - i).min(fade) as f32 / fade as f32;
            0.3 * edge * (TAU * freq * t).sin()
        })
        .collect();
    encode_pcm16_base64(&samples)
}
