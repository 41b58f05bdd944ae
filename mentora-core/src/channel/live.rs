//! WebSocket transport to the hosted live model.
//!
//! `LiveConnector::connect` spawns one Tokio task per session. The task owns
//! the socket and multiplexes three sources:
//!
//! - the client close signal (from `OutboundSender::close`);
//! - queued outbound frames;
//! - inbound server frames.
//!
//! Everything it learns is reported as `ChannelEvent`s, so the engine never
//! touches the socket directly.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use super::protocol::{self, AudioFrameMessage, ServerFrame};
use super::{ChannelConnector, ChannelEvent, ChannelHandle, OutboundReceiver, OutboundSender, SessionSetup};
use crate::error::{MentoraError, Result};

/// Public endpoint of the bidirectional generate-content stream.
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type EventTx = mpsc::UnboundedSender<ChannelEvent>;

/// Connects to the live model with an API key.
#[derive(Clone)]
pub struct LiveConnector {
    api_key: String,
    endpoint: String,
}

impl LiveConnector {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }
}

impl std::fmt::Debug for LiveConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConnector")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl ChannelConnector for LiveConnector {
    fn connect(&self, setup: &SessionSetup, outbound_capacity: usize) -> Result<ChannelHandle> {
        if self.api_key.trim().is_empty() {
            return Err(MentoraError::Channel("no API key configured".into()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| MentoraError::Channel(format!("no async runtime: {e}")))?;

        let setup_json = protocol::setup_message(setup)?;
        let (outbound, outbound_rx) = OutboundSender::channel(outbound_capacity);
        let (events_tx, events) = mpsc::unbounded_channel();

        info!(endpoint = %self.endpoint, model = %setup.model, "connecting to live model");
        runtime.spawn(run_transport(self.url(), setup_json, outbound_rx, events_tx));

        Ok(ChannelHandle { outbound, events })
    }
}

async fn run_transport(
    url: String,
    setup_json: String,
    mut outbound: OutboundReceiver,
    events: EventTx,
) {
    let connected = tokio::select! {
        _ = outbound.closed() => {
            debug!("channel closed before connect finished");
            let _ = events.send(ChannelEvent::Closed { reason: None });
            return;
        }
        result = connect_async(url) => result,
    };

    let socket = match connected {
        Ok((socket, _response)) => socket,
        Err(e) => {
            warn!(error = %e, "websocket connect failed");
            fail(&outbound, &events, format!("connect failed: {e}"));
            return;
        }
    };
    let (mut sink, mut source) = socket.split();

    if let Err(e) = sink.send(Message::Text(setup_json)).await {
        fail(&outbound, &events, format!("setup send failed: {e}"));
        return;
    }
    debug!("setup message sent");

    let mut opened = false;
    let mut frames_sent: u64 = 0;

    loop {
        tokio::select! {
            frame = outbound.next() => {
                let Some(frame) = frame else {
                    // Client asked to close.
                    let _ = sink.close().await;
                    info!(frames_sent, "live channel closed by client");
                    let _ = events.send(ChannelEvent::Closed { reason: None });
                    return;
                };
                let text = match protocol::realtime_input_message(AudioFrameMessage::from(frame)) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "dropping unserialisable frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    fail(&outbound, &events, format!("send failed: {e}"));
                    return;
                }
                frames_sent += 1;
                trace!(frames_sent, "frame sent");
            }
            incoming = source.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty());
                        info!(reason = reason.as_deref().unwrap_or("none"), "live channel closed by server");
                        outbound.mark_closed();
                        let _ = events.send(ChannelEvent::Closed { reason });
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        fail(&outbound, &events, format!("receive failed: {e}"));
                        return;
                    }
                    None => {
                        outbound.mark_closed();
                        let _ = events.send(ChannelEvent::Closed { reason: None });
                        return;
                    }
                };

                match protocol::parse_server_message(&text) {
                    Ok(ServerFrame::SetupComplete) if !opened => {
                        opened = true;
                        let _ = events.send(ChannelEvent::Open);
                    }
                    Ok(ServerFrame::SetupComplete) => {}
                    Ok(ServerFrame::Content(message)) => {
                        let _ = events.send(ChannelEvent::Message(message));
                    }
                    Ok(ServerFrame::GoAway) => warn!("server announced disconnect"),
                    Ok(ServerFrame::Other) => trace!("ignoring server frame"),
                    Err(e) => warn!(error = %e, "ignoring malformed server frame"),
                }
            }
        }
    }
}

fn fail(outbound: &OutboundReceiver, events: &EventTx, reason: String) {
    warn!(%reason, "live channel failed");
    outbound.mark_closed();
    let _ = events.send(ChannelEvent::Error(reason));
}
