//! Session core: turns channel events into playback and state changes.
//!
//! `SessionCore` is synchronous and owned by exactly one task (the engine's
//! session loop), which makes the ordering guarantees simple: events are
//! handled one at a time, in arrival order, and the scheduler is never
//! touched concurrently.

pub mod state;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ServerMessage};
use crate::error::CONNECTION_FAILURE;
use crate::ipc::events::{Speaker, TranscriptEvent};
use crate::playback::{PlaybackBuffer, PlaybackOutput, PlaybackScheduler};

pub use state::{next_state, StateMachine, Transition};

/// What the session loop must do after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Continue,
    /// Channel is open: start forwarding captured frames.
    OpenCapture,
    /// The channel is finished; run teardown.
    Teardown,
}

/// Per-session counters, logged at teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub messages: u64,
    pub buffers_scheduled: u64,
    pub chunks_rejected: u64,
    pub interruptions: u64,
    pub turns_completed: u64,
}

pub struct SessionCore<O: PlaybackOutput> {
    state: StateMachine,
    scheduler: PlaybackScheduler<O>,
    transcripts: broadcast::Sender<TranscriptEvent>,
    transcript_seq: u64,
    stats: SessionStats,
}

impl<O: PlaybackOutput> SessionCore<O> {
    pub fn new(
        state: StateMachine,
        output: O,
        transcripts: broadcast::Sender<TranscriptEvent>,
    ) -> Self {
        Self {
            state,
            scheduler: PlaybackScheduler::new(output),
            transcripts,
            transcript_seq: 0,
            stats: SessionStats::default(),
        }
    }

    /// Handle one channel lifecycle event.
    pub fn handle_event(&mut self, event: ChannelEvent) -> Directive {
        match event {
            ChannelEvent::Open => {
                info!("session channel open");
                self.state.apply(Transition::ChannelOpened);
                Directive::OpenCapture
            }
            ChannelEvent::Message(message) => {
                self.handle_message(message);
                Directive::Continue
            }
            ChannelEvent::Error(reason) => {
                warn!(%reason, "session channel error");
                self.state
                    .apply(Transition::Failed(CONNECTION_FAILURE.to_string()));
                Directive::Teardown
            }
            ChannelEvent::Closed { reason } => {
                info!(reason = reason.as_deref().unwrap_or("none"), "session channel closed");
                self.state.apply(Transition::ChannelClosed);
                Directive::Teardown
            }
        }
    }

    fn handle_message(&mut self, message: ServerMessage) {
        self.stats.messages += 1;

        let mut scheduled_any = false;
        for chunk in &message.audio {
            let buffer = match PlaybackBuffer::from_base64(chunk) {
                Ok(buffer) => buffer,
                Err(e) => {
                    self.stats.chunks_rejected += 1;
                    warn!(error = %e, "skipping undecodable audio chunk");
                    continue;
                }
            };
            match self.scheduler.schedule(buffer) {
                Ok(Some(_)) => {
                    self.stats.buffers_scheduled += 1;
                    scheduled_any = true;
                }
                Ok(None) => {}
                Err(e) => {
                    self.stats.chunks_rejected += 1;
                    warn!(error = %e, "output refused playback buffer");
                }
            }
        }
        if scheduled_any {
            self.state.apply(Transition::PlaybackStarted);
        }

        if let Some(text) = message.input_transcript {
            self.publish_transcript(Speaker::Student, text);
        }
        if let Some(text) = message.output_transcript {
            self.publish_transcript(Speaker::Mentor, text);
        }

        if message.interrupted {
            self.interrupt();
        }
        if message.turn_complete {
            self.stats.turns_completed += 1;
            debug!(active = self.scheduler.active_len(), "model turn complete");
        }
    }

    /// Barge-in: silence the mentor and return to listening.
    pub fn interrupt(&mut self) {
        self.stats.interruptions += 1;
        let stopped = self.scheduler.interrupt();
        info!(stopped, "mentor interrupted");
        self.state.apply(Transition::Interrupted);
    }

    /// Collect finished buffers; leave `Responding` once nothing is playing.
    pub fn on_playback_tick(&mut self) {
        if self.scheduler.reap().drained {
            self.state.apply(Transition::PlaybackDrained);
        }
    }

    /// Teardown step: stop and forget every buffer.
    pub fn stop_playback(&mut self) -> usize {
        self.scheduler.stop_all()
    }

    /// Teardown step: release the output device.
    pub fn close_output(&mut self) {
        if let Err(e) = self.scheduler.close_output() {
            debug!(error = %e, "closing output failed; ignoring");
        }
    }

    fn publish_transcript(&mut self, speaker: Speaker, text: String) {
        if text.trim().is_empty() {
            return;
        }
        self.transcript_seq += 1;
        let _ = self.transcripts.send(TranscriptEvent {
            seq: self.transcript_seq,
            speaker,
            text,
        });
    }

    pub fn state(&self) -> &StateMachine {
        &self.state
    }

    pub fn scheduler(&self) -> &PlaybackScheduler<O> {
        &self.scheduler
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_pcm16_base64;
    use crate::ipc::events::SessionState;
    use crate::playback::manual::ManualOutput;

    fn core() -> (
        SessionCore<ManualOutput>,
        crate::playback::manual::ManualClock,
        broadcast::Receiver<TranscriptEvent>,
    ) {
        let (output, clock) = ManualOutput::new();
        let (tx, rx) = broadcast::channel(16);
        let state = StateMachine::new();
        state.apply(Transition::Activate);
        (SessionCore::new(state, output, tx), clock, rx)
    }

    fn chunk(secs: f64) -> String {
        encode_pcm16_base64(&vec![0.25; (secs * 24_000.0) as usize])
    }

    #[test]
    fn open_requests_capture() {
        let (mut core, _, _) = core();
        assert_eq!(core.handle_event(ChannelEvent::Open), Directive::OpenCapture);
        assert_eq!(core.state().state(), SessionState::Listening);
    }

    #[test]
    fn audio_moves_to_responding_and_back() {
        let (mut core, clock, _) = core();
        core.handle_event(ChannelEvent::Open);
        core.handle_event(ChannelEvent::Message(ServerMessage::audio(chunk(0.5))));
        assert_eq!(core.state().state(), SessionState::Responding);

        clock.advance(0.6);
        core.on_playback_tick();
        assert_eq!(core.state().state(), SessionState::Listening);
    }

    #[test]
    fn bad_chunk_is_skipped_without_state_change() {
        let (mut core, _, _) = core();
        core.handle_event(ChannelEvent::Open);
        let message = ServerMessage {
            audio: vec!["%%%".into(), String::new()],
            ..ServerMessage::default()
        };
        assert_eq!(core.handle_event(ChannelEvent::Message(message)), Directive::Continue);
        assert_eq!(core.state().state(), SessionState::Listening);
        assert_eq!(core.stats().chunks_rejected, 1);
        assert!(core.scheduler().is_idle());
    }

    #[test]
    fn all_audio_parts_are_scheduled() {
        let (mut core, _, _) = core();
        core.handle_event(ChannelEvent::Open);
        let message = ServerMessage {
            audio: vec![chunk(0.1), chunk(0.2)],
            ..ServerMessage::default()
        };
        core.handle_event(ChannelEvent::Message(message));
        assert_eq!(core.scheduler().active_len(), 2);
        assert!((core.scheduler().clock() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn error_fails_with_connection_message() {
        let (mut core, _, _) = core();
        let directive = core.handle_event(ChannelEvent::Error("reset by peer".into()));
        assert_eq!(directive, Directive::Teardown);
        assert_eq!(core.state().state(), SessionState::Error);
        assert_eq!(core.state().detail().as_deref(), Some(CONNECTION_FAILURE));
    }

    #[test]
    fn transcripts_are_forwarded_in_order() {
        let (mut core, _, mut rx) = core();
        core.handle_event(ChannelEvent::Open);
        core.handle_event(ChannelEvent::Message(ServerMessage {
            input_transcript: Some("how do I get an internship".into()),
            output_transcript: Some("Start with".into()),
            ..ServerMessage::default()
        }));
        core.handle_event(ChannelEvent::Message(ServerMessage {
            output_transcript: Some("   ".into()),
            ..ServerMessage::default()
        }));

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!((first.seq, first.speaker), (1, Speaker::Student));
        assert_eq!((second.seq, second.speaker), (2, Speaker::Mentor));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn interrupted_message_silences_playback() {
        let (mut core, _, _) = core();
        core.handle_event(ChannelEvent::Open);
        core.handle_event(ChannelEvent::Message(ServerMessage::audio(chunk(0.5))));
        core.handle_event(ChannelEvent::Message(ServerMessage::interruption()));

        assert!(core.scheduler().is_idle());
        assert_eq!(core.scheduler().clock(), 0.0);
        assert_eq!(core.state().state(), SessionState::Listening);
        assert_eq!(core.stats().interruptions, 1);
    }
}
