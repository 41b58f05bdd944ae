//! The per-activation session task.
//!
//! ```text
//! loop select! {
//!     stop signal          → teardown (user close)
//!     channel event        → SessionCore::handle_event
//!     playback tick (10ms) → SessionCore::on_playback_tick
//! }
//! ```
//!
//! Teardown always runs, in this order, and every step is attempted even if
//! an earlier one failed:
//!
//! 1. close the channel;
//! 2. close the microphone (gate off, pipeline stopped and joined) and the output;
//! 3. stop every still-active buffer;
//! 4. clear the active set.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, OutboundSender};
use crate::playback::PlaybackOutput;
use crate::session::{Directive, SessionCore, SessionStats, Transition};

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    UserClosed,
    ChannelFinished,
}

pub(crate) struct SessionTask<O: PlaybackOutput> {
    pub core: SessionCore<O>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
    pub outbound: OutboundSender,
    /// Capture gate shared with the microphone callback.
    pub gate: Arc<AtomicBool>,
    /// Pipeline loop flag.
    pub running: Arc<AtomicBool>,
    pub pipeline: JoinHandle<()>,
    pub stop: oneshot::Receiver<()>,
    pub poll_interval: Duration,
}

pub(crate) async fn run<O: PlaybackOutput>(mut task: SessionTask<O>) -> (SessionEnd, SessionStats) {
    let mut tick = tokio::time::interval(task.poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let end = loop {
        tokio::select! {
            _ = &mut task.stop => break SessionEnd::UserClosed,
            event = task.events.recv() => {
                let Some(event) = event else {
                    // Transport dropped its sender without a lifecycle event.
                    task.core.state().apply(Transition::ChannelClosed);
                    break SessionEnd::ChannelFinished;
                };
                match task.core.handle_event(event) {
                    Directive::Continue => {}
                    Directive::OpenCapture => {
                        task.gate.store(true, Ordering::Release);
                        debug!("capture gate opened");
                    }
                    Directive::Teardown => break SessionEnd::ChannelFinished,
                }
            }
            _ = tick.tick() => task.core.on_playback_tick(),
        }
    };

    teardown(&mut task).await;

    let stats = task.core.stats();
    info!(
        ?end,
        messages = stats.messages,
        buffers = stats.buffers_scheduled,
        rejected = stats.chunks_rejected,
        interruptions = stats.interruptions,
        turns = stats.turns_completed,
        "voice session ended"
    );
    (end, stats)
}

async fn teardown<O: PlaybackOutput>(task: &mut SessionTask<O>) {
    // 1. Channel.
    task.outbound.close();

    // 2. Microphone, then output.
    task.gate.store(false, Ordering::Release);
    task.running.store(false, Ordering::Release);
    if let Err(e) = (&mut task.pipeline).await {
        warn!(error = %e, "capture pipeline task failed");
    }
    task.core.close_output();

    // 3 + 4. Stop and forget remaining buffers.
    let stopped = task.core.stop_playback();
    if stopped > 0 {
        debug!(stopped, "stopped buffers at teardown");
    }
}
