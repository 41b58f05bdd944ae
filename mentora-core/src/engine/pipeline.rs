//! Blocking capture pipeline.
//!
//! ## Stages (per iteration)
//!
//! ```text
//! 1. Drain the capture ring → raw samples at the device rate
//! 2. Resample to 16 kHz
//! 3. Cut into 4096-sample frames
//! 4. Per frame: broadcast its level, encode PCM16 → base64
//! 5. Push to the outbound queue (never blocks; full queue drops the frame)
//! ```
//!
//! Runs in `spawn_blocking` next to the microphone stream, so the Tokio
//! workers stay free for the socket and the session loop. Stops when
//! `running` is cleared or the channel reports closed.
//!
//! Ring overruns counted by the input callback are logged here, never from
//! the audio thread.

use std::sync::OnceLock;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    audio::resample::RateConverter,
    buffering::{frame::FrameAssembler, AudioConsumer, Consumer},
    channel::{OutboundSender, PushOutcome},
    codec::{EncodedFrame, INPUT_SAMPLE_RATE},
    engine::EngineConfig,
    error::MentoraError,
    ipc::events::AudioLevelEvent,
};

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub samples_in: AtomicUsize,
    pub samples_overrun: AtomicUsize,
    pub samples_resampled: AtomicUsize,
    pub frames_encoded: AtomicUsize,
    pub frames_sent: AtomicUsize,
    pub frames_dropped: AtomicUsize,
    pub frames_rejected: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.samples_in.store(0, Ordering::Relaxed);
        self.samples_overrun.store(0, Ordering::Relaxed);
        self.samples_resampled.store(0, Ordering::Relaxed);
        self.frames_encoded.store(0, Ordering::Relaxed);
        self.frames_sent.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.frames_rejected.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            samples_overrun: self.samples_overrun.load(Ordering::Relaxed),
            samples_resampled: self.samples_resampled.load(Ordering::Relaxed),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub samples_in: usize,
    /// Samples the input lost to a full capture ring.
    pub samples_overrun: usize,
    pub samples_resampled: usize,
    pub frames_encoded: usize,
    /// Frames accepted by the outbound queue.
    pub frames_sent: usize,
    /// Frames discarded because the queue was full.
    pub frames_dropped: usize,
    /// Frames refused because the channel had closed.
    pub frames_rejected: usize,
}

/// All context the pipeline needs, passed as one struct so the closure stays tidy.
pub struct PipelineContext {
    pub config: EngineConfig,
    pub consumer: AudioConsumer,
    pub running: Arc<AtomicBool>,
    pub outbound: OutboundSender,
    pub level_tx: broadcast::Sender<AudioLevelEvent>,
    pub level_seq: Arc<AtomicU64>,
    pub capture_sample_rate: u32,
    /// The input's overrun counter, when it keeps one.
    pub overruns: Option<Arc<AtomicUsize>>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Samples drained from the ring per iteration (20 ms at 48 kHz).
const DRAIN_CHUNK: usize = 960;

const DEFAULT_SLEEP_EMPTY_MS: u64 = 5;

/// Why the pipeline returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineExit {
    Stopped,
    ChannelClosed,
    ResamplerFailed,
}

/// Run the blocking pipeline until `ctx.running` is cleared or the channel
/// closes.
pub fn run(mut ctx: PipelineContext) -> PipelineExit {
    let mut resampler = match RateConverter::new(
        ctx.capture_sample_rate,
        INPUT_SAMPLE_RATE,
        DRAIN_CHUNK,
    ) {
        Ok(r) => r,
        Err(e) => {
            error!("failed to create resampler: {e}");
            return PipelineExit::ResamplerFailed;
        }
    };
    info!(
        capture_rate = ctx.capture_sample_rate,
        target_rate = INPUT_SAMPLE_RATE,
        frame_size = ctx.config.frame_size,
        resampling = !resampler.is_passthrough(),
        "capture pipeline started"
    );

    let mut assembler = FrameAssembler::new(ctx.config.frame_size, INPUT_SAMPLE_RATE);
    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut resampled = Vec::with_capacity(DRAIN_CHUNK);
    let mut frames = Vec::new();
    let mut exit = PipelineExit::Stopped;
    let mut overruns_reported = 0;

    'outer: loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        if let Some(overruns) = &ctx.overruns {
            let total = overruns.load(Ordering::Relaxed);
            if total > overruns_reported {
                warn!(
                    dropped = total - overruns_reported,
                    total, "capture ring full, microphone samples lost"
                );
                ctx.diagnostics.samples_overrun.store(total, Ordering::Relaxed);
                overruns_reported = total;
            }
        }

        let n = ctx.consumer.pop_slice(&mut raw);
        if n == 0 {
            std::thread::sleep(Duration::from_millis(empty_sleep_ms()));
            continue;
        }
        ctx.diagnostics.samples_in.fetch_add(n, Ordering::Relaxed);

        resampled.clear();
        resampler.process_into(&raw[..n], &mut resampled);
        if resampled.is_empty() {
            continue;
        }
        ctx.diagnostics
            .samples_resampled
            .fetch_add(resampled.len(), Ordering::Relaxed);

        assembler.push(&resampled, &mut frames);
        for frame in frames.drain(..) {
            let seq = ctx.level_seq.fetch_add(1, Ordering::Relaxed);
            let _ = ctx.level_tx.send(AudioLevelEvent {
                seq,
                rms: frame.rms(),
            });

            let encoded = EncodedFrame::from_samples(&frame.samples);
            ctx.diagnostics.frames_encoded.fetch_add(1, Ordering::Relaxed);

            match ctx.outbound.push(encoded) {
                Ok(PushOutcome::Queued) => {
                    ctx.diagnostics.frames_sent.fetch_add(1, Ordering::Relaxed);
                }
                Ok(PushOutcome::Dropped) => {
                    let dropped = ctx.diagnostics.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    if dropped % 16 == 0 {
                        warn!(dropped = dropped + 1, "outbound queue full, dropping frames");
                    }
                }
                Err(MentoraError::ChannelClosed) => {
                    ctx.diagnostics.frames_rejected.fetch_add(1, Ordering::Relaxed);
                    debug!("channel closed; capture pipeline stopping");
                    exit = PipelineExit::ChannelClosed;
                    break 'outer;
                }
                Err(e) => {
                    ctx.diagnostics.frames_rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "frame rejected");
                }
            }
        }
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        ?exit,
        samples_in = snap.samples_in,
        samples_overrun = snap.samples_overrun,
        frames_encoded = snap.frames_encoded,
        frames_sent = snap.frames_sent,
        frames_dropped = snap.frames_dropped,
        frames_rejected = snap.frames_rejected,
        "capture pipeline stopped"
    );
    exit
}

fn empty_sleep_ms() -> u64 {
    static EMPTY_SLEEP_MS: OnceLock<u64> = OnceLock::new();
    *EMPTY_SLEEP_MS.get_or_init(|| {
        std::env::var("MENTORA_PIPELINE_EMPTY_SLEEP_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_SLEEP_EMPTY_MS)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;
    use std::time::Instant;

    use crate::buffering::{create_audio_ring, Producer};
    use crate::channel::OutboundReceiver;
    use crate::codec::{decode_pcm16_base64, INPUT_MIME_TYPE};

    fn context(
        capacity: usize,
        capture_sample_rate: u32,
    ) -> (
        PipelineContext,
        crate::buffering::AudioProducer,
        OutboundReceiver,
        broadcast::Receiver<AudioLevelEvent>,
    ) {
        let (producer, consumer) = create_audio_ring();
        let (outbound, outbound_rx) = OutboundSender::channel(capacity);
        let (level_tx, level_rx) = broadcast::channel(64);
        let ctx = PipelineContext {
            config: EngineConfig::default(),
            consumer,
            running: Arc::new(AtomicBool::new(true)),
            outbound,
            level_tx,
            level_seq: Arc::new(AtomicU64::new(0)),
            capture_sample_rate,
            overruns: None,
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        };
        (ctx, producer, outbound_rx, level_rx)
    }

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) {
        let start = Instant::now();
        while !done() {
            assert!(start.elapsed() < timeout, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn emits_fixed_size_frames_in_order() {
        let (ctx, mut producer, mut outbound_rx, mut level_rx) = context(32, 16_000);
        let running = Arc::clone(&ctx.running);
        let diagnostics = Arc::clone(&ctx.diagnostics);

        // 2.5 frames: two full frames out, the rest held.
        let samples: Vec<f32> = (0..10_240).map(|i| if i < 4096 { 0.5 } else { -0.25 }).collect();
        producer.push_slice(&samples);

        let handle = thread::spawn(move || run(ctx));
        wait_until(Duration::from_secs(2), || {
            diagnostics.snapshot().frames_encoded == 2
        });
        running.store(false, Ordering::SeqCst);
        assert_eq!(handle.join().unwrap(), PipelineExit::Stopped);

        let first = decode_pcm16_base64(&outbound_rx.try_next().unwrap().data).unwrap();
        let second = decode_pcm16_base64(&outbound_rx.try_next().unwrap().data).unwrap();
        assert!(outbound_rx.try_next().is_none());
        assert_eq!(first.len(), 4096);
        assert_eq!(second.len(), 4096);
        assert!(first.iter().all(|s| *s == 0.5));
        assert!(second.iter().all(|s| *s == -0.25));

        let level = level_rx.try_recv().unwrap();
        assert_eq!(level.seq, 0);
        assert!((level.rms - 0.5).abs() < 1e-6);
    }

    #[test]
    fn full_queue_drops_newest_frames() {
        let (ctx, mut producer, mut outbound_rx, _level_rx) = context(1, 16_000);
        let running = Arc::clone(&ctx.running);
        let diagnostics = Arc::clone(&ctx.diagnostics);

        producer.push_slice(&vec![0.1; 4096 * 3]);
        let handle = thread::spawn(move || run(ctx));
        wait_until(Duration::from_secs(2), || {
            diagnostics.snapshot().frames_encoded == 3
        });
        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();

        let snap = diagnostics.snapshot();
        assert_eq!(snap.frames_sent, 1);
        assert_eq!(snap.frames_dropped, 2);
        assert!(outbound_rx.try_next().is_some());
    }

    #[test]
    fn closed_channel_stops_pipeline() {
        let (ctx, mut producer, outbound_rx, _level_rx) = context(8, 16_000);
        let diagnostics = Arc::clone(&ctx.diagnostics);
        outbound_rx.mark_closed();

        producer.push_slice(&vec![0.1; 4096]);
        let exit = thread::spawn(move || run(ctx)).join().unwrap();

        assert_eq!(exit, PipelineExit::ChannelClosed);
        assert_eq!(diagnostics.snapshot().frames_rejected, 1);
        assert_eq!(diagnostics.snapshot().frames_sent, 0);
    }

    #[test]
    fn resamples_48k_capture_to_labelled_16k_frames() {
        let (ctx, mut producer, mut outbound_rx, _level_rx) = context(32, 48_000);
        let running = Arc::clone(&ctx.running);
        let diagnostics = Arc::clone(&ctx.diagnostics);

        // 1 s at 48 kHz → ~16 000 samples → 3 full frames.
        producer.push_slice(&vec![0.0; 48_000]);
        let handle = thread::spawn(move || run(ctx));
        wait_until(Duration::from_secs(2), || {
            diagnostics.snapshot().frames_encoded == 3
        });
        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();

        let snap = diagnostics.snapshot();
        assert_eq!(snap.samples_in, 48_000);
        assert!((snap.samples_resampled as isize - 16_000).unsigned_abs() <= 400);

        // Whatever the device rate, frames go out at the rate their label names.
        let frame = outbound_rx.try_next().unwrap();
        assert_eq!(frame.mime_type, INPUT_MIME_TYPE);
        assert_eq!(INPUT_MIME_TYPE, format!("audio/pcm;rate={INPUT_SAMPLE_RATE}"));
        assert_eq!(decode_pcm16_base64(&frame.data).unwrap().len(), 4096);
    }

    #[test]
    fn input_overruns_reach_diagnostics() {
        let (mut ctx, _producer, _outbound_rx, _level_rx) = context(8, 16_000);
        let overruns = Arc::new(AtomicUsize::new(0));
        ctx.overruns = Some(Arc::clone(&overruns));
        let running = Arc::clone(&ctx.running);
        let diagnostics = Arc::clone(&ctx.diagnostics);

        let handle = thread::spawn(move || run(ctx));
        overruns.fetch_add(480, Ordering::Relaxed);
        wait_until(Duration::from_secs(2), || {
            diagnostics.snapshot().samples_overrun == 480
        });
        overruns.fetch_add(20, Ordering::Relaxed);
        wait_until(Duration::from_secs(2), || {
            diagnostics.snapshot().samples_overrun == 500
        });
        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();
    }

    #[test]
    fn reset_clears_counters() {
        let diagnostics = PipelineDiagnostics::default();
        diagnostics.frames_dropped.fetch_add(3, Ordering::Relaxed);
        diagnostics.reset();
        assert_eq!(diagnostics.snapshot(), DiagnosticsSnapshot::default());
    }
}
