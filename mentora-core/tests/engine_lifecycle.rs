use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use approx::assert_abs_diff_eq;
use mentora_core::audio::{wav::WavInput, AudioBackend, InputStream};
use mentora_core::buffering::AudioProducer;
use mentora_core::channel::stub::ScriptedConnector;
use mentora_core::codec::INPUT_MIME_TYPE;
use mentora_core::error::{MentoraError, Result, MICROPHONE_REMEDIATION};
use mentora_core::ipc::events::{SessionState, SessionStatusEvent};
use mentora_core::playback::manual::{ManualClock, ManualLog, ManualOutput};
use mentora_core::playback::PlaybackOutput;
use mentora_core::{EngineConfig, MentoraEngine};
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Microphone that replays a tone, with a configurable number of denials first.
struct FakeBackend {
    denials_left: AtomicUsize,
    input_opens: AtomicUsize,
    samples: Vec<f32>,
    output: Mutex<Option<(ManualClock, ManualLog)>>,
}

impl FakeBackend {
    fn new(denials: usize) -> Arc<Self> {
        let samples = (0..16_000)
            .map(|i| 0.2 * (i as f32 * 0.05).sin())
            .collect();
        Arc::new(Self {
            denials_left: AtomicUsize::new(denials),
            input_opens: AtomicUsize::new(0),
            samples,
            output: Mutex::new(None),
        })
    }

    fn clock(&self) -> ManualClock {
        self.output.lock().as_ref().unwrap().0.clone()
    }

    fn log(&self) -> ManualLog {
        self.output.lock().as_ref().unwrap().1.clone()
    }
}

impl AudioBackend for FakeBackend {
    fn open_input(
        &self,
        producer: AudioProducer,
        gate: Arc<AtomicBool>,
        _preferred: Option<&str>,
    ) -> Result<Box<dyn InputStream>> {
        self.input_opens.fetch_add(1, Ordering::SeqCst);
        let denied = self
            .denials_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if denied {
            return Err(MentoraError::MicrophonePermission("NotAllowedError".into()));
        }
        Ok(Box::new(WavInput::start(
            self.samples.clone(),
            16_000,
            producer,
            gate,
            false,
        )?))
    }

    fn open_output(&self, _preferred: Option<&str>) -> Result<Box<dyn PlaybackOutput>> {
        let (output, clock) = ManualOutput::new();
        *self.output.lock() = Some((clock, output.log()));
        Ok(Box::new(output))
    }
}

fn engine(backend: &Arc<FakeBackend>, connector: &ScriptedConnector) -> MentoraEngine {
    MentoraEngine::new(
        EngineConfig::default(),
        Arc::clone(backend) as Arc<dyn AudioBackend>,
        Arc::new(connector.clone()),
    )
}

async fn wait_for_state(rx: &mut broadcast::Receiver<SessionStatusEvent>, want: SessionState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if event.status == want => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("status channel closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {want}"));
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn greeting_plays_gaplessly_and_microphone_streams() {
    let backend = FakeBackend::new(0);
    let connector = ScriptedConnector::greeting();
    let engine = engine(&backend, &connector);
    let mut status = engine.subscribe_status();
    let mut levels = engine.subscribe_levels();

    engine.activate().await.unwrap();
    wait_for_state(&mut status, SessionState::Listening).await;
    wait_for_state(&mut status, SessionState::Responding).await;
    wait_until(|| backend.log().started().len() == 3).await;

    let started = backend.log().started();
    assert_eq!(started.len(), 3);
    assert_abs_diff_eq!(started[1].at, started[0].at + started[0].duration, epsilon = 1e-9);
    assert_abs_diff_eq!(started[2].at, started[1].at + started[1].duration, epsilon = 1e-9);

    // Let the greeting finish on the virtual clock.
    backend.clock().advance(2.0);
    wait_for_state(&mut status, SessionState::Listening).await;

    // One second of input plus trailing silence yields several full frames.
    wait_until(|| connector.sent_frames().len() >= 3).await;
    let frames = connector.sent_frames();
    assert!(frames.iter().all(|f| f.mime_type == INPUT_MIME_TYPE));
    assert!(levels.try_recv().is_ok());
    assert!(engine.diagnostics_snapshot().frames_sent >= 3);

    engine.close().await.unwrap();
    assert_eq!(engine.status(), SessionState::Idle);
    assert!(backend.log().is_closed());
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn denied_microphone_shows_remediation_and_retry_recovers() {
    let backend = FakeBackend::new(1);
    let connector = ScriptedConnector::new(vec![mentora_core::ChannelEvent::Open]);
    let engine = engine(&backend, &connector);
    let mut status = engine.subscribe_status();

    let err = engine.activate().await.unwrap_err();
    assert!(err.is_permission());
    assert_eq!(engine.status(), SessionState::Error);
    assert_eq!(engine.status_detail().as_deref(), Some(MICROPHONE_REMEDIATION));
    assert_eq!(connector.connect_count(), 0);

    engine.retry().await.unwrap();
    assert_eq!(backend.input_opens.load(Ordering::SeqCst), 2);
    assert_eq!(connector.connect_count(), 1);
    wait_for_state(&mut status, SessionState::Listening).await;

    engine.close().await.unwrap();
    assert_eq!(engine.status(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn channel_error_tears_down_and_stays_visible() {
    let backend = FakeBackend::new(0);
    let connector = ScriptedConnector::new(vec![mentora_core::ChannelEvent::Open]);
    let engine = engine(&backend, &connector);
    let mut status = engine.subscribe_status();

    engine.activate().await.unwrap();
    wait_for_state(&mut status, SessionState::Listening).await;

    assert!(connector.emit(mentora_core::ChannelEvent::Error("reset by peer".into())));
    wait_for_state(&mut status, SessionState::Error).await;
    wait_until(|| backend.log().is_closed()).await;
    assert!(!engine.is_active());
    assert!(engine.status_detail().is_some());

    // A second activation is allowed straight from the error state.
    engine.activate().await.unwrap();
    assert_eq!(connector.connect_count(), 2);
    engine.close().await.unwrap();
    assert_eq!(engine.status(), SessionState::Idle);
}

#[tokio::test]
async fn second_activate_is_rejected_while_live() {
    let backend = FakeBackend::new(0);
    let connector = ScriptedConnector::new(vec![mentora_core::ChannelEvent::Open]);
    let engine = engine(&backend, &connector);

    engine.activate().await.unwrap();
    assert!(matches!(
        engine.activate().await,
        Err(MentoraError::AlreadyActive)
    ));
    engine.close().await.unwrap();
}
