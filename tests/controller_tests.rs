// Integration tests for the recording session controller
//
// These drive the state machine over a scripted capture backend that counts
// device acquisitions and releases, so every exit path can be checked for
// dangling resources.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use voicememo::{
    AudioFrame, CaptureBackend, CaptureStream, EncodingChoice, RecorderConfig, RecorderController,
    RecorderError, SessionState, StreamGuard, StreamSpec,
};

#[derive(Default)]
struct Counters {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl Counters {
    fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct CountingGuard {
    counters: Arc<Counters>,
}

impl StreamGuard for CountingGuard {
    fn release(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Test double standing in for the host microphone. Acquisition can be
/// delayed or scripted to fail; granted streams are fed from the test via
/// the shared frame sender.
struct ScriptedBackend {
    counters: Arc<Counters>,
    supported: bool,
    fail_with: Option<RecorderError>,
    acquire_delay: Option<Duration>,
    frames: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
}

#[async_trait::async_trait]
impl CaptureBackend for ScriptedBackend {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn acquire(&self) -> Result<CaptureStream, RecorderError> {
        if let Some(delay) = self.acquire_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }

        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);
        *self.frames.lock().unwrap() = Some(tx);

        Ok(CaptureStream::new(
            StreamSpec {
                sample_rate: 16000,
                channels: 1,
            },
            rx,
            Box::new(CountingGuard {
                counters: Arc::clone(&self.counters),
            }),
        ))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct Harness {
    controller: RecorderController,
    counters: Arc<Counters>,
    frames: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    completions: Arc<Mutex<Vec<u64>>>,
}

fn harness() -> Harness {
    build_harness(RecorderConfig::default(), None, None, true)
}

fn build_harness(
    config: RecorderConfig,
    fail_with: Option<RecorderError>,
    acquire_delay: Option<Duration>,
    supported: bool,
) -> Harness {
    let counters = Arc::new(Counters::default());
    let frames = Arc::new(Mutex::new(None));

    let backend = Arc::new(ScriptedBackend {
        counters: Arc::clone(&counters),
        supported,
        fail_with,
        acquire_delay,
        frames: Arc::clone(&frames),
    });

    let controller = RecorderController::new(backend, config);

    let completions: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let completions = Arc::clone(&completions);
        controller.set_on_complete(move |_artifact, elapsed| {
            completions.lock().unwrap().push(elapsed);
        });
    }

    Harness {
        controller,
        counters,
        frames,
        completions,
    }
}

async fn wait_for_state(
    controller: &RecorderController,
    pred: impl Fn(&SessionState) -> bool,
) -> SessionState {
    let mut rx = controller.watch_state();
    loop {
        {
            let state = rx.borrow_and_update().clone();
            if pred(&state) {
                return state;
            }
        }
        rx.changed().await.expect("state channel closed");
    }
}

#[tokio::test(start_paused = true)]
async fn fresh_session_records_three_seconds_and_completes() {
    let h = harness();

    h.controller.start().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Recording);

    tokio::time::sleep(Duration::from_millis(3500)).await;
    h.controller.stop().await.unwrap();

    assert_eq!(h.controller.state(), SessionState::Completed);
    assert_eq!(h.controller.elapsed_seconds(), 3);
    assert_eq!(h.controller.formatted_elapsed(), "0:03");

    let artifact = h.controller.artifact().await.expect("artifact retained");
    assert!(!artifact.is_empty());
    assert_eq!(artifact.duration_seconds, 3);

    // Completion hand-off fired exactly once with the elapsed seconds.
    assert_eq!(*h.completions.lock().unwrap(), vec![3]);

    // Device fully released.
    assert_eq!(h.counters.acquired(), 1);
    assert_eq!(h.counters.released(), 1);
}

#[tokio::test(start_paused = true)]
async fn pause_suspends_the_elapsed_counter() {
    let h = harness();

    h.controller.start().await.unwrap();
    h.controller.pause().await;
    assert_eq!(h.controller.state(), SessionState::Paused);

    // Five seconds of wall-clock pause must not count.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.controller.elapsed_seconds(), 0);

    h.controller.resume().await;
    assert_eq!(h.controller.state(), SessionState::Recording);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    h.controller.stop().await.unwrap();

    assert_eq!(h.controller.state(), SessionState::Completed);
    assert_eq!(h.controller.elapsed_seconds(), 2);
    assert_eq!(*h.completions.lock().unwrap(), vec![2]);
}

#[tokio::test(start_paused = true)]
async fn resuming_mid_second_never_credits_paused_time() {
    let h = harness();

    h.controller.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(h.controller.elapsed_seconds(), 2);

    // Pause halfway through a second; the stale tick boundary at 3.0s must
    // not fire a credit when the session resumes near it.
    h.controller.pause().await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    h.controller.resume().await;

    tokio::time::sleep(Duration::from_millis(1500)).await;
    h.controller.stop().await.unwrap();

    assert_eq!(h.controller.elapsed_seconds(), 3);
    assert_eq!(*h.completions.lock().unwrap(), vec![3]);
}

#[tokio::test(start_paused = true)]
async fn start_is_a_no_op_outside_idle() {
    let h = harness();

    h.controller.start().await.unwrap();
    h.controller.start().await.unwrap();

    assert_eq!(h.controller.state(), SessionState::Recording);
    assert_eq!(h.counters.acquired(), 1);

    h.controller.stop().await.unwrap();
    assert_eq!(h.counters.released(), 1);
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume_outside_their_phase_are_no_ops() {
    let h = harness();

    h.controller.pause().await;
    h.controller.resume().await;
    assert_eq!(h.controller.state(), SessionState::Idle);

    h.controller.start().await.unwrap();
    h.controller.resume().await; // not paused
    assert_eq!(h.controller.state(), SessionState::Recording);

    h.controller.pause().await;
    h.controller.pause().await; // already paused
    assert_eq!(h.controller.state(), SessionState::Paused);

    h.controller.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancel_discards_the_session_and_releases_everything() {
    let h = harness();

    h.controller.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(h.controller.elapsed_seconds(), 1);

    h.controller.cancel().await;

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.controller.elapsed_seconds(), 0);
    assert!(h.controller.artifact().await.is_none());
    assert!(h.completions.lock().unwrap().is_empty());
    assert_eq!(h.counters.acquired(), 1);
    assert_eq!(h.counters.released(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_acquisition_lands_in_idle_once_resolved() {
    let h = build_harness(
        RecorderConfig::default(),
        None,
        Some(Duration::from_millis(500)),
        true,
    );

    let starter = {
        let controller = h.controller.clone();
        tokio::spawn(async move { controller.start().await })
    };

    // Let start() reach the in-flight acquisition.
    tokio::task::yield_now().await;
    assert_eq!(h.controller.state(), SessionState::AcquiringDevice);

    h.controller.cancel().await;
    assert_eq!(h.controller.state(), SessionState::AcquiringDevice);

    // Acquisition resolves; the remembered cancel must win.
    tokio::time::sleep(Duration::from_millis(600)).await;
    starter.await.unwrap().unwrap();

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(h.controller.artifact().await.is_none());
    assert!(h.completions.lock().unwrap().is_empty());
    assert_eq!(h.counters.acquired(), 1);
    assert_eq!(h.counters.released(), 1);
}

#[tokio::test]
async fn rejected_permission_request_stays_idle_with_error() {
    let h = build_harness(
        RecorderConfig::default(),
        Some(RecorderError::PermissionDenied),
        None,
        true,
    );

    let err = h.controller.request_permission().await.unwrap_err();
    assert_eq!(err, RecorderError::PermissionDenied);

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.controller.last_error(), Some(RecorderError::PermissionDenied));
    assert_eq!(h.counters.acquired(), 0);
    assert_eq!(h.counters.released(), 0);
}

#[tokio::test]
async fn denied_device_fails_the_session() {
    let h = build_harness(
        RecorderConfig::default(),
        Some(RecorderError::PermissionDenied),
        None,
        true,
    );

    let err = h.controller.start().await.unwrap_err();
    assert_eq!(err, RecorderError::PermissionDenied);
    assert_eq!(
        h.controller.state(),
        SessionState::Failed(RecorderError::PermissionDenied)
    );
    assert_eq!(h.counters.acquired(), 0);
}

#[tokio::test]
async fn unsupported_host_is_reported_before_any_acquisition() {
    let h = build_harness(RecorderConfig::default(), None, None, false);

    assert!(!h.controller.is_supported());
    let err = h.controller.start().await.unwrap_err();
    assert_eq!(err, RecorderError::UnsupportedHost);
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.controller.last_error(), Some(RecorderError::UnsupportedHost));
}

#[tokio::test(start_paused = true)]
async fn encoder_error_mid_session_fails_and_releases_everything() {
    // A tiny artifact cap makes the first real frame overflow the encoder.
    let config = RecorderConfig {
        max_artifact_bytes: 100,
        ..RecorderConfig::default()
    };
    let h = build_harness(config, None, None, true);

    h.controller.start().await.unwrap();

    let frames = h.frames.lock().unwrap().clone().expect("stream granted");
    frames
        .send(AudioFrame {
            samples: vec![0i16; 1000],
            timestamp_ms: 0,
        })
        .await
        .unwrap();

    let state = wait_for_state(&h.controller, |s| matches!(*s, SessionState::Failed(_))).await;
    assert!(matches!(state, SessionState::Failed(RecorderError::EncodingRuntime(_))));
    assert!(matches!(
        h.controller.last_error(),
        Some(RecorderError::EncodingRuntime(_))
    ));

    assert!(h.controller.artifact().await.is_none());
    assert!(h.completions.lock().unwrap().is_empty());
    assert_eq!(h.counters.acquired(), 1);
    assert_eq!(h.counters.released(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_forces_teardown_from_any_phase() {
    let h = harness();

    h.controller.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    h.controller.shutdown().await;

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.controller.elapsed_seconds(), 0);
    assert_eq!(h.controller.current_level(), 0.0);
    assert_eq!(h.counters.acquired(), 1);
    assert_eq!(h.counters.released(), 1);
}

#[tokio::test(start_paused = true)]
async fn clear_drops_a_completed_artifact() {
    let h = harness();

    h.controller.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    h.controller.stop().await.unwrap();
    assert!(h.controller.artifact().await.is_some());

    h.controller.clear().await;
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(h.controller.artifact().await.is_none());

    // A fresh session starts cleanly afterwards.
    h.controller.start().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Recording);
    h.controller.stop().await.unwrap();
    assert_eq!(h.counters.acquired(), 2);
    assert_eq!(h.counters.released(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_finalize_wins_over_the_in_flight_stop() {
    let h = harness();

    h.controller.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let stopper = {
        let controller = h.controller.clone();
        tokio::spawn(async move { controller.stop().await })
    };

    // Let stop() publish Finalizing and park on the encoder flush.
    for _ in 0..10 {
        tokio::task::yield_now().await;
        if h.controller.state() == SessionState::Finalizing {
            break;
        }
    }
    assert_eq!(h.controller.state(), SessionState::Finalizing);

    h.controller.shutdown().await;
    stopper.await.unwrap().unwrap();

    // The forced cleanup is authoritative: no artifact, no callback, Idle.
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(h.controller.artifact().await.is_none());
    assert!(h.completions.lock().unwrap().is_empty());
    assert_eq!(h.counters.acquired(), 1);
    assert_eq!(h.counters.released(), 1);
}

#[tokio::test(start_paused = true)]
async fn level_feed_is_live_for_the_whole_session() {
    let h = harness();

    h.controller.start().await.unwrap();
    assert_eq!(h.controller.current_level(), 0.0);

    let loud: Vec<i16> = (0..2048)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * 440.0 * i as f64 / 16000.0;
            (phase.sin() * 28000.0) as i16
        })
        .collect();
    let frames = h.frames.lock().unwrap().clone().expect("stream granted");
    frames
        .send(AudioFrame {
            samples: loud,
            timestamp_ms: 0,
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.controller.current_level() > 0.0);

    // The meter stays live across pause.
    h.controller.pause().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.controller.current_level() > 0.0);

    h.controller.resume().await;
    h.controller.stop().await.unwrap();
    assert_eq!(h.controller.current_level(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn completion_callback_may_reregister_itself() {
    let h = harness();
    let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

    {
        let controller = h.controller.clone();
        let seen = Arc::clone(&seen);
        h.controller.set_on_complete(move |_artifact, elapsed| {
            seen.lock().unwrap().push(elapsed);
            let seen = Arc::clone(&seen);
            controller.set_on_complete(move |_artifact, elapsed| {
                seen.lock().unwrap().push(elapsed + 100);
            });
        });
    }

    h.controller.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    h.controller.stop().await.unwrap();

    h.controller.clear().await;
    h.controller.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    h.controller.stop().await.unwrap();

    // The replacement registered from inside the first callback handled the
    // second completion; the original was not restored over it.
    assert_eq!(*seen.lock().unwrap(), vec![1, 102]);
}

#[tokio::test(start_paused = true)]
async fn cancel_before_a_denied_acquisition_ends_idle_not_failed() {
    let h = build_harness(
        RecorderConfig::default(),
        Some(RecorderError::PermissionDenied),
        Some(Duration::from_millis(500)),
        true,
    );

    let starter = {
        let controller = h.controller.clone();
        tokio::spawn(async move { controller.start().await })
    };

    tokio::task::yield_now().await;
    assert_eq!(h.controller.state(), SessionState::AcquiringDevice);

    h.controller.cancel().await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    // The cancel wins over the denial: no error, no Failed state.
    starter.await.unwrap().unwrap();
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.controller.last_error(), None);
    assert_eq!(h.counters.acquired(), 0);
    assert_eq!(h.counters.released(), 0);
}

#[tokio::test(start_paused = true)]
async fn rejected_encoding_falls_back_to_wav_once_per_process() {
    let config = RecorderConfig {
        encoding: Some(EncodingChoice::from("audio/ogg;codecs=opus")),
        ..RecorderConfig::default()
    };

    let h = build_harness(config.clone(), None, None, true);
    h.controller.start().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Recording);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    h.controller.stop().await.unwrap();

    let artifact = h.controller.artifact().await.expect("artifact retained");
    assert_eq!(artifact.encoding.as_str(), "audio/wav");
    assert_eq!(h.counters.released(), 1);

    // The fallback is spent for the rest of the process; a second rejection
    // fails the session and still releases the granted device.
    let second = build_harness(config, None, None, true);
    let err = second.controller.start().await.unwrap_err();
    assert!(matches!(err, RecorderError::UnsupportedEncoding(_)));
    assert!(matches!(second.controller.state(), SessionState::Failed(_)));
    assert_eq!(second.counters.acquired(), 1);
    assert_eq!(second.counters.released(), 1);
}
