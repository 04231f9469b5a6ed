use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::RecorderConfig;
use super::state::{RecorderError, SessionState};
use crate::artifact::{format_elapsed, RecordingArtifact};
use crate::capture::{CaptureBackend, CaptureStream};
use crate::encoder::{
    self, EncoderConfig, EncoderEvent, EncoderSession, EncodingChoice,
};
use crate::meter::{LevelMeter, MeterHandle};

/// Set once the default-encoding fallback has been spent. The fallback is
/// allowed once per process lifetime; a second rejection is fatal.
static ENCODING_FALLBACK_USED: AtomicBool = AtomicBool::new(false);

/// Invoked once per successfully completed session with the artifact and its
/// elapsed whole seconds. The receiver owns the artifact thereafter.
pub type CompletionCallback = Box<dyn Fn(RecordingArtifact, u64) + Send + Sync>;

/// Everything a live session holds open. Taken out of the controller as one
/// unit so every exit path releases the same set of resources.
struct SessionResources {
    stream: CaptureStream,
    encoder: EncoderSession,
    meter: MeterHandle,
    pump: JoinHandle<()>,
    ticker: JoinHandle<()>,
    poll: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    state: SessionState,
    /// Bumped per session; events carrying an older epoch are stale.
    epoch: u64,
    /// Cancel arrived while acquisition was in flight; apply on resolve.
    pending_cancel: bool,
    resources: Option<SessionResources>,
    artifact: Option<RecordingArtifact>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Fallback for a controller dropped without shutdown().
        if let Some(resources) = self.resources.take() {
            warn!("controller dropped with a live session, forcing teardown");
            discard_resources(resources);
        }
    }
}

struct Shared {
    state_tx: watch::Sender<SessionState>,
    level_tx: watch::Sender<f32>,
    elapsed_tx: watch::Sender<u64>,
    last_error: std::sync::Mutex<Option<RecorderError>>,
    on_complete: std::sync::Mutex<Option<CompletionCallback>>,
}

/// The recording session controller.
///
/// Owns device acquisition, the encoder session, the level meter, the 1 Hz
/// elapsed counter, and the level-poll loop, and drives the session state
/// machine over them. Cloning shares the controller; all clones observe the
/// same session. Every command or encoder event is handled as one atomic
/// step under the interior mutex, so no two transitions interleave.
///
/// Whichever surface owns the controller should call [`shutdown`] when that
/// surface goes away; dropping the last handle forces the same cleanup as a
/// last resort.
///
/// [`shutdown`]: RecorderController::shutdown
#[derive(Clone)]
pub struct RecorderController {
    backend: Arc<dyn CaptureBackend>,
    config: RecorderConfig,
    inner: Arc<Mutex<Inner>>,
    shared: Arc<Shared>,
}

impl RecorderController {
    pub fn new(backend: Arc<dyn CaptureBackend>, config: RecorderConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (level_tx, _) = watch::channel(0.0f32);
        let (elapsed_tx, _) = watch::channel(0u64);

        Self {
            backend,
            config,
            inner: Arc::new(Mutex::new(Inner::default())),
            shared: Arc::new(Shared {
                state_tx,
                level_tx,
                elapsed_tx,
                last_error: std::sync::Mutex::new(None),
                on_complete: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Registers the completion hand-off, replacing any previous callback.
    pub fn set_on_complete(&self, callback: impl Fn(RecordingArtifact, u64) + Send + Sync + 'static) {
        *self.shared.on_complete.lock().expect("callback lock poisoned") = Some(Box::new(callback));
    }

    // Queries

    pub fn state(&self) -> SessionState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn elapsed_seconds(&self) -> u64 {
        *self.shared.elapsed_tx.borrow()
    }

    pub fn formatted_elapsed(&self) -> String {
        format_elapsed(self.elapsed_seconds())
    }

    pub fn current_level(&self) -> f32 {
        *self.shared.level_tx.borrow()
    }

    pub fn last_error(&self) -> Option<RecorderError> {
        self.shared.last_error.lock().expect("error lock poisoned").clone()
    }

    pub fn is_supported(&self) -> bool {
        encoder::is_capture_supported(self.backend.as_ref())
    }

    /// The finished artifact of a `Completed` session, if one is held.
    pub async fn artifact(&self) -> Option<RecordingArtifact> {
        self.inner.lock().await.artifact.clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn watch_level(&self) -> watch::Receiver<f32> {
        self.shared.level_tx.subscribe()
    }

    pub fn watch_elapsed(&self) -> watch::Receiver<u64> {
        self.shared.elapsed_tx.subscribe()
    }

    // Commands

    /// Acquires and immediately releases the device, exercising the host's
    /// consent flow without starting a session. State stays `Idle` either
    /// way; a denial is recorded in `last_error` for the retry affordance.
    pub async fn request_permission(&self) -> Result<(), RecorderError> {
        if !self.is_supported() {
            let err = RecorderError::UnsupportedHost;
            self.record_error(Some(err.clone()));
            return Err(err);
        }

        match self.backend.acquire().await {
            Ok(mut stream) => {
                stream.close();
                self.record_error(None);
                info!("microphone permission granted");
                Ok(())
            }
            Err(err) => {
                warn!("permission request failed: {err}");
                self.record_error(Some(err.clone()));
                Err(err)
            }
        }
    }

    /// Starts a new session: acquires the device, negotiates an encoding,
    /// opens the encoder session and level meter, and launches the elapsed
    /// counter and level-poll loop. No-op unless `Idle`.
    pub async fn start(&self) -> Result<(), RecorderError> {
        let epoch = {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Idle {
                debug!("start ignored in state {:?}", inner.state);
                return Ok(());
            }
            if !self.is_supported() {
                let err = RecorderError::UnsupportedHost;
                self.record_error(Some(err.clone()));
                return Err(err);
            }

            inner.epoch += 1;
            inner.pending_cancel = false;
            inner.artifact = None;
            self.record_error(None);
            self.shared.elapsed_tx.send_replace(0);
            self.shared.level_tx.send_replace(0.0);
            set_state(&mut inner, &self.shared, SessionState::AcquiringDevice);
            inner.epoch
        };

        // Acquisition may suspend on user consent; the lock is released so
        // cancel() and queries stay responsive meanwhile.
        let acquired = self.backend.acquire().await;

        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch || inner.state != SessionState::AcquiringDevice {
            // Torn down while acquiring; release whatever was granted.
            if let Ok(mut stream) = acquired {
                stream.close();
            }
            return Ok(());
        }

        let mut stream = match acquired {
            Ok(stream) => stream,
            Err(err) => {
                if inner.pending_cancel {
                    // The session was cancelled before the denial arrived;
                    // the cancel wins and the denial is not an error.
                    info!("cancel requested during acquisition, discarding denial");
                    inner.pending_cancel = false;
                    set_state(&mut inner, &self.shared, SessionState::Idle);
                    return Ok(());
                }
                self.record_error(Some(err.clone()));
                set_state(&mut inner, &self.shared, SessionState::Failed(err.clone()));
                return Err(err);
            }
        };

        if inner.pending_cancel {
            info!("cancel requested during acquisition, discarding device");
            inner.pending_cancel = false;
            stream.close();
            set_state(&mut inner, &self.shared, SessionState::Idle);
            return Ok(());
        }

        // Encoding is selected exactly once here and fixed for the session:
        // the configured override when set, otherwise the probe's pick.
        let encoding = self
            .config
            .encoding
            .clone()
            .or_else(encoder::best_encoding)
            .unwrap_or_else(|| EncodingChoice::from(encoder::DEFAULT_ENCODING));

        match self.open_session(&mut inner, stream, encoding, epoch) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.record_error(Some(err.clone()));
                set_state(&mut inner, &self.shared, SessionState::Failed(err.clone()));
                Err(err)
            }
        }
    }

    /// Wires up encoder, meter, and background loops over an acquired
    /// stream. On error the stream has been released.
    fn open_session(
        &self,
        inner: &mut Inner,
        mut stream: CaptureStream,
        encoding: EncodingChoice,
        epoch: u64,
    ) -> Result<(), RecorderError> {
        let encoder_config = EncoderConfig {
            fragment_interval: self.config.fragment_interval,
            max_artifact_bytes: self.config.max_artifact_bytes,
        };

        let started = match EncoderSession::start(stream.spec(), encoding, encoder_config.clone())
        {
            Ok(parts) => Ok(parts),
            Err(RecorderError::UnsupportedEncoding(id)) => {
                if ENCODING_FALLBACK_USED.swap(true, Ordering::SeqCst) {
                    Err(RecorderError::UnsupportedEncoding(id))
                } else {
                    warn!(
                        "encoding '{id}' rejected, falling back to {}",
                        encoder::DEFAULT_ENCODING
                    );
                    EncoderSession::start(
                        stream.spec(),
                        EncodingChoice::from(encoder::DEFAULT_ENCODING),
                        encoder_config,
                    )
                }
            }
            Err(err) => Err(err),
        };

        let (encoder_session, input_tx, event_rx) = match started {
            Ok(parts) => parts,
            Err(err) => {
                stream.close();
                return Err(err);
            }
        };

        let meter = match LevelMeter::attach(&stream) {
            Ok(meter) => meter,
            Err(err) => {
                encoder_session.abort();
                stream.close();
                return Err(err);
            }
        };

        let Some(mut frames) = stream.take_frames() else {
            encoder_session.abort();
            meter.detach();
            stream.close();
            return Err(RecorderError::DeviceUnavailable(
                "capture stream yielded no frame channel".into(),
            ));
        };

        // Frame pump: device frames feed the meter tap and the encoder.
        let tap = meter.tap();
        let pump = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                tap.ingest(&frame.samples);
                if input_tx.send(frame).await.is_err() {
                    break;
                }
            }
        });

        // Encoder events enter the transition function one at a time; the
        // loop ends by itself when the encoder's sender side drops, so
        // teardown never has to abort it.
        tokio::spawn(run_event_loop(
            event_rx,
            Arc::clone(&self.inner),
            Arc::clone(&self.shared),
            epoch,
        ));

        // The loops below read the published state, so Recording goes out
        // before they are spawned; a loop whose first poll still saw
        // AcquiringDevice would exit and never come back.
        set_state(inner, &self.shared, SessionState::Recording);

        // 1 Hz elapsed counter: counts while Recording, suspends on Paused.
        // The second boundary restarts on resume, so a tick that straddles
        // the pause can never credit paused time.
        let ticker = {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                let mut states = shared.state_tx.subscribe();
                let mut tick = tokio::time::interval(Duration::from_secs(1));
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                tick.tick().await; // consume the immediate first tick
                loop {
                    tokio::select! {
                        biased;
                        changed = states.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            match *states.borrow_and_update() {
                                SessionState::Recording => tick.reset(),
                                SessionState::Paused => {}
                                _ => break,
                            }
                        }
                        _ = tick.tick() => {
                            match *states.borrow() {
                                SessionState::Recording => {
                                    shared.elapsed_tx.send_modify(|e| *e += 1);
                                }
                                SessionState::Paused => {}
                                _ => break,
                            }
                        }
                    }
                }
            })
        };

        // Level poll: republishes the meter once per display frame while
        // Recording or Paused, so the indicator stays live across pause.
        let poll = {
            let shared = Arc::clone(&self.shared);
            let tap = meter.tap();
            let interval = self.config.level_poll_interval;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tick.tick().await;
                    let state = shared.state_tx.borrow().clone();
                    if !state.is_active() {
                        break;
                    }
                    shared.level_tx.send_replace(tap.sample());
                }
            })
        };

        info!(
            "recording started: {} via {}",
            encoder_session.encoding(),
            self.backend.name()
        );

        inner.resources = Some(SessionResources {
            stream,
            encoder: encoder_session,
            meter,
            pump,
            ticker,
            poll,
        });
        Ok(())
    }

    /// Pauses the encoder and suspends the elapsed counter. The level poll
    /// keeps running. No-op unless `Recording`.
    pub async fn pause(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Recording {
            return;
        }
        if let Some(resources) = &inner.resources {
            resources.encoder.pause();
        }
        set_state(&mut inner, &self.shared, SessionState::Paused);
    }

    /// Resumes the encoder and the elapsed counter. No-op unless `Paused`.
    pub async fn resume(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Paused {
            return;
        }
        if let Some(resources) = &inner.resources {
            resources.encoder.resume();
        }
        set_state(&mut inner, &self.shared, SessionState::Recording);
    }

    /// Finalizes the session into an artifact: flushes the encoder, releases
    /// every resource, stores the artifact, and invokes the completion
    /// callback. No-op unless `Recording` or `Paused`.
    pub async fn stop(&self) -> Result<(), RecorderError> {
        let (resources, elapsed, epoch) = {
            let mut inner = self.inner.lock().await;
            if !inner.state.is_active() {
                debug!("stop ignored in state {:?}", inner.state);
                return Ok(());
            }
            let Some(resources) = inner.resources.take() else {
                set_state(&mut inner, &self.shared, SessionState::Idle);
                return Ok(());
            };
            set_state(&mut inner, &self.shared, SessionState::Finalizing);
            (resources, *self.shared.elapsed_tx.borrow(), inner.epoch)
        };

        let SessionResources {
            mut stream,
            encoder: encoder_session,
            meter,
            pump,
            ticker,
            poll,
        } = resources;

        // Aborting the pump drops the encoder's input sender, which is the
        // finalize signal; the encoder then flushes its buffered tail.
        pump.abort();
        ticker.abort();
        poll.abort();
        meter.detach();

        let finalized = encoder_session.stop(elapsed).await;
        stream.close();
        self.shared.level_tx.send_replace(0.0);

        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            // A shutdown landed while we were finalizing; its forced
            // teardown is authoritative, the artifact is discarded.
            debug!("session torn down while finalizing, discarding artifact");
            return Ok(());
        }
        match finalized {
            Ok(artifact) => {
                info!(
                    "recording completed: {}s, {} bytes",
                    elapsed,
                    artifact.bytes.len()
                );
                inner.artifact = Some(artifact.clone());
                set_state(&mut inner, &self.shared, SessionState::Completed);
                drop(inner);

                // Invoked outside the slot lock; the callback may call
                // set_on_complete to register a replacement, so the old
                // callback is only restored into a still-empty slot.
                let callback = self
                    .shared
                    .on_complete
                    .lock()
                    .expect("callback lock poisoned")
                    .take();
                if let Some(callback) = callback {
                    callback(artifact, elapsed);
                    let mut slot =
                        self.shared.on_complete.lock().expect("callback lock poisoned");
                    if slot.is_none() {
                        *slot = Some(callback);
                    }
                }
                Ok(())
            }
            Err(err) => {
                self.record_error(Some(err.clone()));
                set_state(&mut inner, &self.shared, SessionState::Failed(err.clone()));
                Err(err)
            }
        }
    }

    /// Discards the session without producing an artifact.
    ///
    /// While `Recording`/`Paused` this tears everything down synchronously
    /// and returns to `Idle`. During `AcquiringDevice` the cancellation is
    /// remembered and applied when acquisition resolves. No-op otherwise.
    pub async fn cancel(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::AcquiringDevice {
            info!("cancel deferred until acquisition resolves");
            inner.pending_cancel = true;
            return;
        }
        if !inner.state.is_active() {
            return;
        }

        if let Some(resources) = inner.resources.take() {
            discard_resources(resources);
        }
        self.shared.elapsed_tx.send_replace(0);
        self.shared.level_tx.send_replace(0.0);
        set_state(&mut inner, &self.shared, SessionState::Idle);
        info!("recording cancelled");
    }

    /// Drops a `Completed` artifact and returns to `Idle`.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Completed {
            return;
        }
        inner.artifact = None;
        self.shared.elapsed_tx.send_replace(0);
        set_state(&mut inner, &self.shared, SessionState::Idle);
    }

    /// Forced cleanup for when the owning surface goes away: releases every
    /// open resource in any phase and returns to `Idle`. In-flight
    /// acquisition is invalidated and its stream released on resolve.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.epoch += 1;
        inner.pending_cancel = false;
        inner.artifact = None;
        if let Some(resources) = inner.resources.take() {
            discard_resources(resources);
        }
        self.shared.elapsed_tx.send_replace(0);
        self.shared.level_tx.send_replace(0.0);
        set_state(&mut inner, &self.shared, SessionState::Idle);
        debug!("controller shut down");
    }

    fn record_error(&self, err: Option<RecorderError>) {
        *self.shared.last_error.lock().expect("error lock poisoned") = err;
    }
}

/// Publishes a state transition. Callers hold the controller mutex, so the
/// stored state and the watch feed can never disagree.
fn set_state(inner: &mut Inner, shared: &Shared, state: SessionState) {
    debug!("session state: {:?} -> {:?}", inner.state, state);
    inner.state = state.clone();
    shared.state_tx.send_replace(state);
}

/// Releases a session's resources without finalizing an artifact. The
/// release set is identical to a normal stop's; only artifact retention
/// differs.
fn discard_resources(resources: SessionResources) {
    let SessionResources {
        mut stream,
        encoder: encoder_session,
        meter,
        pump,
        ticker,
        poll,
    } = resources;

    pump.abort();
    ticker.abort();
    poll.abort();
    encoder_session.abort();
    meter.detach();
    stream.close();
}

/// Delivers encoder events into the state machine one at a time. Ends when
/// the encoder drops its sender; stale events (older epoch, or a session
/// already in a terminal state) are ignored.
async fn run_event_loop(
    mut events: mpsc::Receiver<EncoderEvent>,
    inner: Arc<Mutex<Inner>>,
    shared: Arc<Shared>,
    epoch: u64,
) {
    while let Some(event) = events.recv().await {
        match event {
            EncoderEvent::Fragment(fragment) => {
                debug!("fragment {} ({} bytes)", fragment.seq, fragment.bytes.len());
            }
            EncoderEvent::Error(err) => {
                fail_session(&inner, &shared, epoch, err).await;
                break;
            }
        }
    }
}

/// Mid-session encoder failure: same teardown as a stop, minus the artifact.
async fn fail_session(
    inner: &Mutex<Inner>,
    shared: &Shared,
    epoch: u64,
    err: RecorderError,
) {
    let mut inner = inner.lock().await;
    if inner.epoch != epoch || !inner.state.is_active() {
        debug!("ignoring stale encoder error: {err}");
        return;
    }

    warn!("encoder failed mid-session: {err}");
    if let Some(resources) = inner.resources.take() {
        discard_resources(resources);
    }
    shared.level_tx.send_replace(0.0);
    *shared.last_error.lock().expect("error lock poisoned") = Some(err.clone());
    set_state(&mut inner, shared, SessionState::Failed(err));
}
