use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::format::{self, EncodingChoice, SampleFormat};
use crate::artifact::RecordingArtifact;
use crate::capture::{AudioFrame, StreamSpec};
use crate::session::RecorderError;

/// Configuration for one encoder session.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// How often buffered data is emitted as a fragment
    pub fragment_interval: Duration,
    /// Hard cap on total artifact size; exceeding it fails the session
    pub max_artifact_bytes: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            fragment_interval: Duration::from_millis(1000),
            max_artifact_bytes: 512 * 1024 * 1024,
        }
    }
}

/// One ordered chunk of encoded audio. Fragments concatenated in emission
/// order reconstruct the artifact exactly.
#[derive(Debug, Clone)]
pub struct EncodedFragment {
    pub seq: u32,
    pub bytes: Vec<u8>,
}

/// Asynchronous notifications delivered on the encoder's own schedule.
#[derive(Debug)]
pub enum EncoderEvent {
    Fragment(EncodedFragment),
    Error(RecorderError),
}

/// Streaming encoder over one capture stream with one fixed encoding.
///
/// Frames fed through the input channel are encoded and flushed as ordered
/// fragments once per fragment interval; closing the input channel finalizes
/// the stream. `stop()` is the single terminating operation; it consumes
/// the session and yields the artifact. `abort()` discards everything.
pub struct EncoderSession {
    encoding: EncodingChoice,
    paused: Arc<AtomicBool>,
    task: JoinHandle<Result<Vec<u8>, RecorderError>>,
}

impl EncoderSession {
    /// Begins encoding. Fails with `UnsupportedEncoding` if this encoder
    /// cannot produce the requested encoding; callers validate via the
    /// capability probe first, so rejection here is rare and not retried.
    pub fn start(
        spec: StreamSpec,
        encoding: EncodingChoice,
        config: EncoderConfig,
    ) -> Result<
        (
            Self,
            mpsc::Sender<AudioFrame>,
            mpsc::Receiver<EncoderEvent>,
        ),
        RecorderError,
    > {
        let sample_format = format::sample_format_for(&encoding)
            .ok_or_else(|| RecorderError::UnsupportedEncoding(encoding.as_str().to_string()))?;

        info!(
            "encoder session started: {} ({}Hz, {}ch, flush every {:?})",
            encoding, spec.sample_rate, spec.channels, config.fragment_interval
        );

        let (input_tx, input_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let paused = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_encoder(
            input_rx,
            event_tx,
            Arc::clone(&paused),
            spec,
            sample_format,
            config,
        ));

        Ok((
            Self {
                encoding,
                paused,
                task,
            },
            input_tx,
            event_rx,
        ))
    }

    pub fn encoding(&self) -> &EncodingChoice {
        &self.encoding
    }

    /// Stops accepting frames until `resume()`. No-op while already paused.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        debug!("encoder paused");
    }

    /// Resumes accepting frames. No-op while not paused.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        debug!("encoder resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Finalizes the stream and returns the artifact.
    ///
    /// The caller must have closed the input channel first (dropping its
    /// sender); this awaits the flush of the buffered tail fragment.
    pub async fn stop(self, duration_seconds: u64) -> Result<RecordingArtifact, RecorderError> {
        let bytes = self
            .task
            .await
            .map_err(|e| RecorderError::EncodingRuntime(format!("encoder task failed: {e}")))??;

        info!(
            "encoder session finalized: {} bytes, {}s",
            bytes.len(),
            duration_seconds
        );

        Ok(RecordingArtifact {
            encoding: self.encoding,
            bytes,
            duration_seconds,
        })
    }

    /// Cancels the encode task and discards all fragments.
    pub fn abort(self) {
        self.task.abort();
        debug!("encoder session aborted");
    }
}

/// Encode loop: buffers incoming frames, flushes a fragment per interval,
/// finalizes when the input channel closes. The returned bytes are exactly
/// the concatenation of all emitted fragments.
async fn run_encoder(
    mut input: mpsc::Receiver<AudioFrame>,
    events: mpsc::Sender<EncoderEvent>,
    paused: Arc<AtomicBool>,
    spec: StreamSpec,
    sample_format: SampleFormat,
    config: EncoderConfig,
) -> Result<Vec<u8>, RecorderError> {
    // The first fragment carries the streaming container header.
    let mut pending = format::stream_header(spec, sample_format);
    let mut artifact: Vec<u8> = Vec::new();
    let mut seq: u32 = 0;

    let start = tokio::time::Instant::now() + config.fragment_interval;
    let mut ticker = tokio::time::interval_at(start, config.fragment_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = input.recv() => match frame {
                Some(frame) => {
                    if paused.load(Ordering::SeqCst) {
                        continue;
                    }
                    pending.extend(format::encode_samples(&frame.samples, sample_format));

                    if artifact.len() + pending.len() > config.max_artifact_bytes {
                        let err = RecorderError::EncodingRuntime(format!(
                            "artifact size limit exceeded ({} bytes)",
                            config.max_artifact_bytes
                        ));
                        warn!("{err}");
                        let _ = events.send(EncoderEvent::Error(err.clone())).await;
                        return Err(err);
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                flush_fragment(&mut pending, &mut artifact, &mut seq, &events).await;
            }
        }
    }

    // Flush whatever is still buffered, header included if nothing ever
    // ticked, so short sessions still produce a complete stream.
    flush_fragment(&mut pending, &mut artifact, &mut seq, &events).await;

    debug!("encoder drained: {} fragments, {} bytes", seq, artifact.len());
    Ok(artifact)
}

/// Emits the buffered bytes as the next fragment. Empty windows are skipped.
async fn flush_fragment(
    pending: &mut Vec<u8>,
    artifact: &mut Vec<u8>,
    seq: &mut u32,
    events: &mpsc::Sender<EncoderEvent>,
) {
    if pending.is_empty() {
        return;
    }

    let bytes = std::mem::take(pending);
    artifact.extend_from_slice(&bytes);

    let fragment = EncodedFragment { seq: *seq, bytes };
    *seq += 1;

    // A dropped listener only loses notifications, never artifact data.
    let _ = events.send(EncoderEvent::Fragment(fragment)).await;
}
