use std::sync::mpsc as std_mpsc;
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{AudioFrame, CaptureBackend, CaptureStream, StreamGuard, StreamSpec};
use crate::session::RecorderError;

/// How many frames may queue before the capture callback starts dropping.
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Microphone capture via cpal.
///
/// Captures from the system default or a named input device at its native
/// sample rate, converting multi-channel audio to mono by averaging.
/// `cpal::Stream` is not `Send`, so the stream lives on a dedicated thread;
/// the stream guard signals that thread to drop it on release.
pub struct MicrophoneBackend {
    /// Device name or "default" to use the system default device
    device_name: String,
}

impl MicrophoneBackend {
    pub fn new(device_name: String) -> Self {
        Self { device_name }
    }

    fn open_device(device_name: &str) -> Result<cpal::Device, RecorderError> {
        let host = cpal::default_host();

        if device_name == "default" {
            return host.default_input_device().ok_or_else(|| {
                RecorderError::DeviceUnavailable("no audio input device available".into())
            });
        }

        let devices = host.input_devices().map_err(|e| {
            RecorderError::DeviceUnavailable(format!("failed to enumerate devices: {e}"))
        })?;

        for device in devices {
            if let Ok(name) = device.name() {
                if name == device_name {
                    return Ok(device);
                }
            }
        }

        Err(RecorderError::DeviceUnavailable(format!(
            "audio input device '{device_name}' not found"
        )))
    }
}

#[async_trait::async_trait]
impl CaptureBackend for MicrophoneBackend {
    fn is_supported(&self) -> bool {
        cpal::default_host().default_input_device().is_some()
    }

    async fn acquire(&self) -> Result<CaptureStream, RecorderError> {
        let device_name = self.device_name.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

        let thread = std::thread::Builder::new()
            .name("voicememo-capture".into())
            .spawn(move || {
                let outcome = build_input_stream(&device_name, frame_tx);
                match outcome {
                    Ok((stream, spec)) => {
                        if ready_tx.send(Ok(spec)).is_err() {
                            return; // caller gave up waiting
                        }
                        // Block until the guard releases the stream, then the
                        // stream drops with this frame and capture stops.
                        let _ = stop_rx.recv();
                        drop(stream);
                        debug!("capture thread released input stream");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| RecorderError::DeviceUnavailable(format!("spawn failed: {e}")))?;

        let spec = ready_rx
            .await
            .map_err(|_| RecorderError::DeviceUnavailable("capture thread died".into()))??;

        let guard = MicrophoneGuard {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        };

        Ok(CaptureStream::new(spec, frame_rx, Box::new(guard)))
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

/// Builds and starts the cpal input stream. Runs on the capture thread.
fn build_input_stream(
    device_name: &str,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> Result<(cpal::Stream, StreamSpec), RecorderError> {
    let device = MicrophoneBackend::open_device(device_name)?;

    let name = device.name().unwrap_or_else(|_| "unknown device".to_string());
    info!("recording device: {}", name);

    let device_config = device
        .default_input_config()
        .map_err(|e| RecorderError::DeviceUnavailable(format!("device config failed: {e}")))?;

    let sample_rate = device_config.sample_rate().0;
    let num_channels = device_config.channels() as usize;
    debug!(
        "device configuration: {}Hz, {} channels",
        sample_rate, num_channels
    );

    let started = Instant::now();
    let stream = device
        .build_input_stream(
            &device_config.into(),
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples = downmix_to_mono(data, num_channels);
                let frame = AudioFrame {
                    samples,
                    timestamp_ms: started.elapsed().as_millis() as u64,
                };
                // Never block inside the audio callback; a full queue means
                // the consumer stalled and the frame is dropped.
                if frame_tx.try_send(frame).is_err() {
                    warn!("frame queue full, dropping capture frame");
                }
            },
            |err| {
                error!("audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| RecorderError::DeviceUnavailable(format!("stream creation failed: {e}")))?;

    stream
        .play()
        .map_err(|e| RecorderError::DeviceUnavailable(format!("stream start failed: {e}")))?;

    // Output is always mono after downmix.
    Ok((
        stream,
        StreamSpec {
            sample_rate,
            channels: 1,
        },
    ))
}

/// Converts interleaved multi-channel audio to mono by averaging channels.
fn downmix_to_mono(data: &[i16], num_channels: usize) -> Vec<i16> {
    match num_channels {
        0 | 1 => data.to_vec(),
        2 => data
            .chunks_exact(2)
            .map(|pair| ((pair[0] as i32 + pair[1] as i32) / 2) as i16)
            .collect(),
        n => data
            .chunks_exact(n)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / n as i32) as i16
            })
            .collect(),
    }
}

struct MicrophoneGuard {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl StreamGuard for MicrophoneGuard {
    fn release(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("capture thread panicked");
            }
        }
    }
}
