use tokio::sync::mpsc;
use tracing::debug;

use crate::session::RecorderError;

/// Audio sample data (16-bit PCM, interleaved).
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Format of a live capture stream. Fixed for the stream's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
}

impl Default for StreamSpec {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
        }
    }
}

/// Releases the underlying device tracks when the stream is torn down.
pub trait StreamGuard: Send {
    fn release(&mut self);
}

/// Ephemeral handle to an open capture stream.
///
/// Owned exclusively by the session controller between acquisition and
/// teardown. `close()` releases the device tracks and is idempotent; drop
/// closes as a fallback so no exit path can leak the device.
pub struct CaptureStream {
    spec: StreamSpec,
    frames: Option<mpsc::Receiver<AudioFrame>>,
    guard: Option<Box<dyn StreamGuard>>,
}

impl CaptureStream {
    pub fn new(
        spec: StreamSpec,
        frames: mpsc::Receiver<AudioFrame>,
        guard: Box<dyn StreamGuard>,
    ) -> Self {
        Self {
            spec,
            frames: Some(frames),
            guard: Some(guard),
        }
    }

    pub fn spec(&self) -> StreamSpec {
        self.spec
    }

    /// Takes the frame receiver. Yields `None` on the second call.
    pub fn take_frames(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.frames.take()
    }

    /// True once `close()` has run (or the frames were never attached).
    pub fn is_closed(&self) -> bool {
        self.guard.is_none()
    }

    /// Releases the device tracks. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            guard.release();
            debug!("capture stream closed");
        }
        self.frames = None;
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Audio capture backend trait.
///
/// Implementations:
/// - Microphone: cpal input device (all platforms)
/// - File: read from a WAV file (for testing/batch processing)
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Whether this host can capture at all. Safe to call any time,
    /// including before permission is granted.
    fn is_supported(&self) -> bool;

    /// Open the device and start delivering frames.
    ///
    /// May suspend while waiting on the host (device I/O, permission).
    async fn acquire(&self) -> Result<CaptureStream, RecorderError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Capture source selection.
#[derive(Debug, Clone)]
pub enum CaptureSource {
    /// Microphone input; "default" selects the system default device.
    Microphone { device: String },
    /// WAV file input (for testing/batch processing).
    File(std::path::PathBuf),
}

/// Capture backend factory.
pub struct CaptureBackendFactory;

impl CaptureBackendFactory {
    pub fn create(source: CaptureSource) -> Box<dyn CaptureBackend> {
        match source {
            CaptureSource::Microphone { device } => {
                Box::new(super::microphone::MicrophoneBackend::new(device))
            }
            CaptureSource::File(path) => Box::new(super::file::FileBackend::new(path)),
        }
    }
}
