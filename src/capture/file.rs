use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::backend::{AudioFrame, CaptureBackend, CaptureStream, StreamGuard, StreamSpec};
use crate::session::RecorderError;

/// Milliseconds of audio per delivered frame.
const FRAME_MS: u64 = 100;

/// WAV-file capture backend, for testing and batch processing.
///
/// Streams the file's samples as real-time paced frames so a session over a
/// file behaves like live capture. Multi-channel files are downmixed to mono.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for FileBackend {
    fn is_supported(&self) -> bool {
        self.path.exists()
    }

    async fn acquire(&self) -> Result<CaptureStream, RecorderError> {
        let reader = hound::WavReader::open(&self.path).map_err(|e| {
            RecorderError::DeviceUnavailable(format!(
                "failed to open {}: {e}",
                self.path.display()
            ))
        })?;

        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                RecorderError::DeviceUnavailable(format!("failed to read samples: {e}"))
            })?;

        let channels = spec.channels as usize;
        let mono: Vec<i16> = if channels <= 1 {
            samples
        } else {
            samples
                .chunks_exact(channels)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                    (sum / channels as i32) as i16
                })
                .collect()
        };

        info!(
            "file capture: {} ({:.1}s at {}Hz)",
            self.path.display(),
            mono.len() as f64 / spec.sample_rate as f64,
            spec.sample_rate
        );

        let samples_per_frame = (spec.sample_rate as u64 * FRAME_MS / 1000) as usize;
        let (tx, rx) = mpsc::channel(16);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_MS));
            let mut offset = 0usize;
            let mut timestamp_ms = 0u64;

            while offset < mono.len() {
                ticker.tick().await;
                let end = (offset + samples_per_frame).min(mono.len());
                let frame = AudioFrame {
                    samples: mono[offset..end].to_vec(),
                    timestamp_ms,
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
                offset = end;
                timestamp_ms += FRAME_MS;
            }
            debug!("file capture drained");
        });

        let guard = FileGuard { task: Some(task) };

        Ok(CaptureStream::new(
            StreamSpec {
                sample_rate: spec.sample_rate,
                channels: 1,
            },
            rx,
            Box::new(guard),
        ))
    }

    fn name(&self) -> &str {
        "wav file"
    }
}

struct FileGuard {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl StreamGuard for FileGuard {
    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
