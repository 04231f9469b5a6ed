use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rustfft::num_complex::Complex;
use tracing::debug;

use super::graph::AudioGraph;
use crate::capture::CaptureStream;
use crate::session::RecorderError;

/// Analysis window length. Matches the 2^n sizes the planner caches best.
const FFT_SIZE: usize = 1024;

/// Shared sample window between the frame pump and the meter.
///
/// The pump pushes live samples in; `sample()` reads the most recent window.
/// Cloning shares the same window.
#[derive(Clone)]
pub struct MeterTap {
    window: Arc<Mutex<VecDeque<f32>>>,
    detached: Arc<AtomicBool>,
}

impl MeterTap {
    fn new() -> Self {
        Self {
            window: Arc::new(Mutex::new(VecDeque::with_capacity(FFT_SIZE))),
            detached: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Feeds live samples into the analysis window. No-op once detached.
    pub fn ingest(&self, samples: &[i16]) {
        if self.detached.load(Ordering::SeqCst) {
            return;
        }
        let mut window = self.window.lock().expect("meter window poisoned");
        for &s in samples {
            if window.len() == FFT_SIZE {
                window.pop_front();
            }
            window.push_back(s as f32 / 32768.0);
        }
    }

    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Current normalized amplitude in [0, 1].
    ///
    /// Hanning-windowed forward FFT over the most recent samples; each bin's
    /// magnitude is normalized by the largest magnitude a full-scale input
    /// can produce, and the bins are averaged. Pure read of current device
    /// state, safe to call once per display frame. Returns 0.0 while
    /// detached or before any audio has arrived.
    pub fn sample(&self) -> f32 {
        if self.is_detached() {
            return 0.0;
        }

        let mut buffer: Vec<Complex<f32>> = {
            let window = self.window.lock().expect("meter window poisoned");
            if window.is_empty() {
                return 0.0;
            }
            let n = window.len();
            window
                .iter()
                .enumerate()
                .map(|(i, &s)| {
                    let w = 0.5
                        * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos());
                    Complex::new(s * w, 0.0)
                })
                .collect()
        };
        buffer.resize(FFT_SIZE, Complex::new(0.0, 0.0));

        let fft = AudioGraph::shared().plan_fft(FFT_SIZE);
        fft.process(&mut buffer);

        // Magnitude of a full-scale Hanning-windowed sine concentrates about
        // FFT_SIZE/4 in its bin; use that as the per-bin ceiling.
        let max_bin_magnitude = FFT_SIZE as f32 / 4.0;
        let bins = FFT_SIZE / 2;
        let sum: f32 = buffer[..bins]
            .iter()
            .map(|c| (c.norm() / max_bin_magnitude).min(1.0))
            .sum();

        (sum / bins as f32).clamp(0.0, 1.0)
    }
}

/// Frequency-analysis tap on a live capture stream.
pub struct MeterHandle {
    tap: MeterTap,
}

/// Builds and tears down analysis taps.
pub struct LevelMeter;

impl LevelMeter {
    /// Attaches a frequency-analysis tap to the given live stream.
    ///
    /// Fails with `DeviceGraph` if the shared audio graph has been closed or
    /// the stream is already released.
    pub fn attach(stream: &CaptureStream) -> Result<MeterHandle, RecorderError> {
        if AudioGraph::shared().is_closed() {
            return Err(RecorderError::DeviceGraph(
                "audio graph has been closed".into(),
            ));
        }
        if stream.is_closed() {
            return Err(RecorderError::DeviceGraph(
                "capture stream is already closed".into(),
            ));
        }
        debug!("level meter attached");
        Ok(MeterHandle { tap: MeterTap::new() })
    }
}

impl MeterHandle {
    /// Shared tap for the component feeding live samples in.
    pub fn tap(&self) -> MeterTap {
        self.tap.clone()
    }

    /// Current normalized amplitude in [0, 1]. See [`MeterTap::sample`].
    pub fn sample(&self) -> f32 {
        self.tap.sample()
    }

    /// Releases the analysis tap. Repeated calls are no-ops.
    pub fn detach(&self) {
        if !self.tap.detached.swap(true, Ordering::SeqCst) {
            self.tap
                .window
                .lock()
                .expect("meter window poisoned")
                .clear();
            debug!("level meter detached");
        }
    }
}

impl Drop for MeterHandle {
    fn drop(&mut self) {
        self.detach();
    }
}
