use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use rustfft::{Fft, FftPlanner};
use tracing::debug;

static GRAPH: OnceLock<AudioGraph> = OnceLock::new();

/// Process-wide audio-processing graph.
///
/// Created lazily on first meter attach and reused across sessions; the
/// planner caches FFT plans between attaches. `close()` belongs to full
/// application teardown only; it is
/// terminal for the process, and attaching after it fails with
/// `DeviceGraph`. Sessions must never close the graph themselves.
pub struct AudioGraph {
    planner: Mutex<FftPlanner<f32>>,
    closed: AtomicBool,
}

impl AudioGraph {
    pub fn shared() -> &'static AudioGraph {
        GRAPH.get_or_init(|| {
            debug!("audio graph initialized");
            AudioGraph {
                planner: Mutex::new(FftPlanner::new()),
                closed: AtomicBool::new(false),
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Shuts the graph down for the rest of the process lifetime.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        debug!("audio graph closed");
    }

    pub(crate) fn plan_fft(&self, len: usize) -> Arc<dyn Fft<f32>> {
        let mut planner = self.planner.lock().expect("audio graph planner poisoned");
        planner.plan_fft_forward(len)
    }
}
