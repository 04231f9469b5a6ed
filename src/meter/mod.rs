//! Live amplitude metering over the capture stream.

pub mod graph;
pub mod level;

pub use graph::AudioGraph;
pub use level::{LevelMeter, MeterHandle, MeterTap};
