//! Recording session control
//!
//! This module provides the `RecorderController` abstraction that manages:
//! - Device acquisition and release
//! - Encoding negotiation and the encoder session
//! - The live amplitude-level feed
//! - The elapsed-seconds counter
//! - The start/pause/resume/stop/cancel state machine

mod config;
mod controller;
mod state;

pub use config::RecorderConfig;
pub use controller::{CompletionCallback, RecorderController};
pub use state::{RecorderError, SessionState};
