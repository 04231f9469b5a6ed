use thiserror::Error;

/// Errors produced by capture, encoding, and session control.
///
/// The variants mirror how the failure is surfaced: `PermissionDenied` and
/// `DeviceUnavailable` are retryable by the user, `UnsupportedHost` is a
/// blocking condition, `EncodingRuntime` ends the session it occurred in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecorderError {
    #[error("audio capture is not supported on this host")]
    UnsupportedHost,

    #[error("microphone access was denied")]
    PermissionDenied,

    #[error("audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio graph could not be constructed: {0}")]
    DeviceGraph(String),

    #[error("encoding '{0}' was rejected by the encoder")]
    UnsupportedEncoding(String),

    #[error("encoder failed mid-session: {0}")]
    EncodingRuntime(String),
}

/// Phase of a recording session.
///
/// `Idle` is initial. `Completed` and `Failed` are terminal for the session
/// that produced them; `clear()` or a new `start()` returns the controller
/// to `Idle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AcquiringDevice,
    Recording,
    Paused,
    Finalizing,
    Completed,
    Failed(RecorderError),
}

impl SessionState {
    /// True while an encoder session and device stream are live.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Recording | SessionState::Paused)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}
