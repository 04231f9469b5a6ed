pub mod artifact;
pub mod capture;
pub mod config;
pub mod encoder;
pub mod meter;
pub mod session;
pub mod store;

pub use artifact::{format_elapsed, RecordingArtifact};
pub use capture::{
    AudioFrame, CaptureBackend, CaptureBackendFactory, CaptureSource, CaptureStream, FileBackend,
    MicrophoneBackend, StreamGuard, StreamSpec,
};
pub use config::Config;
pub use encoder::{
    best_encoding, list_supported_encodings, EncodedFragment, EncoderConfig, EncoderEvent,
    EncoderSession, EncodingChoice, DEFAULT_ENCODING,
};
pub use meter::{AudioGraph, LevelMeter, MeterHandle, MeterTap};
pub use session::{RecorderConfig, RecorderController, RecorderError, SessionState};
pub use store::{MessageStore, VoiceMessage};
