pub mod backend;
pub mod file;
pub mod microphone;

pub use backend::{
    AudioFrame, CaptureBackend, CaptureBackendFactory, CaptureSource, CaptureStream, StreamGuard,
    StreamSpec,
};
pub use file::FileBackend;
pub use microphone::MicrophoneBackend;
