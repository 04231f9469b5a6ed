//! Capability probe: which encodings this host's encoder accepts.
//!
//! Pure queries with no side effects, safe to call at any time.

use super::format::{self, EncodingChoice};
use crate::capture::CaptureBackend;

/// Candidate encodings in general preference order. The supported subset
/// preserves this order.
pub const ENCODING_CANDIDATES: &[&str] = &[
    "audio/wav;codecs=pcm-s16le",
    "audio/wav;codecs=pcm-f32le",
    "audio/ogg;codecs=opus",
    "audio/mpeg",
    "audio/wav",
];

/// Fallback identifier used when the probe reports nothing supported or the
/// chosen encoding is rejected at session start.
pub const DEFAULT_ENCODING: &str = "audio/wav";

/// Whether the host exposes a capture entry point at all.
pub fn is_capture_supported(backend: &dyn CaptureBackend) -> bool {
    backend.is_supported()
}

/// The subset of [`ENCODING_CANDIDATES`] the encoder accepts, in candidate
/// order.
pub fn list_supported_encodings() -> Vec<EncodingChoice> {
    ENCODING_CANDIDATES
        .iter()
        .map(|&id| EncodingChoice::from(id))
        .filter(format::is_supported)
        .collect()
}

/// The most preferred supported encoding, if any.
pub fn best_encoding() -> Option<EncodingChoice> {
    list_supported_encodings().into_iter().next()
}
