//! Output-encoding negotiation and the streaming encoder session.

pub mod format;
pub mod probe;
pub mod session;

pub use format::EncodingChoice;
pub use probe::{best_encoding, is_capture_supported, list_supported_encodings, DEFAULT_ENCODING};
pub use session::{EncodedFragment, EncoderConfig, EncoderEvent, EncoderSession};
