//! Finished recording artifacts and their transportable string form.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};

use crate::encoder::EncodingChoice;

/// The finished, immutable encoded audio object plus its duration.
///
/// Produced exactly once per completed session; `bytes` is the in-order
/// concatenation of every fragment the encoder emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingArtifact {
    pub encoding: EncodingChoice,
    pub bytes: Vec<u8>,
    pub duration_seconds: u64,
}

impl RecordingArtifact {
    /// Serializes into a transportable string:
    /// `data:<encoding>;duration=<secs>;base64,<payload>`.
    ///
    /// Data-URL shaped so stored records stay self-describing; the duration
    /// parameter makes the round trip total.
    pub fn to_transport_string(&self) -> String {
        format!(
            "data:{};duration={};base64,{}",
            self.encoding,
            self.duration_seconds,
            STANDARD.encode(&self.bytes)
        )
    }

    /// Parses a transportable string back into an artifact. The decoded
    /// bytes are byte-identical to the serialized original.
    pub fn from_transport_string(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix("data:")
            .ok_or_else(|| anyhow!("not a transportable artifact: missing data: prefix"))?;

        let (meta, payload) = body
            .split_once(";base64,")
            .ok_or_else(|| anyhow!("not a transportable artifact: missing base64 payload"))?;

        let (encoding, duration) = match meta.rsplit_once(";duration=") {
            Some((enc, dur)) => {
                let duration = dur
                    .parse::<u64>()
                    .with_context(|| format!("invalid duration '{dur}'"))?;
                (enc, duration)
            }
            None => (meta, 0),
        };

        let bytes = STANDARD
            .decode(payload)
            .context("invalid base64 payload")?;

        Ok(Self {
            encoding: EncodingChoice::new(encoding),
            bytes,
            duration_seconds: duration,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Formats whole seconds as `M:SS`.
pub fn format_elapsed(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
