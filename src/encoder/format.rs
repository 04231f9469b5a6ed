use serde::{Deserialize, Serialize};

use crate::capture::StreamSpec;

/// RIFF chunk-size sentinel for streams whose length is unknown until stop.
///
/// The header is emitted before any audio exists, and the finished artifact
/// must equal the in-order concatenation of the emitted fragments, so the
/// size fields are never patched afterwards.
pub const STREAMING_SIZE: u32 = 0xFFFF_FFFF;

/// Container/codec identifier, e.g. `"audio/wav;codecs=pcm-s16le"`.
///
/// Chosen once per session from the probe's supported list and fixed for the
/// session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodingChoice(String);

impl EncodingChoice {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Container part, before any `;` parameters.
    pub fn container(&self) -> &str {
        self.0.split(';').next().unwrap_or(&self.0)
    }

    /// Value of the `codecs=` parameter, if present.
    pub fn codec(&self) -> Option<&str> {
        self.0
            .split(';')
            .skip(1)
            .find_map(|p| p.strip_prefix("codecs="))
    }
}

impl std::fmt::Display for EncodingChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EncodingChoice {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// PCM sample layout inside the WAV container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    PcmS16Le,
    PcmF32Le,
}

impl SampleFormat {
    fn bits_per_sample(self) -> u16 {
        match self {
            SampleFormat::PcmS16Le => 16,
            SampleFormat::PcmF32Le => 32,
        }
    }

    /// WAVE format tag: 1 = integer PCM, 3 = IEEE float.
    fn format_tag(self) -> u16 {
        match self {
            SampleFormat::PcmS16Le => 1,
            SampleFormat::PcmF32Le => 3,
        }
    }
}

/// Maps an encoding identifier to the sample format this encoder can
/// produce, or `None` if the encoding is unsupported.
pub fn sample_format_for(encoding: &EncodingChoice) -> Option<SampleFormat> {
    if encoding.container() != "audio/wav" {
        return None;
    }
    match encoding.codec() {
        None | Some("pcm-s16le") => Some(SampleFormat::PcmS16Le),
        Some("pcm-f32le") => Some(SampleFormat::PcmF32Le),
        Some(_) => None,
    }
}

pub fn is_supported(encoding: &EncodingChoice) -> bool {
    sample_format_for(encoding).is_some()
}

/// Builds the 44-byte streaming RIFF/WAVE header.
pub fn stream_header(spec: StreamSpec, format: SampleFormat) -> Vec<u8> {
    let bits = format.bits_per_sample();
    let block_align = spec.channels * bits / 8;
    let byte_rate = spec.sample_rate * block_align as u32;

    let mut header = Vec::with_capacity(44);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&STREAMING_SIZE.to_le_bytes());
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&format.format_tag().to_le_bytes());
    header.extend_from_slice(&spec.channels.to_le_bytes());
    header.extend_from_slice(&spec.sample_rate.to_le_bytes());
    header.extend_from_slice(&byte_rate.to_le_bytes());
    header.extend_from_slice(&block_align.to_le_bytes());
    header.extend_from_slice(&bits.to_le_bytes());
    header.extend_from_slice(b"data");
    header.extend_from_slice(&STREAMING_SIZE.to_le_bytes());
    header
}

/// Encodes PCM samples into the payload layout for the given format.
pub fn encode_samples(samples: &[i16], format: SampleFormat) -> Vec<u8> {
    match format {
        SampleFormat::PcmS16Le => samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
        SampleFormat::PcmF32Le => samples
            .iter()
            .flat_map(|&s| (s as f32 / 32768.0).to_le_bytes())
            .collect(),
    }
}
