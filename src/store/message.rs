use serde::{Deserialize, Serialize};

use crate::artifact::RecordingArtifact;

/// One stored voice message.
///
/// The artifact rides as its transportable string form so a saved store is
/// plain JSON end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceMessage {
    pub id: String,
    pub title: String,
    #[serde(rename = "timestampMs")]
    pub timestamp_ms: i64,
    #[serde(rename = "durationSeconds")]
    pub duration_seconds: Option<u64>,
    pub artifact: String,
}

impl VoiceMessage {
    /// Builds a record from a finished artifact, stamping id and time.
    pub fn from_artifact(title: impl Into<String>, artifact: &RecordingArtifact) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            duration_seconds: Some(artifact.duration_seconds),
            artifact: artifact.to_transport_string(),
        }
    }

    /// Decodes the carried artifact back into bytes-and-duration form.
    pub fn decode_artifact(&self) -> anyhow::Result<RecordingArtifact> {
        RecordingArtifact::from_transport_string(&self.artifact)
    }
}
