use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::message::VoiceMessage;
use crate::artifact::RecordingArtifact;

/// In-memory message timeline, newest first, with JSON file persistence.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<VoiceMessage>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a store from disk. A missing file yields an empty store.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("no message store at {}, starting empty", path.display());
            return Ok(Self::new());
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let messages: Vec<VoiceMessage> =
            serde_json::from_str(&data).context("failed to parse message store")?;

        info!("loaded {} messages from {}", messages.len(), path.display());
        Ok(Self { messages })
    }

    /// Writes the store as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let data =
            serde_json::to_string_pretty(&self.messages).context("failed to encode store")?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write {}", path.display()))?;

        debug!("saved {} messages to {}", self.messages.len(), path.display());
        Ok(())
    }

    /// Adds a finished recording at the head of the timeline.
    pub fn add_recording(
        &mut self,
        title: impl Into<String>,
        artifact: &RecordingArtifact,
    ) -> &VoiceMessage {
        let message = VoiceMessage::from_artifact(title, artifact);
        info!("message added: {} ({})", message.title, message.id);
        self.messages.insert(0, message);
        &self.messages[0]
    }

    /// Removes a message. Returns false when the id is unknown.
    pub fn delete(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        before != self.messages.len()
    }

    /// Retitles a message. Returns false when the id is unknown.
    pub fn rename(&mut self, id: &str, title: impl Into<String>) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.title = title.into();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&VoiceMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Newest-first view of the timeline.
    pub fn messages(&self) -> &[VoiceMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
