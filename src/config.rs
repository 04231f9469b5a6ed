use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub audio: AudioConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    /// Input device name, or "default" for the system default
    pub device: String,
    /// Fragment emission interval in milliseconds
    pub fragment_interval_ms: u64,
    /// Hard cap on a single recording's artifact size
    pub max_artifact_bytes: usize,
    /// Encoding override, e.g. "audio/wav;codecs=pcm-f32le"; probed when unset
    #[serde(default)]
    pub encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    pub messages_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig {
                device: "default".to_string(),
                fragment_interval_ms: 1000,
                max_artifact_bytes: 512 * 1024 * 1024,
                encoding: None,
            },
            store: StoreConfig {
                messages_path: "messages.json".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
