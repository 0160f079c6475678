use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::audio::ResampleMode;
use crate::session::EngineSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub audio: AudioConfig,
    pub storage: StorageConfig,
}

/// Which device backend drives the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Cpal,
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub backend: BackendKind,
    pub buffer_frames: usize,
    pub queue_capacity: usize,
    pub resample_mode: ResampleMode,
    pub max_consecutive_write_failures: u32,
    #[serde(default)]
    pub input_device: Option<String>,
    #[serde(default)]
    pub output_device: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub recordings_dir: String,
    pub file_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig {
                backend: BackendKind::Cpal,
                buffer_frames: 1024,
                queue_capacity: 32,
                resample_mode: ResampleMode::Chunked,
                max_consecutive_write_failures: 8,
                input_device: None,
                output_device: None,
            },
            storage: StorageConfig {
                recordings_dir: "~/.miccheck".to_string(),
                file_name: "temp.wav".to_string(),
            },
        }
    }
}

impl Config {
    /// Load [`Config::default`], then the optional file at `path`, then
    /// `MICCHECK_*` env overrides
    ///
    /// Nested keys use a double underscore, e.g. `MICCHECK_AUDIO__BACKEND=synthetic`.
    pub fn load(path: &str) -> Result<Self> {
        let defaults = config::Config::try_from(&Config::default())
            .context("Failed to serialize default config")?;

        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("MICCHECK")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        Ok(settings.try_deserialize()?)
    }

    /// Recordings directory with `~` expanded
    pub fn recordings_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.storage.recordings_dir).as_ref())
    }

    /// The single fixed recording slot
    pub fn recording_path(&self) -> PathBuf {
        self.recordings_dir().join(&self.storage.file_name)
    }

    /// Create the recordings directory if it doesn't exist
    pub fn ensure_recordings_dir(&self) -> Result<PathBuf> {
        let dir = self.recordings_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create recordings directory {}", dir.display()))?;
        Ok(dir)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            recording_path: self.recording_path(),
            buffer_frames: self.audio.buffer_frames,
            queue_capacity: self.audio.queue_capacity,
            resample_mode: self.audio.resample_mode,
            max_consecutive_write_failures: self.audio.max_consecutive_write_failures,
        }
    }
}
