//! Application configuration.
//!
//! Loaded from `speech-compare/config.toml` under the user config
//! directory; every field has a default so a missing file means defaults.
//! The binary layers CLI overrides on top.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::CHUNK_FRAMES;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Pipeline selected at startup: "modern" or "legacy".
    pub pipeline: String,
    /// Transcription locale for the streaming analyzer.
    pub locale: String,
    /// Input device name; `None` or "default" for the system default.
    pub device: Option<String>,
    /// Directory holding analyzer models (`~` and env vars expanded).
    pub model_dir: String,
    /// Directory of the legacy recognizer model.
    pub legacy_model_dir: String,
    /// Frames per captured buffer.
    pub chunk_frames: usize,
    /// Optional cap on buffers queued toward the analyzer; `None` buffers
    /// without limit, `Some(n)` drops the newest past `n`.
    pub max_queued_buffers: Option<usize>,
    /// Mirror the analyzer feed to WAV files for offline replay.
    pub debug_audio: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: "modern".to_string(),
            locale: "en".to_string(),
            device: None,
            model_dir: "~/.local/share/speech-compare/models".to_string(),
            legacy_model_dir: "~/.local/share/speech-compare/vosk".to_string(),
            chunk_frames: CHUNK_FRAMES,
            max_queued_buffers: None,
            debug_audio: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults when no file
    /// exists.
    pub fn load() -> Result<Self> {
        let Some(path) = config_path() else {
            return Ok(Self::default());
        };
        if !path.is_file() {
            debug!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        debug!("loaded config from {}", path.display());
        Ok(config)
    }
}

/// Path of the config file, when a config directory exists.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("speech-compare").join("config.toml"))
}
