//! Parameter definitions with units and documented semantics.
//!
//! Every section has a `Default` matching the stock avatar page, so a config
//! file only needs the keys it changes.

mod audio;
mod roster;
mod stage;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, StageError};

// Re-export all types
pub use audio::{AnalyzerConfig, AudioSourceConfig, DecodeFailurePolicy};
pub use roster::{AgentProfile, AgentVariant, Roster};
pub use stage::{LayerLayout, StageConfig, TransportConfig};

/// Complete stage configuration (YAML file layout)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub analyzer: AnalyzerConfig,
    pub audio: AudioSourceConfig,
    pub stage: StageConfig,
    pub roster: Roster,
    pub transport: TransportConfig,
}

impl Settings {
    /// Default config location (`~/.config/agentstage/config.yaml` on Linux)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("agentstage").join("config.yaml"))
    }

    /// Parse settings from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        let settings: Settings =
            serde_yaml::from_str(text).map_err(|e| StageError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a file, or defaults when `path` is None and no
    /// file exists at the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !required && !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path).map_err(|e| {
            StageError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        log::info!("Loaded config from {}", path.display());
        Self::from_yaml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.analyzer
            .validate()
            .and_then(|_| self.roster.validate())
            .map_err(StageError::Config)
    }
}
