//! Audio analysis and decoding configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Frequency analysis configuration for the amplitude tap
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// FFT window size (must be power of 2)
    /// Snapshot holds fft_size / 2 byte bins
    pub fft_size: usize,

    /// Exponential smoothing between consecutive snapshots (0 = none, <1)
    pub smoothing_time_constant: f32,

    /// Magnitude mapped to byte 0 (dBFS)
    pub min_decibels: f32,

    /// Magnitude mapped to byte 255 (dBFS)
    pub max_decibels: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl AnalyzerConfig {
    /// Number of frequency bins in a snapshot
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Validate configuration (FFT size must be power of 2, etc.)
    pub fn validate(&self) -> Result<(), String> {
        if !self.fft_size.is_power_of_two() || self.fft_size < 32 {
            return Err(format!(
                "FFT size must be a power of 2 and at least 32, got {}",
                self.fft_size
            ));
        }
        if !(0.0..1.0).contains(&self.smoothing_time_constant) {
            return Err(format!(
                "Smoothing time constant must be in [0, 1), got {}",
                self.smoothing_time_constant
            ));
        }
        if self.min_decibels >= self.max_decibels {
            return Err(format!(
                "min_decibels ({}) must be below max_decibels ({})",
                self.min_decibels, self.max_decibels
            ));
        }
        Ok(())
    }
}

/// What the stage does with the avatar when a clip cannot be fetched or decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeFailurePolicy {
    /// Leave the container where `play` moved it (visible, silent)
    #[default]
    KeepVisible,

    /// Slide the container back out of view
    Hide,
}

/// Where audio references are resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSourceConfig {
    /// Directory relative references resolve against when no base URL is set
    pub asset_root: PathBuf,

    /// Server that published the references (e.g. "http://127.0.0.1:5000")
    pub base_url: Option<String>,

    pub decode_failure: DecodeFailurePolicy,
}

impl Default for AudioSourceConfig {
    fn default() -> Self {
        Self {
            asset_root: PathBuf::from("."),
            base_url: None,
            decode_failure: DecodeFailurePolicy::KeepVisible,
        }
    }
}
