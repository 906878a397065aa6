//! Presentation configuration: window, avatar layout and transitions.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Window and container transition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Window width (pixels)
    pub window_width: u32,

    /// Window height (pixels)
    pub window_height: u32,

    /// Container slide duration (milliseconds)
    pub transition_ms: u64,

    pub layout: LayerLayout,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            window_width: 720,
            window_height: 960,
            transition_ms: 500,
            layout: LayerLayout::default(),
        }
    }
}

impl StageConfig {
    pub fn transition(&self) -> Duration {
        Duration::from_millis(self.transition_ms)
    }
}

/// Placement of the two layers inside the avatar container.
///
/// Units are fractions of the viewport height, with the container centre at 0
/// and +y pointing up. Widths follow each image's aspect ratio.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerLayout {
    pub body_height: f32,
    pub body_center_y: f32,
    pub head_height: f32,
    pub head_center_y: f32,
}

impl Default for LayerLayout {
    fn default() -> Self {
        Self {
            body_height: 0.55,
            body_center_y: -0.2,
            head_height: 0.4,
            head_center_y: 0.22,
        }
    }
}

/// Inbound event channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// TCP address the JSON-lines event channel listens on
    pub listen: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5055".to_string(),
        }
    }
}
