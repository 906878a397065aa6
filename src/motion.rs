//! Amplitude-to-rotation mapping for the head and body layers.

/// Byte value treated as the signal midline
const MIDLINE: f32 = 128.0;

/// Head swing (degrees either side of its resting angle)
const HEAD_SWING_DEG: f32 = 35.0;

/// Body swing (degrees either side of its resting angle)
const BODY_SWING_DEG: f32 = 15.0;

/// Rotation angles for one frame (degrees, clockwise)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotationPair {
    pub head: i32,
    pub body: i32,
}

impl RotationPair {
    /// Both layers upright
    pub const REST: RotationPair = RotationPair { head: 0, body: 0 };
}

/// Arithmetic mean of the bin magnitudes (0 for an empty snapshot)
pub fn mean_amplitude(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u32 = bins.iter().map(|&b| b as u32).sum();
    sum as f32 / bins.len() as f32
}

/// Map a frequency snapshot to head/body angles.
///
/// Both angles are `floor(((mean - 128) / 128) * swing + swing)`; the head
/// swing is wider than the body swing so the two always move together.
pub fn map_to_rotation(bins: &[u8]) -> RotationPair {
    rotation_for_mean(mean_amplitude(bins))
}

/// Rotation for a precomputed mean amplitude
pub fn rotation_for_mean(mean: f32) -> RotationPair {
    let centered = (mean - MIDLINE) / MIDLINE;
    RotationPair {
        head: (centered * HEAD_SWING_DEG + HEAD_SWING_DEG).floor() as i32,
        body: (centered * BODY_SWING_DEG + BODY_SWING_DEG).floor() as i32,
    }
}
