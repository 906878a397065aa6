//! Audio decoding, playback and amplitude analysis.
//!
//! A decoded clip plays through a [`PlaybackSource`] that mirrors its output
//! into the analyzer tap, so the visuals follow what is actually heard.

mod analyzer;
mod decoder;
mod output;

// Re-export public types
pub use analyzer::{blackman_window, AmplitudeAnalyzer, AnalyzerHandle, AnalyzerTap};
pub use decoder::{decode_bytes, AudioBuffer, AudioDecoder, AudioLocation};
pub use output::{ActivePlayback, AudioOutput, CpalOutput, EndCallback, PlaybackSource};
