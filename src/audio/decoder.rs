//! Fetching and decoding agent audio clips.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{Result, StageError};
use crate::params::AudioSourceConfig;

/// Decoded clip: interleaved f32 samples at the clip's native rate
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate,
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate.max(1) as f64)
    }

    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        self.samples[frame * self.channels as usize + channel]
    }

    /// Linear interpolation between two frames of one channel
    pub fn lerp(&self, frame: usize, next: usize, frac: f32, channel: usize) -> f32 {
        let a = self.sample(frame, channel);
        let b = self.sample(next, channel);
        a + (b - a) * frac
    }
}

/// Where an audio reference points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioLocation {
    Remote(String),
    Local(PathBuf),
}

/// Resolves references, fetches their bytes and decodes them
#[derive(Clone)]
pub struct AudioDecoder {
    config: AudioSourceConfig,
    client: reqwest::Client,
}

impl AudioDecoder {
    pub fn new(config: AudioSourceConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Map a reference onto a URL or a file under the asset root
    pub fn resolve(&self, reference: &str) -> AudioLocation {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return AudioLocation::Remote(reference.to_string());
        }

        let relative = reference.trim_start_matches('/');
        match &self.config.base_url {
            Some(base) => {
                AudioLocation::Remote(format!("{}/{}", base.trim_end_matches('/'), relative))
            }
            None => AudioLocation::Local(self.config.asset_root.join(relative)),
        }
    }

    /// Fetch the raw bytes behind a reference
    pub async fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        let fetch_error = |reason: String| StageError::ResourceFetch {
            reference: reference.to_string(),
            reason,
        };

        match self.resolve(reference) {
            AudioLocation::Remote(url) => {
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .and_then(|response| response.error_for_status())
                    .map_err(|e| fetch_error(e.to_string()))?;
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| fetch_error(e.to_string()))?;
                Ok(bytes.to_vec())
            }
            AudioLocation::Local(path) => tokio::fs::read(&path)
                .await
                .map_err(|e| fetch_error(format!("{}: {}", path.display(), e))),
        }
    }

    /// Fetch and decode a clip. Decoding runs on the blocking pool.
    pub async fn decode(&self, reference: &str) -> Result<AudioBuffer> {
        let bytes = self.fetch(reference).await?;
        let owned = reference.to_string();

        let buffer = tokio::task::spawn_blocking(move || decode_bytes(&owned, bytes))
            .await
            .map_err(|e| StageError::Decode {
                reference: reference.to_string(),
                reason: format!("decoder task failed: {}", e),
            })??;

        log::debug!(
            "Decoded {}: {:.2}s, {} channels @ {}Hz",
            reference,
            buffer.duration().as_secs_f32(),
            buffer.channels(),
            buffer.sample_rate()
        );
        Ok(buffer)
    }
}

/// Decode an in-memory audio container to f32 samples using Symphonia
pub fn decode_bytes(reference: &str, bytes: Vec<u8>) -> Result<AudioBuffer> {
    let decode_error = |reason: String| StageError::Decode {
        reference: reference.to_string(),
        reason,
    };

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    // Create a hint with the reference's extension
    let mut hint = Hint::new();
    let path_part = reference.split(['?', '#']).next().unwrap_or(reference);
    if let Some(ext) = Path::new(path_part).extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| decode_error(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_error("no audio track found".to_string()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_error(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut layout: Option<(u16, u32)> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                log::warn!("Error reading packet from {}: {}", reference, e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping corrupt packet in {}: {}", reference, e);
                continue;
            }
            Err(e) => return Err(decode_error(e.to_string())),
        };

        // Initialize sample buffer on first decode
        if sample_buf.is_none() {
            let spec = *decoded.spec();
            layout = Some((spec.channels.count() as u16, spec.rate));
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }

        if let Some(ref mut buf) = sample_buf {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }
    }

    match layout {
        Some((channels, rate)) if !samples.is_empty() => {
            Ok(AudioBuffer::new(samples, channels, rate))
        }
        _ => Err(decode_error("no audio samples decoded".to_string())),
    }
}
