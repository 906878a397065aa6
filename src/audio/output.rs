//! Playback graph: decoded buffer → analyzer tap → output device.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;

use super::analyzer::AnalyzerTap;
use super::decoder::AudioBuffer;
use crate::error::{Result, StageError};

/// Invoked once from the audio thread when the clip runs out
pub type EndCallback = Box<dyn FnOnce() + Send + 'static>;

/// Reads a decoded buffer at the device rate and feeds the analyzer tap
pub struct PlaybackSource {
    buffer: Arc<AudioBuffer>,
    /// Read position in source frames
    position: f64,
    /// Source frames advanced per output frame
    step: f64,
    tap: Option<Arc<AnalyzerTap>>,
    mono: Vec<f32>,
}

impl PlaybackSource {
    pub fn new(buffer: Arc<AudioBuffer>, output_rate: u32) -> Self {
        let step = buffer.sample_rate() as f64 / output_rate.max(1) as f64;
        Self {
            buffer,
            position: 0.0,
            step,
            tap: None,
            mono: Vec::with_capacity(4096),
        }
    }

    pub fn connect_tap(&mut self, tap: Arc<AnalyzerTap>) {
        self.tap = Some(tap);
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.buffer.frames() as f64
    }

    /// Fill an interleaved output block.
    ///
    /// Returns `false` once the clip is exhausted; the rest of the block is
    /// silence.
    pub fn fill(&mut self, out: &mut [f32], out_channels: usize) -> bool {
        let out_channels = out_channels.max(1);
        let src_channels = self.buffer.channels() as usize;
        let frames = self.buffer.frames();
        self.mono.clear();

        for frame in out.chunks_mut(out_channels) {
            if self.is_finished() {
                frame.fill(0.0);
                continue;
            }

            let index = self.position as usize;
            let frac = (self.position - index as f64) as f32;
            let next = (index + 1).min(frames - 1);

            let mut mix = 0.0;
            for channel in 0..src_channels {
                mix += self.buffer.lerp(index, next, frac, channel);
            }
            self.mono.push(mix / src_channels as f32);

            for (channel, slot) in frame.iter_mut().enumerate() {
                *slot = self
                    .buffer
                    .lerp(index, next, frac, channel % src_channels);
            }

            self.position += self.step;
        }

        if let Some(tap) = &self.tap {
            tap.push(&self.mono);
        }

        !self.is_finished()
    }
}

/// A running playback; dropping it also stops the audio
pub trait ActivePlayback {
    fn stop(&mut self);
}

/// Output sink the controller plays sessions through
pub trait AudioOutput {
    /// Device sample rate (Hz)
    fn sample_rate(&self) -> u32;

    /// Start playing `source`; `on_end` fires when it runs out
    fn start(&self, source: PlaybackSource, on_end: EndCallback) -> Result<Box<dyn ActivePlayback>>;
}

/// Default system output via cpal
pub struct CpalOutput {
    device: cpal::Device,
    config: cpal::StreamConfig,
}

impl CpalOutput {
    /// Open the default output device with an f32 stream configuration
    pub fn open_default() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| StageError::Output("No audio output device found".to_string()))?;

        let default = device
            .default_output_config()
            .map_err(|e| StageError::Output(format!("Failed to get audio config: {}", e)))?;

        let supported = if default.sample_format() == cpal::SampleFormat::F32 {
            default
        } else {
            let rate = default.sample_rate();
            device
                .supported_output_configs()
                .map_err(|e| StageError::Output(format!("Failed to list audio configs: {}", e)))?
                .filter(|range| range.sample_format() == cpal::SampleFormat::F32)
                .map(|range| {
                    if range.min_sample_rate() <= rate && rate <= range.max_sample_rate() {
                        range.with_sample_rate(rate)
                    } else {
                        range.with_max_sample_rate()
                    }
                })
                .next()
                .ok_or_else(|| {
                    StageError::Output("Output device has no f32 stream format".to_string())
                })?
        };

        log::info!(
            "Audio: {} @ {}Hz, {} channels",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            supported.sample_rate().0,
            supported.channels()
        );

        Ok(Self {
            device,
            config: supported.into(),
        })
    }
}

impl AudioOutput for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn start(&self, source: PlaybackSource, on_end: EndCallback) -> Result<Box<dyn ActivePlayback>> {
        let channels = self.config.channels as usize;
        let mut source = source;
        let mut on_end = Some(on_end);

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !source.fill(data, channels) {
                        if let Some(callback) = on_end.take() {
                            callback();
                        }
                    }
                },
                |err| log::error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| StageError::Output(format!("Failed to build audio stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| StageError::Output(format!("Failed to start audio stream: {}", e)))?;

        Ok(Box::new(CpalPlayback {
            stream: Some(stream),
        }))
    }
}

struct CpalPlayback {
    stream: Option<cpal::Stream>,
}

impl ActivePlayback for CpalPlayback {
    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("Pausing stopped stream failed: {}", e);
            }
        }
    }
}
