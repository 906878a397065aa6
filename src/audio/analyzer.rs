//! Live amplitude analysis of the playing clip.
//!
//! The playback source pushes every mono-mixed output sample into an
//! [`AnalyzerTap`]; once per frame the [`AmplitudeAnalyzer`] windows the most
//! recent `fft_size` samples, runs an FFT, smooths the magnitudes against the
//! previous frame and maps them onto byte bins.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::{Arc, Mutex};

use super::output::PlaybackSource;
use crate::params::AnalyzerConfig;

/// Ring of the most recent output samples, written by the audio thread
pub struct AnalyzerTap {
    ring: Mutex<TapRing>,
}

struct TapRing {
    samples: Vec<f32>,
    write: usize,
}

impl AnalyzerTap {
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            ring: Mutex::new(TapRing {
                samples: vec![0.0; size.max(1)],
                write: 0,
            }),
        })
    }

    /// Append samples, overwriting the oldest
    pub fn push(&self, samples: &[f32]) {
        let Ok(mut ring) = self.ring.lock() else {
            return;
        };
        let len = ring.samples.len();
        for &sample in samples {
            let write = ring.write;
            ring.samples[write] = sample;
            ring.write = (write + 1) % len;
        }
    }

    /// Copy the latest samples into `out`, oldest first
    pub fn latest(&self, out: &mut [f32]) {
        let Ok(ring) = self.ring.lock() else {
            return;
        };
        let len = ring.samples.len();
        let count = out.len().min(len);
        let start = (ring.write + len - count) % len;
        for (i, slot) in out.iter_mut().take(count).enumerate() {
            *slot = ring.samples[(start + i) % len];
        }
    }
}

/// Frequency-domain view of the playback tap
pub struct AmplitudeAnalyzer {
    config: AnalyzerConfig,
    tap: Arc<AnalyzerTap>,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    time_domain: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    bins: Vec<u8>,
}

/// Analyzer shared between a playback session and its visualization loop
pub type AnalyzerHandle = Arc<Mutex<AmplitudeAnalyzer>>;

impl AmplitudeAnalyzer {
    /// Create an analyzer and route `source` through its tap
    pub fn attach(config: &AnalyzerConfig, source: &mut PlaybackSource) -> Self {
        let analyzer = Self::new(config.clone());
        source.connect_tap(analyzer.tap());
        analyzer
    }

    pub fn new(config: AnalyzerConfig) -> Self {
        let size = config.fft_size;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);

        Self {
            tap: AnalyzerTap::new(size),
            fft,
            window: (0..size).map(|i| blackman_window(i, size)).collect(),
            time_domain: vec![0.0; size],
            spectrum: vec![Complex::new(0.0, 0.0); size],
            smoothed: vec![0.0; config.bin_count()],
            bins: vec![0; config.bin_count()],
            config,
        }
    }

    /// Share into a handle for the visualization loop
    pub fn into_handle(self) -> AnalyzerHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn tap(&self) -> Arc<AnalyzerTap> {
        Arc::clone(&self.tap)
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    /// Refresh and return the byte frequency bins (never blocks on playback)
    pub fn snapshot(&mut self) -> &[u8] {
        self.tap.latest(&mut self.time_domain);

        for ((slot, &sample), &weight) in self
            .spectrum
            .iter_mut()
            .zip(&self.time_domain)
            .zip(&self.window)
        {
            *slot = Complex::new(sample * weight, 0.0);
        }
        self.fft.process(&mut self.spectrum);

        let size = self.config.fft_size as f32;
        let tau = self.config.smoothing_time_constant;
        let range_db = self.config.max_decibels - self.config.min_decibels;

        for ((smoothed, bin), value) in self
            .smoothed
            .iter_mut()
            .zip(self.bins.iter_mut())
            .zip(&self.spectrum)
        {
            let magnitude = value.norm() / size;
            *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;

            *bin = if *smoothed > 0.0 {
                let db = 20.0 * smoothed.log10();
                let scaled = 255.0 / range_db * (db - self.config.min_decibels);
                scaled.clamp(0.0, 255.0) as u8
            } else {
                0
            };
        }

        &self.bins
    }
}

/// Blackman window function for FFT analysis
pub fn blackman_window(index: usize, size: usize) -> f32 {
    let phase = 2.0 * PI * index as f32 / size as f32;
    0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq_hz: f32, rate: f32, count: usize) -> Vec<f32> {
        (0..count)
            .map(|i| (2.0 * PI * freq_hz * i as f32 / rate).sin())
            .collect()
    }

    #[test]
    fn test_blackman_window() {
        let size = 256;
        assert!(blackman_window(0, size).abs() < 0.001);
        assert!((blackman_window(size / 2, size) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_tap_keeps_latest_samples_in_order() {
        let tap = AnalyzerTap::new(4);
        tap.push(&[1.0, 2.0, 3.0]);
        tap.push(&[4.0, 5.0]);

        let mut out = [0.0; 4];
        tap.latest(&mut out);
        assert_eq!(out, [2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_silence_reads_zero() {
        let mut analyzer = AmplitudeAnalyzer::new(AnalyzerConfig::default());
        let bins = analyzer.snapshot();
        assert_eq!(bins.len(), 128);
        assert!(bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_tone_lights_its_bin() {
        let config = AnalyzerConfig::default();
        let mut analyzer = AmplitudeAnalyzer::new(config.clone());
        // Bin 16 of a 256-point FFT at 44.1kHz
        let freq = 16.0 * 44100.0 / config.fft_size as f32;
        analyzer.tap().push(&sine(freq, 44100.0, config.fft_size));

        let bins = analyzer.snapshot().to_vec();
        assert_eq!(bins[16], 255);
        assert!(bins[16] > bins[60]);
    }

    #[test]
    fn test_smoothing_decays_after_tone_stops() {
        let config = AnalyzerConfig::default();
        let mut analyzer = AmplitudeAnalyzer::new(config.clone());
        let freq = 16.0 * 44100.0 / config.fft_size as f32;
        let tap = analyzer.tap();

        tap.push(&sine(freq, 44100.0, config.fft_size));
        analyzer.snapshot();

        tap.push(&vec![0.0; config.fft_size]);
        let first_quiet = analyzer.snapshot()[16];
        let second_quiet = analyzer.snapshot()[16];

        // Damped, not cut: energy lingers but falls frame over frame
        assert!(first_quiet > 0);
        assert!(second_quiet < first_quiet);
    }
}
