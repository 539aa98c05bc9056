//! Spectral features of the latest audio window.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::pipeline::{stage_names, PipelineStage};
use crate::state::{AudioFeatures, FrameState};

pub const FFT_SIZE: usize = 2048;

const LOW_BAND_HZ: (f32, f32) = (20.0, 200.0);
const MID_BAND_HZ: (f32, f32) = (200.0, 2000.0);

pub struct FeatureExtractor {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    prev_spectrum: Vec<f32>,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        // Hann window
        let window = (0..FFT_SIZE)
            .map(|i| {
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (FFT_SIZE - 1) as f32).cos())
            })
            .collect();

        Self {
            fft,
            window,
            prev_spectrum: vec![0.0; FFT_SIZE / 2 + 1],
        }
    }

    /// Features of the last `FFT_SIZE` samples, or `None` if fewer are available.
    pub fn extract(&mut self, samples: &[f32], sample_rate: u32) -> Option<AudioFeatures> {
        if samples.len() < FFT_SIZE || sample_rate == 0 {
            return None;
        }
        let frame = &samples[samples.len() - FFT_SIZE..];

        let rms = (frame.iter().map(|s| s * s).sum::<f32>() / FFT_SIZE as f32).sqrt();

        let mut buffer: Vec<Complex<f32>> = frame
            .iter()
            .zip(self.window.iter())
            .map(|(s, w)| Complex::new(s * w, 0.0))
            .collect();
        self.fft.process(&mut buffer);

        let spectrum: Vec<f32> = buffer[..FFT_SIZE / 2 + 1].iter().map(|c| c.norm()).collect();
        let bin_hz = sample_rate as f32 / FFT_SIZE as f32;

        let total: f32 = spectrum.iter().sum();
        let centroid = if total > 0.0 {
            spectrum
                .iter()
                .enumerate()
                .map(|(bin, mag)| bin as f32 * bin_hz * mag)
                .sum::<f32>()
                / total
        } else {
            0.0
        };

        // Half-wave rectified difference, normalised per bin
        let flux = spectrum
            .iter()
            .zip(self.prev_spectrum.iter())
            .map(|(curr, prev)| (curr - prev).max(0.0))
            .sum::<f32>()
            / spectrum.len() as f32;
        self.prev_spectrum = spectrum;

        let band = |lo: f32, hi: f32| -> f64 {
            let (mut energy, mut bins) = (0.0f32, 0usize);
            for (bin, mag) in self.prev_spectrum.iter().enumerate() {
                let freq = bin as f32 * bin_hz;
                if freq >= lo && freq < hi {
                    energy += mag * mag;
                    bins += 1;
                }
            }
            (energy / bins.max(1) as f32).sqrt() as f64
        };

        Some(AudioFeatures {
            rms_energy: rms as f64,
            spectral_centroid: centroid as f64,
            spectral_flux: flux as f64,
            low_energy: band(LOW_BAND_HZ.0, LOW_BAND_HZ.1),
            mid_energy: band(MID_BAND_HZ.0, MID_BAND_HZ.1),
            high_energy: band(MID_BAND_HZ.1, f32::INFINITY),
        })
    }
}

impl PipelineStage for FeatureExtractor {
    fn name(&self) -> &str {
        stage_names::FEATURE_EXTRACT
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        // Short buffers keep whatever features upstream already supplied
        if let Some(features) = self.extract(&state.audio_buffer, state.sample_rate) {
            state.audio = features;
        }
        Ok(())
    }
}
