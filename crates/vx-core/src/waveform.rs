//! Mono audio buffer

use crate::{VoxError, VoxResult};

/// Mono audio, 64-bit float samples
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    /// Samples, nominally in [-1, 1]
    pub samples: Vec<f64>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl Waveform {
    /// Wrap samples; rejects a zero sample rate and non-finite samples
    pub fn new(samples: Vec<f64>, sample_rate: u32) -> VoxResult<Self> {
        if sample_rate == 0 {
            return Err(VoxError::input("sample rate must be positive"));
        }
        if let Some(pos) = samples.iter().position(|s| !s.is_finite()) {
            return Err(VoxError::input(format!(
                "non-finite sample at position {pos}"
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// `len` samples of silence
    pub fn silence(len: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![0.0; len],
            sample_rate,
        }
    }

    /// Mix interleaved multi-channel audio down to mono
    pub fn from_interleaved(interleaved: &[f64], channels: usize, sample_rate: u32) -> Self {
        if channels <= 1 {
            return Self {
                samples: interleaved.to_vec(),
                sample_rate,
            };
        }

        let scale = 1.0 / channels as f64;
        let samples = interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f64>() * scale)
            .collect();

        Self {
            samples,
            sample_rate,
        }
    }

    /// Number of samples
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f64 / self.sample_rate as f64
        }
    }

    /// Copy of `[start, end)`, clamped to the buffer
    pub fn slice(&self, start: usize, end: usize) -> Waveform {
        let end = end.min(self.samples.len());
        let start = start.min(end);
        Waveform {
            samples: self.samples[start..end].to_vec(),
            sample_rate: self.sample_rate,
        }
    }

    /// Truncate or zero-pad to exactly `len` samples
    pub fn resize(&mut self, len: usize) {
        self.samples.resize(len, 0.0);
    }

    /// Apply gain
    pub fn apply_gain(&mut self, gain: f64) {
        for sample in &mut self.samples {
            *sample *= gain;
        }
    }

    /// Peak level (linear)
    pub fn peak(&self) -> f64 {
        self.samples.iter().map(|s| s.abs()).fold(0.0, f64::max)
    }

    /// RMS level (linear)
    pub fn rms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.samples.iter().map(|s| s * s).sum();
        (sum / self.samples.len() as f64).sqrt()
    }

    /// True if every sample is finite
    pub fn is_finite(&self) -> bool {
        self.samples.iter().all(|s| s.is_finite())
    }
}
