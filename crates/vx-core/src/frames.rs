//! Frame-level vocoder parameters

use crate::{VoxError, VoxResult};

/// Per-frame decomposition of a waveform.
///
/// `f0[i] == 0.0` marks frame `i` as unvoiced. Both matrices are
/// `num_frames x num_bins` with `num_bins = fft_size / 2 + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSequence {
    /// Fundamental frequency per frame (Hz)
    pub f0: Vec<f64>,
    /// Power spectral envelope per frame
    pub spectral_envelope: Vec<Vec<f64>>,
    /// Aperiodicity per frame, each value in [0, 1]
    pub aperiodicity: Vec<Vec<f64>>,
    /// Hop between frames (ms)
    pub frame_period_ms: f64,
    /// Sample rate the envelope bins refer to
    pub sample_rate: u32,
}

impl FrameSequence {
    #[inline]
    pub fn num_frames(&self) -> usize {
        self.f0.len()
    }

    /// Spectral bins per frame (0 for an empty sequence)
    pub fn num_bins(&self) -> usize {
        self.spectral_envelope.first().map_or(0, Vec::len)
    }

    /// FFT size the bins were computed with
    pub fn fft_size(&self) -> usize {
        self.num_bins().saturating_sub(1) * 2
    }

    /// Frequency of bin `k` in Hz
    #[inline]
    pub fn bin_frequency(&self, k: usize) -> f64 {
        let fft = self.fft_size();
        if fft == 0 {
            0.0
        } else {
            k as f64 * self.sample_rate as f64 / fft as f64
        }
    }

    pub fn voiced_count(&self) -> usize {
        self.f0.iter().filter(|&&f| f > 0.0).count()
    }

    pub fn is_voiced(&self, frame: usize) -> bool {
        self.f0.get(frame).is_some_and(|&f| f > 0.0)
    }

    /// Duration covered by the frames in seconds
    pub fn duration(&self) -> f64 {
        self.num_frames() as f64 * self.frame_period_ms / 1000.0
    }

    /// Structural check: matching lengths, uniform bin count, finite values.
    ///
    /// Returns a plain message so callers can wrap it in the error
    /// category that fits their stage.
    pub fn check_shape(&self) -> Result<(), String> {
        let n = self.f0.len();
        if self.spectral_envelope.len() != n || self.aperiodicity.len() != n {
            return Err(format!(
                "frame count mismatch: f0 {}, envelope {}, aperiodicity {}",
                n,
                self.spectral_envelope.len(),
                self.aperiodicity.len()
            ));
        }
        if self.frame_period_ms <= 0.0 || !self.frame_period_ms.is_finite() {
            return Err(format!("invalid frame period {}", self.frame_period_ms));
        }

        let bins = self.num_bins();
        if n > 0 && bins < 2 {
            return Err("spectral envelope has fewer than two bins".into());
        }
        for (i, (env, ap)) in self
            .spectral_envelope
            .iter()
            .zip(&self.aperiodicity)
            .enumerate()
        {
            if env.len() != bins || ap.len() != bins {
                return Err(format!(
                    "frame {i}: expected {bins} bins, got envelope {} / aperiodicity {}",
                    env.len(),
                    ap.len()
                ));
            }
            if !self.f0[i].is_finite() || self.f0[i] < 0.0 {
                return Err(format!("frame {i}: invalid f0 {}", self.f0[i]));
            }
            if env.iter().chain(ap.iter()).any(|v| !v.is_finite()) {
                return Err(format!("frame {i}: non-finite spectral value"));
            }
        }
        Ok(())
    }

    /// [`check_shape`](Self::check_shape) reported as a synthesis error
    pub fn validate(&self) -> VoxResult<()> {
        self.check_shape().map_err(VoxError::Synthesis)
    }
}
