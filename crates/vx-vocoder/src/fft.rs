//! Cached real FFT plans

use std::sync::Arc;

use realfft::{ComplexToReal, FftError, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex64;

/// Forward/inverse real FFT pair of one size. Plans are shared, so a
/// single instance can serve many threads.
#[derive(Clone)]
pub(crate) struct RealSpectrum {
    size: usize,
    forward: Arc<dyn RealToComplex<f64>>,
    inverse: Arc<dyn ComplexToReal<f64>>,
}

impl RealSpectrum {
    pub fn new(size: usize) -> Self {
        let mut planner = RealFftPlanner::<f64>::new();
        Self {
            size,
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn bins(&self) -> usize {
        self.size / 2 + 1
    }

    pub fn zeroed_spectrum(&self) -> Vec<Complex64> {
        self.forward.make_output_vec()
    }

    /// Forward transform. `input` (length `size`) is clobbered.
    pub fn forward(&self, input: &mut [f64], output: &mut [Complex64]) -> Result<(), FftError> {
        self.forward.process(input, output)
    }

    /// Inverse transform including the `1/size` normalization.
    /// DC and Nyquist imaginary parts are discarded.
    pub fn inverse(&self, spectrum: &mut [Complex64], output: &mut [f64]) -> Result<(), FftError> {
        if let Some(first) = spectrum.first_mut() {
            first.im = 0.0;
        }
        if let Some(last) = spectrum.last_mut() {
            last.im = 0.0;
        }
        self.inverse.process(spectrum, output)?;
        let scale = 1.0 / self.size as f64;
        for v in output.iter_mut() {
            *v *= scale;
        }
        Ok(())
    }
}

/// Smallest power of two >= n
#[inline]
pub(crate) fn next_pow2(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// Copy `len` samples starting at `start` (may be negative), zero outside the signal
pub(crate) fn padded_segment(samples: &[f64], start: isize, len: usize) -> Vec<f64> {
    let mut out = vec![0.0; len];
    let n = samples.len() as isize;
    for (i, v) in out.iter_mut().enumerate() {
        let idx = start + i as isize;
        if idx >= 0 && idx < n {
            *v = samples[idx as usize];
        }
    }
    out
}

/// Symmetric Hann window sampled at bin centres (no zero endpoints)
pub(crate) fn hann(len: usize) -> Vec<f64> {
    let n = len.max(1) as f64;
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * (i as f64 + 0.5) / n).cos())
        .collect()
}
