//! Spectral envelope and aperiodicity estimation
//!
//! The envelope follows the CheapTrick idea: a pitch-adaptive Hann window
//! three periods long, a one-sided power spectral density, then a box
//! smoother one F0 wide so harmonic peaks fold into a smooth envelope whose
//! value at `h * F0` carries the harmonic's power per Hz.
//!
//! Aperiodicity is measured per harmonic band on a long window: the share
//! of band energy lying outside the harmonic's main lobe, normalized so
//! white noise reads 1.0 and a clean harmonic reads close to 0.

use vx_core::{POWER_FLOOR, VoxError, VoxResult};

use crate::fft::{RealSpectrum, hann, next_pow2, padded_segment};

/// F0 assumed for windowing unvoiced frames
pub const UNVOICED_WINDOW_F0: f64 = 500.0;

/// Aperiodicity window length in pitch periods
const APERIODICITY_PERIODS: f64 = 16.0;

pub const MIN_APERIODICITY: f64 = 0.001;

/// Per-frame spectral analysis at one sample rate / FFT size
pub struct SpectralAnalyzer {
    sample_rate: f64,
    f0_floor: f64,
    envelope_fft: RealSpectrum,
    aperiodicity_fft: RealSpectrum,
}

impl SpectralAnalyzer {
    pub fn new(sample_rate: u32, fft_size: usize, f0_floor: f64) -> Self {
        let fs = sample_rate as f64;
        let long_window = (APERIODICITY_PERIODS * fs / f0_floor).ceil() as usize;
        Self {
            sample_rate: fs,
            f0_floor,
            envelope_fft: RealSpectrum::new(fft_size),
            aperiodicity_fft: RealSpectrum::new(next_pow2(long_window)),
        }
    }

    /// Number of envelope bins (`fft_size / 2 + 1`)
    pub fn bins(&self) -> usize {
        self.envelope_fft.bins()
    }

    /// Smoothed power spectral density around sample position `centre`
    pub fn envelope(&self, samples: &[f64], centre: f64, f0: f64) -> VoxResult<Vec<f64>> {
        let fft_size = self.envelope_fft.size();
        let f0 = if f0 > 0.0 { f0 } else { UNVOICED_WINDOW_F0 }.max(self.f0_floor);
        let len = ((3.0 * self.sample_rate / f0).round() as usize).clamp(2, fft_size);

        let window = hann(len);
        let start = (centre - len as f64 / 2.0).round() as isize;
        let segment = padded_segment(samples, start, len);

        let mut buffer = vec![0.0; fft_size];
        for (b, (s, w)) in buffer.iter_mut().zip(segment.iter().zip(&window)) {
            *b = s * w;
        }
        let mut spectrum = self.envelope_fft.zeroed_spectrum();
        self.envelope_fft
            .forward(&mut buffer, &mut spectrum)
            .map_err(|e| VoxError::analysis(e.to_string()))?;

        let window_power: f64 = window.iter().map(|w| w * w).sum();
        let scale = 2.0 / (self.sample_rate * window_power);
        let psd: Vec<f64> = spectrum.iter().map(|c| c.norm_sqr() * scale).collect();

        let bin_hz = self.sample_rate / fft_size as f64;
        let mut smoothed = box_smooth(&psd, 0.5 * f0 / bin_hz);
        for v in &mut smoothed {
            *v = v.max(POWER_FLOOR);
        }
        Ok(smoothed)
    }

    /// Aperiodicity on the envelope bin grid. Unvoiced frames are 1.0.
    pub fn aperiodicity(&self, samples: &[f64], centre: f64, f0: f64) -> VoxResult<Vec<f64>> {
        let bins = self.bins();
        if f0 <= 0.0 {
            return Ok(vec![1.0; bins]);
        }

        let fft_size = self.aperiodicity_fft.size();
        let len = ((APERIODICITY_PERIODS * self.sample_rate / f0).round() as usize).clamp(2, fft_size);
        let window = hann(len);
        let start = (centre - len as f64 / 2.0).round() as isize;
        let segment = padded_segment(samples, start, len);

        let mut buffer = vec![0.0; fft_size];
        for (b, (s, w)) in buffer.iter_mut().zip(segment.iter().zip(&window)) {
            *b = s * w;
        }
        let mut spectrum = self.aperiodicity_fft.zeroed_spectrum();
        self.aperiodicity_fft
            .forward(&mut buffer, &mut spectrum)
            .map_err(|e| VoxError::analysis(e.to_string()))?;
        let power: Vec<f64> = spectrum.iter().map(|c| c.norm_sqr()).collect();

        let nyquist = self.sample_rate / 2.0;
        let bin_hz = self.sample_rate / fft_size as f64;
        // Hann main lobe half-width
        let lobe = 2.0 * self.sample_rate / len as f64;

        let mut centres = Vec::new();
        let mut values = Vec::new();
        let mut h = 1.0;
        while h * f0 < nyquist {
            let harmonic = h * f0;
            let lo = (((h - 0.5) * f0) / bin_hz).ceil() as usize;
            let hi = ((((h + 0.5) * f0) / bin_hz).floor() as usize).min(power.len() - 1);

            let (mut total, mut outside) = (0.0, 0.0);
            let (mut n_total, mut n_outside) = (0usize, 0usize);
            for (k, p) in power.iter().enumerate().take(hi + 1).skip(lo) {
                total += p;
                n_total += 1;
                if (k as f64 * bin_hz - harmonic).abs() > lobe {
                    outside += p;
                    n_outside += 1;
                }
            }

            let ratio = if total > POWER_FLOOR && n_outside > 0 {
                (outside / total) / (n_outside as f64 / n_total as f64)
            } else {
                1.0
            };
            centres.push(harmonic);
            values.push(ratio.clamp(MIN_APERIODICITY, 1.0));
            h += 1.0;
        }

        if centres.is_empty() {
            return Ok(vec![1.0; bins]);
        }

        let env_bin_hz = self.sample_rate / self.envelope_fft.size() as f64;
        Ok((0..bins)
            .map(|k| interpolate_bands(&centres, &values, k as f64 * env_bin_hz))
            .collect())
    }
}

/// Piecewise-linear lookup over band centres, flat beyond either end
fn interpolate_bands(centres: &[f64], values: &[f64], freq: f64) -> f64 {
    let last = centres.len() - 1;
    if freq <= centres[0] {
        return values[0];
    }
    if freq >= centres[last] {
        return values[last];
    }
    let j = centres.partition_point(|&c| c <= freq).saturating_sub(1).min(last - 1);
    let t = (freq - centres[j]) / (centres[j + 1] - centres[j]);
    values[j] + (values[j + 1] - values[j]) * t
}

/// Moving average of width `2 * half_width` bins with mirrored edges.
/// Bin `i` is treated as covering `[i - 0.5, i + 0.5)` so fractional
/// widths integrate exactly.
pub(crate) fn box_smooth(values: &[f64], half_width: f64) -> Vec<f64> {
    let n = values.len();
    if n < 2 || half_width <= 0.0 {
        return values.to_vec();
    }

    let pad = half_width.ceil() as usize + 1;
    let mut extended = Vec::with_capacity(n + 2 * pad);
    for m in (1..=pad).rev() {
        extended.push(values[m.min(n - 1)]);
    }
    extended.extend_from_slice(values);
    for m in 1..=pad {
        extended.push(values[(n - 1).saturating_sub(m)]);
    }

    let mut prefix = Vec::with_capacity(extended.len() + 1);
    prefix.push(0.0);
    let mut acc = 0.0;
    for v in &extended {
        acc += v;
        prefix.push(acc);
    }

    // Integral of the step function from -0.5 to x
    let integral = |x: f64| -> f64 {
        let pos = (x + 0.5).clamp(0.0, extended.len() as f64);
        let whole = (pos.floor() as usize).min(extended.len());
        let frac = pos - whole as f64;
        let mut v = prefix[whole];
        if whole < extended.len() {
            v += frac * extended[whole];
        }
        v
    };

    (0..n)
        .map(|k| {
            let centre = (k + pad) as f64;
            (integral(centre + half_width) - integral(centre - half_width)) / (2.0 * half_width)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_box_smooth_constant() {
        let flat = vec![2.0; 50];
        for v in box_smooth(&flat, 3.7) {
            assert_relative_eq!(v, 2.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_box_smooth_spreads_impulse() {
        let mut x = vec![0.0; 41];
        x[20] = 1.0;
        let y = box_smooth(&x, 2.0);
        // width 4 bins: the impulse's unit area spreads over ~4 bins
        assert_relative_eq!(y[20], 0.25, epsilon = 1e-12);
        assert_eq!(y[10], 0.0);
        let total: f64 = y.iter().sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_unvoiced_aperiodicity_is_one() {
        let analyzer = SpectralAnalyzer::new(16000, 1024, 71.0);
        let ap = analyzer.aperiodicity(&[0.1; 2000], 1000.0, 0.0).unwrap();
        assert_eq!(ap.len(), 513);
        assert!(ap.iter().all(|&a| a == 1.0));
    }

    #[test]
    fn test_harmonic_aperiodicity_low() {
        let sr = 16000;
        let x: Vec<f64> = (0..8000)
            .map(|i| {
                let t = i as f64 / sr as f64;
                (1..8)
                    .map(|h| 0.2 / h as f64 * (2.0 * std::f64::consts::PI * 200.0 * h as f64 * t).sin())
                    .sum()
            })
            .collect();
        let analyzer = SpectralAnalyzer::new(sr, 1024, 71.0);
        let ap = analyzer.aperiodicity(&x, 4000.0, 200.0).unwrap();
        // bin of 400 Hz = 25.6 on a 1024 grid at 16 kHz
        assert!(ap[26] < 0.05, "ap {}", ap[26]);
    }

    #[test]
    fn test_envelope_positive() {
        let analyzer = SpectralAnalyzer::new(16000, 1024, 71.0);
        let env = analyzer.envelope(&vec![0.0; 3000], 1500.0, 0.0).unwrap();
        assert!(env.iter().all(|&v| v >= POWER_FLOOR && v.is_finite()));
    }
}
