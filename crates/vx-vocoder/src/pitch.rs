//! F0 tracking
//!
//! Two trackers share one FFT-based correlation core:
//! - YIN (cumulative mean normalized difference) for [`F0Strategy::Robust`]
//! - normalized autocorrelation for [`F0Strategy::Fast`]
//!
//! Caller-supplied contours ([`F0Strategy::Override`]) are resampled onto
//! the analysis frame grid.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use vx_core::{VoxError, VoxResult};

use crate::fft::{RealSpectrum, next_pow2, padded_segment};

/// Frames shorter than this many consecutive voiced frames are dropped
const MIN_VOICED_RUN: usize = 3;

/// Window energy below this (relative to the loudest frame) is unvoiced
const RELATIVE_SILENCE: f64 = 1e-5;

/// Absolute mean-square floor (-100 dBFS)
const ABSOLUTE_SILENCE: f64 = 1e-10;

/// Minimum normalized autocorrelation peak for a voiced decision
const AUTOCORR_VOICING: f64 = 0.5;

// ═══════════════════════════════════════════════════════════════════════════════
// STRATEGY
// ═══════════════════════════════════════════════════════════════════════════════

/// How F0 is obtained during decomposition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum F0Strategy {
    /// YIN with contour smoothing. Slowest, fewest octave errors.
    #[default]
    Robust,
    /// Normalized autocorrelation; `refine` adds sub-sample lag interpolation
    Fast { refine: bool },
    /// Use a caller-supplied contour (Hz, 0 = unvoiced)
    Override {
        contour: Vec<f64>,
        frame_period_ms: f64,
    },
}

impl F0Strategy {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Robust => "robust",
            Self::Fast { refine: false } => "fast",
            Self::Fast { refine: true } => "fast-refined",
            Self::Override { .. } => "override",
        }
    }

    /// Strategy for the segment `[start_s, start_s + duration_s)` of the
    /// signal. Only overrides carry timing, so only they change: the
    /// contour is resampled to start at `start_s`.
    pub fn for_segment(&self, start_s: f64, duration_s: f64) -> F0Strategy {
        match self {
            Self::Override {
                contour,
                frame_period_ms,
            } if *frame_period_ms > 0.0 => {
                let count = (duration_s * 1000.0 / frame_period_ms).ceil().max(0.0) as usize + 1;
                let offset_ms = start_s * 1000.0;
                let local = (0..count)
                    .map(|j| sample_contour(contour, *frame_period_ms, offset_ms + j as f64 * frame_period_ms))
                    .collect();
                Self::Override {
                    contour: local,
                    frame_period_ms: *frame_period_ms,
                }
            }
            other => other.clone(),
        }
    }
}

impl FromStr for F0Strategy {
    type Err = VoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "robust" | "harvest" => Ok(Self::Robust),
            "fast" | "dio" => Ok(Self::Fast { refine: false }),
            "fast-refined" | "fast_refined" | "dio-stonemask" => Ok(Self::Fast { refine: true }),
            other => Err(VoxError::input(format!(
                "unknown F0 strategy '{other}' (expected robust, fast or fast-refined)"
            ))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRACKER
// ═══════════════════════════════════════════════════════════════════════════════

/// Frame-wise F0 tracker
pub struct PitchTracker {
    sample_rate: f64,
    f0_floor: f64,
    f0_ceiling: f64,
    threshold: f64,
    /// Integration window (samples)
    window: usize,
    min_tau: usize,
    max_tau: usize,
    fft: RealSpectrum,
}

impl PitchTracker {
    pub fn new(sample_rate: u32, f0_floor: f64, f0_ceiling: f64, threshold: f64) -> Self {
        let fs = sample_rate as f64;
        let max_tau = (fs / f0_floor).ceil() as usize;
        let min_tau = ((fs / f0_ceiling).floor() as usize).max(2);
        let window = max_tau;
        // r(tau) is needed up to max_tau + 1 for interpolation
        let fft = RealSpectrum::new(next_pow2(window + max_tau + 2));

        Self {
            sample_rate: fs,
            f0_floor,
            f0_ceiling,
            threshold: threshold.clamp(0.01, 0.5),
            window,
            min_tau,
            max_tau,
            fft,
        }
    }

    /// F0 for `num_frames` frames centred at `i * hop` samples
    pub fn track(
        &self,
        samples: &[f64],
        hop: f64,
        num_frames: usize,
        frame_period_ms: f64,
        strategy: &F0Strategy,
    ) -> VoxResult<Vec<f64>> {
        match strategy {
            F0Strategy::Override {
                contour,
                frame_period_ms: contour_period,
            } => {
                if contour.is_empty() {
                    return Err(VoxError::analysis("F0 override contour is empty"));
                }
                if *contour_period <= 0.0 || !contour_period.is_finite() {
                    return Err(VoxError::analysis(format!(
                        "invalid override frame period {contour_period}"
                    )));
                }
                if contour.iter().any(|f| !f.is_finite() || *f < 0.0) {
                    return Err(VoxError::analysis("F0 override contains invalid values"));
                }
                Ok(resample_contour(contour, *contour_period, frame_period_ms, num_frames))
            }
            F0Strategy::Robust => {
                let mut f0 = self.run(samples, hop, num_frames, |seg| self.yin(seg))?;
                smooth_contour(&mut f0);
                Ok(f0)
            }
            F0Strategy::Fast { refine } => {
                let refine = *refine;
                self.run(samples, hop, num_frames, |seg| self.autocorrelation(seg, refine))
            }
        }
    }

    fn run<F>(&self, samples: &[f64], hop: f64, num_frames: usize, estimate: F) -> VoxResult<Vec<f64>>
    where
        F: Fn(&[f64]) -> VoxResult<f64>,
    {
        let energies: Vec<f64> = (0..num_frames)
            .map(|i| self.window_energy(samples, i as f64 * hop))
            .collect();
        let loudest = energies.iter().copied().fold(0.0, f64::max);
        let gate = (loudest * RELATIVE_SILENCE).max(ABSOLUTE_SILENCE);

        let span = self.window + self.max_tau + 2;
        let mut f0 = vec![0.0; num_frames];
        for (i, f) in f0.iter_mut().enumerate() {
            if energies[i] < gate {
                continue;
            }
            let start = (i as f64 * hop - self.window as f64 / 2.0).round() as isize;
            let segment = padded_segment(samples, start, span);
            let estimate = estimate(&segment)?;
            if estimate >= self.f0_floor && estimate <= self.f0_ceiling {
                *f = estimate;
            }
        }
        Ok(f0)
    }

    /// Mean square of the integration window around `centre`
    fn window_energy(&self, samples: &[f64], centre: f64) -> f64 {
        let start = (centre - self.window as f64 / 2.0).round() as isize;
        let seg = padded_segment(samples, start, self.window);
        seg.iter().map(|s| s * s).sum::<f64>() / self.window as f64
    }

    /// Returns `(r, e_lag)`: cross-correlation `r[tau] = sum a[j] s[j+tau]`
    /// and the sliding energy of `s[tau..tau+W]` for `tau in 0..=max_tau+1`.
    fn correlate(&self, segment: &[f64]) -> VoxResult<(Vec<f64>, Vec<f64>)> {
        let n = self.fft.size();
        let lags = self.max_tau + 2;

        let mut head = vec![0.0; n];
        head[..self.window].copy_from_slice(&segment[..self.window]);
        let mut full = vec![0.0; n];
        full[..segment.len()].copy_from_slice(segment);

        let mut spec_a = self.fft.zeroed_spectrum();
        let mut spec_b = self.fft.zeroed_spectrum();
        self.fft
            .forward(&mut head, &mut spec_a)
            .map_err(|e| VoxError::analysis(e.to_string()))?;
        self.fft
            .forward(&mut full, &mut spec_b)
            .map_err(|e| VoxError::analysis(e.to_string()))?;

        for (a, b) in spec_a.iter_mut().zip(&spec_b) {
            *a = a.conj() * b;
        }
        let mut corr = vec![0.0; n];
        self.fft
            .inverse(&mut spec_a, &mut corr)
            .map_err(|e| VoxError::analysis(e.to_string()))?;
        corr.truncate(lags);

        let mut prefix = Vec::with_capacity(segment.len() + 1);
        prefix.push(0.0);
        let mut acc = 0.0;
        for s in segment {
            acc += s * s;
            prefix.push(acc);
        }
        let energy = (0..lags)
            .map(|tau| prefix[tau + self.window] - prefix[tau])
            .collect();

        Ok((corr, energy))
    }

    fn yin(&self, segment: &[f64]) -> VoxResult<f64> {
        let (r, energy) = self.correlate(segment)?;
        let lags = r.len();

        // d(tau) = e0 + e_tau - 2 r(tau)
        let mut cmnd = vec![1.0; lags];
        let mut running = 0.0;
        for tau in 1..lags {
            let d = (energy[0] + energy[tau] - 2.0 * r[tau]).max(0.0);
            running += d;
            cmnd[tau] = if running > 0.0 {
                d * tau as f64 / running
            } else {
                1.0
            };
        }

        let mut tau = self.min_tau;
        while tau < self.max_tau {
            if cmnd[tau] < self.threshold {
                while tau + 1 < self.max_tau && cmnd[tau + 1] < cmnd[tau] {
                    tau += 1;
                }
                let lag = parabolic_peak(&cmnd, tau);
                return Ok(self.sample_rate / lag);
            }
            tau += 1;
        }
        Ok(0.0)
    }

    fn autocorrelation(&self, segment: &[f64], refine: bool) -> VoxResult<f64> {
        let (r, energy) = self.correlate(segment)?;
        let e0 = energy[0];
        if e0 <= 0.0 {
            return Ok(0.0);
        }

        let nac: Vec<f64> = (0..r.len())
            .map(|tau| {
                let denom = (e0 * energy[tau]).sqrt();
                if denom > 0.0 { r[tau] / denom } else { 0.0 }
            })
            .collect();

        let best = (self.min_tau..=self.max_tau)
            .map(|tau| nac[tau])
            .fold(f64::MIN, f64::max);
        if best < AUTOCORR_VOICING {
            return Ok(0.0);
        }

        // First local maximum close to the global one; avoids octave-down picks
        let tau = (self.min_tau..=self.max_tau)
            .find(|&tau| {
                nac[tau] >= 0.9 * best
                    && nac[tau] >= nac[tau - 1]
                    && nac.get(tau + 1).is_none_or(|&next| nac[tau] >= next)
            })
            .unwrap_or(self.min_tau);

        let lag = if refine {
            parabolic_peak(&nac, tau)
        } else {
            tau as f64
        };
        Ok(self.sample_rate / lag)
    }
}

/// Vertex of the parabola through `values[tau-1..=tau+1]`
fn parabolic_peak(values: &[f64], tau: usize) -> f64 {
    if tau == 0 || tau + 1 >= values.len() {
        return tau as f64;
    }
    let (s0, s1, s2) = (values[tau - 1], values[tau], values[tau + 1]);
    let denom = 2.0 * (2.0 * s1 - s0 - s2);
    if denom.abs() < 1e-12 {
        return tau as f64;
    }
    let adjustment = (s2 - s0) / denom;
    if adjustment.is_finite() && adjustment.abs() <= 1.0 {
        tau as f64 + adjustment
    } else {
        tau as f64
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTOUR UTILITIES
// ═══════════════════════════════════════════════════════════════════════════════

/// Median-of-three smoothing over voiced neighbours, then removal of
/// voiced runs shorter than three frames.
pub fn smooth_contour(f0: &mut [f64]) {
    let original = f0.to_vec();
    for i in 1..f0.len().saturating_sub(1) {
        let (a, b, c) = (original[i - 1], original[i], original[i + 1]);
        if a > 0.0 && b > 0.0 && c > 0.0 {
            f0[i] = a.max(b).min(a.min(b).max(c));
        }
    }

    let mut i = 0;
    while i < f0.len() {
        if f0[i] <= 0.0 {
            i += 1;
            continue;
        }
        let start = i;
        while i < f0.len() && f0[i] > 0.0 {
            i += 1;
        }
        if i - start < MIN_VOICED_RUN {
            f0[start..i].fill(0.0);
        }
    }
}

/// Value of `contour` (spaced `period_ms`) at `time_ms`. Interpolates
/// between voiced neighbours, otherwise takes the nearest frame.
fn sample_contour(contour: &[f64], period_ms: f64, time_ms: f64) -> f64 {
    if contour.is_empty() {
        return 0.0;
    }
    let pos = (time_ms / period_ms).max(0.0);
    let i0 = (pos.floor() as usize).min(contour.len() - 1);
    let i1 = (i0 + 1).min(contour.len() - 1);
    let frac = (pos - i0 as f64).clamp(0.0, 1.0);
    let (a, b) = (contour[i0], contour[i1]);
    if a > 0.0 && b > 0.0 {
        a + (b - a) * frac
    } else if frac < 0.5 {
        a
    } else {
        b
    }
}

/// Resample a contour onto `num_frames` frames spaced `dst_period_ms`
pub fn resample_contour(
    contour: &[f64],
    src_period_ms: f64,
    dst_period_ms: f64,
    num_frames: usize,
) -> Vec<f64> {
    (0..num_frames)
        .map(|i| sample_contour(contour, src_period_ms, i as f64 * dst_period_ms))
        .collect()
}
