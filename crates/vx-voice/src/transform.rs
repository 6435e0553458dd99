//! Spectral voice transformation
//!
//! Maps a decomposed [`FrameSequence`] onto a [`VoiceProfile`]:
//! 1. F0 statistics conversion (voiced frames only)
//! 2. Formant warp of the envelope along frequency, in the log domain
//! 3. Spectral tilt in dB per octave
//! 4. Breathiness added to aperiodicity
//! 5. Shimmer as a deterministic per-frame amplitude perturbation

use log::debug;
use rayon::prelude::*;
use vx_core::{FrameSequence, VoxError, VoxResult, semitones_to_ratio};

use crate::VoiceProfile;

/// Aperiodicity added per unit of breathiness
pub const BREATHINESS_GAIN: f64 = 0.1;

/// Tilt is 0 dB at this frequency
pub const TILT_PIVOT_HZ: f64 = 500.0;

/// Tilt is held constant below this frequency
pub const TILT_FLOOR_HZ: f64 = 100.0;

/// Below this F0 spread (Hz) the contour is treated as flat
pub const MIN_F0_STD: f64 = 1.0;

const LOG_FLOOR: f64 = 1e-10;

/// Frame-domain voice transformer
#[derive(Debug, Clone, Default)]
pub struct SpectralTransformer;

impl SpectralTransformer {
    pub fn new() -> Self {
        Self
    }

    /// Transform `frames` towards `profile`. Frame count and bin count are
    /// preserved; the result never contains NaN.
    pub fn transform(
        &self,
        frames: &FrameSequence,
        profile: &VoiceProfile,
        extra_pitch_shift_semitones: f64,
    ) -> VoxResult<FrameSequence> {
        profile.validate()?;
        frames.validate()?;
        if !extra_pitch_shift_semitones.is_finite() {
            return Err(VoxError::input("pitch shift must be finite"));
        }

        let f0 = convert_pitch(
            &frames.f0,
            profile.base_f0,
            profile.f0_std,
            extra_pitch_shift_semitones,
        );

        let tilt = tilt_gains(
            frames.num_bins(),
            frames.sample_rate,
            frames.fft_size(),
            profile.spectral_tilt,
        );
        let spectral_envelope: Vec<Vec<f64>> = frames
            .spectral_envelope
            .par_iter()
            .enumerate()
            .map(|(i, envelope)| {
                let mut warped = warp_formants(envelope, profile.formant_shift);
                let shimmer = if frames.is_voiced(i) {
                    shimmer_gain(i, profile.shimmer)
                } else {
                    1.0
                };
                for (v, g) in warped.iter_mut().zip(&tilt) {
                    *v *= g * shimmer;
                }
                warped
            })
            .collect();

        let aperiodicity = frames
            .aperiodicity
            .par_iter()
            .map(|ap| add_breathiness(ap, profile.breathiness))
            .collect();

        let out = FrameSequence {
            f0,
            spectral_envelope,
            aperiodicity,
            frame_period_ms: frames.frame_period_ms,
            sample_rate: frames.sample_rate,
        };
        out.check_shape()
            .map_err(|e| VoxError::synthesis(format!("transform produced invalid frames: {e}")))?;

        debug!(
            "transformed {} frames towards '{}' (shift {:+.1} st)",
            out.num_frames(),
            profile.name,
            extra_pitch_shift_semitones
        );
        Ok(out)
    }
}

/// Rescale voiced F0 so its mean lands on `target_mean * 2^(semitones/12)`
/// and its spread on `target_std`. Unvoiced frames stay 0; a flat contour
/// (spread under [`MIN_F0_STD`]) keeps its shape.
pub fn convert_pitch(f0: &[f64], target_mean: f64, target_std: f64, semitones: f64) -> Vec<f64> {
    let voiced: Vec<f64> = f0.iter().copied().filter(|&f| f > 0.0).collect();
    if voiced.is_empty() {
        return f0.to_vec();
    }

    let current_mean = voiced.iter().sum::<f64>() / voiced.len() as f64;
    let target_mean = target_mean * semitones_to_ratio(semitones);
    let factor = target_mean / current_mean;

    let scaled_std = std_dev(&voiced, current_mean) * factor;
    let spread = if scaled_std >= MIN_F0_STD {
        target_std / scaled_std
    } else {
        1.0
    };

    let (lo, hi) = (target_mean / 4.0, target_mean * 4.0);
    f0.iter()
        .map(|&f| {
            if f > 0.0 {
                let scaled = f * factor;
                (target_mean + (scaled - target_mean) * spread).clamp(lo, hi)
            } else {
                0.0
            }
        })
        .collect()
}

fn std_dev(values: &[f64], mean: f64) -> f64 {
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// `S'(f) = S(f / ratio)`, interpolated on log power. Frequencies past
/// either end of the source take the edge value.
pub fn warp_formants(envelope: &[f64], ratio: f64) -> Vec<f64> {
    if envelope.is_empty() || (ratio - 1.0).abs() < 1e-12 {
        return envelope.to_vec();
    }
    let log_env: Vec<f64> = envelope.iter().map(|v| (v + LOG_FLOOR).ln()).collect();
    let last = log_env.len() - 1;

    (0..envelope.len())
        .map(|k| {
            let src = k as f64 / ratio;
            let value = if src >= last as f64 {
                log_env[last]
            } else {
                let i = src.floor() as usize;
                let t = src - i as f64;
                log_env[i] + (log_env[i + 1] - log_env[i]) * t
            };
            value.exp()
        })
        .collect()
}

/// Power gain per bin for a tilt of `db_per_octave`:
/// `-tilt * log2(max(f, 100 Hz) / 500 Hz)` dB
pub fn tilt_gains(bins: usize, sample_rate: u32, fft_size: usize, db_per_octave: f64) -> Vec<f64> {
    if db_per_octave == 0.0 || fft_size == 0 {
        return vec![1.0; bins];
    }
    let bin_hz = sample_rate as f64 / fft_size as f64;
    (0..bins)
        .map(|k| {
            let freq = (k as f64 * bin_hz).max(TILT_FLOOR_HZ);
            let db = -db_per_octave * (freq / TILT_PIVOT_HZ).log2();
            10.0_f64.powf(db / 10.0)
        })
        .collect()
}

/// `ap + amount * BREATHINESS_GAIN`, clipped to [0, 1]
pub fn add_breathiness(aperiodicity: &[f64], amount: f64) -> Vec<f64> {
    aperiodicity
        .iter()
        .map(|a| (a + amount * BREATHINESS_GAIN).clamp(0.0, 1.0))
        .collect()
}

/// Power gain `(1 + shimmer * r)^2` with `r` in [-1, 1] hashed from the frame index
fn shimmer_gain(frame: usize, shimmer: f64) -> f64 {
    if shimmer <= 0.0 {
        return 1.0;
    }
    // splitmix64
    let mut z = (frame as u64).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    let r = (z >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0;
    (1.0 + shimmer * r).powi(2)
}
