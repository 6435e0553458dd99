//! vx-core: Shared types for voxshift
//!
//! Everything the rest of the workspace passes between stages lives here:
//! - [`Waveform`]: mono audio as `f64` samples with a sample rate
//! - [`FrameSequence`]: the per-frame (F0, envelope, aperiodicity) triple
//! - [`VoxError`]: the job-level error taxonomy
//! - [`CancelToken`]: cooperative cancellation shared across workers

mod cancel;
mod error;
mod frames;
mod waveform;

pub use cancel::*;
pub use error::*;
pub use frames::*;
pub use waveform::*;

/// Floor used wherever a power or magnitude ends up under a log or a divide
pub const POWER_FLOOR: f64 = 1e-16;

/// Convert decibels to linear gain
#[inline]
pub fn db_to_gain(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// Convert linear gain to decibels
#[inline]
pub fn gain_to_db(gain: f64) -> f64 {
    if gain <= 0.0 {
        -144.0
    } else {
        20.0 * gain.log10()
    }
}

/// Frequency ratio of a shift in semitones
#[inline]
pub fn semitones_to_ratio(semitones: f64) -> f64 {
    2.0_f64.powf(semitones / 12.0)
}
