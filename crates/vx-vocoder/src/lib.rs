//! vx-vocoder: Frame codec
//!
//! Decomposes a waveform into per-frame (F0, spectral envelope,
//! aperiodicity) and resynthesizes a waveform from such frames.
//!
//! ## Components
//!
//! - **PitchTracker**: YIN / normalized autocorrelation F0 estimation
//! - **SpectralAnalyzer**: pitch-adaptive envelope and band aperiodicity
//! - **Synthesizer**: harmonic oscillator bank plus shaped noise
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vx_vocoder::{F0Strategy, FrameCodec, WorldCodec};
//!
//! let codec = WorldCodec::default();
//! let frames = codec.decompose(&waveform, 5.0, &F0Strategy::Robust)?;
//! let output = codec.resynthesize(&frames, waveform.sample_rate, 5.0)?;
//! ```

mod codec;
mod fft;
pub mod pitch;
pub mod spectral;
mod synthesis;

pub use codec::*;
pub use pitch::{F0Strategy, PitchTracker};
pub use spectral::SpectralAnalyzer;

use vx_core::{FrameSequence, VoxResult, Waveform};

/// Analysis/resynthesis backend.
///
/// Implementations must be deterministic: the same input and parameters
/// always yield the same frames and the same output samples.
pub trait FrameCodec: Send + Sync {
    /// Short identifier used in logs and result descriptions
    fn name(&self) -> &str;

    /// Split a waveform into frames spaced `frame_period_ms` apart.
    /// Silence and noise decompose fine (all frames unvoiced).
    fn decompose(
        &self,
        waveform: &Waveform,
        frame_period_ms: f64,
        f0_strategy: &F0Strategy,
    ) -> VoxResult<FrameSequence>;

    /// F0 per frame only. The default decomposes and keeps the contour;
    /// codecs with a standalone pitch tracker should skip the spectra.
    fn analyze_f0(
        &self,
        waveform: &Waveform,
        frame_period_ms: f64,
        f0_strategy: &F0Strategy,
    ) -> VoxResult<Vec<f64>> {
        Ok(self.decompose(waveform, frame_period_ms, f0_strategy)?.f0)
    }

    /// Render frames back to audio. Shape problems are reported as
    /// synthesis errors before any rendering happens.
    fn resynthesize(
        &self,
        frames: &FrameSequence,
        sample_rate: u32,
        frame_period_ms: f64,
    ) -> VoxResult<Waveform>;
}
