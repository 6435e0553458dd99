//! WORLD-style frame codec

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use vx_core::{FrameSequence, VoxError, VoxResult, Waveform};

use crate::pitch::{F0Strategy, PitchTracker};
use crate::spectral::SpectralAnalyzer;
use crate::synthesis::Synthesizer;
use crate::FrameCodec;

/// Codec tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecSettings {
    /// Lowest F0 searched (Hz); also sets the default FFT size
    pub f0_floor_hz: f64,
    /// Highest F0 searched (Hz)
    pub f0_ceiling_hz: f64,
    /// Envelope FFT size; derived from the sample rate when `None`
    pub fft_size: Option<usize>,
    /// YIN voicing threshold
    pub yin_threshold: f64,
    /// Seed for the aperiodic excitation
    pub noise_seed: u64,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            f0_floor_hz: 71.0,
            f0_ceiling_hz: 800.0,
            fft_size: None,
            yin_threshold: 0.15,
            noise_seed: 0x5EED_0F_C0DEC,
        }
    }
}

impl CodecSettings {
    /// `2^(1 + floor(log2(3 fs / f0_floor)))` unless set explicitly
    pub fn fft_size_for(&self, sample_rate: u32) -> usize {
        if let Some(size) = self.fft_size {
            return size;
        }
        let periods = 3.0 * sample_rate as f64 / self.f0_floor_hz;
        1usize << (1 + periods.log2().floor() as u32)
    }

    pub fn validate(&self) -> VoxResult<()> {
        if !(self.f0_floor_hz > 0.0 && self.f0_floor_hz < self.f0_ceiling_hz) {
            return Err(VoxError::input(format!(
                "invalid F0 range {}..{} Hz",
                self.f0_floor_hz, self.f0_ceiling_hz
            )));
        }
        if let Some(size) = self.fft_size {
            if size < 64 || !size.is_power_of_two() {
                return Err(VoxError::input(format!(
                    "fft_size must be a power of two >= 64, got {size}"
                )));
            }
        }
        Ok(())
    }
}

/// Built-in frame codec.
///
/// Decomposition runs the pitch tracker over the whole signal, then
/// estimates envelope and aperiodicity per frame in parallel. Frame `i`
/// is centred at `i * hop` samples, giving `floor(len / hop) + 1` frames.
#[derive(Debug, Clone, Default)]
pub struct WorldCodec {
    settings: CodecSettings,
}

impl WorldCodec {
    pub fn new(settings: CodecSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CodecSettings {
        &self.settings
    }

    /// Hop (samples) and frame count for a validated input
    fn frame_grid(&self, waveform: &Waveform, frame_period_ms: f64) -> VoxResult<(f64, usize)> {
        self.settings.validate()?;
        if waveform.is_empty() {
            return Err(VoxError::analysis("cannot analyze an empty waveform"));
        }
        if waveform.sample_rate == 0 {
            return Err(VoxError::analysis("sample rate is zero"));
        }
        if !waveform.is_finite() {
            return Err(VoxError::analysis("waveform contains non-finite samples"));
        }
        if !(frame_period_ms > 0.0 && frame_period_ms.is_finite()) {
            return Err(VoxError::analysis(format!(
                "invalid frame period {frame_period_ms} ms"
            )));
        }

        let hop = frame_period_ms * waveform.sample_rate as f64 / 1000.0;
        if hop < 1.0 {
            return Err(VoxError::analysis(format!(
                "frame period {frame_period_ms} ms is shorter than one sample"
            )));
        }
        Ok((hop, (waveform.len() as f64 / hop).floor() as usize + 1))
    }

    fn track_f0(
        &self,
        waveform: &Waveform,
        hop: f64,
        num_frames: usize,
        frame_period_ms: f64,
        f0_strategy: &F0Strategy,
    ) -> VoxResult<Vec<f64>> {
        let tracker = PitchTracker::new(
            waveform.sample_rate,
            self.settings.f0_floor_hz,
            self.settings.f0_ceiling_hz,
            self.settings.yin_threshold,
        );
        tracker.track(&waveform.samples, hop, num_frames, frame_period_ms, f0_strategy)
    }
}

impl FrameCodec for WorldCodec {
    fn name(&self) -> &str {
        "world"
    }

    fn decompose(
        &self,
        waveform: &Waveform,
        frame_period_ms: f64,
        f0_strategy: &F0Strategy,
    ) -> VoxResult<FrameSequence> {
        let (hop, num_frames) = self.frame_grid(waveform, frame_period_ms)?;
        let sample_rate = waveform.sample_rate;
        let fft_size = self.settings.fft_size_for(sample_rate);
        let samples = &waveform.samples;

        let f0 = self.track_f0(waveform, hop, num_frames, frame_period_ms, f0_strategy)?;

        let analyzer = SpectralAnalyzer::new(sample_rate, fft_size, self.settings.f0_floor_hz);
        let spectra: Vec<(Vec<f64>, Vec<f64>)> = f0
            .par_iter()
            .enumerate()
            .map(|(i, &f)| {
                let centre = i as f64 * hop;
                Ok((
                    analyzer.envelope(samples, centre, f)?,
                    analyzer.aperiodicity(samples, centre, f)?,
                ))
            })
            .collect::<VoxResult<_>>()?;
        let (spectral_envelope, aperiodicity) = spectra.into_iter().unzip();

        let frames = FrameSequence {
            f0,
            spectral_envelope,
            aperiodicity,
            frame_period_ms,
            sample_rate,
        };
        debug!(
            "decomposed {} samples into {} frames ({} voiced, {} bins, {})",
            waveform.len(),
            frames.num_frames(),
            frames.voiced_count(),
            frames.num_bins(),
            f0_strategy.label()
        );
        Ok(frames)
    }

    fn analyze_f0(
        &self,
        waveform: &Waveform,
        frame_period_ms: f64,
        f0_strategy: &F0Strategy,
    ) -> VoxResult<Vec<f64>> {
        let (hop, num_frames) = self.frame_grid(waveform, frame_period_ms)?;
        self.track_f0(waveform, hop, num_frames, frame_period_ms, f0_strategy)
    }

    fn resynthesize(
        &self,
        frames: &FrameSequence,
        sample_rate: u32,
        frame_period_ms: f64,
    ) -> VoxResult<Waveform> {
        frames.validate()?;
        if sample_rate != frames.sample_rate {
            return Err(VoxError::synthesis(format!(
                "frames were analyzed at {} Hz, cannot render at {} Hz",
                frames.sample_rate, sample_rate
            )));
        }
        if !(frame_period_ms > 0.0 && frame_period_ms.is_finite()) {
            return Err(VoxError::synthesis(format!(
                "invalid frame period {frame_period_ms} ms"
            )));
        }
        if frames.num_frames() == 0 {
            return Ok(Waveform::silence(0, sample_rate));
        }

        let synth = Synthesizer::new(sample_rate, self.settings.noise_seed);
        let samples = synth.render(frames, frame_period_ms)?;
        Ok(Waveform {
            samples,
            sample_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fft_size_rule() {
        let settings = CodecSettings::default();
        assert_eq!(settings.fft_size_for(16000), 1024);
        assert_eq!(settings.fft_size_for(44100), 2048);
        assert_eq!(settings.fft_size_for(48000), 2048);
        assert_eq!(settings.fft_size_for(8000), 512);
    }

    #[test]
    fn test_invalid_settings() {
        let settings = CodecSettings {
            fft_size: Some(1000),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        let settings = CodecSettings {
            f0_floor_hz: 900.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_empty_input_is_analysis_error() {
        let codec = WorldCodec::default();
        let empty = Waveform::silence(0, 16000);
        assert!(matches!(
            codec.decompose(&empty, 5.0, &F0Strategy::Robust),
            Err(VoxError::Analysis(_))
        ));
        assert!(matches!(
            codec.analyze_f0(&empty, 5.0, &F0Strategy::Robust),
            Err(VoxError::Analysis(_))
        ));
    }

    #[test]
    fn test_pitch_only_analysis_matches_decompose() {
        let sample_rate = 16000;
        let samples = (0..sample_rate as usize)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                (1..4)
                    .map(|h| 0.3 / h as f64 * (std::f64::consts::TAU * 180.0 * h as f64 * t).sin())
                    .sum()
            })
            .collect();
        let wave = Waveform::new(samples, sample_rate).unwrap();
        let codec = WorldCodec::default();

        let frames = codec.decompose(&wave, 10.0, &F0Strategy::Robust).unwrap();
        let f0 = codec.analyze_f0(&wave, 10.0, &F0Strategy::Robust).unwrap();
        assert_eq!(f0, frames.f0);
    }
}
