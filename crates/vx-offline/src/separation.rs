//! Vocal/background separation and remix
//!
//! [`SpectralMaskSeparator`] models the background as the per-bin median
//! magnitude over roughly a second of frames: music beds and room tone
//! are stable on that scale, speech is not. Complementary soft masks split
//! every STFT frame so the two stems always add back up to the input.

use std::f64::consts::PI;
use std::sync::Arc;

use log::{debug, info};
use rayon::prelude::*;
use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};
use vx_core::{VoxError, VoxResult, Waveform, db_to_gain};

/// Remixed output is scaled down when its peak exceeds this
pub const REMIX_PEAK_LIMIT: f64 = 0.99;

/// Frames per parallel work unit
const BLOCK_FRAMES: usize = 128;

/// Vocals and everything else
#[derive(Debug, Clone, PartialEq)]
pub struct Stems {
    pub vocals: Waveform,
    pub background: Waveform,
}

/// Splits a mix into vocals and background
pub trait SourceSeparator: Send + Sync {
    fn name(&self) -> &str;

    fn separate(&self, input: &Waveform) -> VoxResult<Stems>;
}

/// STFT settings for [`SpectralMaskSeparator`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparatorSettings {
    pub fft_size: usize,
    pub hop_size: usize,
    /// Time span of the background median (s)
    pub median_span_s: f64,
    /// Soft mask sharpness; higher approaches a binary mask
    pub mask_exponent: f64,
}

impl Default for SeparatorSettings {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            hop_size: 512,
            median_span_s: 1.0,
            mask_exponent: 2.0,
        }
    }
}

impl SeparatorSettings {
    pub fn validate(&self) -> VoxResult<()> {
        if self.fft_size < 16 || !self.fft_size.is_power_of_two() {
            return Err(VoxError::input(format!(
                "separator fft_size must be a power of two >= 16, got {}",
                self.fft_size
            )));
        }
        if self.hop_size == 0 || self.hop_size > self.fft_size / 2 {
            return Err(VoxError::input(format!(
                "separator hop_size must be in 1..={}, got {}",
                self.fft_size / 2,
                self.hop_size
            )));
        }
        if !(self.median_span_s > 0.0 && self.mask_exponent > 0.0) {
            return Err(VoxError::input(
                "separator median_span_s and mask_exponent must be positive",
            ));
        }
        Ok(())
    }
}

/// Median-filter soft-mask separator
#[derive(Debug, Clone, Default)]
pub struct SpectralMaskSeparator {
    settings: SeparatorSettings,
}

struct Plans {
    forward: Arc<dyn RealToComplex<f64>>,
    inverse: Arc<dyn ComplexToReal<f64>>,
}

/// Output of one block: start offset in the padded signal plus both stems
struct BlockOutput {
    offset: usize,
    vocals: Vec<f64>,
    background: Vec<f64>,
}

impl SpectralMaskSeparator {
    pub fn new(settings: SeparatorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SeparatorSettings {
        &self.settings
    }

    fn analysis_window(&self) -> Vec<f64> {
        let n = self.settings.fft_size;
        (0..n)
            .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos()).sqrt())
            .collect()
    }

    fn spectrum(
        &self,
        plans: &Plans,
        padded: &[f64],
        window: &[f64],
        frame: usize,
    ) -> VoxResult<Vec<Complex<f64>>> {
        let start = frame * self.settings.hop_size;
        let mut input: Vec<f64> = padded[start..start + window.len()]
            .iter()
            .zip(window)
            .map(|(s, w)| s * w)
            .collect();
        let mut output = plans.forward.make_output_vec();
        plans
            .forward
            .process(&mut input, &mut output)
            .map_err(|e| VoxError::analysis(format!("separator FFT failed: {e}")))?;
        Ok(output)
    }

    fn process_block(
        &self,
        plans: &Plans,
        padded: &[f64],
        window: &[f64],
        frames: usize,
        half_span: usize,
        block: std::ops::Range<usize>,
    ) -> VoxResult<BlockOutput> {
        let n = self.settings.fft_size;
        let hop = self.settings.hop_size;
        let exponent = self.settings.mask_exponent;

        let ctx_start = block.start.saturating_sub(half_span);
        let ctx_end = (block.end + half_span).min(frames);
        let spectra = (ctx_start..ctx_end)
            .map(|t| self.spectrum(plans, padded, window, t))
            .collect::<VoxResult<Vec<_>>>()?;
        let magnitudes: Vec<Vec<f64>> = spectra
            .iter()
            .map(|s| s.iter().map(|c| c.norm()).collect())
            .collect();

        let seg_len = (block.len() - 1) * hop + n;
        let mut vocals = vec![0.0; seg_len];
        let mut background = vec![0.0; seg_len];
        let bins = n / 2 + 1;
        let mut column = Vec::with_capacity(2 * half_span + 1);
        let mut bg_spec = plans.inverse.make_input_vec();
        let mut voc_spec = plans.inverse.make_input_vec();
        let mut frame_out = plans.inverse.make_output_vec();
        let scale = 1.0 / n as f64;

        for t in block.clone() {
            let local = t - ctx_start;
            let lo = t.saturating_sub(half_span).max(ctx_start) - ctx_start;
            let hi = (t + half_span + 1).min(ctx_end) - ctx_start;

            for k in 0..bins {
                column.clear();
                column.extend(magnitudes[lo..hi].iter().map(|m| m[k]));
                let mid = column.len() / 2;
                let (_, median, _) = column.select_nth_unstable_by(mid, f64::total_cmp);
                let bg_mag = *median;

                let mag = magnitudes[local][k];
                let voc_mag = (mag - bg_mag).max(0.0);
                let bg_pow = bg_mag.min(mag).powf(exponent);
                let voc_pow = voc_mag.powf(exponent);
                let denom = bg_pow + voc_pow;
                let bg_mask = if denom > 1e-300 { bg_pow / denom } else { 0.5 };

                let x = spectra[local][k];
                bg_spec[k] = x * bg_mask;
                voc_spec[k] = x - bg_spec[k];
            }
            // Real signal: DC and Nyquist carry no imaginary part
            for spec in [&mut bg_spec, &mut voc_spec] {
                spec[0].im = 0.0;
                spec[bins - 1].im = 0.0;
            }

            let offset = (t - block.start) * hop;
            for (spec, target) in [(&mut bg_spec, &mut background), (&mut voc_spec, &mut vocals)] {
                plans
                    .inverse
                    .process(spec, &mut frame_out)
                    .map_err(|e| VoxError::synthesis(format!("separator IFFT failed: {e}")))?;
                for (i, (&s, &w)) in frame_out.iter().zip(window).enumerate() {
                    target[offset + i] += s * scale * w;
                }
            }
        }

        Ok(BlockOutput {
            offset: block.start * hop,
            vocals,
            background,
        })
    }
}

impl SourceSeparator for SpectralMaskSeparator {
    fn name(&self) -> &str {
        "spectral-mask"
    }

    fn separate(&self, input: &Waveform) -> VoxResult<Stems> {
        self.settings.validate()?;
        if input.is_empty() {
            return Err(VoxError::input("cannot separate an empty waveform"));
        }

        let n = self.settings.fft_size;
        let hop = self.settings.hop_size;
        let len = input.len();
        info!("Separating vocals from background ({:.1}s)", input.duration());

        // Pad a full window on both sides so every real sample is covered
        // by the same number of frames
        let mut padded = vec![0.0; len + 2 * n];
        padded[n..n + len].copy_from_slice(&input.samples);
        let frames = (padded.len() - n) / hop + 1;

        let window = self.analysis_window();
        let mut norm = vec![0.0; padded.len()];
        for t in 0..frames {
            for (i, w) in window.iter().enumerate() {
                norm[t * hop + i] += w * w;
            }
        }

        let half_span =
            ((self.settings.median_span_s * input.sample_rate as f64 / hop as f64) / 2.0)
                .round()
                .max(1.0) as usize;

        let mut planner = RealFftPlanner::<f64>::new();
        let plans = Plans {
            forward: planner.plan_fft_forward(n),
            inverse: planner.plan_fft_inverse(n),
        };

        let blocks: Vec<std::ops::Range<usize>> = (0..frames)
            .step_by(BLOCK_FRAMES)
            .map(|start| start..(start + BLOCK_FRAMES).min(frames))
            .collect();
        debug!(
            "Separator: {} frames in {} blocks, median over ±{} frames",
            frames,
            blocks.len(),
            half_span
        );

        let outputs = blocks
            .into_par_iter()
            .map(|block| self.process_block(&plans, &padded, &window, frames, half_span, block))
            .collect::<VoxResult<Vec<_>>>()?;

        let mut vocals = vec![0.0; padded.len()];
        let mut background = vec![0.0; padded.len()];
        for block in outputs {
            let end = (block.offset + block.vocals.len()).min(padded.len());
            for (i, p) in (block.offset..end).enumerate() {
                vocals[p] += block.vocals[i];
                background[p] += block.background[i];
            }
        }

        let finish = |stem: Vec<f64>| -> Waveform {
            let samples = (n..n + len)
                .map(|p| if norm[p] > 1e-12 { stem[p] / norm[p] } else { 0.0 })
                .collect();
            Waveform {
                samples,
                sample_rate: input.sample_rate,
            }
        };

        Ok(Stems {
            vocals: finish(vocals),
            background: finish(background),
        })
    }
}

/// Mix stems back together with independent gains. The shorter stem is
/// padded with silence; the sum is scaled down if it would clip.
pub fn remix(
    vocals: &Waveform,
    background: &Waveform,
    vocals_gain_db: f64,
    background_gain_db: f64,
) -> VoxResult<Waveform> {
    if vocals.sample_rate != background.sample_rate {
        return Err(VoxError::input(format!(
            "cannot remix {} Hz vocals with {} Hz background",
            vocals.sample_rate, background.sample_rate
        )));
    }

    let vocal_gain = db_to_gain(vocals_gain_db);
    let background_gain = db_to_gain(background_gain_db);
    let len = vocals.len().max(background.len());
    let at = |wave: &Waveform, i: usize| wave.samples.get(i).copied().unwrap_or(0.0);

    let mut mixed = Waveform {
        samples: (0..len)
            .map(|i| at(vocals, i) * vocal_gain + at(background, i) * background_gain)
            .collect(),
        sample_rate: vocals.sample_rate,
    };

    let peak = mixed.peak();
    if peak > REMIX_PEAK_LIMIT {
        debug!("Remix peak {:.3}, scaling to {}", peak, REMIX_PEAK_LIMIT);
        mixed.apply_gain(REMIX_PEAK_LIMIT / peak);
    }
    Ok(mixed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    const SR: u32 = 16000;

    fn tone(freq: f64, seconds: f64, amp: f64) -> Vec<f64> {
        let n = (seconds * SR as f64) as usize;
        (0..n)
            .map(|i| amp * (2.0 * PI * freq * i as f64 / SR as f64).sin())
            .collect()
    }

    #[test]
    fn test_stems_sum_to_input() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let samples: Vec<f64> = tone(330.0, 1.5, 0.3)
            .into_iter()
            .map(|s| s + rng.random_range(-0.05..0.05))
            .collect();
        let input = Waveform::new(samples, SR).unwrap();

        let stems = SpectralMaskSeparator::default().separate(&input).unwrap();
        assert_eq!(stems.vocals.len(), input.len());
        assert_eq!(stems.background.len(), input.len());
        for i in 0..input.len() {
            let sum = stems.vocals.samples[i] + stems.background.samples[i];
            assert!((sum - input.samples[i]).abs() < 1e-9, "sample {i}");
        }
    }

    #[test]
    fn test_steady_tone_is_background() {
        let input = Waveform::new(tone(220.0, 3.0, 0.5), SR).unwrap();
        let stems = SpectralMaskSeparator::default().separate(&input).unwrap();

        let mid = input.slice(SR as usize, 2 * SR as usize);
        let bg = stems.background.slice(SR as usize, 2 * SR as usize);
        let voc = stems.vocals.slice(SR as usize, 2 * SR as usize);
        assert!(bg.rms() > 0.9 * mid.rms());
        assert!(voc.rms() < 0.1 * mid.rms());
    }

    #[test]
    fn test_empty_input_rejected() {
        let empty = Waveform::silence(0, SR);
        assert!(SpectralMaskSeparator::default().separate(&empty).is_err());
    }

    #[test]
    fn test_remix_pads_and_applies_gains() {
        let vocals = Waveform { samples: vec![0.2; 4], sample_rate: SR };
        let background = Waveform { samples: vec![0.2; 6], sample_rate: SR };

        let mixed = remix(&vocals, &background, 0.0, -6.0).unwrap();
        assert_eq!(mixed.len(), 6);
        assert!((mixed.samples[0] - (0.2 + 0.2 * db_to_gain(-6.0))).abs() < 1e-12);
        assert!((mixed.samples[5] - 0.2 * db_to_gain(-6.0)).abs() < 1e-12);
    }

    #[test]
    fn test_remix_limits_peak() {
        let vocals = Waveform { samples: vec![0.8, -0.1], sample_rate: SR };
        let background = Waveform { samples: vec![0.8, 0.1], sample_rate: SR };

        let mixed = remix(&vocals, &background, 0.0, 0.0).unwrap();
        assert!((mixed.peak() - REMIX_PEAK_LIMIT).abs() < 1e-12);

        let other_rate = Waveform { samples: vec![0.0], sample_rate: 8000 };
        assert!(remix(&vocals, &other_rate, 0.0, 0.0).is_err());
    }
}
