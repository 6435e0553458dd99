//! Harmonic-plus-noise resynthesis
//!
//! Voiced frames drive a phase-continuous oscillator bank whose harmonic
//! amplitudes are read off the envelope: `A_h = sqrt(2 S(hF0) F0 (1 - ap))`.
//! The aperiodic share `S * ap` is rendered as filtered white noise,
//! overlap-added with a power-complementary sine window.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::f64::consts::PI;
use vx_core::{FrameSequence, VoxError, VoxResult};

use crate::fft::{RealSpectrum, next_pow2};

const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

pub struct Synthesizer {
    sample_rate: f64,
    noise_seed: u64,
}

impl Synthesizer {
    pub fn new(sample_rate: u32, noise_seed: u64) -> Self {
        Self {
            sample_rate: sample_rate as f64,
            noise_seed,
        }
    }

    /// Render `floor(num_frames * hop)` samples
    pub fn render(&self, frames: &FrameSequence, frame_period_ms: f64) -> VoxResult<Vec<f64>> {
        let hop = frame_period_ms * self.sample_rate / 1000.0;
        if hop < 1.0 {
            return Err(VoxError::synthesis(format!(
                "frame period {frame_period_ms} ms is shorter than one sample"
            )));
        }
        let len = (frames.num_frames() as f64 * hop).floor() as usize;
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut output = self.harmonics(frames, hop, len);
        let noise = self.noise(frames, hop, len)?;
        for (o, n) in output.iter_mut().zip(&noise) {
            *o += n;
        }

        if output.iter().any(|v| !v.is_finite()) {
            return Err(VoxError::synthesis("non-finite sample produced"));
        }
        Ok(output)
    }

    fn harmonics(&self, frames: &FrameSequence, hop: f64, len: usize) -> Vec<f64> {
        let nyquist = self.sample_rate / 2.0;
        let n_frames = frames.num_frames();

        // Per-frame harmonic amplitudes, index 0 unused
        let amplitudes: Vec<Option<Vec<f64>>> = (0..n_frames)
            .map(|i| {
                let f0 = frames.f0[i];
                if f0 <= 0.0 {
                    return None;
                }
                let count = (nyquist / f0).floor() as usize;
                let mut amps = vec![0.0; count + 1];
                for (h, amp) in amps.iter_mut().enumerate().skip(1) {
                    let freq = h as f64 * f0;
                    if freq >= nyquist {
                        break;
                    }
                    let power = lookup(&frames.spectral_envelope[i], freq, frames);
                    let ap = lookup(&frames.aperiodicity[i], freq, frames).clamp(0.0, 1.0);
                    *amp = (2.0 * power * f0 * (1.0 - ap)).max(0.0).sqrt();
                }
                Some(amps)
            })
            .collect();

        let mut output = vec![0.0; len];
        let mut phase = 0.0;
        for (n, out) in output.iter_mut().enumerate() {
            let pos = n as f64 / hop;
            let i0 = (pos.floor() as usize).min(n_frames - 1);
            let i1 = (i0 + 1).min(n_frames - 1);
            let t = (pos - i0 as f64).clamp(0.0, 1.0);

            let (a0, a1) = (amplitudes[i0].as_deref(), amplitudes[i1].as_deref());
            let f0 = match (a0, a1) {
                (None, None) => continue,
                (Some(_), Some(_)) => frames.f0[i0] + (frames.f0[i1] - frames.f0[i0]) * t,
                (Some(_), None) => frames.f0[i0],
                (None, Some(_)) => frames.f0[i1],
            };

            phase += 2.0 * PI * f0 / self.sample_rate;
            if phase >= 2.0 * PI {
                phase -= 2.0 * PI;
            }

            let count = a0.map_or(0, <[f64]>::len).max(a1.map_or(0, <[f64]>::len));
            let (s1, c1) = phase.sin_cos();
            // sin(h*phase) by recurrence
            let (mut prev, mut cur) = (0.0, s1);
            let mut sample = 0.0;
            for h in 1..count {
                if h as f64 * f0 >= nyquist {
                    break;
                }
                let amp0 = a0.and_then(|a| a.get(h)).copied().unwrap_or(0.0);
                let amp1 = a1.and_then(|a| a.get(h)).copied().unwrap_or(0.0);
                sample += (amp0 + (amp1 - amp0) * t) * cur;
                let next = 2.0 * c1 * cur - prev;
                prev = cur;
                cur = next;
            }
            *out = sample;
        }
        output
    }

    fn noise(&self, frames: &FrameSequence, hop: f64, len: usize) -> VoxResult<Vec<f64>> {
        let n_frames = frames.num_frames();
        let step = (hop.round() as usize).max(1);
        let seg_len = 2 * step;
        let fft = RealSpectrum::new(next_pow2(frames.fft_size().max(seg_len)));
        let fft_bin_hz = self.sample_rate / fft.size() as f64;
        let gain_scale = self.sample_rate / 2.0;
        let window: Vec<f64> = (0..seg_len)
            .map(|k| (PI * (k as f64 + 0.5) / seg_len as f64).sin())
            .collect();

        // segment j is centred at j * step
        let segments = len.div_ceil(step) + 1;
        let rendered: Vec<Vec<f64>> = (0..segments)
            .into_par_iter()
            .map(|j| {
                let pos = ((j * step) as f64 / hop).min((n_frames - 1) as f64);
                let i0 = pos.floor() as usize;
                let i1 = (i0 + 1).min(n_frames - 1);
                let t = pos - i0 as f64;

                let mut rng = ChaCha8Rng::seed_from_u64(self.noise_seed ^ (j as u64).wrapping_mul(SEED_STRIDE));
                let mut buffer: Vec<f64> = (0..fft.size())
                    .map(|_| (rng.random::<f64>() * 2.0 - 1.0) * 3.0_f64.sqrt())
                    .collect();
                let mut spectrum = fft.zeroed_spectrum();
                fft.forward(&mut buffer, &mut spectrum)
                    .map_err(|e| VoxError::synthesis(e.to_string()))?;

                for (k, c) in spectrum.iter_mut().enumerate() {
                    let freq = k as f64 * fft_bin_hz;
                    let s0 = lookup(&frames.spectral_envelope[i0], freq, frames)
                        * lookup(&frames.aperiodicity[i0], freq, frames).clamp(0.0, 1.0);
                    let s1 = lookup(&frames.spectral_envelope[i1], freq, frames)
                        * lookup(&frames.aperiodicity[i1], freq, frames).clamp(0.0, 1.0);
                    let density = s0 + (s1 - s0) * t;
                    *c *= (density * gain_scale).max(0.0).sqrt();
                }

                let mut filtered = vec![0.0; fft.size()];
                fft.inverse(&mut spectrum, &mut filtered)
                    .map_err(|e| VoxError::synthesis(e.to_string()))?;
                filtered.truncate(seg_len);
                for (v, w) in filtered.iter_mut().zip(&window) {
                    *v *= w;
                }
                Ok(filtered)
            })
            .collect::<VoxResult<_>>()?;

        let mut output = vec![0.0; len];
        for (j, segment) in rendered.iter().enumerate() {
            let start = (j * step) as isize - step as isize;
            for (k, v) in segment.iter().enumerate() {
                let n = start + k as isize;
                if n >= 0 && (n as usize) < len {
                    output[n as usize] += v;
                }
            }
        }
        Ok(output)
    }
}

/// Linear interpolation of a per-bin frame vector at `freq` Hz
#[inline]
fn lookup(values: &[f64], freq: f64, frames: &FrameSequence) -> f64 {
    let fft = frames.fft_size();
    if values.is_empty() || fft == 0 {
        return 0.0;
    }
    let pos = freq * fft as f64 / frames.sample_rate as f64;
    let last = values.len() - 1;
    if pos >= last as f64 {
        return values[last];
    }
    let i = pos.floor() as usize;
    let t = pos - i as f64;
    values[i] + (values[i + 1] - values[i]) * t
}
