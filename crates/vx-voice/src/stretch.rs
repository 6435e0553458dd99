//! # WSOLA (Waveform Similarity Overlap-Add)
//!
//! Time-domain, pitch-preserving time-scale modification.
//!
//! ## Algorithm
//!
//! 1. Synthesis frames are placed at a fixed hop (half a window)
//! 2. Each frame is read near its nominal analysis position, shifted
//!    within a search range to best continue the previously read frame
//! 3. Frames are Hann-windowed, overlap-added and normalized by the
//!    window sum

use std::f64::consts::PI;

/// WSOLA time stretcher
pub struct WsolaStretcher {
    window_size: usize,
    search_range: usize,
    window: Vec<f64>,
}

impl WsolaStretcher {
    /// 25 ms windows
    pub fn new(sample_rate: u32) -> Self {
        Self::with_window_ms(sample_rate, 25.0)
    }

    pub fn with_window_ms(sample_rate: u32, window_ms: f64) -> Self {
        let window_size = ((sample_rate as f64 * window_ms / 1000.0) as usize).max(64);
        // even, so the half-window hop tiles exactly
        let window_size = window_size + window_size % 2;
        let window = (0..window_size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / window_size as f64).cos()))
            .collect();

        Self {
            window_size,
            search_range: window_size / 4,
            window,
        }
    }

    /// Stretch `input` to exactly `target_len` samples
    pub fn stretch_to(&self, input: &[f64], target_len: usize) -> Vec<f64> {
        if target_len == 0 {
            return Vec::new();
        }
        if input.is_empty() {
            return vec![0.0; target_len];
        }
        if input.len() == target_len {
            return input.to_vec();
        }
        if input.len() < self.window_size * 2 {
            return resample_linear(input, target_len);
        }

        let ratio = target_len as f64 / input.len() as f64;
        let hop_synthesis = self.window_size / 2;
        let hop_analysis = hop_synthesis as f64 / ratio;
        let num_frames = target_len / hop_synthesis + 2;
        let max_pos = (input.len() - self.window_size) as i64;

        let mut output = vec![0.0; num_frames * hop_synthesis + self.window_size];
        let mut norm = vec![0.0; output.len()];
        let mut prev_pos: i64 = 0;

        for frame_idx in 0..num_frames {
            let nominal = (frame_idx as f64 * hop_analysis).round() as i64;
            let pos = if frame_idx == 0 {
                0
            } else {
                // natural continuation of the previous frame
                let continuation = prev_pos + hop_synthesis as i64;
                self.find_optimal_position(input, nominal, continuation, max_pos)
            };
            let pos = pos.clamp(0, max_pos);

            let out_start = frame_idx * hop_synthesis;
            for (i, &w) in self.window.iter().enumerate() {
                let sample = input.get(pos as usize + i).copied().unwrap_or(0.0);
                output[out_start + i] += sample * w;
                norm[out_start + i] += w;
            }
            prev_pos = pos;
        }

        for (out, &n) in output.iter_mut().zip(&norm) {
            if n > 1e-6 {
                *out /= n;
            }
        }
        output.truncate(target_len);
        output
    }

    /// Position within `nominal ± search_range` whose first half-window
    /// correlates best with the continuation of the previous frame
    fn find_optimal_position(&self, input: &[f64], nominal: i64, continuation: i64, max_pos: i64) -> i64 {
        let start = (nominal - self.search_range as i64).max(0);
        let end = (nominal + self.search_range as i64).min(max_pos);
        if start >= end || continuation < 0 || continuation > max_pos {
            return nominal;
        }

        let overlap = self.window_size / 2;
        let reference = &input[continuation as usize..continuation as usize + overlap];

        let mut best_pos = nominal;
        let mut best = f64::NEG_INFINITY;
        for pos in start..=end {
            let candidate = &input[pos as usize..pos as usize + overlap];
            let score = cross_correlation(candidate, reference);
            if score > best {
                best = score;
                best_pos = pos;
            }
        }
        best_pos
    }
}

/// Normalized cross-correlation of two equal-length slices
fn cross_correlation(a: &[f64], b: &[f64]) -> f64 {
    let (mut sum, mut ea, mut eb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        sum += x * y;
        ea += x * x;
        eb += y * y;
    }
    let denom = (ea * eb).sqrt();
    if denom > 1e-10 { sum / denom } else { 0.0 }
}

/// Linear-interpolation resample to `target_len` (for very short inputs)
fn resample_linear(input: &[f64], target_len: usize) -> Vec<f64> {
    if input.len() == 1 || target_len == 1 {
        return vec![input[0]; target_len];
    }
    let scale = (input.len() - 1) as f64 / (target_len - 1) as f64;
    (0..target_len)
        .map(|i| {
            let pos = i as f64 * scale;
            let i0 = (pos.floor() as usize).min(input.len() - 1);
            let i1 = (i0 + 1).min(input.len() - 1);
            let t = pos - i0 as f64;
            input[i0] + (input[i1] - input[i0]) * t
        })
        .collect()
}
