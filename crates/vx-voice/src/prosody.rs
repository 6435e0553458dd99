//! Prosody transfer
//!
//! Extracts energy, pauses, speech rate and pitch from a reference
//! recording and imposes the energy contour and overall duration on a
//! converted target.

use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use vx_core::{VoxError, VoxResult, Waveform};
use vx_vocoder::{F0Strategy, FrameCodec, PitchTracker};

use crate::WsolaStretcher;

/// Targets with less energy than this in a frame get unit gain
const SILENT_FRAME_RMS: f64 = 1e-6;

/// Prosody analysis settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProsodyConfig {
    /// Energy frame length (ms)
    pub frame_ms: f64,
    /// Energy hop (ms)
    pub hop_ms: f64,
    /// Frames quieter than this (dB of mean absolute amplitude) are pauses
    pub pause_threshold_db: f64,
    /// Shortest pause reported (s)
    pub min_pause_s: f64,
    /// Speech rate when no word timings are available
    pub default_speech_rate_wpm: f64,
    /// Duration difference (s) beyond which the target is time-stretched
    pub duration_tolerance_s: f64,
    pub min_gain: f64,
    pub max_gain: f64,
    /// Frame period of the extracted pitch contour (ms)
    pub pitch_frame_period_ms: f64,
}

impl Default for ProsodyConfig {
    fn default() -> Self {
        Self {
            frame_ms: 25.0,
            hop_ms: 10.0,
            pause_threshold_db: -40.0,
            min_pause_s: 0.1,
            default_speech_rate_wpm: 150.0,
            duration_tolerance_s: 0.5,
            min_gain: 0.5,
            max_gain: 2.0,
            pitch_frame_period_ms: 10.0,
        }
    }
}

/// Word with its time span in the reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start_s: f64,
    pub end_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PauseSpan {
    pub start_s: f64,
    pub end_s: f64,
}

impl PauseSpan {
    pub fn duration(&self) -> f64 {
        self.end_s - self.start_s
    }
}

/// Prosodic description of a reference recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProsodyProfile {
    /// RMS per energy frame
    pub energy_envelope: Vec<f64>,
    pub pauses: Vec<PauseSpan>,
    pub speech_rate_wpm: f64,
    /// F0 per pitch frame (Hz, 0 = unvoiced)
    pub pitch_contour: Vec<f64>,
    pub pitch_frame_period_ms: f64,
    pub duration_s: f64,
}

/// Extracts and applies prosody
#[derive(Clone, Default)]
pub struct ProsodyTransfer {
    config: ProsodyConfig,
    codec: Option<Arc<dyn FrameCodec>>,
}

impl ProsodyTransfer {
    pub fn new(config: ProsodyConfig) -> Self {
        Self {
            config,
            codec: None,
        }
    }

    /// Use a frame codec for the pitch contour
    pub fn with_codec(mut self, codec: Arc<dyn FrameCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn config(&self) -> &ProsodyConfig {
        &self.config
    }

    pub fn extract(
        &self,
        reference: &Waveform,
        words: Option<&[WordTiming]>,
    ) -> VoxResult<ProsodyProfile> {
        if reference.sample_rate == 0 {
            return Err(VoxError::input("reference has no sample rate"));
        }
        let duration_s = reference.duration();
        let energy_envelope = self.energy_envelope(reference);
        let pauses = self.detect_pauses(reference);

        let speech_rate_wpm = match words {
            Some(words) if !words.is_empty() && duration_s > 0.0 => {
                words.len() as f64 / duration_s * 60.0
            }
            _ => self.config.default_speech_rate_wpm,
        };

        let pitch_contour = self.pitch_contour(reference);

        debug!(
            "prosody: {:.2}s, {} energy frames, {} pauses, {:.0} wpm",
            duration_s,
            energy_envelope.len(),
            pauses.len(),
            speech_rate_wpm
        );

        Ok(ProsodyProfile {
            energy_envelope,
            pauses,
            speech_rate_wpm,
            pitch_contour,
            pitch_frame_period_ms: self.config.pitch_frame_period_ms,
            duration_s,
        })
    }

    /// Impose the reference's duration and energy contour on `target`
    pub fn apply(&self, target: &Waveform, profile: &ProsodyProfile) -> VoxResult<Waveform> {
        if profile.duration_s <= 0.0 || profile.energy_envelope.is_empty() || target.is_empty() {
            warn!("prosody reference is empty, leaving target unchanged");
            return Ok(target.clone());
        }

        // Pauses are kept as detected in the reference; re-inserting them
        // needs a word alignment between reference and target.
        if !profile.pauses.is_empty() {
            debug!("{} reference pauses left in place", profile.pauses.len());
        }

        let mut output = target.clone();
        let sr = target.sample_rate as f64;
        if (target.duration() - profile.duration_s).abs() > self.config.duration_tolerance_s {
            let target_len = (profile.duration_s * sr).round() as usize;
            debug!(
                "time-stretching {:.2}s -> {:.2}s",
                target.duration(),
                profile.duration_s
            );
            output.samples = WsolaStretcher::new(target.sample_rate).stretch_to(&target.samples, target_len);
        }

        let target_env = self.energy_envelope(&output);
        let reference_env = resample(&profile.energy_envelope, target_env.len());
        let gains: Vec<f64> = target_env
            .iter()
            .zip(&reference_env)
            .map(|(&t, &r)| {
                if t < SILENT_FRAME_RMS {
                    1.0
                } else {
                    (r / t).clamp(self.config.min_gain, self.config.max_gain)
                }
            })
            .collect();

        let (frame, hop) = self.frame_geometry(output.sample_rate);
        let half = frame as f64 / 2.0;
        let last = gains.len().saturating_sub(1);
        for (n, sample) in output.samples.iter_mut().enumerate() {
            let pos = ((n as f64 - half) / hop as f64).clamp(0.0, last as f64);
            let i0 = pos.floor() as usize;
            let i1 = (i0 + 1).min(last);
            let t = pos - i0 as f64;
            *sample *= gains[i0] + (gains[i1] - gains[i0]) * t;
        }

        Ok(output)
    }

    /// RMS per frame; frame `i` starts at `i * hop`, zero-padded at the end
    pub fn energy_envelope(&self, waveform: &Waveform) -> Vec<f64> {
        self.frame_stat(waveform, |frame| {
            (frame.iter().map(|s| s * s).sum::<f64>() / frame.len() as f64).sqrt()
        })
    }

    /// Runs of frames whose mean absolute level is under the pause threshold
    pub fn detect_pauses(&self, waveform: &Waveform) -> Vec<PauseSpan> {
        let (_, hop) = self.frame_geometry(waveform.sample_rate);
        let sr = waveform.sample_rate as f64;
        let levels = self.frame_stat(waveform, |frame| {
            frame.iter().map(|s| s.abs()).sum::<f64>() / frame.len() as f64
        });

        let mut pauses = Vec::new();
        let mut open: Option<f64> = None;
        for (i, level) in levels.iter().enumerate() {
            let db = 20.0 * level.max(1e-10).log10();
            let time = (i * hop) as f64 / sr;
            match (db < self.config.pause_threshold_db, open) {
                (true, None) => open = Some(time),
                (false, Some(start)) => {
                    if time - start > self.config.min_pause_s {
                        pauses.push(PauseSpan { start_s: start, end_s: time });
                    }
                    open = None;
                }
                _ => {}
            }
        }
        if let Some(start) = open {
            let end = waveform.duration();
            if end - start > self.config.min_pause_s {
                pauses.push(PauseSpan { start_s: start, end_s: end });
            }
        }
        pauses
    }

    fn pitch_contour(&self, reference: &Waveform) -> Vec<f64> {
        if reference.is_empty() {
            return Vec::new();
        }
        let period = self.config.pitch_frame_period_ms;

        if let Some(codec) = &self.codec {
            match codec.analyze_f0(reference, period, &F0Strategy::Robust) {
                Ok(f0) => return f0,
                Err(e) => warn!("codec pitch extraction failed ({e}), using fallback tracker"),
            }
        }

        let hop = period * reference.sample_rate as f64 / 1000.0;
        let num_frames = (reference.len() as f64 / hop).floor() as usize + 1;
        let tracker = PitchTracker::new(reference.sample_rate, 71.0, 800.0, 0.15);
        match tracker.track(
            &reference.samples,
            hop,
            num_frames,
            period,
            &F0Strategy::Fast { refine: true },
        ) {
            Ok(f0) => f0,
            Err(e) => {
                warn!("fallback pitch tracking failed: {e}");
                Vec::new()
            }
        }
    }

    fn frame_geometry(&self, sample_rate: u32) -> (usize, usize) {
        let sr = sample_rate as f64;
        let frame = ((self.config.frame_ms * sr / 1000.0).round() as usize).max(1);
        let hop = ((self.config.hop_ms * sr / 1000.0).round() as usize).max(1);
        (frame, hop)
    }

    fn frame_stat<F>(&self, waveform: &Waveform, stat: F) -> Vec<f64>
    where
        F: Fn(&[f64]) -> f64,
    {
        if waveform.is_empty() {
            return Vec::new();
        }
        let (frame, hop) = self.frame_geometry(waveform.sample_rate);
        let samples = &waveform.samples;
        let count = samples.len() / hop + 1;
        let mut buffer = vec![0.0; frame];
        (0..count)
            .map(|i| {
                let start = i * hop;
                buffer.fill(0.0);
                let end = (start + frame).min(samples.len());
                if start < end {
                    buffer[..end - start].copy_from_slice(&samples[start..end]);
                }
                stat(&buffer)
            })
            .collect()
    }
}

/// Linear resample of a contour to `len` points
fn resample(values: &[f64], len: usize) -> Vec<f64> {
    if values.is_empty() || len == 0 {
        return vec![0.0; len];
    }
    if values.len() == 1 || len == 1 {
        return vec![values[0]; len];
    }
    let scale = (values.len() - 1) as f64 / (len - 1) as f64;
    (0..len)
        .map(|i| {
            let pos = i as f64 * scale;
            let i0 = (pos.floor() as usize).min(values.len() - 1);
            let i1 = (i0 + 1).min(values.len() - 1);
            values[i0] + (values[i1] - values[i0]) * (pos - i0 as f64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn tone(amp: f64, secs: f64, sr: u32) -> Waveform {
        let samples = (0..(secs * sr as f64) as usize)
            .map(|i| amp * (2.0 * PI * 200.0 * i as f64 / sr as f64).sin())
            .collect();
        Waveform::new(samples, sr).unwrap()
    }

    #[test]
    fn test_energy_frames() {
        let transfer = ProsodyTransfer::default();
        let env = transfer.energy_envelope(&tone(0.5, 1.0, 16000));
        // 16000 / 160 + 1
        assert_eq!(env.len(), 101);
        assert_relative_eq!(env[50], 0.5 / 2.0_f64.sqrt(), epsilon = 0.01);
    }

    #[test]
    fn test_pause_detection() {
        let sr = 16000;
        let mut samples = tone(0.5, 0.5, sr).samples;
        samples.extend(vec![0.0; 8000]);
        samples.extend(tone(0.5, 0.5, sr).samples);
        samples.extend(vec![0.0; 800]);
        let wave = Waveform::new(samples, sr).unwrap();

        let pauses = ProsodyTransfer::default().detect_pauses(&wave);
        assert_eq!(pauses.len(), 1, "{pauses:?}");
        assert!((pauses[0].start_s - 0.5).abs() < 0.03);
        assert!((pauses[0].duration() - 0.5).abs() < 0.05);
    }

    #[test]
    fn test_trailing_pause_closed() {
        let sr = 16000;
        let mut samples = tone(0.5, 0.3, sr).samples;
        samples.extend(vec![0.0; 4800]);
        let wave = Waveform::new(samples, sr).unwrap();
        let pauses = ProsodyTransfer::default().detect_pauses(&wave);
        assert_eq!(pauses.len(), 1);
        assert_relative_eq!(pauses[0].end_s, 0.6, epsilon = 1e-9);
    }

    #[test]
    fn test_speech_rate() {
        let transfer = ProsodyTransfer::default();
        let reference = tone(0.3, 2.0, 8000);
        let words: Vec<WordTiming> = (0..6)
            .map(|i| WordTiming {
                word: format!("w{i}"),
                start_s: i as f64 * 0.3,
                end_s: i as f64 * 0.3 + 0.25,
            })
            .collect();
        let profile = transfer.extract(&reference, Some(&words)).unwrap();
        assert_relative_eq!(profile.speech_rate_wpm, 180.0);

        let profile = transfer.extract(&reference, None).unwrap();
        assert_eq!(profile.speech_rate_wpm, 150.0);
        assert!(!profile.pitch_contour.is_empty());
    }

    #[test]
    fn test_energy_transfer_scales_level() {
        let transfer = ProsodyTransfer::default();
        let reference = tone(0.4, 1.0, 16000);
        let target = tone(0.1, 1.0, 16000);
        let profile = transfer.extract(&reference, None).unwrap();
        let out = transfer.apply(&target, &profile).unwrap();

        assert_eq!(out.len(), target.len());
        // gain is clipped at 2x
        let ratio = out.rms() / target.rms();
        assert!((ratio - 2.0).abs() < 0.05, "ratio {ratio}");
    }

    #[test]
    fn test_silent_target_untouched() {
        let transfer = ProsodyTransfer::default();
        let profile = transfer.extract(&tone(0.4, 0.5, 16000), None).unwrap();
        let silence = Waveform::silence(8000, 16000);
        let out = transfer.apply(&silence, &profile).unwrap();
        assert!(out.samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_duration_fitted() {
        let transfer = ProsodyTransfer::default();
        let profile = transfer.extract(&tone(0.3, 2.0, 8000), None).unwrap();
        let out = transfer.apply(&tone(0.3, 1.0, 8000), &profile).unwrap();
        assert_eq!(out.len(), 16000);

        // within tolerance: length kept
        let out = transfer.apply(&tone(0.3, 1.8, 8000), &profile).unwrap();
        assert_eq!(out.len(), 14400);
    }
}
