//! Frame codec integration tests
//!
//! Analysis/resynthesis behaviour on synthetic signals:
//! - level preservation through a round trip
//! - pitch fidelity and voicing decisions
//! - determinism
//! - shape validation ahead of synthesis

use std::f64::consts::PI;

use vx_core::{VoxError, Waveform};
use vx_vocoder::{CodecSettings, F0Strategy, FrameCodec, WorldCodec};

const SAMPLE_RATE: u32 = 16000;
const FRAME_MS: f64 = 5.0;

/// Harmonic-rich "voice": sawtooth-like partials at `f0`
fn generate_voice(secs: f64, f0: f64) -> Waveform {
    let n = (SAMPLE_RATE as f64 * secs) as usize;
    let samples = (0..n)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE as f64;
            (1..20)
                .filter(|h| f64::from(*h) * f0 < SAMPLE_RATE as f64 / 2.0)
                .map(|h| 0.3 / f64::from(h) * (2.0 * PI * f0 * f64::from(h) * t).sin())
                .sum()
        })
        .collect();
    Waveform::new(samples, SAMPLE_RATE).unwrap()
}

fn generate_sine(secs: f64, freq: f64, amp: f64) -> Waveform {
    let n = (SAMPLE_RATE as f64 * secs) as usize;
    let samples = (0..n)
        .map(|i| amp * (2.0 * PI * freq * i as f64 / SAMPLE_RATE as f64).sin())
        .collect();
    Waveform::new(samples, SAMPLE_RATE).unwrap()
}

/// Deterministic white noise in [-amp, amp]
fn generate_noise(secs: f64, amp: f64) -> Waveform {
    let n = (SAMPLE_RATE as f64 * secs) as usize;
    let mut state: u64 = 0x2545_F491_4F6C_DD1D;
    let samples = (0..n)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            ((state >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0) * amp
        })
        .collect();
    Waveform::new(samples, SAMPLE_RATE).unwrap()
}

/// RMS ignoring `margin` samples at each edge
fn inner_rms(samples: &[f64], margin: usize) -> f64 {
    let inner = &samples[margin..samples.len() - margin];
    (inner.iter().map(|x| x * x).sum::<f64>() / inner.len() as f64).sqrt()
}

fn median_voiced(f0: &[f64]) -> f64 {
    let mut v: Vec<f64> = f0.iter().copied().filter(|&f| f > 0.0).collect();
    assert!(!v.is_empty(), "no voiced frames");
    v.sort_by(|a, b| a.total_cmp(b));
    v[v.len() / 2]
}

fn round_trip(codec: &WorldCodec, input: &Waveform) -> Waveform {
    let frames = codec
        .decompose(input, FRAME_MS, &F0Strategy::Robust)
        .unwrap();
    let mut out = codec
        .resynthesize(&frames, input.sample_rate, FRAME_MS)
        .unwrap();
    out.resize(input.len());
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUND TRIP
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_round_trip_preserves_level_voiced() {
    let codec = WorldCodec::default();
    let input = generate_voice(1.0, 150.0);
    let output = round_trip(&codec, &input);

    assert!(output.is_finite());
    let ratio = inner_rms(&output.samples, 800) / inner_rms(&input.samples, 800);
    assert!((0.75..=1.25).contains(&ratio), "rms ratio {ratio}");
}

#[test]
fn test_round_trip_preserves_level_noise() {
    let codec = WorldCodec::default();
    let input = generate_noise(1.0, 0.2);
    let output = round_trip(&codec, &input);

    let ratio = inner_rms(&output.samples, 800) / inner_rms(&input.samples, 800);
    assert!((0.75..=1.25).contains(&ratio), "rms ratio {ratio}");
}

#[test]
fn test_round_trip_keeps_pitch() {
    let codec = WorldCodec::default();
    let input = generate_sine(0.8, 220.0, 0.5);
    let output = round_trip(&codec, &input);

    let frames = codec
        .decompose(&output, FRAME_MS, &F0Strategy::Robust)
        .unwrap();
    let median = median_voiced(&frames.f0);
    assert!((median - 220.0).abs() / 220.0 < 0.02, "median f0 {median}");
}

// ═══════════════════════════════════════════════════════════════════════════════
// ANALYSIS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_frame_grid() {
    let codec = WorldCodec::default();
    let input = generate_sine(0.5, 200.0, 0.3);
    let frames = codec
        .decompose(&input, FRAME_MS, &F0Strategy::Fast { refine: true })
        .unwrap();

    // 8000 samples, hop 80
    assert_eq!(frames.num_frames(), 101);
    assert_eq!(frames.num_bins(), 513);
    assert_eq!(frames.sample_rate, SAMPLE_RATE);
    assert!(frames.validate().is_ok());

    let output = codec
        .resynthesize(&frames, SAMPLE_RATE, FRAME_MS)
        .unwrap();
    assert_eq!(output.len(), 8080);
}

#[test]
fn test_fractional_hop() {
    let codec = WorldCodec::default();
    let samples = (0..22050)
        .map(|i| 0.3 * (2.0 * PI * 180.0 * i as f64 / 44100.0).sin())
        .collect();
    let input = Waveform::new(samples, 44100).unwrap();
    let frames = codec
        .decompose(&input, FRAME_MS, &F0Strategy::Fast { refine: false })
        .unwrap();

    // hop = 220.5 samples
    assert_eq!(frames.num_frames(), 101);
    let output = codec.resynthesize(&frames, 44100, FRAME_MS).unwrap();
    assert_eq!(output.len(), 22270);
    assert!(output.len() >= input.len());
}

#[test]
fn test_noise_is_unvoiced() {
    let codec = WorldCodec::default();
    let frames = codec
        .decompose(&generate_noise(0.5, 0.3), FRAME_MS, &F0Strategy::Robust)
        .unwrap();
    let voiced = frames.voiced_count() as f64 / frames.num_frames() as f64;
    assert!(voiced < 0.1, "voiced fraction {voiced}");
    for ap in &frames.aperiodicity {
        assert!(ap.iter().all(|&a| (0.0..=1.0).contains(&a)));
    }
}

#[test]
fn test_silence_decomposes() {
    let codec = WorldCodec::default();
    let silence = Waveform::silence(8000, SAMPLE_RATE);
    let frames = codec
        .decompose(&silence, FRAME_MS, &F0Strategy::Robust)
        .unwrap();
    assert_eq!(frames.voiced_count(), 0);

    let output = codec
        .resynthesize(&frames, SAMPLE_RATE, FRAME_MS)
        .unwrap();
    assert!(output.is_finite());
    assert!(output.peak() < 1e-4, "peak {}", output.peak());
}

#[test]
fn test_override_contour_used() {
    let codec = WorldCodec::default();
    let input = generate_sine(0.25, 150.0, 0.4);
    let strategy = F0Strategy::Override {
        contour: vec![175.0; 30],
        frame_period_ms: 10.0,
    };
    let frames = codec.decompose(&input, FRAME_MS, &strategy).unwrap();
    assert!(frames.f0.iter().all(|&f| f == 175.0));
}

#[test]
fn test_empty_input_rejected() {
    let codec = WorldCodec::default();
    let result = codec.decompose(&Waveform::silence(0, SAMPLE_RATE), FRAME_MS, &F0Strategy::Robust);
    assert!(matches!(result, Err(VoxError::Analysis(_))));
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYNTHESIS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_deterministic() {
    let codec = WorldCodec::new(CodecSettings {
        noise_seed: 42,
        ..Default::default()
    });
    let input = generate_voice(0.4, 130.0);

    let a = codec.decompose(&input, FRAME_MS, &F0Strategy::Robust).unwrap();
    let b = codec.decompose(&input, FRAME_MS, &F0Strategy::Robust).unwrap();
    assert_eq!(a, b);

    let out_a = codec.resynthesize(&a, SAMPLE_RATE, FRAME_MS).unwrap();
    let out_b = codec.resynthesize(&b, SAMPLE_RATE, FRAME_MS).unwrap();
    assert_eq!(out_a.samples, out_b.samples);
}

#[test]
fn test_frame_mismatch_is_synthesis_error() {
    let codec = WorldCodec::default();
    let mut frames = codec
        .decompose(&generate_sine(0.2, 200.0, 0.3), FRAME_MS, &F0Strategy::Robust)
        .unwrap();
    frames.aperiodicity.pop();

    let result = codec.resynthesize(&frames, SAMPLE_RATE, FRAME_MS);
    assert!(matches!(result, Err(VoxError::Synthesis(_))));
}

#[test]
fn test_sample_rate_mismatch_is_synthesis_error() {
    let codec = WorldCodec::default();
    let frames = codec
        .decompose(&generate_sine(0.2, 200.0, 0.3), FRAME_MS, &F0Strategy::Robust)
        .unwrap();
    let result = codec.resynthesize(&frames, 22050, FRAME_MS);
    assert!(matches!(result, Err(VoxError::Synthesis(_))));
}
