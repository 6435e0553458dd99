//! Voice transformation integration tests
//!
//! Runs the transformer on frames produced by the real codec.

use std::f64::consts::PI;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use vx_core::{FrameSequence, VoxResult, Waveform};
use vx_vocoder::{F0Strategy, FrameCodec, WorldCodec};
use vx_voice::{
    ProsodyConfig, ProsodyTransfer, SpectralTransformer, VoiceProfile, VoiceProfileStore,
    VoiceSelector,
};

const SR: u32 = 16000;

fn tone(freq: f64, secs: f64) -> Waveform {
    let samples = (0..(SR as f64 * secs) as usize)
        .map(|i| {
            let t = i as f64 / SR as f64;
            (1..6)
                .map(|h| 0.25 / h as f64 * (2.0 * PI * freq * h as f64 * t).sin())
                .sum()
        })
        .collect();
    Waveform::new(samples, SR).unwrap()
}

fn median_voiced(f0: &[f64]) -> f64 {
    let mut v: Vec<f64> = f0.iter().copied().filter(|&f| f > 0.0).collect();
    assert!(!v.is_empty());
    v.sort_by(|a, b| a.total_cmp(b));
    v[v.len() / 2]
}

/// Envelope centroid of a frame, in bins
fn centroid(envelope: &[f64]) -> f64 {
    let total: f64 = envelope.iter().sum();
    envelope
        .iter()
        .enumerate()
        .map(|(k, v)| k as f64 * v)
        .sum::<f64>()
        / total
}

#[test]
fn test_formant_ratio_monotonic() {
    let codec = WorldCodec::default();
    let frames = codec
        .decompose(&tone(180.0, 0.4), 5.0, &F0Strategy::Robust)
        .unwrap();
    let transformer = SpectralTransformer::new();
    let mid = frames.num_frames() / 2;

    let mut last = f64::NEG_INFINITY;
    for ratio in [0.7, 0.9, 1.1, 1.3, 1.5] {
        let profile = VoiceProfile::new("probe", 180.0, 0.0).formant_shift(ratio);
        let out = transformer.transform(&frames, &profile, 0.0).unwrap();
        let c = centroid(&out.spectral_envelope[mid]);
        assert!(c > last, "centroid {c} did not rise at ratio {ratio}");
        last = c;
    }
}

#[test]
fn test_unvoiced_frames_remain_unvoiced() {
    let codec = WorldCodec::default();
    let mut samples = tone(150.0, 0.3).samples;
    samples.extend(vec![0.0; 4800]);
    let frames = codec
        .decompose(&Waveform::new(samples, SR).unwrap(), 5.0, &F0Strategy::Robust)
        .unwrap();

    let store = VoiceProfileStore::builtin();
    for profile in store.profiles() {
        let out = SpectralTransformer::new()
            .transform(&frames, profile, 3.0)
            .unwrap();
        for (before, after) in frames.f0.iter().zip(&out.f0) {
            if *before == 0.0 {
                assert_eq!(*after, 0.0);
            } else {
                assert!(*after > 0.0);
            }
        }
        assert!(out.spectral_envelope.iter().flatten().all(|v| v.is_finite()));
        assert!(out.aperiodicity.iter().flatten().all(|v| (0.0..=1.0).contains(v)));
    }
}

#[test]
fn test_pitch_target_reached_after_resynthesis() {
    let codec = WorldCodec::default();
    let input = tone(220.0, 1.0);
    let frames = codec.decompose(&input, 5.0, &F0Strategy::Robust).unwrap();

    let profile = VoiceProfile::new("low", 110.0, 0.0).formant_shift(0.75);
    let converted = SpectralTransformer::new()
        .transform(&frames, &profile, 0.0)
        .unwrap();
    let output = codec.resynthesize(&converted, SR, 5.0).unwrap();
    assert!(output.is_finite());

    let check = codec.decompose(&output, 5.0, &F0Strategy::Robust).unwrap();
    let median = median_voiced(&check.f0);
    assert!((median - 110.0).abs() / 110.0 < 0.05, "median {median}");
}

#[test]
fn test_custom_profiles_from_json() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"[{{"name":"narrator","base_f0":140.0,"f0_std":20.0,"formant_shift":0.95,"spectral_tilt":2.0,"breathiness":0.1}}]"#
    )
    .unwrap();

    let store = VoiceProfileStore::builder()
        .profiles_from_json(file.path())
        .unwrap()
        .build()
        .unwrap();
    let resolved = store
        .resolve(&VoiceSelector::Profile("narrator".into()))
        .unwrap();
    assert_eq!(resolved.profile.base_f0, 140.0);
    assert_eq!(resolved.profile.shimmer, 0.0);
}

/// Counts full decompositions while delegating to the built-in codec
#[derive(Default)]
struct CountingCodec {
    inner: WorldCodec,
    decompositions: AtomicUsize,
}

impl FrameCodec for CountingCodec {
    fn name(&self) -> &str {
        "counting"
    }

    fn decompose(
        &self,
        waveform: &Waveform,
        frame_period_ms: f64,
        f0_strategy: &F0Strategy,
    ) -> VoxResult<FrameSequence> {
        self.decompositions.fetch_add(1, Ordering::SeqCst);
        self.inner.decompose(waveform, frame_period_ms, f0_strategy)
    }

    fn analyze_f0(
        &self,
        waveform: &Waveform,
        frame_period_ms: f64,
        f0_strategy: &F0Strategy,
    ) -> VoxResult<Vec<f64>> {
        self.inner.analyze_f0(waveform, frame_period_ms, f0_strategy)
    }

    fn resynthesize(
        &self,
        frames: &FrameSequence,
        sample_rate: u32,
        frame_period_ms: f64,
    ) -> VoxResult<Waveform> {
        self.inner.resynthesize(frames, sample_rate, frame_period_ms)
    }
}

#[test]
fn test_prosody_pitch_contour_skips_spectral_analysis() {
    let codec = Arc::new(CountingCodec::default());
    let transfer = ProsodyTransfer::new(ProsodyConfig::default()).with_codec(codec.clone());

    let reference = tone(200.0, 2.0);
    let profile = transfer.extract(&reference, None).unwrap();

    assert_eq!(codec.decompositions.load(Ordering::SeqCst), 0);
    // 10 ms frames over 2 s
    assert_eq!(profile.pitch_contour.len(), 201);
    let median = median_voiced(&profile.pitch_contour);
    assert!((median - 200.0).abs() / 200.0 < 0.05, "median F0 {median}");
}
