//! End-to-end conversion tests
//!
//! Synthetic inputs are written to a temp dir, converted through
//! `VoiceConverter` (or the orchestrator directly for long inputs) and the
//! written output is inspected.

use std::f64::consts::PI;
use std::path::Path;
use std::sync::Arc;

use vx_core::{CancelToken, ErrorKind, FrameSequence, VoxError, VoxResult, Waveform};
use vx_offline::{
    Chunk, ChunkContext, ChunkOrchestrator, ChunkPlan, ChunkProcessor, ConversionRequest,
    ConverterConfig, JobState, MediaDemuxer, ParallelMode, VoiceConverter, WavEncoding, read_wav,
    write_wav,
};
use vx_vocoder::{F0Strategy, FrameCodec, WorldCodec};
use vx_voice::{VoiceProfile, VoiceProfileStore};

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Five-partial harmonic tone
fn voiced_tone(freq: f64, secs: f64, sample_rate: u32) -> Waveform {
    let samples = (0..(sample_rate as f64 * secs) as usize)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            (1..6)
                .map(|h| 0.25 / h as f64 * (2.0 * PI * freq * h as f64 * t).sin())
                .sum()
        })
        .collect();
    Waveform::new(samples, sample_rate).unwrap()
}

fn median_voiced(frames: &FrameSequence) -> f64 {
    let mut voiced: Vec<f64> = frames.f0.iter().copied().filter(|&f| f > 0.0).collect();
    assert!(!voiced.is_empty(), "no voiced frames");
    voiced.sort_by(|a, b| a.total_cmp(b));
    voiced[voiced.len() / 2]
}

fn write_input(dir: &Path, name: &str, wave: &Waveform) -> std::path::PathBuf {
    let path = dir.join(name);
    write_wav(&path, wave, WavEncoding::Float32).unwrap();
    path
}

struct Passthrough;

impl ChunkProcessor for Passthrough {
    fn describe(&self) -> String {
        "passthrough".into()
    }

    fn process(&self, _: &Chunk, audio: Waveform, ctx: &ChunkContext) -> VoxResult<Waveform> {
        ctx.check()?;
        Ok(audio)
    }
}

/// Built-in codec that refuses to analyze mostly-constant audio
struct PickyCodec {
    inner: WorldCodec,
}

impl FrameCodec for PickyCodec {
    fn name(&self) -> &str {
        "picky"
    }

    fn decompose(
        &self,
        waveform: &Waveform,
        frame_period_ms: f64,
        f0_strategy: &F0Strategy,
    ) -> VoxResult<FrameSequence> {
        let flat = waveform.samples.iter().filter(|&&s| s == 0.75).count();
        if flat * 2 > waveform.len() {
            return Err(VoxError::analysis("constant signal"));
        }
        self.inner.decompose(waveform, frame_period_ms, f0_strategy)
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

/// Stands in for ffmpeg: "extracts" a fixed waveform
struct FixedDemuxer(Waveform);

impl MediaDemuxer for FixedDemuxer {
    fn name(&self) -> &str {
        "fixed"
    }

    fn extract_audio(&self, _: &Path, output_wav: &Path, _: &CancelToken) -> VoxResult<()> {
        write_wav(output_wav, &self.0, WavEncoding::Float32)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHUNKING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_twelve_minutes_in_three_chunks() {
    let sample_rate = 1000;
    let input = Waveform::new(
        (0..12 * 60 * sample_rate)
            .map(|i| (i as f64 * 0.013).sin() * 0.5)
            .collect(),
        sample_rate as u32,
    )
    .unwrap();

    let config = ConverterConfig::default();
    let chunks = ChunkPlan::from_seconds(
        input.sample_rate,
        5.0 * 60.0,
        config.crossfade_ms / 1000.0,
        config.min_tail_fraction,
    )
    .split(input.len());
    assert_eq!(chunks.len(), 3);

    let orchestrator = ChunkOrchestrator::new(3, CancelToken::new());
    let merged = orchestrator.run(&input, &chunks, &Passthrough).unwrap();

    assert!((merged.duration() - input.duration()).abs() <= 0.05);
    assert_eq!(merged.len(), input.len());
    for (a, b) in merged.samples.iter().zip(&input.samples) {
        assert!((a - b).abs() < 1e-12);
    }
    assert_eq!(orchestrator.state(), JobState::Done);
}

#[test]
fn test_failing_chunk_reports_index_and_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let sample_rate = 8000;
    // Chunk 1 (1.0-2.0 s) is held at a constant the codec rejects
    let mut samples = voiced_tone(200.0, 3.0, sample_rate).samples;
    for s in &mut samples[sample_rate as usize..2 * sample_rate as usize] {
        *s = 0.75;
    }
    let input = write_input(dir.path(), "in.wav", &Waveform::new(samples, sample_rate).unwrap());
    let output = dir.path().join("out.wav");

    let converter = VoiceConverter::new().with_codec(Arc::new(PickyCodec {
        inner: WorldCodec::default(),
    }));
    let request = ConversionRequest::builder()
        .input(&input)
        .output(&output)
        .profile("male_voice_1")
        .parallel(ParallelMode::On)
        .chunk_minutes(1.0 / 60.0)
        .workers(3)
        .build()
        .unwrap();

    let result = converter.convert(&request);
    assert!(!result.success);
    let failure = result.error.unwrap();
    assert_eq!(failure.kind, ErrorKind::ChunkProcessing);
    assert_eq!(failure.chunk_index, Some(1));
    assert!(failure.cause.contains("constant signal"));
    assert!(!output.exists());
    assert_eq!(
        converter.state(),
        JobState::Failed {
            chunk_index: Some(1)
        }
    );
}

#[test]
fn test_worker_count_does_not_change_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "in.wav", &voiced_tone(160.0, 3.0, 8000));

    let run = |workers: usize| {
        let output = dir.path().join(format!("out_{workers}.wav"));
        let request = ConversionRequest::builder()
            .input(&input)
            .output(&output)
            .preset("male_to_female")
            .parallel(ParallelMode::On)
            .chunk_minutes(1.0 / 60.0)
            .workers(workers)
            .build()
            .unwrap();
        let result = VoiceConverter::new().convert(&request);
        assert!(result.success, "{:?}", result.error);
        read_wav(&output).unwrap()
    };

    let single = run(1);
    let pooled = run(3);
    assert_eq!(single.len(), pooled.len());
    for (a, b) in single.samples.iter().zip(&pooled.samples) {
        assert!((a - b).abs() < 1e-6);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVERSION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_ten_second_tone_reaches_target_pitch() {
    let dir = tempfile::tempdir().unwrap();
    let sample_rate = 16000;
    let input = write_input(dir.path(), "tone.wav", &voiced_tone(220.0, 10.0, sample_rate));
    let output = dir.path().join("deep.wav");

    let store = VoiceProfileStore::builder()
        .profile(VoiceProfile::new("deep", 110.0, 0.0).formant_shift(0.75))
        .build()
        .unwrap();
    let request = ConversionRequest::builder()
        .input(&input)
        .output(&output)
        .profile("deep")
        .build()
        .unwrap();

    let result = VoiceConverter::new().with_store(store).convert(&request);
    assert!(result.success, "{:?}", result.error);
    assert!((result.duration_s - 10.0).abs() <= 0.1);

    let converted = read_wav(&output).unwrap();
    assert_eq!(converted.sample_rate, sample_rate);
    assert!((converted.duration() - 10.0).abs() <= 0.1);

    let frames = WorldCodec::default()
        .decompose(&converted, 5.0, &F0Strategy::Robust)
        .unwrap();
    let median = median_voiced(&frames);
    assert!((median - 110.0).abs() / 110.0 <= 0.05, "median F0 {median}");
}

#[test]
fn test_silence_converts_to_silence() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "silence.wav", &Waveform::silence(32000, 16000));
    let output = dir.path().join("out.wav");

    let request = ConversionRequest::builder()
        .input(&input)
        .output(&output)
        .preset("dramatic_change")
        .build()
        .unwrap();
    let result = VoiceConverter::new().convert(&request);
    assert!(result.success, "{:?}", result.error);

    let converted = read_wav(&output).unwrap();
    assert_eq!(converted.len(), 32000);
    assert!(converted.peak() < 1e-3);
}

#[test]
fn test_preserve_background_keeps_length() {
    let dir = tempfile::tempdir().unwrap();
    let sample_rate = 16000;
    let mut mix = voiced_tone(180.0, 2.0, sample_rate);
    let hum = voiced_tone(60.0, 2.0, sample_rate);
    for (s, h) in mix.samples.iter_mut().zip(&hum.samples) {
        *s = 0.6 * *s + 0.3 * h;
    }
    let input = write_input(dir.path(), "mix.wav", &mix);
    let output = dir.path().join("out.wav");

    let request = ConversionRequest::builder()
        .input(&input)
        .output(&output)
        .preset("female_to_male")
        .preserve_background(true)
        .preserve_quality(false)
        .build()
        .unwrap();
    let result = VoiceConverter::new().convert(&request);
    assert!(result.success, "{:?}", result.error);
    assert!(result.method_used.contains("background kept"));

    let converted = read_wav(&output).unwrap();
    assert_eq!(converted.len(), mix.len());
    assert!(converted.peak() <= 1.0);
}

#[test]
fn test_video_input_goes_through_demuxer() {
    let dir = tempfile::tempdir().unwrap();
    let clip = dir.path().join("clip.mp4");
    std::fs::write(&clip, b"not really a video").unwrap();
    let output = dir.path().join("out.wav");

    let converter = VoiceConverter::new()
        .with_demuxer(Arc::new(FixedDemuxer(voiced_tone(150.0, 1.0, 16000))));
    let request = ConversionRequest::builder()
        .input(&clip)
        .output(&output)
        .profile("female_voice_1")
        .build()
        .unwrap();

    let result = converter.convert(&request);
    assert!(result.success, "{:?}", result.error);
    assert_eq!(read_wav(&output).unwrap().len(), 16000);
}

#[test]
fn test_cancelled_conversion_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "in.wav", &voiced_tone(200.0, 1.0, 16000));
    let output = dir.path().join("out.wav");

    let cancel = CancelToken::new();
    cancel.cancel();
    let request = ConversionRequest::builder()
        .input(&input)
        .output(&output)
        .build()
        .unwrap();
    let result = VoiceConverter::new()
        .with_cancel_token(cancel)
        .convert(&request);

    assert!(result.is_cancelled());
    assert!(!output.exists());
}

#[test]
fn test_converter_runs_again_after_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "in.wav", &voiced_tone(200.0, 1.0, 16000));
    let output = dir.path().join("out.wav");
    let request = ConversionRequest::builder()
        .input(&input)
        .output(&output)
        .build()
        .unwrap();

    let converter = VoiceConverter::new();
    converter.cancel();
    assert!(converter.convert(&request).is_cancelled());
    assert_eq!(converter.state(), JobState::Cancelled);

    let result = converter.convert(&request);
    assert!(result.success, "{:?}", result.error);
    assert_eq!(converter.state(), JobState::Done);
    assert!(output.exists());
}

#[test]
fn test_write_failure_after_merge_marks_job_failed() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "in.wav", &voiced_tone(200.0, 1.0, 16000));
    let output = dir.path().join("missing").join("out.wav");

    let request = ConversionRequest::builder()
        .input(&input)
        .output(&output)
        .preserve_quality(false)
        .build()
        .unwrap();
    let converter = VoiceConverter::new();
    let result = converter.convert(&request);

    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, ErrorKind::Input);
    assert_eq!(converter.state(), JobState::Failed { chunk_index: None });
    assert!(!output.exists());
}

#[test]
fn test_non_wav_output_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "in.wav", &voiced_tone(200.0, 0.5, 16000));

    let request = ConversionRequest::builder()
        .input(&input)
        .output(dir.path().join("out.mp3"))
        .build()
        .unwrap();
    let result = VoiceConverter::new().convert(&request);
    assert_eq!(result.error.unwrap().kind, ErrorKind::Input);
}
