//! Main conversion pipeline
//!
//! Orchestrates one conversion end to end:
//! 1. Validate the request and resolve the target voice
//! 2. Load audio (demuxing video first)
//! 3. Separate vocals from background (optional)
//! 4. Plan chunks and convert them on the worker pool
//! 5. Remix the background (optional)
//! 6. Transfer prosody from the input (optional)
//! 7. Write the output atomically

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use parking_lot::RwLock;
use vx_core::{CancelToken, VoxError, VoxResult, Waveform, gain_to_db};
use vx_vocoder::{FrameCodec, WorldCodec};
use vx_voice::{ProsodyTransfer, ResolvedVoice, VoiceProfileStore};

use crate::chunk::{Chunk, ChunkPlan, single_chunk};
use crate::config::ConverterConfig;
use crate::decoder::AudioDecoder;
use crate::demux::{FfmpegDemuxer, MediaDemuxer};
use crate::orchestrator::{ChunkOrchestrator, ChunkProcessor, JobState};
use crate::process::ProcessChunkProcessor;
use crate::request::{
    ConversionOptions, ConversionRequest, ConversionResult, ConversionSummary, ParallelMode,
    is_video_path,
};
use crate::separation::{SourceSeparator, SpectralMaskSeparator, remix};
use crate::wav::{WavEncoding, write_wav_atomic};
use crate::worker::{ChunkJobSpec, VoiceChunkProcessor};

/// Where chunk work runs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExecutionBackend {
    /// In-process rayon pool
    #[default]
    Threads,
    /// One child process per chunk; `worker_exe` must implement
    /// `worker --task <file>`
    Processes { worker_exe: PathBuf },
}

impl ExecutionBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Threads => "threads",
            Self::Processes { .. } => "processes",
        }
    }
}

/// Converts recordings to a target voice
pub struct VoiceConverter {
    config: ConverterConfig,
    store: Arc<VoiceProfileStore>,
    codec: Arc<dyn FrameCodec>,
    separator: Arc<dyn SourceSeparator>,
    demuxer: Arc<dyn MediaDemuxer>,
    backend: ExecutionBackend,
    cancel: CancelToken,
    state: Arc<RwLock<JobState>>,
}

impl Default for VoiceConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceConverter {
    /// Built-in profiles, codec and separator; threads backend
    pub fn new() -> Self {
        Self::with_config(ConverterConfig::default())
    }

    pub fn with_config(config: ConverterConfig) -> Self {
        Self {
            codec: Arc::new(WorldCodec::new(config.codec.clone())),
            separator: Arc::new(SpectralMaskSeparator::new(config.separator.clone())),
            store: Arc::new(VoiceProfileStore::builtin()),
            demuxer: Arc::new(FfmpegDemuxer::new()),
            backend: ExecutionBackend::Threads,
            cancel: CancelToken::new(),
            state: Arc::new(RwLock::new(JobState::Idle)),
            config,
        }
    }

    pub fn with_store(mut self, store: VoiceProfileStore) -> Self {
        self.store = Arc::new(store);
        self
    }

    /// Replace the frame codec. Only the thread backend can use a custom
    /// codec; worker processes always run the built-in one.
    pub fn with_codec(mut self, codec: Arc<dyn FrameCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_separator(mut self, separator: Arc<dyn SourceSeparator>) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_demuxer(mut self, demuxer: Arc<dyn MediaDemuxer>) -> Self {
        self.demuxer = demuxer;
        self
    }

    pub fn with_backend(mut self, backend: ExecutionBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Share a cancel token with the caller (e.g. a Ctrl-C handler)
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn store(&self) -> &VoiceProfileStore {
        &self.store
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Request cancellation of the running conversion
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// State of the current or last chunk job
    pub fn state(&self) -> JobState {
        *self.state.read()
    }

    /// Run a conversion and report the outcome. Never panics on bad input
    /// and never reports partial output as success.
    pub fn convert(&self, request: &ConversionRequest) -> ConversionResult {
        match self.try_convert(request) {
            Ok(summary) => ConversionResult::success(summary),
            Err(e) => {
                match &e {
                    VoxError::Cancelled => warn!("Conversion cancelled"),
                    other => error!("Conversion failed: {}", other),
                }
                ConversionResult::failure(&request.output_path, &e)
            }
        }
    }

    /// Run a conversion. The output file exists only if this returns `Ok`.
    ///
    /// A cancellation requested before or during the call stops this
    /// conversion; the token is cleared afterwards so the converter can run
    /// the next request.
    pub fn try_convert(&self, request: &ConversionRequest) -> VoxResult<ConversionSummary> {
        *self.state.write() = JobState::Idle;
        let result = self.run_job(request);
        if let Err(e) = &result {
            self.record_failure(e);
        }
        self.cancel.reset();
        result
    }

    /// Failures after the merge still end the job as failed
    fn record_failure(&self, error: &VoxError) {
        let mut state = self.state.write();
        let next = match error {
            VoxError::Cancelled => JobState::Cancelled,
            other => JobState::Failed {
                chunk_index: other.chunk_index(),
            },
        };
        if !state.is_terminal() || *state == JobState::Done {
            *state = next;
        }
    }

    fn run_job(&self, request: &ConversionRequest) -> VoxResult<ConversionSummary> {
        let started = Instant::now();
        self.config.validate()?;
        request.validate()?;
        let voice = self.store.resolve(&request.voice)?;
        let options = &request.options;
        self.cancel.check()?;

        info!(
            "Converting {} → {} ({})",
            request.input_path.display(),
            request.output_path.display(),
            voice.label
        );

        let input = self.load(&request.input_path)?;
        self.cancel.check()?;

        let (vocals, background) = if options.preserve_background {
            let stems = self.separator.separate(&input)?;
            (stems.vocals, Some(stems.background))
        } else {
            (input.clone(), None)
        };
        self.cancel.check()?;

        let (converted, chunks) = self.convert_vocals(&vocals, &voice, options)?;
        drop(vocals);

        let mut output = match background {
            Some(background) => {
                info!(
                    "Remixing background (vocals {:+.1} dB, background {:+.1} dB)",
                    options.vocals_gain_db, options.background_gain_db
                );
                remix(
                    &converted,
                    &background,
                    options.vocals_gain_db,
                    options.background_gain_db,
                )?
            }
            None => converted,
        };
        self.cancel.check()?;

        if options.prosody_enabled() {
            info!("Transferring prosody from input");
            let transfer =
                ProsodyTransfer::new(self.config.prosody.clone()).with_codec(Arc::clone(&self.codec));
            let profile = transfer.extract(&input, None)?;
            output = transfer.apply(&output, &profile)?;
            self.cancel.check()?;
        }

        let peak = output.peak();
        if peak > 1.0 {
            debug!("Output peak {:.3}, attenuating {:.1} dB", peak, gain_to_db(peak));
            output.apply_gain(1.0 / peak);
        }

        let encoding = if options.preserve_quality {
            WavEncoding::Float32
        } else {
            WavEncoding::Pcm16
        };
        info!(
            "Writing {} ({}-bit)",
            request.output_path.display(),
            encoding.bits_per_sample()
        );
        write_wav_atomic(&request.output_path, &output, encoding)?;

        info!(
            "Done: {:.1}s of audio in {:.1}s",
            output.duration(),
            started.elapsed().as_secs_f64()
        );

        Ok(ConversionSummary {
            output_path: request.output_path.clone(),
            duration_s: output.duration(),
            sample_rate: output.sample_rate,
            chunks,
            method_used: self.describe_method(&voice, options, chunks),
        })
    }

    fn load(&self, path: &Path) -> VoxResult<Waveform> {
        info!("Loading {}", path.display());
        let wave = if is_video_path(path) {
            let scratch = self.scratch_dir()?;
            let extracted = scratch.path().join("audio.wav");
            self.demuxer.extract_audio(path, &extracted, &self.cancel)?;
            AudioDecoder::decode(&extracted)?
        } else {
            AudioDecoder::decode(path)?
        };
        if wave.is_empty() {
            return Err(VoxError::input(format!("{} contains no audio", path.display())));
        }
        Ok(wave)
    }

    fn scratch_dir(&self) -> VoxResult<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("voxshift-");
        match &self.config.temp_dir {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| VoxError::resource(format!("cannot create scratch directory: {e}")))
    }

    /// Chunks for this input under the request's parallel mode
    pub fn plan(&self, input: &Waveform, options: &ConversionOptions) -> Vec<Chunk> {
        let parallel = match options.parallel {
            ParallelMode::On => true,
            ParallelMode::Off => false,
            ParallelMode::Auto => input.duration() > self.config.auto_parallel_threshold_s,
        };
        if !parallel {
            return vec![single_chunk(input.len())];
        }

        ChunkPlan::from_seconds(
            input.sample_rate,
            options.chunk_duration_s(),
            self.config.crossfade_ms / 1000.0,
            self.config.min_tail_fraction,
        )
        .split(input.len())
    }

    fn convert_vocals(
        &self,
        vocals: &Waveform,
        voice: &ResolvedVoice,
        options: &ConversionOptions,
    ) -> VoxResult<(Waveform, usize)> {
        let chunks = self.plan(vocals, options);
        info!(
            "Planned {} chunk(s) over {:.1}s",
            chunks.len(),
            vocals.duration()
        );

        let job = ChunkJobSpec {
            profile: voice.profile.clone(),
            extra_pitch_shift_semitones: voice.extra_pitch_shift_semitones
                + options.extra_pitch_shift_semitones,
            f0_strategy: options.f0_strategy.clone(),
            frame_period_ms: self.config.frame_period_ms,
            codec: self.config.codec.clone(),
        };

        let workers = options.worker_count.unwrap_or_else(num_cpus::get).max(1);
        let orchestrator = ChunkOrchestrator::new(workers, self.cancel.clone())
            .with_state(Arc::clone(&self.state));

        let processor: Box<dyn ChunkProcessor> = match &self.backend {
            ExecutionBackend::Processes { worker_exe } if chunks.len() > 1 => Box::new(
                ProcessChunkProcessor::new(worker_exe, job, self.config.temp_dir.as_deref())?
                    .with_timeout(self.config.worker_timeout_s.map(Duration::from_secs)),
            ),
            _ => Box::new(VoiceChunkProcessor::new(Arc::clone(&self.codec), job)),
        };

        let converted = orchestrator.run(vocals, &chunks, processor.as_ref())?;
        Ok((converted, chunks.len()))
    }

    fn describe_method(
        &self,
        voice: &ResolvedVoice,
        options: &ConversionOptions,
        chunks: usize,
    ) -> String {
        let mut method = format!(
            "{} vocoder ({} F0), {}",
            self.codec.name(),
            options.f0_strategy.label(),
            voice.label
        );
        if chunks > 1 {
            method.push_str(&format!(", {chunks} chunks on {}", self.backend.name()));
        }
        if options.preserve_background {
            method.push_str(&format!(", background kept ({})", self.separator.name()));
        }
        if options.prosody_enabled() {
            method.push_str(", prosody transfer");
        }
        method
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(seconds: f64, sample_rate: u32) -> Waveform {
        Waveform::silence((seconds * sample_rate as f64) as usize, sample_rate)
    }

    #[test]
    fn test_auto_mode_chunks_only_long_inputs() {
        let converter = VoiceConverter::new();
        let options = ConversionOptions::default();

        assert_eq!(converter.plan(&wave(60.0, 1000), &options).len(), 1);
        assert_eq!(converter.plan(&wave(720.0, 1000), &options).len(), 3);
    }

    #[test]
    fn test_forced_modes() {
        let converter = VoiceConverter::new();
        let mut options = ConversionOptions {
            chunk_duration_minutes: 0.5,
            parallel: ParallelMode::On,
            ..Default::default()
        };
        assert_eq!(converter.plan(&wave(90.0, 1000), &options).len(), 3);

        options.parallel = ParallelMode::Off;
        assert_eq!(converter.plan(&wave(900.0, 1000), &options).len(), 1);
    }

    #[test]
    fn test_unknown_profile_fails_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        crate::wav::write_wav(&input, &wave(0.5, 16000), WavEncoding::Pcm16).unwrap();

        let request = ConversionRequest::builder()
            .input(&input)
            .output(dir.path().join("out.wav"))
            .profile("nobody")
            .build()
            .unwrap();
        let result = VoiceConverter::new().convert(&request);
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, vx_core::ErrorKind::Input);
        assert!(!dir.path().join("out.wav").exists());
    }
}
