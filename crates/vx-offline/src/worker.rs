//! Per-chunk voice conversion
//!
//! [`VoiceChunkProcessor`] does the actual work for one chunk:
//! decompose → transform → resynthesize. The same code runs in-process on
//! the thread backend and inside `voxshift worker` child processes, which
//! receive a [`ChunkTask`] file and answer with a [`WorkerReport`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};
use vx_core::{CancelToken, VoxError, VoxResult, Waveform};
use vx_vocoder::{CodecSettings, F0Strategy, FrameCodec, WorldCodec};
use vx_voice::{SpectralTransformer, VoiceProfile};

use crate::chunk::Chunk;
use crate::orchestrator::{ChunkContext, ChunkProcessor};
use crate::request::ConversionFailure;
use crate::wav::{WavEncoding, read_wav, write_wav};

/// Everything a worker needs besides the chunk audio. Shared read-only by
/// all chunks of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkJobSpec {
    pub profile: VoiceProfile,
    pub extra_pitch_shift_semitones: f64,
    pub f0_strategy: F0Strategy,
    pub frame_period_ms: f64,
    pub codec: CodecSettings,
}

/// Converts chunks towards one target voice
pub struct VoiceChunkProcessor {
    codec: Arc<dyn FrameCodec>,
    transformer: SpectralTransformer,
    job: ChunkJobSpec,
}

impl VoiceChunkProcessor {
    pub fn new(codec: Arc<dyn FrameCodec>, job: ChunkJobSpec) -> Self {
        Self {
            codec,
            transformer: SpectralTransformer::new(),
            job,
        }
    }

    /// Processor using the built-in codec with the job's settings
    pub fn from_spec(job: ChunkJobSpec) -> Self {
        let codec = Arc::new(WorldCodec::new(job.codec.clone()));
        Self::new(codec, job)
    }

    pub fn job(&self) -> &ChunkJobSpec {
        &self.job
    }
}

impl ChunkProcessor for VoiceChunkProcessor {
    fn describe(&self) -> String {
        format!("{} in-process", self.codec.name())
    }

    fn process(&self, chunk: &Chunk, audio: Waveform, ctx: &ChunkContext) -> VoxResult<Waveform> {
        let sample_rate = audio.sample_rate;
        let period = self.job.frame_period_ms;
        let strategy = self
            .job
            .f0_strategy
            .for_segment(chunk.start_seconds(sample_rate), chunk.duration(sample_rate));

        ctx.check()?;
        let frames = self.codec.decompose(&audio, period, &strategy)?;
        debug!(
            "Chunk {}: {} frames, {} voiced",
            chunk.index,
            frames.num_frames(),
            frames.voiced_count()
        );

        ctx.check()?;
        let converted = self.transformer.transform(
            &frames,
            &self.job.profile,
            self.job.extra_pitch_shift_semitones,
        )?;

        ctx.check()?;
        let mut output = self.codec.resynthesize(&converted, sample_rate, period)?;
        output.resize(chunk.len());
        Ok(output)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WORKER PROTOCOL
// ═══════════════════════════════════════════════════════════════════════════════

/// Instructions for one worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkTask {
    pub chunk: Chunk,
    pub input_wav: PathBuf,
    pub output_wav: PathBuf,
    pub report_path: PathBuf,
    pub job: ChunkJobSpec,
}

/// Outcome written by a worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub chunk_index: usize,
    pub ok: bool,
    pub samples: usize,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ConversionFailure>,
}

impl ChunkTask {
    pub fn load(path: &Path) -> VoxResult<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| VoxError::input(format!("invalid task file {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> VoxResult<()> {
        let json = serde_json::to_string(self)
            .map_err(|e| VoxError::input(format!("cannot encode task: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl WorkerReport {
    pub fn load(path: &Path) -> VoxResult<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            VoxError::synthesis(format!("invalid worker report {}: {e}", path.display()))
        })
    }

    fn save(&self, path: &Path) -> VoxResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| VoxError::synthesis(format!("cannot encode report: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Worker process entry point: run the task at `task_path` and write its
/// report. Errors are returned only when no report could be written.
pub fn run_worker_task(task_path: &Path) -> VoxResult<WorkerReport> {
    let task = ChunkTask::load(task_path)?;
    let started = Instant::now();

    let outcome = convert_task(&task);
    let report = WorkerReport {
        chunk_index: task.chunk.index,
        ok: outcome.is_ok(),
        samples: *outcome.as_ref().unwrap_or(&0),
        elapsed_ms: started.elapsed().as_millis() as u64,
        error: outcome.as_ref().err().map(ConversionFailure::from),
    };
    report.save(&task.report_path)?;
    Ok(report)
}

fn convert_task(task: &ChunkTask) -> VoxResult<usize> {
    let audio = read_wav(&task.input_wav)?;
    if audio.len() != task.chunk.len() {
        return Err(VoxError::input(format!(
            "chunk {} audio has {} samples, expected {}",
            task.chunk.index,
            audio.len(),
            task.chunk.len()
        )));
    }

    let processor = VoiceChunkProcessor::from_spec(task.job.clone());
    let ctx = ChunkContext::new(CancelToken::new());
    let output = processor.process(&task.chunk, audio, &ctx)?;
    write_wav(&task.output_wav, &output, WavEncoding::Float32)?;
    Ok(output.len())
}
