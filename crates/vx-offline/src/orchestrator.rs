//! Chunk orchestration
//!
//! Runs one [`ChunkProcessor`] call per chunk on a bounded rayon pool and
//! merges the results strictly by chunk index, so the output does not
//! depend on completion order or pool size.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{debug, error, info};
use parking_lot::RwLock;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use vx_core::{CancelToken, VoxError, VoxResult, Waveform};

use crate::chunk::{Chunk, merge_chunks};

// ═══════════════════════════════════════════════════════════════════════════════
// JOB STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Planned {
        chunks: usize,
    },
    Dispatched {
        chunks: usize,
    },
    Running {
        active: usize,
        completed: usize,
        chunks: usize,
    },
    Merging,
    Done,
    Failed {
        chunk_index: Option<usize>,
    },
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. } | Self::Cancelled)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROCESSOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Stop conditions visible to a running chunk
#[derive(Debug, Clone)]
pub struct ChunkContext {
    cancel: CancelToken,
    abort: Arc<AtomicBool>,
}

impl ChunkContext {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True once the job was cancelled or a sibling chunk failed
    pub fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.abort.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` when the chunk should stop
    pub fn check(&self) -> VoxResult<()> {
        if self.should_stop() {
            Err(VoxError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }
}

/// Converts one chunk of audio. Must return exactly `chunk.len()` samples
/// at the input sample rate.
pub trait ChunkProcessor: Send + Sync {
    /// Short description for logs and results
    fn describe(&self) -> String;

    fn process(&self, chunk: &Chunk, audio: Waveform, ctx: &ChunkContext) -> VoxResult<Waveform>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// ORCHESTRATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Dispatches chunks to a worker pool and merges the results
pub struct ChunkOrchestrator {
    workers: usize,
    cancel: CancelToken,
    state: Arc<RwLock<JobState>>,
}

impl ChunkOrchestrator {
    /// `workers` is an upper bound; the pool never exceeds the chunk count
    pub fn new(workers: usize, cancel: CancelToken) -> Self {
        Self {
            workers: workers.max(1),
            cancel,
            state: Arc::new(RwLock::new(JobState::Idle)),
        }
    }

    /// Publish state through an existing handle
    pub fn with_state(mut self, state: Arc<RwLock<JobState>>) -> Self {
        self.state = state;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn state(&self) -> JobState {
        *self.state.read()
    }

    fn set_state(&self, state: JobState) {
        *self.state.write() = state;
    }

    /// Process `chunks` of `input` and merge them back to `input.len()` samples
    pub fn run(
        &self,
        input: &Waveform,
        chunks: &[Chunk],
        processor: &dyn ChunkProcessor,
    ) -> VoxResult<Waveform> {
        if chunks.is_empty() {
            return Err(VoxError::input("nothing to process: no chunks planned"));
        }
        self.set_state(JobState::Planned {
            chunks: chunks.len(),
        });

        let outputs = match self.dispatch(input, chunks, processor) {
            Ok(outputs) => outputs,
            Err(e) => {
                self.set_state(match &e {
                    VoxError::Cancelled => JobState::Cancelled,
                    other => JobState::Failed {
                        chunk_index: other.chunk_index(),
                    },
                });
                return Err(e);
            }
        };

        self.set_state(JobState::Merging);
        info!("Merging {} chunks", chunks.len());
        match merge_chunks(chunks, &outputs, input.len(), input.sample_rate) {
            Ok(merged) => {
                self.set_state(JobState::Done);
                Ok(merged)
            }
            Err(e) => {
                self.set_state(JobState::Failed { chunk_index: None });
                Err(e)
            }
        }
    }

    fn dispatch(
        &self,
        input: &Waveform,
        chunks: &[Chunk],
        processor: &dyn ChunkProcessor,
    ) -> VoxResult<Vec<Waveform>> {
        self.cancel.check()?;

        let pool_size = self.workers.min(chunks.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(pool_size)
            .thread_name(|i| format!("vx-chunk-{i}"))
            .build()
            .map_err(|e| VoxError::resource(format!("cannot start worker pool: {e}")))?;

        info!(
            "Dispatching {} chunks to {} workers ({})",
            chunks.len(),
            pool_size,
            processor.describe()
        );
        self.set_state(JobState::Dispatched {
            chunks: chunks.len(),
        });

        let ctx = ChunkContext::new(self.cancel.clone());
        let started = Instant::now();

        let results: Vec<Option<VoxResult<Waveform>>> = pool.install(|| {
            chunks
                .par_iter()
                .map(|chunk| {
                    if ctx.should_stop() {
                        debug!("Chunk {} skipped", chunk.index);
                        return None;
                    }
                    self.chunk_started(chunks.len());
                    debug!(
                        "Chunk {} started: samples {}..{}",
                        chunk.index, chunk.start_sample, chunk.end_sample
                    );

                    let audio = input.slice(chunk.start_sample, chunk.end_sample);
                    let result = processor
                        .process(chunk, audio, &ctx)
                        .and_then(|out| check_output(chunk, input.sample_rate, out));

                    if let Err(e) = &result {
                        if !matches!(e, VoxError::Cancelled) {
                            error!("Chunk {} failed: {}", chunk.index, e);
                        }
                        ctx.abort();
                    } else {
                        debug!("Chunk {} finished", chunk.index);
                    }
                    self.chunk_finished(chunks.len());
                    Some(result)
                })
                .collect()
        });

        if self.cancel.is_cancelled() {
            info!("Job cancelled after {:.1}s", started.elapsed().as_secs_f64());
            return Err(VoxError::Cancelled);
        }

        collect_outputs(chunks, results)
    }

    fn chunk_started(&self, chunks: usize) {
        let mut state = self.state.write();
        *state = match *state {
            JobState::Running {
                active, completed, ..
            } => JobState::Running {
                active: active + 1,
                completed,
                chunks,
            },
            _ => JobState::Running {
                active: 1,
                completed: 0,
                chunks,
            },
        };
    }

    fn chunk_finished(&self, chunks: usize) {
        let mut state = self.state.write();
        if let JobState::Running {
            active, completed, ..
        } = *state
        {
            *state = JobState::Running {
                active: active.saturating_sub(1),
                completed: completed + 1,
                chunks,
            };
        }
    }
}

fn check_output(chunk: &Chunk, sample_rate: u32, output: Waveform) -> VoxResult<Waveform> {
    if output.sample_rate != sample_rate || output.len() != chunk.len() {
        return Err(VoxError::synthesis(format!(
            "worker returned {} samples at {} Hz, expected {} at {sample_rate} Hz",
            output.len(),
            output.sample_rate,
            chunk.len()
        )));
    }
    if !output.is_finite() {
        return Err(VoxError::synthesis("worker returned non-finite samples"));
    }
    Ok(output)
}

/// Outputs in chunk order, or the failure of the lowest failed chunk
fn collect_outputs(
    chunks: &[Chunk],
    results: Vec<Option<VoxResult<Waveform>>>,
) -> VoxResult<Vec<Waveform>> {
    let mut failed: Option<(usize, VoxError)> = None;
    let mut outputs = Vec::with_capacity(chunks.len());

    for (chunk, result) in chunks.iter().zip(results) {
        match result {
            Some(Ok(audio)) => outputs.push(audio),
            // Stopped because a sibling failed
            Some(Err(VoxError::Cancelled)) | None => {}
            Some(Err(e)) => {
                if failed.as_ref().is_none_or(|(index, _)| chunk.index < *index) {
                    failed = Some((chunk.index, e));
                }
            }
        }
    }

    if let Some((index, cause)) = failed {
        let cause = match cause {
            VoxError::ChunkProcessing { cause, .. } => cause,
            other => other.to_string(),
        };
        return Err(VoxError::ChunkProcessing { index, cause });
    }
    if outputs.len() != chunks.len() {
        // Only reachable if a processor reported Cancelled on its own
        return Err(VoxError::Cancelled);
    }
    Ok(outputs)
}
