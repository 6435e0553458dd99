//! Child-process chunk execution
//!
//! Each chunk runs in its own `voxshift worker --task <file>` process.
//! Audio goes in and out through 32-bit float WAV files in a per-job
//! scratch directory; the outcome comes back as a JSON [`WorkerReport`].

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use log::{debug, warn};
use tempfile::TempDir;
use vx_core::{VoxError, VoxResult, Waveform};

use crate::chunk::Chunk;
use crate::orchestrator::{ChunkContext, ChunkProcessor};
use crate::wav::{WavEncoding, read_wav, write_wav};
use crate::worker::{ChunkJobSpec, ChunkTask, WorkerReport};

/// How often a supervising thread polls its child
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Bytes of worker stderr quoted in error messages
const LOG_TAIL_BYTES: usize = 2000;

/// Runs each chunk in a separate worker process
pub struct ProcessChunkProcessor {
    worker_exe: PathBuf,
    job: ChunkJobSpec,
    scratch: TempDir,
    timeout: Option<Duration>,
}

struct ChunkFiles {
    task: PathBuf,
    input: PathBuf,
    output: PathBuf,
    report: PathBuf,
    log: PathBuf,
}

impl ChunkFiles {
    fn new(dir: &Path, index: usize) -> Self {
        let stem = format!("chunk_{index:04}");
        Self {
            task: dir.join(format!("{stem}_task.json")),
            input: dir.join(format!("{stem}_in.wav")),
            output: dir.join(format!("{stem}_out.wav")),
            report: dir.join(format!("{stem}_report.json")),
            log: dir.join(format!("{stem}.log")),
        }
    }

    fn remove(&self) {
        for path in [&self.task, &self.input, &self.output, &self.report, &self.log] {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl ProcessChunkProcessor {
    /// `worker_exe` must accept `worker --task <file>`. Scratch files go
    /// under `temp_root` (system temp dir when `None`) and are removed
    /// when the processor is dropped.
    pub fn new(worker_exe: &Path, job: ChunkJobSpec, temp_root: Option<&Path>) -> VoxResult<Self> {
        if !worker_exe.is_file() {
            return Err(VoxError::resource(format!(
                "worker executable not found: {}",
                worker_exe.display()
            )));
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix("voxshift-job-");
        let scratch = match temp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| VoxError::resource(format!("cannot create scratch directory: {e}")))?;
        debug!("Chunk scratch directory: {}", scratch.path().display());

        Ok(Self {
            worker_exe: worker_exe.to_path_buf(),
            job,
            scratch,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    fn run_child(&self, chunk: &Chunk, files: &ChunkFiles, ctx: &ChunkContext) -> VoxResult<Waveform> {
        let log = File::create(&files.log)?;
        let child = Command::new(&self.worker_exe)
            .arg("worker")
            .arg("--task")
            .arg(&files.task)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .spawn()
            .map_err(|e| {
                VoxError::resource(format!(
                    "cannot start worker {}: {e}",
                    self.worker_exe.display()
                ))
            })?;
        debug!("Chunk {} worker pid {}", chunk.index, child.id());

        let status = wait_for_worker(child, ctx, self.timeout)?;

        if files.report.exists() {
            let report = WorkerReport::load(&files.report)?;
            if let Some(failure) = report.error {
                return Err(failure.into_error());
            }
            if !report.ok {
                return Err(VoxError::synthesis("worker reported failure without a cause"));
            }
            return read_wav(&files.output);
        }

        Err(VoxError::synthesis(format!(
            "worker exited ({status}) without a report: {}",
            log_tail(&files.log)
        )))
    }
}

impl ChunkProcessor for ProcessChunkProcessor {
    fn describe(&self) -> String {
        format!("worker processes via {}", self.worker_exe.display())
    }

    fn process(&self, chunk: &Chunk, audio: Waveform, ctx: &ChunkContext) -> VoxResult<Waveform> {
        ctx.check()?;
        let files = ChunkFiles::new(self.scratch.path(), chunk.index);

        write_wav(&files.input, &audio, WavEncoding::Float32)?;
        ChunkTask {
            chunk: *chunk,
            input_wav: files.input.clone(),
            output_wav: files.output.clone(),
            report_path: files.report.clone(),
            job: self.job.clone(),
        }
        .save(&files.task)?;
        drop(audio);

        let result = self.run_child(chunk, &files, ctx);
        files.remove();
        result
    }
}

fn wait_for_worker(
    mut child: Child,
    ctx: &ChunkContext,
    timeout: Option<Duration>,
) -> VoxResult<ExitStatus> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if ctx.should_stop() {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(VoxError::Cancelled);
                }
                if timeout.is_some_and(|limit| start.elapsed() > limit) {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(VoxError::resource(format!(
                        "worker timed out after {}s",
                        start.elapsed().as_secs()
                    )));
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                warn!("Lost track of worker {}: {}", child.id(), e);
                let _ = child.kill();
                return Err(VoxError::Io(e));
            }
        }
    }
}

fn log_tail(path: &Path) -> String {
    let text = std::fs::read_to_string(path).unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        return "no output".to_string();
    }
    let mut start = text.len().saturating_sub(LOG_TAIL_BYTES);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
