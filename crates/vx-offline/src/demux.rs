//! Audio extraction from video containers
//!
//! Demuxing is delegated to an external tool; the converter only needs a
//! mono WAV of the audio track.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use log::{debug, info};
use vx_core::{CancelToken, VoxError, VoxResult};

/// Default time limit for one extraction (10 minutes)
pub const DEFAULT_DEMUX_TIMEOUT_SECS: u64 = 600;

/// Extracts the audio track of a media container
pub trait MediaDemuxer: Send + Sync {
    fn name(&self) -> &str;

    /// Write the audio track of `input` to `output_wav` as mono WAV
    fn extract_audio(
        &self,
        input: &Path,
        output_wav: &Path,
        cancel: &CancelToken,
    ) -> VoxResult<()>;
}

/// Demuxer backed by the `ffmpeg` executable
#[derive(Debug, Clone)]
pub struct FfmpegDemuxer {
    ffmpeg_path: Option<PathBuf>,
    timeout: Duration,
}

impl Default for FfmpegDemuxer {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            timeout: Duration::from_secs(DEFAULT_DEMUX_TIMEOUT_SECS),
        }
    }
}

impl FfmpegDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this executable instead of searching for one
    pub fn ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Explicit path, then `VOXSHIFT_FFMPEG`, then `PATH`
    pub fn find_ffmpeg(&self) -> VoxResult<PathBuf> {
        if let Some(path) = &self.ffmpeg_path {
            if path.exists() {
                return Ok(path.clone());
            }
            return Err(VoxError::resource(format!(
                "ffmpeg not found at {}",
                path.display()
            )));
        }

        if let Ok(path) = std::env::var("VOXSHIFT_FFMPEG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(path);
            }
        }

        which::which("ffmpeg").map_err(|_| {
            VoxError::resource("ffmpeg is required to read video files but was not found in PATH")
        })
    }
}

impl MediaDemuxer for FfmpegDemuxer {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn extract_audio(
        &self,
        input: &Path,
        output_wav: &Path,
        cancel: &CancelToken,
    ) -> VoxResult<()> {
        let ffmpeg = self.find_ffmpeg()?;
        info!("Extracting audio from {}", input.display());

        let mut cmd = Command::new(&ffmpeg);
        cmd.arg("-nostdin")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-vn")
            .arg("-ac")
            .arg("1")
            .arg("-acodec")
            .arg("pcm_f32le")
            .arg(output_wav)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| VoxError::resource(format!("cannot run {}: {e}", ffmpeg.display())))?;
        let (status, stderr) = wait_with_timeout(child, self.timeout, cancel)?;

        if !status.success() {
            return Err(VoxError::input(format!(
                "could not extract audio from {} ({status}): {}",
                input.display(),
                stderr.trim()
            )));
        }
        if !output_wav.exists() {
            return Err(VoxError::input(format!(
                "{} has no audio track",
                input.display()
            )));
        }
        debug!("Extracted audio to {}", output_wav.display());
        Ok(())
    }
}

/// Longest stretch of tool output quoted in an error
const STDERR_TAIL_CHARS: usize = 2000;

fn wait_with_timeout(
    mut child: Child,
    timeout: Duration,
    cancel: &CancelToken,
) -> VoxResult<(ExitStatus, String)> {
    // Drained concurrently so a chatty tool never blocks on a full pipe
    let reader = child.stderr.take().map(|mut err| {
        std::thread::spawn(move || {
            let mut bytes = Vec::new();
            let _ = err.read_to_end(&mut bytes);
            bytes
        })
    });

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if cancel.is_cancelled() {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(VoxError::Cancelled);
                }
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(VoxError::resource(format!(
                        "ffmpeg timed out after {}s",
                        timeout.as_secs()
                    )));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(VoxError::Io(e)),
        }
    };

    let stderr = reader
        .and_then(|handle| handle.join().ok())
        .map(|bytes| tail(&String::from_utf8_lossy(&bytes), STDERR_TAIL_CHARS))
        .unwrap_or_default();
    Ok((status, stderr))
}

fn tail(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(max_chars);
    text.chars().skip(skip).collect()
}
