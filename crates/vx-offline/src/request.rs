//! Conversion requests and results

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use vx_core::{ErrorKind, VoxError, VoxResult};
use vx_vocoder::F0Strategy;
use vx_voice::VoiceSelector;

/// Audio containers decoded directly
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "flac", "mp3", "ogg", "m4a", "aac", "aiff", "aif"];

/// Containers whose audio track is extracted by a [`crate::MediaDemuxer`] first
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm", "flv"];

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// True when the path names a video container
pub fn is_video_path(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// True when the path names a directly decodable audio file
pub fn is_audio_path(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Whether the input is cut into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParallelMode {
    /// Chunk only inputs longer than the configured threshold
    #[default]
    Auto,
    On,
    Off,
}

impl FromStr for ParallelMode {
    type Err = VoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "on" | "true" | "yes" => Ok(Self::On),
            "off" | "false" | "no" => Ok(Self::Off),
            other => Err(VoxError::input(format!("unknown parallel mode '{other}'"))),
        }
    }
}

/// Per-call conversion options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    /// Added to the target voice's pitch (semitones)
    pub extra_pitch_shift_semitones: f64,
    pub f0_strategy: F0Strategy,
    /// 32-bit float output; also turns prosody transfer on unless overridden
    pub preserve_quality: bool,
    /// Keep music/ambience: separate, convert vocals only, remix
    pub preserve_background: bool,
    pub vocals_gain_db: f64,
    pub background_gain_db: f64,
    pub parallel: ParallelMode,
    /// Target chunk length in minutes
    pub chunk_duration_minutes: f64,
    /// Worker pool size (CPU count when unset)
    pub worker_count: Option<usize>,
    /// Impose the input's energy contour on the output (follows
    /// `preserve_quality` when unset)
    pub preserve_prosody: Option<bool>,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            extra_pitch_shift_semitones: 0.0,
            f0_strategy: F0Strategy::default(),
            preserve_quality: true,
            preserve_background: false,
            vocals_gain_db: 0.0,
            background_gain_db: -3.0,
            parallel: ParallelMode::Auto,
            chunk_duration_minutes: 5.0,
            worker_count: None,
            preserve_prosody: None,
        }
    }
}

impl ConversionOptions {
    pub fn prosody_enabled(&self) -> bool {
        self.preserve_prosody.unwrap_or(self.preserve_quality)
    }

    pub fn chunk_duration_s(&self) -> f64 {
        self.chunk_duration_minutes * 60.0
    }

    pub fn validate(&self) -> VoxResult<()> {
        if !self.extra_pitch_shift_semitones.is_finite() {
            return Err(VoxError::input("pitch shift must be finite"));
        }
        if !(self.vocals_gain_db.is_finite() && self.background_gain_db.is_finite()) {
            return Err(VoxError::input("stem gains must be finite"));
        }
        if !(self.chunk_duration_minutes > 0.0 && self.chunk_duration_minutes.is_finite()) {
            return Err(VoxError::input(format!(
                "chunk duration must be positive, got {} min",
                self.chunk_duration_minutes
            )));
        }
        if self.worker_count == Some(0) {
            return Err(VoxError::input("worker count must be at least 1"));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REQUEST
// ═══════════════════════════════════════════════════════════════════════════════

/// One conversion: input file, output file, target voice, options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub voice: VoiceSelector,
    #[serde(default)]
    pub options: ConversionOptions,
}

impl ConversionRequest {
    pub fn builder() -> ConversionRequestBuilder {
        ConversionRequestBuilder::new()
    }

    /// Checks that need nothing but the request itself
    pub fn validate(&self) -> VoxResult<()> {
        if !self.input_path.exists() {
            return Err(VoxError::input(format!(
                "input file not found: {}",
                self.input_path.display()
            )));
        }
        let metadata = std::fs::metadata(&self.input_path)?;
        if !metadata.is_file() {
            return Err(VoxError::input(format!(
                "input is not a file: {}",
                self.input_path.display()
            )));
        }
        if metadata.len() == 0 {
            return Err(VoxError::input(format!(
                "input file is empty: {}",
                self.input_path.display()
            )));
        }
        if !is_audio_path(&self.input_path) && !is_video_path(&self.input_path) {
            return Err(VoxError::input(format!(
                "unsupported input format: {}",
                self.input_path.display()
            )));
        }
        if extension_of(&self.output_path).as_deref() != Some("wav") {
            return Err(VoxError::input(format!(
                "output must be a .wav file: {}",
                self.output_path.display()
            )));
        }
        self.options.validate()
    }
}

/// Builder for [`ConversionRequest`]
#[derive(Debug, Default)]
pub struct ConversionRequestBuilder {
    input_path: Option<PathBuf>,
    output_path: Option<PathBuf>,
    voice: VoiceSelector,
    options: ConversionOptions,
}

impl ConversionRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_path = Some(path.into());
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn voice(mut self, voice: VoiceSelector) -> Self {
        self.voice = voice;
        self
    }

    pub fn profile(self, name: impl Into<String>) -> Self {
        self.voice(VoiceSelector::Profile(name.into()))
    }

    pub fn preset(self, name: impl Into<String>) -> Self {
        self.voice(VoiceSelector::Preset(name.into()))
    }

    pub fn pitch_shift(mut self, semitones: f64) -> Self {
        self.options.extra_pitch_shift_semitones = semitones;
        self
    }

    pub fn f0_strategy(mut self, strategy: F0Strategy) -> Self {
        self.options.f0_strategy = strategy;
        self
    }

    pub fn preserve_quality(mut self, enabled: bool) -> Self {
        self.options.preserve_quality = enabled;
        self
    }

    pub fn preserve_background(mut self, enabled: bool) -> Self {
        self.options.preserve_background = enabled;
        self
    }

    pub fn preserve_prosody(mut self, enabled: bool) -> Self {
        self.options.preserve_prosody = Some(enabled);
        self
    }

    pub fn stem_gains(mut self, vocals_db: f64, background_db: f64) -> Self {
        self.options.vocals_gain_db = vocals_db;
        self.options.background_gain_db = background_db;
        self
    }

    pub fn parallel(mut self, mode: ParallelMode) -> Self {
        self.options.parallel = mode;
        self
    }

    pub fn chunk_minutes(mut self, minutes: f64) -> Self {
        self.options.chunk_duration_minutes = minutes;
        self
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.options.worker_count = Some(count);
        self
    }

    pub fn options(mut self, options: ConversionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> VoxResult<ConversionRequest> {
        let input_path = self
            .input_path
            .ok_or_else(|| VoxError::input("input path not specified"))?;
        let output_path = self
            .output_path
            .ok_or_else(|| VoxError::input("output path not specified"))?;
        Ok(ConversionRequest {
            input_path,
            output_path,
            voice: self.voice,
            options: self.options,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESULT
// ═══════════════════════════════════════════════════════════════════════════════

/// Structured failure handed back to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionFailure {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    pub cause: String,
}

impl From<&VoxError> for ConversionFailure {
    fn from(error: &VoxError) -> Self {
        Self {
            kind: error.kind(),
            chunk_index: error.chunk_index(),
            cause: error.cause(),
        }
    }
}

impl ConversionFailure {
    pub fn into_error(self) -> VoxError {
        VoxError::from_kind(self.kind, self.cause, self.chunk_index)
    }
}

impl fmt::Display for ConversionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chunk_index {
            Some(index) => write!(f, "{} (chunk {index}): {}", self.kind, self.cause),
            None => write!(f, "{}: {}", self.kind, self.cause),
        }
    }
}

/// What a successful conversion produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionSummary {
    pub output_path: PathBuf,
    pub duration_s: f64,
    pub sample_rate: u32,
    pub chunks: usize,
    pub method_used: String,
}

/// Outcome of [`crate::VoiceConverter::convert`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub success: bool,
    pub output_path: PathBuf,
    pub duration_s: f64,
    pub method_used: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ConversionFailure>,
}

impl ConversionResult {
    pub fn success(summary: ConversionSummary) -> Self {
        Self {
            success: true,
            output_path: summary.output_path,
            duration_s: summary.duration_s,
            method_used: summary.method_used,
            error: None,
        }
    }

    pub fn failure(output_path: impl Into<PathBuf>, error: &VoxError) -> Self {
        Self {
            success: false,
            output_path: output_path.into(),
            duration_s: 0.0,
            method_used: String::new(),
            error: Some(ConversionFailure::from(error)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.kind == ErrorKind::Cancelled)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| {
            format!(r#"{{"success":false,"error":{{"kind":"io","cause":"{e}"}}}}"#)
        })
    }
}
