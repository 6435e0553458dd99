//! Configuration types for offline conversion

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vx_core::{VoxError, VoxResult};
use vx_vocoder::CodecSettings;
use vx_voice::ProsodyConfig;

use crate::separation::SeparatorSettings;

/// Converter configuration, usually loaded once per process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Analysis frame period (ms)
    pub frame_period_ms: f64,

    /// Overlap shared by neighbouring chunks, crossfaded on merge (ms)
    pub crossfade_ms: f64,

    /// In `ParallelMode::Auto`, inputs longer than this are chunked (s)
    pub auto_parallel_threshold_s: f64,

    /// A trailing chunk shorter than this fraction of the chunk length is
    /// folded into the previous chunk
    pub min_tail_fraction: f64,

    /// Parent directory for per-job scratch files (system temp if unset)
    pub temp_dir: Option<PathBuf>,

    /// Kill a chunk worker process after this many seconds
    pub worker_timeout_s: Option<u64>,

    pub codec: CodecSettings,
    pub separator: SeparatorSettings,
    pub prosody: ProsodyConfig,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            frame_period_ms: 5.0,
            crossfade_ms: 200.0,
            auto_parallel_threshold_s: 180.0,
            min_tail_fraction: 0.25,
            temp_dir: None,
            worker_timeout_s: None,
            codec: CodecSettings::default(),
            separator: SeparatorSettings::default(),
            prosody: ProsodyConfig::default(),
        }
    }
}

impl ConverterConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> VoxResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            VoxError::input(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            VoxError::input(format!("invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_frame_period(mut self, ms: f64) -> Self {
        self.frame_period_ms = ms;
        self
    }

    pub fn with_crossfade_ms(mut self, ms: f64) -> Self {
        self.crossfade_ms = ms;
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn with_codec(mut self, codec: CodecSettings) -> Self {
        self.codec = codec;
        self
    }

    pub fn validate(&self) -> VoxResult<()> {
        if !(self.frame_period_ms > 0.0 && self.frame_period_ms <= 50.0) {
            return Err(VoxError::input(format!(
                "frame_period_ms must be in (0, 50], got {}",
                self.frame_period_ms
            )));
        }
        if !(self.crossfade_ms >= 0.0 && self.crossfade_ms.is_finite()) {
            return Err(VoxError::input(format!(
                "crossfade_ms must be non-negative, got {}",
                self.crossfade_ms
            )));
        }
        if !(0.0..1.0).contains(&self.min_tail_fraction) {
            return Err(VoxError::input(format!(
                "min_tail_fraction must be in [0, 1), got {}",
                self.min_tail_fraction
            )));
        }
        self.codec.validate()?;
        self.separator.validate()
    }
}
