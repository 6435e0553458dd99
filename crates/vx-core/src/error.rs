//! Error taxonomy shared by every stage of a conversion job

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Conversion errors
#[derive(Error, Debug)]
pub enum VoxError {
    /// Bad input: missing file, unknown profile, unsupported format
    #[error("Input error: {0}")]
    Input(String),

    /// Frame codec could not analyze the signal
    #[error("Analysis failed: {0}")]
    Analysis(String),

    /// Frame codec could not resynthesize the parameters
    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    /// A chunk failed; `index` is the lowest failing chunk
    #[error("Chunk {index} failed: {cause}")]
    ChunkProcessing { index: usize, cause: String },

    /// A required backend or tool is unavailable
    #[error("Resource unavailable: {0}")]
    Resource(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoxError {
    /// Stable classification for reporting to callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) => ErrorKind::Input,
            Self::Analysis(_) => ErrorKind::Analysis,
            Self::Synthesis(_) => ErrorKind::Synthesis,
            Self::ChunkProcessing { .. } => ErrorKind::ChunkProcessing,
            Self::Resource(_) => ErrorKind::Resource,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Chunk index for chunk failures
    pub fn chunk_index(&self) -> Option<usize> {
        match self {
            Self::ChunkProcessing { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Underlying message without the category prefix
    pub fn cause(&self) -> String {
        match self {
            Self::Input(m) | Self::Analysis(m) | Self::Synthesis(m) | Self::Resource(m) => {
                m.clone()
            }
            Self::ChunkProcessing { cause, .. } => cause.clone(),
            Self::Cancelled => "cancelled".to_string(),
            Self::Io(e) => e.to_string(),
        }
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn analysis(msg: impl Into<String>) -> Self {
        Self::Analysis(msg.into())
    }

    pub fn synthesis(msg: impl Into<String>) -> Self {
        Self::Synthesis(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    /// Rebuild an error from its reported kind and cause, e.g. after it
    /// crossed a process boundary as JSON
    pub fn from_kind(kind: ErrorKind, cause: impl Into<String>, chunk_index: Option<usize>) -> Self {
        let cause = cause.into();
        match kind {
            ErrorKind::Input => Self::Input(cause),
            ErrorKind::Analysis => Self::Analysis(cause),
            ErrorKind::Synthesis => Self::Synthesis(cause),
            ErrorKind::ChunkProcessing => Self::ChunkProcessing {
                index: chunk_index.unwrap_or(0),
                cause,
            },
            ErrorKind::Resource => Self::Resource(cause),
            ErrorKind::Cancelled => Self::Cancelled,
            ErrorKind::Io => Self::Io(std::io::Error::other(cause)),
        }
    }
}

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Analysis,
    Synthesis,
    ChunkProcessing,
    Resource,
    Cancelled,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input_error",
            Self::Analysis => "analysis_error",
            Self::Synthesis => "synthesis_error",
            Self::ChunkProcessing => "chunk_processing_error",
            Self::Resource => "resource_error",
            Self::Cancelled => "cancelled",
            Self::Io => "io_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type for conversion operations
pub type VoxResult<T> = Result<T, VoxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_error_fields() {
        let err = VoxError::ChunkProcessing {
            index: 2,
            cause: "synthesis exploded".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ChunkProcessing);
        assert_eq!(err.chunk_index(), Some(2));
        assert_eq!(err.cause(), "synthesis exploded");
        assert_eq!(err.to_string(), "Chunk 2 failed: synthesis exploded");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(VoxError::input("x").kind().as_str(), "input_error");
        assert_eq!(VoxError::resource("x").kind().to_string(), "resource_error");
        assert_eq!(VoxError::Cancelled.chunk_index(), None);
    }

    #[test]
    fn test_from_kind_restores_category() {
        let err = VoxError::from_kind(ErrorKind::Analysis, "no frames", None);
        assert!(matches!(err, VoxError::Analysis(ref m) if m == "no frames"));

        let err = VoxError::from_kind(ErrorKind::ChunkProcessing, "boom", Some(4));
        assert_eq!(err.chunk_index(), Some(4));
    }
}
