//! vx-offline: Offline voice conversion pipeline
//!
//! Turns an input recording into the same recording spoken by a target
//! voice. Long inputs are cut into overlapping chunks that are converted
//! in parallel and crossfaded back together.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         VoiceConverter                            │
//! │                                                                   │
//! │  ┌─────────┐   ┌───────────┐   ┌──────────────┐   ┌───────────┐  │
//! │  │ Decoder │ → │ Separator │ → │ Orchestrator │ → │  Remix +  │  │
//! │  │ / Demux │   │ (optional)│   │  (chunks)    │   │  Prosody  │  │
//! │  └─────────┘   └───────────┘   └──────────────┘   └───────────┘  │
//! │                                       │                           │
//! │  ┌────────────────────────────────────┴──────────────────────┐   │
//! │  │  Chunk workers: decompose → transform → resynthesize       │   │
//! │  │  [rayon threads] or [child processes `voxshift worker`]    │   │
//! │  └────────────────────────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vx_offline::{ConversionRequest, VoiceConverter};
//! use vx_voice::VoiceSelector;
//!
//! let converter = VoiceConverter::new();
//! let request = ConversionRequest::builder()
//!     .input("/path/to/speech.mp3")
//!     .output("/path/to/converted.wav")
//!     .voice(VoiceSelector::Preset("male_to_female".into()))
//!     .build()?;
//!
//! let result = converter.convert(&request);
//! println!("{}", result.to_json());
//! ```

mod chunk;
mod config;
mod decoder;
mod demux;
mod orchestrator;
mod pipeline;
mod process;
mod request;
mod separation;
mod wav;
mod worker;

pub use chunk::*;
pub use config::*;
pub use decoder::*;
pub use demux::*;
pub use orchestrator::*;
pub use pipeline::*;
pub use process::*;
pub use request::*;
pub use separation::*;
pub use wav::*;
pub use worker::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
