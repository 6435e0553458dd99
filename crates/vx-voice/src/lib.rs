//! vx-voice: Target voice modelling
//!
//! - [`VoiceProfileStore`]: named target voices and presets
//! - [`SpectralTransformer`]: maps decomposed frames onto a target voice
//! - [`ProsodyTransfer`]: carries energy and timing of a reference onto
//!   converted audio
//! - [`WsolaStretcher`]: pitch-preserving time-stretch used by prosody transfer

mod profile;
pub mod prosody;
mod stretch;
pub mod transform;

pub use profile::*;
pub use prosody::{PauseSpan, ProsodyConfig, ProsodyProfile, ProsodyTransfer, WordTiming};
pub use stretch::*;
pub use transform::SpectralTransformer;
