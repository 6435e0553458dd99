//! Audio decoding module
//!
//! Uses symphonia for every input container:
//! - WAV, AIFF (PCM)
//! - FLAC, ALAC (lossless)
//! - MP3, OGG Vorbis, AAC/M4A (lossy)
//!
//! Decoded audio is mixed down to mono at the source sample rate.

use std::fs::File;
use std::path::Path;

use log::{debug, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use vx_core::{VoxError, VoxResult, Waveform};

/// Universal audio decoder using symphonia
pub struct AudioDecoder;

impl AudioDecoder {
    /// Decode the first audio track of `path` to a mono waveform
    pub fn decode(path: &Path) -> VoxResult<Waveform> {
        let file = File::open(path)
            .map_err(|e| VoxError::input(format!("cannot open {}: {e}", path.display())))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| {
                VoxError::input(format!("unsupported or corrupt audio {}: {e}", path.display()))
            })?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| VoxError::input(format!("no audio track in {}", path.display())))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| VoxError::input(format!("no decoder for {}: {e}", path.display())))?;

        let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
        let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
        let mut interleaved: Vec<f64> = Vec::new();
        let mut buffer: Option<SampleBuffer<f64>> = None;
        let mut skipped = 0usize;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    return Err(VoxError::input(format!(
                        "read error in {}: {e}",
                        path.display()
                    )));
                }
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(_)) => {
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    return Err(VoxError::input(format!(
                        "decode error in {}: {e}",
                        path.display()
                    )));
                }
            };

            let spec = *decoded.spec();
            sample_rate = spec.rate;
            channels = spec.channels.count();

            let frames = decoded.capacity();
            if buffer
                .as_ref()
                .is_none_or(|b| b.capacity() < frames * channels)
            {
                buffer = Some(SampleBuffer::<f64>::new(frames as u64, spec));
            }
            if let Some(buf) = buffer.as_mut() {
                buf.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buf.samples());
            }
        }

        if skipped > 0 {
            warn!("{}: skipped {} undecodable packets", path.display(), skipped);
        }
        if sample_rate == 0 {
            return Err(VoxError::input(format!(
                "unknown sample rate in {}",
                path.display()
            )));
        }
        if interleaved.is_empty() {
            return Err(VoxError::input(format!(
                "no audio samples in {}",
                path.display()
            )));
        }

        let mono = Waveform::from_interleaved(&interleaved, channels.max(1), sample_rate);
        debug!(
            "Decoded {}: {} ch, {} Hz, {:.2}s",
            path.display(),
            channels,
            sample_rate,
            mono.duration()
        );
        Waveform::new(mono.samples, sample_rate)
    }
}
