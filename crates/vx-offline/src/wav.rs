//! WAV reading and writing
//!
//! Final outputs are written to a temporary file in the destination
//! directory and renamed into place only once complete.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use vx_core::{VoxError, VoxResult, Waveform};

/// Output sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WavEncoding {
    /// 32-bit IEEE float
    #[default]
    Float32,
    /// 16-bit PCM
    Pcm16,
}

impl WavEncoding {
    pub fn bits_per_sample(&self) -> u16 {
        match self {
            Self::Float32 => 32,
            Self::Pcm16 => 16,
        }
    }

    fn spec(&self, sample_rate: u32) -> hound::WavSpec {
        hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: self.bits_per_sample(),
            sample_format: match self {
                Self::Float32 => hound::SampleFormat::Float,
                Self::Pcm16 => hound::SampleFormat::Int,
            },
        }
    }
}

fn hound_error(e: hound::Error) -> VoxError {
    match e {
        hound::Error::IoError(io) => VoxError::Io(io),
        other => VoxError::input(format!("WAV error: {other}")),
    }
}

fn encode<W: Write + Seek>(writer: W, waveform: &Waveform, encoding: WavEncoding) -> VoxResult<()> {
    let mut writer =
        hound::WavWriter::new(writer, encoding.spec(waveform.sample_rate)).map_err(hound_error)?;

    match encoding {
        WavEncoding::Float32 => {
            for &sample in &waveform.samples {
                writer.write_sample(sample as f32).map_err(hound_error)?;
            }
        }
        WavEncoding::Pcm16 => {
            for &sample in &waveform.samples {
                let s = (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16;
                writer.write_sample(s).map_err(hound_error)?;
            }
        }
    }

    writer.finalize().map_err(hound_error)
}

/// Write a mono WAV file in place
pub fn write_wav(path: &Path, waveform: &Waveform, encoding: WavEncoding) -> VoxResult<()> {
    let file = File::create(path)?;
    encode(BufWriter::new(file), waveform, encoding)
}

/// Write a mono WAV file so that `path` either holds the complete file or
/// is left untouched
pub fn write_wav_atomic(path: &Path, waveform: &Waveform, encoding: WavEncoding) -> VoxResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !dir.is_dir() {
        return Err(VoxError::input(format!(
            "output directory does not exist: {}",
            dir.display()
        )));
    }

    let mut temp = NamedTempFile::new_in(dir)?;
    encode(BufWriter::new(temp.as_file_mut()), waveform, encoding)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| VoxError::Io(e.error))?;
    Ok(())
}

/// Read a WAV file, mixing multi-channel audio down to mono
pub fn read_wav(path: &Path) -> VoxResult<Waveform> {
    let reader = hound::WavReader::open(path).map_err(hound_error)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f64> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f64;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f64 / max_val))
                .collect::<Result<_, _>>()
                .map_err(hound_error)?
        }
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map(f64::from))
            .collect::<Result<_, _>>()
            .map_err(hound_error)?,
    };

    Waveform::new(
        Waveform::from_interleaved(&interleaved, channels, spec.sample_rate).samples,
        spec.sample_rate,
    )
}
