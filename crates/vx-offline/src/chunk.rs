//! Chunk planning and crossfade merge

use serde::{Deserialize, Serialize};
use vx_core::{VoxError, VoxResult, Waveform};

/// Contiguous slice of the input handed to one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub start_sample: usize,
    /// Exclusive
    pub end_sample: usize,
    /// Samples at the end of this chunk that the next chunk also covers
    pub overlap_samples: usize,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end_sample - self.start_sample
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start_seconds(&self, sample_rate: u32) -> f64 {
        self.start_sample as f64 / sample_rate as f64
    }

    pub fn duration(&self, sample_rate: u32) -> f64 {
        self.len() as f64 / sample_rate as f64
    }
}

/// Chunk layout parameters, in samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkPlan {
    pub chunk_samples: usize,
    pub overlap_samples: usize,
    pub min_tail_fraction: f64,
}

impl ChunkPlan {
    pub fn from_seconds(
        sample_rate: u32,
        chunk_s: f64,
        overlap_s: f64,
        min_tail_fraction: f64,
    ) -> Self {
        Self {
            chunk_samples: (chunk_s * sample_rate as f64).round().max(1.0) as usize,
            overlap_samples: (overlap_s * sample_rate as f64).round().max(0.0) as usize,
            min_tail_fraction,
        }
    }

    /// Cut `total` samples into chunks. Chunk `i` nominally starts at
    /// `i * chunk_samples` and runs `overlap_samples` into the next one;
    /// the last chunk always ends at `total`.
    pub fn split(&self, total: usize) -> Vec<Chunk> {
        let step = self.chunk_samples.max(1);
        if total <= step {
            return vec![single_chunk(total)];
        }

        let mut count = total.div_ceil(step);
        let tail = total - (count - 1) * step;
        if count > 1 && (tail as f64) < self.min_tail_fraction * step as f64 {
            count -= 1;
        }

        (0..count)
            .map(|index| {
                let start_sample = index * step;
                let last = index + 1 == count;
                let end_sample = if last {
                    total
                } else {
                    ((index + 1) * step + self.overlap_samples).min(total)
                };
                Chunk {
                    index,
                    start_sample,
                    end_sample,
                    overlap_samples: if last {
                        0
                    } else {
                        end_sample - (index + 1) * step
                    },
                }
            })
            .collect()
    }
}

/// One chunk covering the whole input
pub fn single_chunk(total: usize) -> Chunk {
    Chunk {
        index: 0,
        start_sample: 0,
        end_sample: total,
        overlap_samples: 0,
    }
}

/// Reassemble processed chunks in index order. Overlapping regions are
/// blended with a linear crossfade; the result has exactly `total` samples.
pub fn merge_chunks(
    chunks: &[Chunk],
    outputs: &[Waveform],
    total: usize,
    sample_rate: u32,
) -> VoxResult<Waveform> {
    if chunks.len() != outputs.len() {
        return Err(VoxError::synthesis(format!(
            "{} chunks but {} outputs",
            chunks.len(),
            outputs.len()
        )));
    }

    let mut order: Vec<usize> = (0..chunks.len()).collect();
    order.sort_by_key(|&i| chunks[i].index);

    let mut merged = vec![0.0; total];
    let mut fade_len = 0usize;

    for i in order {
        let chunk = &chunks[i];
        let audio = &outputs[i];
        if audio.sample_rate != sample_rate {
            return Err(VoxError::synthesis(format!(
                "chunk {} came back at {} Hz, expected {sample_rate} Hz",
                chunk.index, audio.sample_rate
            )));
        }
        if audio.len() != chunk.len() || chunk.end_sample > total {
            return Err(VoxError::synthesis(format!(
                "chunk {} has {} samples, expected {}",
                chunk.index,
                audio.len(),
                chunk.len()
            )));
        }

        let fade = fade_len.min(chunk.len());
        let target = &mut merged[chunk.start_sample..chunk.end_sample];
        for (j, (out, &sample)) in target.iter_mut().zip(&audio.samples).enumerate() {
            if j < fade {
                let w = (j as f64 + 0.5) / fade as f64;
                *out = *out * (1.0 - w) + sample * w;
            } else {
                *out = sample;
            }
        }
        fade_len = chunk.overlap_samples;
    }

    Ok(Waveform {
        samples: merged,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(chunk: usize, overlap: usize) -> ChunkPlan {
        ChunkPlan {
            chunk_samples: chunk,
            overlap_samples: overlap,
            min_tail_fraction: 0.25,
        }
    }

    #[test]
    fn test_split_covers_input() {
        let chunks = plan(100, 10).split(350);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].start_sample, 0);
        assert_eq!(chunks[0].end_sample, 110);
        assert_eq!(chunks[0].overlap_samples, 10);
        assert_eq!(chunks[3].start_sample, 300);
        assert_eq!(chunks[3].end_sample, 350);
        assert_eq!(chunks[3].overlap_samples, 0);
        for pair in chunks.windows(2) {
            assert!(pair[0].end_sample > pair[1].start_sample);
        }
    }

    #[test]
    fn test_short_tail_is_absorbed() {
        // 20-sample remainder is under a quarter chunk
        let chunks = plan(100, 10).split(320);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].start_sample, 200);
        assert_eq!(chunks[2].end_sample, 320);
    }

    #[test]
    fn test_short_input_is_one_chunk() {
        let chunks = plan(100, 10).split(80);
        assert_eq!(chunks, vec![single_chunk(80)]);
    }

    #[test]
    fn test_merge_identity_is_exact() {
        let total = 1000;
        let input: Vec<f64> = (0..total).map(|i| (i as f64 * 0.01).sin()).collect();
        let chunks = plan(300, 40).split(total);
        let outputs: Vec<Waveform> = chunks
            .iter()
            .map(|c| Waveform {
                samples: input[c.start_sample..c.end_sample].to_vec(),
                sample_rate: 1000,
            })
            .collect();

        let merged = merge_chunks(&chunks, &outputs, total, 1000).unwrap();
        assert_eq!(merged.len(), total);
        for (a, b) in merged.samples.iter().zip(&input) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_merge_crossfades_overlap() {
        let chunks = plan(10, 4).split(20);
        let outputs = vec![
            Waveform { samples: vec![1.0; chunks[0].len()], sample_rate: 100 },
            Waveform { samples: vec![0.0; chunks[1].len()], sample_rate: 100 },
        ];
        let merged = merge_chunks(&chunks, &outputs, 20, 100).unwrap();

        assert_eq!(merged.samples[9], 1.0);
        // Monotone ramp from the first chunk's level to the second's
        let ramp = &merged.samples[10..14];
        assert!(ramp.windows(2).all(|w| w[1] < w[0]));
        assert!(ramp[0] < 1.0 && ramp[3] > 0.0);
        assert_eq!(merged.samples[14], 0.0);
    }

    #[test]
    fn test_merge_rejects_wrong_length() {
        let chunks = plan(10, 2).split(20);
        let outputs = vec![
            Waveform::silence(chunks[0].len(), 100),
            Waveform::silence(3, 100),
        ];
        assert!(matches!(
            merge_chunks(&chunks, &outputs, 20, 100),
            Err(VoxError::Synthesis(_))
        ));
    }
}
