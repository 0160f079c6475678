// Format conversion from a device's native stream format to the storage format
//
// Each input buffer is normalized to float, downmixed to mono by averaging
// channels and resampled with linear interpolation.
//
// Two resample modes exist:
// - Chunked: every buffer is resampled on its own, producing
//   round(frames * target_rate / source_rate) frames per call. No history is
//   carried, so buffer boundaries can click and per-buffer rounding drifts the
//   total frame count.
// - Streaming: the read position and last input sample carry across calls, so
//   the stream resamples as one continuous signal.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::format::{AudioBuffer, SampleKind, StreamFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleMode {
    /// Stateless per-buffer conversion
    #[default]
    Chunked,
    /// Continuous conversion carrying position across buffers
    Streaming,
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("unsupported source format {format}: {reason}")]
    UnsupportedSource {
        format: StreamFormat,
        reason: &'static str,
    },

    #[error("unsupported target format {format}: only mono float32 interleaved output is produced")]
    UnsupportedTarget { format: StreamFormat },

    #[error("buffer format {found} does not match converter input {expected}")]
    FormatMismatch {
        expected: StreamFormat,
        found: StreamFormat,
    },

    #[error("buffer holds {samples} samples, not a whole number of {channels}-channel frames")]
    RaggedBuffer { samples: usize, channels: u16 },
}

/// Converts buffers from one stream format to a mono float32 target
#[derive(Debug)]
pub struct FormatConverter {
    from: StreamFormat,
    to: StreamFormat,
    mode: ResampleMode,
    stream: StreamPosition,
}

/// Carried state for [`ResampleMode::Streaming`]
#[derive(Debug, Default)]
struct StreamPosition {
    /// Input frames consumed so far
    consumed: u64,
    /// Output frames produced so far
    produced: u64,
    /// Last input sample of the previous buffer
    last: f32,
}

impl FormatConverter {
    pub fn new(
        from: StreamFormat,
        to: StreamFormat,
        mode: ResampleMode,
    ) -> Result<Self, ConvertError> {
        if from.sample_rate == 0 {
            return Err(ConvertError::UnsupportedSource {
                format: from,
                reason: "sample rate is zero",
            });
        }
        if from.channels == 0 {
            return Err(ConvertError::UnsupportedSource {
                format: from,
                reason: "no channels",
            });
        }
        if to.sample_rate == 0
            || to.channels != 1
            || to.sample_kind != SampleKind::F32
            || !to.interleaved
        {
            return Err(ConvertError::UnsupportedTarget { format: to });
        }

        Ok(Self {
            from,
            to,
            mode,
            stream: StreamPosition::default(),
        })
    }

    /// Output frame count chunked mode yields for `input_frames` frames
    pub fn chunked_frame_count(&self, input_frames: usize) -> usize {
        let src = self.from.sample_rate as u64;
        let dst = self.to.sample_rate as u64;
        ((input_frames as u64 * dst + src / 2) / src) as usize
    }

    /// Convert one buffer in the input format to the output format
    pub fn convert(&mut self, input: &AudioBuffer) -> Result<AudioBuffer, ConvertError> {
        if input.format != self.from || input.samples.kind() != self.from.sample_kind {
            return Err(ConvertError::FormatMismatch {
                expected: self.from,
                found: input.format,
            });
        }
        if input.samples.len() % self.from.channels as usize != 0 {
            return Err(ConvertError::RaggedBuffer {
                samples: input.samples.len(),
                channels: self.from.channels,
            });
        }

        let mono = downmix(input);
        let resampled = if self.from.sample_rate == self.to.sample_rate {
            self.stream.consumed += mono.len() as u64;
            self.stream.produced += mono.len() as u64;
            if let Some(&last) = mono.last() {
                self.stream.last = last;
            }
            mono
        } else {
            match self.mode {
                ResampleMode::Chunked => self.resample_chunk(&mono),
                ResampleMode::Streaming => self.resample_stream(&mono),
            }
        };

        Ok(AudioBuffer::mono_f32(self.to.sample_rate, resampled))
    }

    fn resample_chunk(&self, input: &[f32]) -> Vec<f32> {
        if input.is_empty() {
            return Vec::new();
        }

        let out_len = self.chunked_frame_count(input.len());
        let step = self.from.sample_rate as f64 / self.to.sample_rate as f64;
        let last = input.len() - 1;

        (0..out_len)
            .map(|j| {
                let pos = j as f64 * step;
                let i = (pos.floor() as usize).min(last);
                let frac = (pos - i as f64).clamp(0.0, 1.0) as f32;
                let a = input[i];
                let b = input[(i + 1).min(last)];
                a + (b - a) * frac
            })
            .collect()
    }

    fn resample_stream(&mut self, input: &[f32]) -> Vec<f32> {
        if input.is_empty() {
            return Vec::new();
        }

        let src = self.from.sample_rate as i64;
        let dst = self.to.sample_rate as i64;
        let n = input.len() as i64;
        let capacity = (input.len() as u64 * dst as u64 / src as u64 + 1) as usize;
        let mut out = Vec::with_capacity(capacity);

        loop {
            // Position of the next output frame relative to this buffer, scaled by dst.
            // -1 addresses the carried sample of the previous buffer.
            let scaled = self.stream.produced as i64 * src - self.stream.consumed as i64 * dst;
            if scaled > (n - 1) * dst {
                break;
            }

            let index = scaled.div_euclid(dst);
            let rem = scaled.rem_euclid(dst);
            let a = if index < 0 {
                self.stream.last
            } else {
                input[index as usize]
            };
            let b = if rem == 0 {
                a
            } else {
                input[(index + 1) as usize]
            };

            out.push(a + (b - a) * (rem as f32 / dst as f32));
            self.stream.produced += 1;
        }

        self.stream.consumed += input.len() as u64;
        self.stream.last = input[input.len() - 1];
        out
    }
}

fn downmix(input: &AudioBuffer) -> Vec<f32> {
    let channels = input.format.channels as usize;
    let frames = input.frame_count();

    if channels == 1 {
        return (0..frames).map(|f| input.samples.get_f32(f)).collect();
    }

    let scale = 1.0 / channels as f32;
    (0..frames)
        .map(|f| {
            let sum: f32 = (0..channels).map(|c| input.sample_f32(f, c)).sum();
            sum * scale
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::Samples;

    fn native(
        sample_rate: u32,
        channels: u16,
        kind: SampleKind,
        interleaved: bool,
    ) -> StreamFormat {
        StreamFormat {
            sample_rate,
            channels,
            sample_kind: kind,
            interleaved,
        }
    }

    fn f32_buffer(format: StreamFormat, frames: usize) -> AudioBuffer {
        let samples = (0..frames * format.channels as usize)
            .map(|i| (i as f32 * 0.01).sin())
            .collect();
        AudioBuffer::new(format, Samples::F32(samples))
    }

    #[test]
    fn test_chunked_frame_count_rounds_per_buffer() {
        let from = native(48_000, 1, SampleKind::F32, true);
        let mut converter =
            FormatConverter::new(from, StreamFormat::storage(), ResampleMode::Chunked).unwrap();

        let out = converter.convert(&f32_buffer(from, 1024)).unwrap();
        // 1024 * 44100 / 48000 = 940.8
        assert_eq!(out.frame_count(), 941);
        assert_eq!(out.format, StreamFormat::storage());
    }

    #[test]
    fn test_streaming_total_matches_overall_ratio() {
        let from = native(48_000, 1, SampleKind::F32, true);
        let mut converter =
            FormatConverter::new(from, StreamFormat::storage(), ResampleMode::Streaming).unwrap();

        let mut total = 0;
        let mut remaining = 96_000;
        while remaining > 0 {
            let frames = remaining.min(1024);
            total += converter.convert(&f32_buffer(from, frames)).unwrap().frame_count();
            remaining -= frames;
        }

        assert_eq!(total, 88_200);
    }

    #[test]
    fn test_streaming_is_continuous_across_buffers() {
        // A ramp resampled in pieces must stay monotonic at the seams
        let from = native(32_000, 1, SampleKind::F32, true);
        let mut converter =
            FormatConverter::new(from, StreamFormat::storage(), ResampleMode::Streaming).unwrap();

        let mut out = Vec::new();
        for chunk in 0..4 {
            let samples: Vec<f32> = (0..100).map(|i| (chunk * 100 + i) as f32 / 400.0).collect();
            let buffer = AudioBuffer::new(from, Samples::F32(samples));
            if let Samples::F32(v) = converter.convert(&buffer).unwrap().samples {
                out.extend(v);
            }
        }

        assert!(out.windows(2).all(|w| w[1] > w[0]), "ramp should stay increasing");
    }

    #[test]
    fn test_same_rate_passes_through() {
        let from = native(44_100, 1, SampleKind::F32, true);
        let mut converter =
            FormatConverter::new(from, StreamFormat::storage(), ResampleMode::Chunked).unwrap();

        let input = f32_buffer(from, 512);
        let out = converter.convert(&input).unwrap();
        assert_eq!(out.samples, input.samples);
    }

    #[test]
    fn test_downmix_interleaved_i16_stereo() {
        let from = native(44_100, 2, SampleKind::I16, true);
        let mut converter =
            FormatConverter::new(from, StreamFormat::storage(), ResampleMode::Chunked).unwrap();

        let input = AudioBuffer::new(from, Samples::I16(vec![16_384, 0, -16_384, -16_384]));
        let out = converter.convert(&input).unwrap();

        match out.samples {
            Samples::F32(v) => {
                assert_eq!(v.len(), 2);
                assert!((v[0] - 0.25).abs() < 1e-4);
                assert!((v[1] + 0.5).abs() < 1e-4);
            }
            other => panic!("expected float output, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_downmix_planar_layout() {
        let from = native(44_100, 2, SampleKind::F32, false);
        let mut converter =
            FormatConverter::new(from, StreamFormat::storage(), ResampleMode::Chunked).unwrap();

        // Left channel first, then right
        let input = AudioBuffer::new(from, Samples::F32(vec![1.0, 1.0, 0.0, -1.0]));
        let out = converter.convert(&input).unwrap();

        assert_eq!(out.samples, Samples::F32(vec![0.5, 0.0]));
    }

    #[test]
    fn test_rejects_non_mono_target() {
        let from = native(48_000, 1, SampleKind::F32, true);
        let to = StreamFormat {
            channels: 2,
            ..StreamFormat::storage()
        };

        let result = FormatConverter::new(from, to, ResampleMode::Chunked);
        assert!(matches!(result, Err(ConvertError::UnsupportedTarget { .. })));
    }

    #[test]
    fn test_rejects_zero_rate_source() {
        let from = native(0, 1, SampleKind::F32, true);
        let result = FormatConverter::new(from, StreamFormat::storage(), ResampleMode::Chunked);
        assert!(matches!(result, Err(ConvertError::UnsupportedSource { .. })));
    }

    #[test]
    fn test_rejects_buffer_in_other_format() {
        let from = native(48_000, 1, SampleKind::F32, true);
        let mut converter =
            FormatConverter::new(from, StreamFormat::storage(), ResampleMode::Chunked).unwrap();

        let other = native(16_000, 1, SampleKind::F32, true);
        let result = converter.convert(&f32_buffer(other, 160));
        assert!(matches!(result, Err(ConvertError::FormatMismatch { .. })));
    }

    #[test]
    fn test_rejects_ragged_buffer() {
        let from = native(48_000, 2, SampleKind::F32, true);
        let mut converter =
            FormatConverter::new(from, StreamFormat::storage(), ResampleMode::Chunked).unwrap();

        let input = AudioBuffer::new(from, Samples::F32(vec![0.0; 5]));
        assert!(matches!(
            converter.convert(&input),
            Err(ConvertError::RaggedBuffer { samples: 5, channels: 2 })
        ));
    }
}
