use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample encodings understood by the audio layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    I16,
    I32,
    F32,
}

impl SampleKind {
    pub fn bits_per_sample(self) -> u16 {
        match self {
            SampleKind::I16 => 16,
            SampleKind::I32 | SampleKind::F32 => 32,
        }
    }
}

/// Immutable stream format descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Sample encoding
    pub sample_kind: SampleKind,
    /// Interleaved `[L, R, L, R, ...]` when true, planar `[L, L, ..., R, R, ...]` otherwise
    pub interleaved: bool,
}

impl StreamFormat {
    /// Fixed storage format for every recording: mono, float32, 44.1kHz
    pub const STORAGE: StreamFormat = StreamFormat {
        sample_rate: 44_100,
        channels: 1,
        sample_kind: SampleKind::F32,
        interleaved: true,
    };

    pub fn storage() -> Self {
        Self::STORAGE
    }

    pub fn bit_depth(&self) -> u16 {
        self.sample_kind.bits_per_sample()
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz/{}ch/{:?}/{}",
            self.sample_rate,
            self.channels,
            self.sample_kind,
            if self.interleaved { "interleaved" } else { "planar" }
        )
    }
}

/// Sample storage for an [`AudioBuffer`]
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    I16(Vec<i16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
}

impl Samples {
    pub fn kind(&self) -> SampleKind {
        match self {
            Samples::I16(_) => SampleKind::I16,
            Samples::I32(_) => SampleKind::I32,
            Samples::F32(_) => SampleKind::F32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Samples::I16(v) => v.len(),
            Samples::I32(v) => v.len(),
            Samples::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample at a raw index, normalized to [-1.0, 1.0)
    pub fn get_f32(&self, index: usize) -> f32 {
        match self {
            Samples::I16(v) => v[index].to_f32(),
            Samples::I32(v) => v[index].to_f32(),
            Samples::F32(v) => v[index],
        }
    }
}

/// PCM sample types that can back an [`AudioBuffer`]
pub trait PcmSample: Copy + Send + 'static {
    const KIND: SampleKind;

    fn wrap(samples: Vec<Self>) -> Samples;

    fn to_f32(self) -> f32;

    fn from_f32(value: f32) -> Self;
}

impl PcmSample for i16 {
    const KIND: SampleKind = SampleKind::I16;

    fn wrap(samples: Vec<Self>) -> Samples {
        Samples::I16(samples)
    }

    fn to_f32(self) -> f32 {
        self as f32 / 32_768.0
    }

    fn from_f32(value: f32) -> Self {
        (value * 32_768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
    }
}

impl PcmSample for i32 {
    const KIND: SampleKind = SampleKind::I32;

    fn wrap(samples: Vec<Self>) -> Samples {
        Samples::I32(samples)
    }

    fn to_f32(self) -> f32 {
        (self as f64 / 2_147_483_648.0) as f32
    }

    fn from_f32(value: f32) -> Self {
        (value as f64 * 2_147_483_648.0).clamp(i32::MIN as f64, i32::MAX as f64) as i32
    }
}

impl PcmSample for f32 {
    const KIND: SampleKind = SampleKind::F32;

    fn wrap(samples: Vec<Self>) -> Samples {
        Samples::F32(samples)
    }

    fn to_f32(self) -> f32 {
        self
    }

    fn from_f32(value: f32) -> Self {
        value
    }
}

/// A block of samples in a known format
///
/// Ownership moves from producer to consumer for one processing step.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub format: StreamFormat,
    pub samples: Samples,
}

impl AudioBuffer {
    pub fn new(format: StreamFormat, samples: Samples) -> Self {
        Self { format, samples }
    }

    /// Mono float32 buffer in the storage layout at the given rate
    pub fn mono_f32(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            format: StreamFormat {
                sample_rate,
                ..StreamFormat::STORAGE
            },
            samples: Samples::F32(samples),
        }
    }

    pub fn frame_count(&self) -> usize {
        match self.format.channels {
            0 => 0,
            ch => self.samples.len() / ch as usize,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.format.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.format.sample_rate as f64
    }

    /// Sample for `(frame, channel)` normalized to float, honouring the layout
    pub fn sample_f32(&self, frame: usize, channel: usize) -> f32 {
        let channels = self.format.channels as usize;
        let index = if self.format.interleaved {
            frame * channels + channel
        } else {
            channel * self.frame_count() + frame
        };
        self.samples.get_f32(index)
    }
}
