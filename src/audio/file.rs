use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::format::{AudioBuffer, PcmSample, SampleKind, Samples, StreamFormat};

#[derive(Debug, Error)]
pub enum AudioFileError {
    #[error("failed to create WAV file {path:?}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("failed to open WAV file {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("failed to write WAV file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("failed to read samples from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("unsupported WAV layout: {0}")]
    UnsupportedFormat(String),

    #[error("buffer format {found} does not match file format {expected}")]
    FormatMismatch {
        expected: StreamFormat,
        found: StreamFormat,
    },
}

fn wav_spec(format: &StreamFormat) -> Result<WavSpec, AudioFileError> {
    if !format.interleaved {
        return Err(AudioFileError::UnsupportedFormat(format!(
            "{} (WAV data is always interleaved)",
            format
        )));
    }

    let sample_format = match format.sample_kind {
        SampleKind::I16 | SampleKind::I32 => SampleFormat::Int,
        SampleKind::F32 => SampleFormat::Float,
    };

    Ok(WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bit_depth(),
        sample_format,
    })
}

fn stream_format(spec: &WavSpec) -> Result<StreamFormat, AudioFileError> {
    let sample_kind = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => SampleKind::F32,
        (SampleFormat::Int, 16) => SampleKind::I16,
        (SampleFormat::Int, 32) => SampleKind::I32,
        (format, bits) => {
            return Err(AudioFileError::UnsupportedFormat(format!(
                "{:?} {}-bit samples",
                format, bits
            )))
        }
    };

    Ok(StreamFormat {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        sample_kind,
        interleaved: true,
    })
}

/// Incremental WAV writer for the recording slot
///
/// Creating a sink erases any file already at the path. The header (frame
/// count, format block) is written when the sink is closed, or on drop as a
/// last resort.
pub struct FileSink {
    path: PathBuf,
    format: StreamFormat,
    writer: Option<WavWriter<BufWriter<File>>>,
    frames_written: u64,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>, format: StreamFormat) -> Result<Self, AudioFileError> {
        let path = path.as_ref().to_path_buf();
        let spec = wav_spec(&format)?;

        let writer = WavWriter::create(&path, spec).map_err(|source| AudioFileError::Create {
            path: path.clone(),
            source,
        })?;

        info!("Created recording file: {} ({})", path.display(), format);

        Ok(Self {
            path,
            format,
            writer: Some(writer),
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Append one buffer; returns the number of frames written
    pub fn append(&mut self, buffer: &AudioBuffer) -> Result<usize, AudioFileError> {
        if buffer.format != self.format || buffer.samples.kind() != self.format.sample_kind {
            return Err(AudioFileError::FormatMismatch {
                expected: self.format,
                found: buffer.format,
            });
        }

        let Some(writer) = self.writer.as_mut() else {
            return Ok(0);
        };

        let result = match &buffer.samples {
            Samples::I16(v) => write_samples(writer, v),
            Samples::I32(v) => write_samples(writer, v),
            Samples::F32(v) => write_samples(writer, v),
        };
        result.map_err(|source| AudioFileError::Write {
            path: self.path.clone(),
            source,
        })?;

        let frames = buffer.frame_count();
        self.frames_written += frames as u64;
        Ok(frames)
    }

    /// Flush samples and finalize the header; returns total frames
    pub fn close(mut self) -> Result<u64, AudioFileError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|source| AudioFileError::Write {
                path: self.path.clone(),
                source,
            })?;
        }

        info!(
            "Recording file closed: {} ({} frames)",
            self.path.display(),
            self.frames_written
        );

        Ok(self.frames_written)
    }

    /// Close and delete the file
    pub fn discard(mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                debug!("Ignoring finalize error on discarded file: {}", e);
            }
        }

        match fs::remove_file(&self.path) {
            Ok(()) => info!("Discarded recording file: {}", self.path.display()),
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

fn write_samples<S>(
    writer: &mut WavWriter<BufWriter<File>>,
    samples: &[S],
) -> Result<(), hound::Error>
where
    S: hound::Sample + Copy,
{
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    Ok(())
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}

/// Read-only view of a recording file
pub struct FileSource {
    path: PathBuf,
    reader: WavReader<BufReader<File>>,
    format: StreamFormat,
}

impl FileSource {
    pub fn open_for_read(path: impl AsRef<Path>) -> Result<Self, AudioFileError> {
        let path = path.as_ref().to_path_buf();
        debug!("Opening recording file: {}", path.display());

        let reader = WavReader::open(&path).map_err(|source| AudioFileError::Open {
            path: path.clone(),
            source,
        })?;
        let format = stream_format(&reader.spec())?;

        Ok(Self {
            path,
            reader,
            format,
        })
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Frame count declared by the header
    pub fn frame_count(&self) -> u32 {
        self.reader.duration()
    }

    /// Read every sample into one buffer
    pub fn read_all(self) -> Result<AudioBuffer, AudioFileError> {
        let Self {
            path,
            reader,
            format,
        } = self;

        let samples = match format.sample_kind {
            SampleKind::I16 => read_samples::<i16>(reader, &path)?,
            SampleKind::I32 => read_samples::<i32>(reader, &path)?,
            SampleKind::F32 => read_samples::<f32>(reader, &path)?,
        };
        let buffer = AudioBuffer::new(format, samples);

        info!(
            "Recording loaded: {:.1}s, {}Hz, {} channels, {} frames",
            buffer.duration_secs(),
            format.sample_rate,
            format.channels,
            buffer.frame_count()
        );

        Ok(buffer)
    }
}

fn read_samples<S>(
    reader: WavReader<BufReader<File>>,
    path: &Path,
) -> Result<Samples, AudioFileError>
where
    S: hound::Sample + PcmSample,
{
    let samples = reader
        .into_samples::<S>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| AudioFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(S::wrap(samples))
}
