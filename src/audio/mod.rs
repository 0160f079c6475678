pub mod convert;
pub mod cpal_backend;
pub mod device;
pub mod file;
pub mod format;
pub mod synthetic;

pub use convert::{ConvertError, FormatConverter, ResampleMode};
pub use cpal_backend::{CpalDevice, CpalDeviceFactory};
pub use device::{
    AudioDevice, BufferAssembler, CaptureQueue, DeviceError, DeviceFactory, SessionMode,
};
pub use file::{AudioFileError, FileSink, FileSource};
pub use format::{AudioBuffer, PcmSample, SampleKind, Samples, StreamFormat};
pub use synthetic::{SyntheticConfig, SyntheticDevice, SyntheticDeviceFactory, SyntheticProbe};
