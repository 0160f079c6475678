pub mod audio;
pub mod config;
pub mod error;
pub mod session;

pub use audio::{
    AudioBuffer, AudioDevice, AudioFileError, CpalDeviceFactory, DeviceError, DeviceFactory,
    FileSink, FileSource, FormatConverter, ResampleMode, SampleKind, Samples, StreamFormat,
    SyntheticConfig, SyntheticDeviceFactory, SyntheticProbe,
};
pub use config::{BackendKind, Config};
pub use error::EngineError;
pub use session::{
    Affordances, AlwaysGranted, EngineSettings, PermissionProvider, PermissionStatus,
    RecordPlaybackEngine, RecordingSummary, SessionController, SessionSnapshot, SessionState,
    StaticPermission,
};
