use std::path::PathBuf;
use thiserror::Error;

use crate::audio::{AudioFileError, DeviceError};
use crate::session::{Operation, SessionState};

/// Failures reported by the record/playback engine
///
/// Every start failure leaves the session `Idle`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("audio device activation failed: {0}")]
    DeviceActivationFailed(#[source] DeviceError),

    #[error("incompatible stream formats: {0}")]
    FormatIncompatible(String),

    #[error("failed to create recording file {path:?}: {source}")]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        source: AudioFileError,
    },

    #[error("failed to read recording file {path:?}: {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: AudioFileError,
    },

    #[error("recording to {path:?} failed: {reason}")]
    FileWriteFailed { path: PathBuf, reason: String },

    #[error("nothing has been recorded yet")]
    NoRecording,

    #[error("cannot {operation} while {state}")]
    InvalidStateTransition {
        state: SessionState,
        operation: Operation,
    },
}
