//! Session management
//!
//! This module provides the single record/playback session:
//! - The Idle/Recording/Playing state machine and its transition table
//! - `RecordPlaybackEngine`, which owns the device, converter and file
//! - `SessionController`, which maps the two UI intents onto the engine
//! - The microphone permission boundary

mod controller;
mod engine;
mod permission;
mod state;

pub use controller::{Affordances, ButtonState, SessionController, SessionSnapshot};
pub use engine::{EngineSettings, PlaybackSummary, RecordPlaybackEngine, RecordingSummary};
pub use permission::{AlwaysGranted, PermissionProvider, PermissionStatus, StaticPermission};
pub use state::{Operation, Session, SessionState};
