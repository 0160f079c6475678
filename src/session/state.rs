use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Session-level state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Recording,
    Playing,
}

/// Start/stop operations the engine accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    StartRecording,
    StopRecording,
    StartPlayback,
    StopPlayback,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::StartRecording,
        Operation::StopRecording,
        Operation::StartPlayback,
        Operation::StopPlayback,
    ];
}

impl SessionState {
    pub const ALL: [SessionState; 3] = [
        SessionState::Idle,
        SessionState::Recording,
        SessionState::Playing,
    ];

    /// Transition table: the state `op` leads to, or `None` if it is not allowed
    pub fn transition(self, op: Operation) -> Option<SessionState> {
        use Operation::*;
        use SessionState::*;

        match (self, op) {
            (Idle, StartRecording) => Some(Recording),
            (Recording, StopRecording) => Some(Idle),
            (Idle, StartPlayback) => Some(Playing),
            (Playing, StopPlayback) => Some(Idle),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Playing => "playing",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::StartRecording => "start recording",
            Operation::StopRecording => "stop recording",
            Operation::StartPlayback => "start playback",
            Operation::StopPlayback => "stop playback",
        };
        f.write_str(name)
    }
}

/// The single active record/playback unit
#[derive(Debug, Clone, Default, Serialize)]
pub struct Session {
    pub state: SessionState,
    /// Set only after a recording stopped successfully
    pub file_path: Option<PathBuf>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_play(&self) -> bool {
        self.file_path.is_some()
    }
}
