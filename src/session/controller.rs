use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

use super::engine::{RecordPlaybackEngine, RecordingSummary};
use super::state::{Operation, SessionState};
use crate::error::EngineError;

/// How one UI button renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ButtonState {
    pub enabled: bool,
    pub label: &'static str,
}

/// Both UI buttons, derived purely from the session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Affordances {
    pub record: ButtonState,
    pub play: ButtonState,
}

impl Affordances {
    pub fn for_state(state: SessionState) -> Self {
        match state {
            SessionState::Idle => Self {
                record: ButtonState {
                    enabled: true,
                    label: "REC",
                },
                play: ButtonState {
                    enabled: true,
                    label: "PLAY",
                },
            },
            SessionState::Recording => Self {
                record: ButtonState {
                    enabled: true,
                    label: "STOP",
                },
                play: ButtonState {
                    enabled: false,
                    label: "PLAY",
                },
            },
            SessionState::Playing => Self {
                record: ButtonState {
                    enabled: false,
                    label: "REC",
                },
                play: ButtonState {
                    enabled: true,
                    label: "STOP",
                },
            },
        }
    }
}

/// Serializable view of the session for the host UI
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub file_path: Option<PathBuf>,
    pub last_take: Option<RecordingSummary>,
    pub affordances: Affordances,
}

/// Turns the two UI intents into engine operations
///
/// Failures are logged and returned; the engine has already put the session
/// back to idle, so the affordances re-enable both buttons.
pub struct SessionController {
    engine: RecordPlaybackEngine,
}

impl SessionController {
    pub fn new(engine: RecordPlaybackEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &RecordPlaybackEngine {
        &self.engine
    }

    pub fn state(&self) -> SessionState {
        self.engine.state()
    }

    pub fn affordances(&self) -> Affordances {
        Affordances::for_state(self.engine.state())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let session = self.engine.session();
        SessionSnapshot {
            state: session.state,
            file_path: session.file_path.clone(),
            last_take: self.engine.last_take().cloned(),
            affordances: self.affordances(),
        }
    }

    /// Record button pressed
    pub async fn on_record_toggle(&mut self) -> Result<SessionState, EngineError> {
        let result = match self.engine.state() {
            SessionState::Idle => self.engine.start_recording().await,
            SessionState::Recording => self.engine.stop_recording().await.map(|_| ()),
            state @ SessionState::Playing => Err(EngineError::InvalidStateTransition {
                state,
                operation: Operation::StartRecording,
            }),
        };
        self.settle("record", result)
    }

    /// Play button pressed
    pub async fn on_play_toggle(&mut self) -> Result<SessionState, EngineError> {
        let result = match self.engine.state() {
            SessionState::Idle => self.engine.start_playback().await.map(|_| ()),
            SessionState::Playing => self.engine.stop_playback().await,
            state @ SessionState::Recording => Err(EngineError::InvalidStateTransition {
                state,
                operation: Operation::StartPlayback,
            }),
        };
        self.settle("play", result)
    }

    /// Let the engine end operations that finished on their own
    pub async fn poll(&mut self) -> Result<bool, EngineError> {
        let result = self.engine.poll().await;
        if let Err(e) = &result {
            warn!("Session reset to {}: {}", self.engine.state(), e);
        }
        result
    }

    pub async fn shutdown(&mut self) -> Result<(), EngineError> {
        self.engine.shutdown().await
    }

    fn settle(
        &self,
        intent: &str,
        result: Result<(), EngineError>,
    ) -> Result<SessionState, EngineError> {
        let state = self.engine.state();
        match result {
            Ok(()) => {
                info!("{} toggle -> {}", intent, state);
                Ok(state)
            }
            Err(e) => {
                warn!("{} toggle failed, session {}: {}", intent, state, e);
                Err(e)
            }
        }
    }
}
