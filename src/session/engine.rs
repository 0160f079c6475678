use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::permission::{PermissionProvider, PermissionStatus};
use super::state::{Operation, Session, SessionState};
use crate::audio::{
    AudioBuffer, AudioDevice, DeviceFactory, FileSink, FileSource, FormatConverter, ResampleMode,
    SessionMode, StreamFormat,
};
use crate::error::EngineError;

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// The single recording slot, overwritten by every recording
    pub recording_path: PathBuf,
    /// Frames per input buffer
    pub buffer_frames: usize,
    /// Input buffers the device may queue ahead of the writer
    pub queue_capacity: usize,
    pub resample_mode: ResampleMode,
    /// Consecutive failed buffers before a recording stops itself
    pub max_consecutive_write_failures: u32,
}

impl EngineSettings {
    pub fn new(recording_path: impl Into<PathBuf>) -> Self {
        Self {
            recording_path: recording_path.into(),
            buffer_frames: 1024,
            queue_capacity: 32,
            resample_mode: ResampleMode::default(),
            max_consecutive_write_failures: 8,
        }
    }
}

/// Outcome of a completed recording
#[derive(Debug, Clone, Serialize)]
pub struct RecordingSummary {
    pub take_id: Uuid,
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    /// Frames persisted in the storage format
    pub frames_written: u64,
    pub duration_secs: f64,
    /// Input buffers the device dropped because the queue was full
    pub dropped_buffers: u64,
    /// Input buffers skipped because conversion or writing failed
    pub failed_buffers: u64,
}

/// What was scheduled when playback started
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackSummary {
    pub path: PathBuf,
    pub frames: usize,
    pub duration_secs: f64,
    pub format: StreamFormat,
}

/// Recording in progress
struct ActiveCapture {
    take_id: Uuid,
    started_at: DateTime<Utc>,
    writer: JoinHandle<CaptureReport>,
}

/// Result of the writer task
struct CaptureReport {
    sink: FileSink,
    failed_buffers: u64,
    /// Set when the writer gave up after repeated failures
    aborted: Option<String>,
}

/// Drains device buffers through the converter into the file sink
struct CaptureWriter {
    converter: FormatConverter,
    sink: FileSink,
    max_consecutive_failures: u32,
}

impl CaptureWriter {
    async fn run(mut self, mut rx: mpsc::Receiver<AudioBuffer>) -> CaptureReport {
        let mut consecutive_failures = 0u32;
        let mut failed_buffers = 0u64;
        let mut aborted = None;

        debug!("Capture writer started");

        while let Some(buffer) = rx.recv().await {
            let result = self
                .converter
                .convert(&buffer)
                .map_err(|e| e.to_string())
                .and_then(|converted| self.sink.append(&converted).map_err(|e| e.to_string()));

            match result {
                Ok(_) => consecutive_failures = 0,
                Err(reason) => {
                    failed_buffers += 1;
                    consecutive_failures += 1;
                    warn!(
                        "Dropping input buffer ({} consecutive failures): {}",
                        consecutive_failures, reason
                    );

                    if consecutive_failures >= self.max_consecutive_failures {
                        error!("Recording stopped after repeated write failures: {}", reason);
                        aborted = Some(reason);
                        break;
                    }
                }
            }
        }

        debug!(
            "Capture writer finished: {} frames written, {} buffers failed",
            self.sink.frames_written(),
            failed_buffers
        );

        CaptureReport {
            sink: self.sink,
            failed_buffers,
            aborted,
        }
    }
}

/// Owns the device, converter and file for the single session
///
/// Every stop, and every failed start, discards the current device and
/// builds a fresh one from the factory so no stream or session state carries
/// into the next operation.
pub struct RecordPlaybackEngine {
    settings: EngineSettings,
    factory: Arc<dyn DeviceFactory>,
    permissions: Arc<dyn PermissionProvider>,
    session: Session,
    device: Option<Box<dyn AudioDevice>>,
    capture: Option<ActiveCapture>,
    last_take: Option<RecordingSummary>,
}

impl RecordPlaybackEngine {
    pub fn new(
        settings: EngineSettings,
        factory: Arc<dyn DeviceFactory>,
        permissions: Arc<dyn PermissionProvider>,
    ) -> Self {
        info!(
            "Record/playback engine initialized: {} backend, slot {}",
            factory.name(),
            settings.recording_path.display()
        );

        let device = build_device(factory.as_ref());

        Self {
            settings,
            factory,
            permissions,
            session: Session::new(),
            device,
            capture: None,
            last_take: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn last_take(&self) -> Option<&RecordingSummary> {
        self.last_take.as_ref()
    }

    fn check(&self, operation: Operation) -> Result<SessionState, EngineError> {
        self.session
            .state
            .transition(operation)
            .ok_or(EngineError::InvalidStateTransition {
                state: self.session.state,
                operation,
            })
    }

    /// Start capturing the microphone into the recording slot
    pub async fn start_recording(&mut self) -> Result<(), EngineError> {
        let next = self.check(Operation::StartRecording)?;
        let permissions = Arc::clone(&self.permissions);
        ensure_permission(permissions.as_ref()).await?;

        info!("Starting recording to {}", self.settings.recording_path.display());

        let mut device = self.take_device()?;
        let result = self.open_capture(device.as_mut()).await;
        self.device = Some(device);

        match result {
            Ok(capture) => {
                info!("Recording started (take {})", capture.take_id);
                self.capture = Some(capture);
                self.session.state = next;
                Ok(())
            }
            Err(e) => {
                error!("Cannot start recording: {}", e);
                self.reset_device().await;
                Err(e)
            }
        }
    }

    async fn open_capture(
        &mut self,
        device: &mut dyn AudioDevice,
    ) -> Result<ActiveCapture, EngineError> {
        let path = self.settings.recording_path.clone();

        device
            .activate(SessionMode::Record)
            .await
            .map_err(EngineError::DeviceActivationFailed)?;

        let native = device
            .native_input_format()
            .map_err(EngineError::DeviceActivationFailed)?;
        let storage = StreamFormat::storage();
        let converter = FormatConverter::new(native, storage, self.settings.resample_mode)
            .map_err(|e| EngineError::FormatIncompatible(e.to_string()))?;

        info!(
            "Converting {} -> {} ({:?})",
            native, storage, self.settings.resample_mode
        );

        let sink = FileSink::create(&path, storage).map_err(|source| {
            EngineError::FileCreateFailed {
                path: path.clone(),
                source,
            }
        })?;
        // The previous take is gone once the slot is erased
        self.session.file_path = None;

        // From here on a failure must not leave a half-written file behind
        let rx = match device
            .open_input(native, self.settings.buffer_frames, self.settings.queue_capacity)
            .await
        {
            Ok(rx) => rx,
            Err(e) => {
                sink.discard();
                return Err(EngineError::DeviceActivationFailed(e));
            }
        };
        if let Err(e) = device.start().await {
            sink.discard();
            return Err(EngineError::DeviceActivationFailed(e));
        }

        let writer = CaptureWriter {
            converter,
            sink,
            max_consecutive_failures: self.settings.max_consecutive_write_failures.max(1),
        };

        Ok(ActiveCapture {
            take_id: Uuid::new_v4(),
            started_at: Utc::now(),
            writer: tokio::spawn(writer.run(rx)),
        })
    }

    /// Stop capturing and finalize the file
    ///
    /// Returns `Ok(None)` when already idle. The session is idle afterwards
    /// even when finalizing fails.
    pub async fn stop_recording(&mut self) -> Result<Option<RecordingSummary>, EngineError> {
        match self.session.state {
            SessionState::Idle => {
                debug!("Stop recording ignored: already idle");
                return Ok(None);
            }
            SessionState::Playing => {
                return Err(EngineError::InvalidStateTransition {
                    state: SessionState::Playing,
                    operation: Operation::StopRecording,
                })
            }
            SessionState::Recording => {}
        }

        info!("Stopping recording");

        // Halt delivery first; the writer then drains what is queued
        let dropped = match self.device.as_mut() {
            Some(device) => {
                if let Err(e) = device.stop().await {
                    warn!("Failed to stop input stream: {}", e);
                }
                device.dropped_buffers()
            }
            None => 0,
        };

        let result = self.finish_capture(dropped).await;
        self.reset_device().await;
        self.session.state = SessionState::Idle;
        result.map(Some)
    }

    async fn finish_capture(
        &mut self,
        dropped_buffers: u64,
    ) -> Result<RecordingSummary, EngineError> {
        let path = self.settings.recording_path.clone();
        let Some(capture) = self.capture.take() else {
            return Err(EngineError::FileWriteFailed {
                path,
                reason: "no capture in progress".to_string(),
            });
        };

        let report = capture.writer.await.map_err(|e| EngineError::FileWriteFailed {
            path: path.clone(),
            reason: format!("writer task failed: {}", e),
        })?;

        if let Some(reason) = report.aborted {
            report.sink.discard();
            return Err(EngineError::FileWriteFailed { path, reason });
        }

        let frames_written = report
            .sink
            .close()
            .map_err(|e| EngineError::FileWriteFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if dropped_buffers > 0 {
            warn!("Device dropped {} input buffers (writer fell behind)", dropped_buffers);
        }

        let summary = RecordingSummary {
            take_id: capture.take_id,
            path: path.clone(),
            started_at: capture.started_at,
            stopped_at: Utc::now(),
            frames_written,
            duration_secs: frames_written as f64 / StreamFormat::STORAGE.sample_rate as f64,
            dropped_buffers,
            failed_buffers: report.failed_buffers,
        };

        info!(
            "Recording complete: take {} ({:.2}s, {} frames)",
            summary.take_id, summary.duration_secs, summary.frames_written
        );

        self.session.file_path = Some(path);
        self.last_take = Some(summary.clone());
        Ok(summary)
    }

    /// Load the recording and schedule it once on the output
    pub async fn start_playback(&mut self) -> Result<PlaybackSummary, EngineError> {
        let next = self.check(Operation::StartPlayback)?;
        let path = self
            .session
            .file_path
            .clone()
            .ok_or(EngineError::NoRecording)?;

        info!("Starting playback of {}", path.display());

        let mut device = self.take_device()?;
        let result = open_playback(device.as_mut(), &path).await;
        self.device = Some(device);

        match result {
            Ok(summary) => {
                info!(
                    "Playback started: {} frames ({:.2}s)",
                    summary.frames, summary.duration_secs
                );
                self.session.state = next;
                Ok(summary)
            }
            Err(e) => {
                error!("Cannot start playback: {}", e);
                self.reset_device().await;
                Err(e)
            }
        }
    }

    /// Stop playback. A no-op when already idle.
    pub async fn stop_playback(&mut self) -> Result<(), EngineError> {
        match self.session.state {
            SessionState::Idle => {
                debug!("Stop playback ignored: already idle");
                return Ok(());
            }
            SessionState::Recording => {
                return Err(EngineError::InvalidStateTransition {
                    state: SessionState::Recording,
                    operation: Operation::StopPlayback,
                })
            }
            SessionState::Playing => {}
        }

        self.reset_device().await;
        self.session.state = SessionState::Idle;
        info!("Playback stopped");
        Ok(())
    }

    /// Check on the active operation
    ///
    /// Ends a recording whose writer stopped on its own (repeated write
    /// failures, or the device closed its stream) and a playback that has
    /// played to the end. Returns whether the session returned to idle.
    pub async fn poll(&mut self) -> Result<bool, EngineError> {
        match self.session.state {
            SessionState::Idle => Ok(false),
            SessionState::Recording => {
                let finished = self
                    .capture
                    .as_ref()
                    .map(|capture| capture.writer.is_finished())
                    .unwrap_or(true);
                if !finished {
                    return Ok(false);
                }

                warn!("Recording ended without a stop request");
                self.stop_recording().await.map(|_| true)
            }
            SessionState::Playing => {
                let playing = self
                    .device
                    .as_ref()
                    .map(|device| device.is_playing())
                    .unwrap_or(false);
                if playing {
                    return Ok(false);
                }

                info!("Playback reached the end");
                self.stop_playback().await.map(|_| true)
            }
        }
    }

    /// Stop whatever is active
    pub async fn shutdown(&mut self) -> Result<(), EngineError> {
        match self.session.state {
            SessionState::Recording => self.stop_recording().await.map(|_| ()),
            SessionState::Playing => self.stop_playback().await,
            SessionState::Idle => Ok(()),
        }
    }

    /// The current device, or a freshly built one if the last rebuild failed
    fn take_device(&mut self) -> Result<Box<dyn AudioDevice>, EngineError> {
        match self.device.take() {
            Some(device) => Ok(device),
            None => self
                .factory
                .create()
                .map_err(EngineError::DeviceActivationFailed),
        }
    }

    /// Tear down the current device and build a fresh one
    async fn reset_device(&mut self) {
        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.stop().await {
                warn!("Failed to stop {}: {}", device.name(), e);
            }
            if let Err(e) = device.deactivate().await {
                warn!("Failed to deactivate {}: {}", device.name(), e);
            }
        }

        self.device = build_device(self.factory.as_ref());
    }
}

async fn open_playback(
    device: &mut dyn AudioDevice,
    path: &Path,
) -> Result<PlaybackSummary, EngineError> {
    device
        .activate(SessionMode::Playback)
        .await
        .map_err(EngineError::DeviceActivationFailed)?;

    let read_failed = |source| EngineError::FileReadFailed {
        path: path.to_path_buf(),
        source,
    };
    let buffer = FileSource::open_for_read(path)
        .and_then(FileSource::read_all)
        .map_err(read_failed)?;

    let summary = PlaybackSummary {
        path: path.to_path_buf(),
        frames: buffer.frame_count(),
        duration_secs: buffer.duration_secs(),
        format: buffer.format,
    };

    device
        .open_output(buffer.format)
        .await
        .map_err(EngineError::DeviceActivationFailed)?;
    device
        .start()
        .await
        .map_err(EngineError::DeviceActivationFailed)?;
    device
        .schedule_buffer(buffer)
        .map_err(EngineError::DeviceActivationFailed)?;

    Ok(summary)
}

async fn ensure_permission(permissions: &dyn PermissionProvider) -> Result<(), EngineError> {
    let status = match permissions.status() {
        PermissionStatus::Undetermined => permissions.request().await,
        status => status,
    };

    match status {
        PermissionStatus::Granted => Ok(()),
        other => {
            warn!("Microphone permission not granted: {:?}", other);
            Err(EngineError::PermissionDenied)
        }
    }
}

fn build_device(factory: &dyn DeviceFactory) -> Option<Box<dyn AudioDevice>> {
    match factory.create() {
        Ok(device) => {
            debug!("Audio device ready: {}", device.name());
            Some(device)
        }
        Err(e) => {
            warn!("Failed to build audio device, will retry on next start: {}", e);
            None
        }
    }
}
