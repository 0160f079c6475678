// Integration tests for the UI-facing session controller
//
// These check the button affordances for every state and that the two toggle
// intents drive the engine the way the buttons promise.

use anyhow::Result;
use miccheck::audio::{SyntheticConfig, SyntheticDeviceFactory, SyntheticProbe};
use miccheck::session::{
    Affordances, EngineSettings, RecordPlaybackEngine, SessionController, SessionState,
    StaticPermission,
};
use miccheck::EngineError;
use std::sync::Arc;
use tempfile::TempDir;

fn controller(dir: &TempDir, permission: StaticPermission) -> (SessionController, SyntheticProbe) {
    let factory = SyntheticDeviceFactory::new(SyntheticConfig {
        total_frames: Some(12_000),
        realtime: false,
        ..SyntheticConfig::default()
    });
    let probe = factory.probe();
    let engine = RecordPlaybackEngine::new(
        EngineSettings::new(dir.path().join("temp.wav")),
        Arc::new(factory),
        Arc::new(permission),
    );
    (SessionController::new(engine), probe)
}

#[test]
fn test_affordances_per_state() {
    let idle = Affordances::for_state(SessionState::Idle);
    assert!(idle.record.enabled && idle.play.enabled);
    assert_eq!((idle.record.label, idle.play.label), ("REC", "PLAY"));

    let recording = Affordances::for_state(SessionState::Recording);
    assert!(recording.record.enabled);
    assert!(!recording.play.enabled, "Play is disabled while recording");
    assert_eq!(recording.record.label, "STOP");

    let playing = Affordances::for_state(SessionState::Playing);
    assert!(!playing.record.enabled, "Record is disabled while playing");
    assert!(playing.play.enabled);
    assert_eq!(playing.play.label, "STOP");
}

#[tokio::test]
async fn test_toggles_walk_the_session() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut controller, probe) = controller(&dir, StaticPermission::granted());

    assert_eq!(controller.on_record_toggle().await?, SessionState::Recording);
    assert_eq!(controller.affordances(), Affordances::for_state(SessionState::Recording));

    probe.wait_for_frames(12_000).await;
    assert_eq!(controller.on_record_toggle().await?, SessionState::Idle);

    assert_eq!(controller.on_play_toggle().await?, SessionState::Playing);
    assert_eq!(controller.on_play_toggle().await?, SessionState::Idle);

    Ok(())
}

#[tokio::test]
async fn test_opposite_button_is_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut controller, probe) = controller(&dir, StaticPermission::granted());

    controller.on_record_toggle().await?;
    let result = controller.on_play_toggle().await;
    assert!(matches!(
        result,
        Err(EngineError::InvalidStateTransition { .. })
    ));
    assert_eq!(controller.state(), SessionState::Recording);

    probe.wait_for_frames(12_000).await;
    controller.on_record_toggle().await?;
    controller.on_play_toggle().await?;

    let result = controller.on_record_toggle().await;
    assert!(matches!(
        result,
        Err(EngineError::InvalidStateTransition { .. })
    ));
    assert_eq!(controller.state(), SessionState::Playing);

    controller.shutdown().await?;
    assert_eq!(controller.state(), SessionState::Idle);

    Ok(())
}

#[tokio::test]
async fn test_failed_start_reenables_both_buttons() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut controller, _) = controller(&dir, StaticPermission::denied());

    let result = controller.on_record_toggle().await;

    assert!(matches!(result, Err(EngineError::PermissionDenied)));
    assert_eq!(controller.affordances(), Affordances::for_state(SessionState::Idle));

    let result = controller.on_play_toggle().await;
    assert!(matches!(result, Err(EngineError::NoRecording)));
    assert_eq!(controller.state(), SessionState::Idle);

    Ok(())
}

#[tokio::test]
async fn test_snapshot_serializes_for_the_host() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut controller, probe) = controller(&dir, StaticPermission::granted());

    let snapshot = serde_json::to_value(controller.snapshot())?;
    assert_eq!(snapshot["state"], "idle");
    assert!(snapshot["file_path"].is_null());
    assert!(snapshot["last_take"].is_null());

    controller.on_record_toggle().await?;
    probe.wait_for_frames(12_000).await;
    controller.on_record_toggle().await?;

    let snapshot = serde_json::to_value(controller.snapshot())?;
    assert_eq!(snapshot["state"], "idle");
    assert!(snapshot["file_path"].as_str().is_some_and(|p| p.ends_with("temp.wav")));
    assert!(snapshot["last_take"]["frames_written"].as_u64().is_some_and(|f| f > 0));
    assert_eq!(snapshot["affordances"]["record"]["label"], "REC");

    Ok(())
}
