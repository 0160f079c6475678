// Integration tests for configuration loading

use anyhow::Result;
use miccheck::audio::ResampleMode;
use miccheck::{BackendKind, Config};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_missing_file_uses_defaults() -> Result<()> {
    let dir = TempDir::new()?;
    let cfg = Config::load(&dir.path().join("absent").to_string_lossy())?;

    assert_eq!(cfg.audio.buffer_frames, 1024);
    assert_eq!(cfg.audio.queue_capacity, 32);
    assert_eq!(cfg.audio.resample_mode, ResampleMode::Chunked);
    assert_eq!(cfg.audio.max_consecutive_write_failures, 8);
    assert!(cfg.audio.input_device.is_none());
    assert_eq!(cfg.storage.recordings_dir, "~/.miccheck");

    Ok(())
}

#[test]
fn test_file_overrides_defaults() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("miccheck.toml");
    fs::write(
        &path,
        r#"
[audio]
backend = "synthetic"
buffer_frames = 512
resample_mode = "streaming"
input_device = "USB Mic"

[storage]
recordings_dir = "/tmp/takes"
"#,
    )?;

    let cfg = Config::load(&path.to_string_lossy())?;

    assert_eq!(cfg.audio.backend, BackendKind::Synthetic);
    assert_eq!(cfg.audio.buffer_frames, 512);
    assert_eq!(cfg.audio.queue_capacity, 32, "Unset keys keep their defaults");
    assert_eq!(cfg.audio.resample_mode, ResampleMode::Streaming);
    assert_eq!(cfg.audio.input_device.as_deref(), Some("USB Mic"));

    let settings = cfg.engine_settings();
    assert_eq!(settings.buffer_frames, 512);
    assert_eq!(settings.resample_mode, ResampleMode::Streaming);

    Ok(())
}

#[test]
fn test_environment_overrides_defaults() -> Result<()> {
    let dir = TempDir::new()?;
    std::env::set_var("MICCHECK_STORAGE__FILE_NAME", "env-take.wav");

    let result = Config::load(&dir.path().join("absent").to_string_lossy());
    std::env::remove_var("MICCHECK_STORAGE__FILE_NAME");

    let cfg = result?;
    assert_eq!(cfg.storage.file_name, "env-take.wav");

    Ok(())
}

#[test]
fn test_recording_path_expands_home() {
    let mut cfg = Config::default();
    cfg.storage.recordings_dir = "~/takes".to_string();
    cfg.storage.file_name = "slot.wav".to_string();

    let path = cfg.recording_path();

    assert!(!path.to_string_lossy().starts_with('~'));
    assert!(path.ends_with("takes/slot.wav"));
}

#[test]
fn test_ensure_recordings_dir_creates_nested_dirs() -> Result<()> {
    let dir = TempDir::new()?;
    let mut cfg = Config::default();
    cfg.storage.recordings_dir = dir.path().join("a").join("b").to_string_lossy().into_owned();

    let created = cfg.ensure_recordings_dir()?;

    assert!(created.is_dir());
    assert_eq!(cfg.recording_path(), created.join("temp.wav"));

    Ok(())
}

#[test]
fn test_loaded_defaults_match_default_impl() -> Result<()> {
    let dir = TempDir::new()?;
    let loaded = Config::load(&dir.path().join("absent").to_string_lossy())?;
    let built = Config::default();

    assert_eq!(loaded.audio.backend, built.audio.backend);
    assert_eq!(loaded.audio.buffer_frames, built.audio.buffer_frames);
    assert_eq!(loaded.audio.queue_capacity, built.audio.queue_capacity);
    assert_eq!(loaded.audio.resample_mode, built.audio.resample_mode);
    assert_eq!(
        loaded.audio.max_consecutive_write_failures,
        built.audio.max_consecutive_write_failures
    );
    assert_eq!(loaded.audio.output_device, built.audio.output_device);
    assert_eq!(loaded.storage.recordings_dir, built.storage.recordings_dir);

    Ok(())
}
