// Integration tests for the capture pipeline
//
// A synthetic device stands in for the microphone; these tests check that what
// lands on disk is mono float32 at 44.1kHz with the expected frame count, and
// that playback schedules exactly what was recorded.

use anyhow::Result;
use miccheck::audio::{
    FileSource, FormatConverter, ResampleMode, SampleKind, StreamFormat, SyntheticConfig,
    SyntheticDeviceFactory,
};
use miccheck::session::{EngineSettings, RecordPlaybackEngine, SessionState, StaticPermission};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const TWO_SECONDS_AT_48K: u64 = 96_000;

fn native(sample_rate: u32, channels: u16, sample_kind: SampleKind) -> StreamFormat {
    StreamFormat {
        sample_rate,
        channels,
        sample_kind,
        interleaved: true,
    }
}

/// Record `total_frames` from a synthetic device and return the engine afterwards
async fn record_take(
    native_format: StreamFormat,
    total_frames: u64,
    mode: ResampleMode,
    path: &Path,
) -> Result<(RecordPlaybackEngine, u64)> {
    let factory = SyntheticDeviceFactory::new(SyntheticConfig {
        native_format,
        total_frames: Some(total_frames),
        realtime: false,
        ..SyntheticConfig::default()
    });
    let probe = factory.probe();
    let settings = EngineSettings {
        resample_mode: mode,
        ..EngineSettings::new(path)
    };
    let mut engine = RecordPlaybackEngine::new(
        settings,
        Arc::new(factory),
        Arc::new(StaticPermission::granted()),
    );

    engine.start_recording().await?;
    probe.wait_for_frames(total_frames).await;
    let summary = engine
        .stop_recording()
        .await?
        .expect("recording should produce a summary");

    Ok((engine, summary.frames_written))
}

#[tokio::test]
async fn test_streaming_two_seconds_at_48k_is_88200_frames_within_two() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("temp.wav");

    let (_, frames) = record_take(
        native(48_000, 1, SampleKind::F32),
        TWO_SECONDS_AT_48K,
        ResampleMode::Streaming,
        &path,
    )
    .await?;

    let diff = (frames as i64 - 88_200).abs();
    assert!(diff <= 2, "Expected ~88200 frames, got {}", frames);

    let source = FileSource::open_for_read(&path)?;
    assert_eq!(source.format(), StreamFormat::STORAGE);
    assert_eq!(source.frame_count() as u64, frames);

    Ok(())
}

/// The default chunked mode rounds every buffer on its own, so the 88200 +/- 2
/// frame tolerance for two seconds at 48kHz only holds in streaming mode.
#[tokio::test]
async fn test_default_chunked_mode_drifts_per_buffer() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("temp.wav");
    let format = native(48_000, 1, SampleKind::F32);
    assert_eq!(ResampleMode::default(), ResampleMode::Chunked);

    let (engine, frames) =
        record_take(format, TWO_SECONDS_AT_48K, ResampleMode::default(), &path).await?;

    // 93 full 1024-frame buffers and a 768-frame tail
    let buffer_frames = engine.settings().buffer_frames as u64;
    let converter = FormatConverter::new(format, StreamFormat::STORAGE, ResampleMode::Chunked)?;
    let full = TWO_SECONDS_AT_48K / buffer_frames;
    let tail = TWO_SECONDS_AT_48K % buffer_frames;
    let expected = full * converter.chunked_frame_count(buffer_frames as usize) as u64
        + converter.chunked_frame_count(tail as usize) as u64;

    assert_eq!(frames, expected);
    assert_eq!(frames, 88_219);
    assert!(
        frames.abs_diff(88_200) > 2,
        "Chunked output is outside the streaming tolerance"
    );

    Ok(())
}

#[tokio::test]
async fn test_stereo_i16_input_is_stored_mono_f32() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("temp.wav");

    let (_, frames) = record_take(
        native(48_000, 2, SampleKind::I16),
        48_000,
        ResampleMode::Streaming,
        &path,
    )
    .await?;

    let buffer = FileSource::open_for_read(&path)?.read_all()?;
    assert_eq!(buffer.format, StreamFormat::STORAGE);
    assert_eq!(buffer.frame_count() as u64, frames);

    // Both channels carry the same tone, so the downmix keeps its amplitude
    let peak = (0..buffer.frame_count())
        .map(|f| buffer.sample_f32(f, 0).abs())
        .fold(0.0f32, f32::max);
    assert!(peak > 0.4 && peak <= 0.51, "Unexpected peak {}", peak);

    Ok(())
}

#[tokio::test]
async fn test_storage_rate_input_passes_through() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("temp.wav");

    let (_, frames) = record_take(
        native(44_100, 1, SampleKind::F32),
        44_100,
        ResampleMode::Chunked,
        &path,
    )
    .await?;

    assert_eq!(frames, 44_100);

    Ok(())
}

#[tokio::test]
async fn test_planar_i32_input_is_converted() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("temp.wav");
    let format = StreamFormat {
        sample_rate: 96_000,
        channels: 2,
        sample_kind: SampleKind::I32,
        interleaved: false,
    };

    let (_, frames) = record_take(format, 96_000, ResampleMode::Streaming, &path).await?;

    let diff = (frames as i64 - 44_100).abs();
    assert!(diff <= 2, "Expected ~44100 frames, got {}", frames);

    Ok(())
}

#[tokio::test]
async fn test_playback_schedules_the_recorded_file() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("temp.wav");
    let factory = SyntheticDeviceFactory::new(SyntheticConfig {
        total_frames: Some(24_000),
        realtime: false,
        ..SyntheticConfig::default()
    });
    let probe = factory.probe();
    let mut engine = RecordPlaybackEngine::new(
        EngineSettings::new(&path),
        Arc::new(factory),
        Arc::new(StaticPermission::granted()),
    );

    engine.start_recording().await?;
    probe.wait_for_frames(24_000).await;
    let take = engine.stop_recording().await?.expect("take");

    let playback = engine.start_playback().await?;
    assert_eq!(engine.state(), SessionState::Playing);
    assert_eq!(playback.format, StreamFormat::STORAGE);
    assert_eq!(playback.frames as u64, take.frames_written);
    assert!((playback.duration_secs - take.duration_secs).abs() < 1e-9);

    engine.stop_playback().await?;

    // Playing twice schedules the same take twice
    engine.start_playback().await?;
    engine.stop_playback().await?;
    assert_eq!(
        probe.scheduled_frames(),
        vec![playback.frames, playback.frames]
    );

    Ok(())
}
