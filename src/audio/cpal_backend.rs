// Hardware audio device using cpal
//
// cpal streams are not `Send` on every platform, so each running stream lives
// on its own thread. The thread builds the stream, plays it, then parks until
// told to stop; dropping the stream there waits for the in-flight callback.
// Input streams then close their capture queue so the trailing partial buffer
// reaches the writer before the channel ends.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::device::{AudioDevice, CaptureQueue, DeviceError, DeviceFactory, SessionMode};
use super::format::{AudioBuffer, PcmSample, SampleKind, StreamFormat};

/// Builds [`CpalDevice`]s bound to the configured (or default) devices
pub struct CpalDeviceFactory {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalDeviceFactory {
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            input_device,
            output_device,
        }
    }

    /// List the names of all available input devices
    pub fn list_input_devices() -> Result<Vec<String>, DeviceError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| DeviceError::Backend(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect::<Vec<_>>();

        debug!("Found {} input devices", devices.len());
        Ok(devices)
    }

    /// List the names of all available output devices
    pub fn list_output_devices() -> Result<Vec<String>, DeviceError> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| DeviceError::Backend(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect::<Vec<_>>();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }
}

impl DeviceFactory for CpalDeviceFactory {
    fn name(&self) -> &str {
        "cpal"
    }

    fn create(&self) -> Result<Box<dyn AudioDevice>, DeviceError> {
        Ok(Box::new(CpalDevice {
            label: format!("cpal ({})", cpal::default_host().id().name()),
            input_device: self.input_device.clone(),
            output_device: self.output_device.clone(),
            mode: None,
            plan: None,
            running: None,
            cursor: Arc::new(Mutex::new(PlaybackCursor::default())),
            playing: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
        }))
    }
}

enum StreamPlan {
    Input {
        format: StreamFormat,
        buffer_frames: usize,
        tx: mpsc::Sender<AudioBuffer>,
    },
    Output {
        format: StreamFormat,
    },
}

pub struct CpalDevice {
    label: String,
    input_device: Option<String>,
    output_device: Option<String>,
    mode: Option<SessionMode>,
    plan: Option<StreamPlan>,
    running: Option<StreamThread>,
    cursor: Arc<Mutex<PlaybackCursor>>,
    playing: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

#[async_trait::async_trait]
impl AudioDevice for CpalDevice {
    fn name(&self) -> &str {
        &self.label
    }

    async fn activate(&mut self, mode: SessionMode) -> Result<(), DeviceError> {
        let device = match mode {
            SessionMode::Record => find_input_device(self.input_device.as_deref())?,
            SessionMode::Playback => find_output_device(self.output_device.as_deref())?,
        };
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        info!("Audio session activated ({:?}) on {}", mode, name);
        self.mode = Some(mode);
        Ok(())
    }

    async fn deactivate(&mut self) -> Result<(), DeviceError> {
        if let Some(mode) = self.mode.take() {
            debug!("Audio session deactivated ({:?})", mode);
        }
        Ok(())
    }

    fn native_input_format(&self) -> Result<StreamFormat, DeviceError> {
        let device = find_input_device(self.input_device.as_deref())?;
        let supported = device
            .default_input_config()
            .map_err(|e| DeviceError::UnsupportedConfig(e.to_string()))?;

        let format = StreamFormat {
            sample_rate: supported.sample_rate().0,
            channels: supported.channels(),
            sample_kind: native_kind(supported.sample_format()),
            interleaved: true,
        };

        debug!(
            "Native input format: {} (device samples {:?})",
            format,
            supported.sample_format()
        );
        Ok(format)
    }

    async fn open_input(
        &mut self,
        format: StreamFormat,
        buffer_frames: usize,
        queue_capacity: usize,
    ) -> Result<mpsc::Receiver<AudioBuffer>, DeviceError> {
        let native = self.native_input_format()?;
        if format != native {
            return Err(DeviceError::UnsupportedConfig(format!(
                "input delivers {}, requested {}",
                native, format
            )));
        }

        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        self.plan = Some(StreamPlan::Input {
            format,
            buffer_frames: buffer_frames.max(1),
            tx,
        });
        Ok(rx)
    }

    async fn open_output(&mut self, format: StreamFormat) -> Result<(), DeviceError> {
        let device = find_output_device(self.output_device.as_deref())?;
        let (config, sample_format) = output_config(&device, format.sample_rate)?;

        debug!(
            "Output config: sample_rate={}, channels={}, format={:?}",
            config.sample_rate.0, config.channels, sample_format
        );

        self.plan = Some(StreamPlan::Output { format });
        Ok(())
    }

    fn schedule_buffer(&mut self, buffer: AudioBuffer) -> Result<(), DeviceError> {
        if self.running.is_none() && !matches!(self.plan, Some(StreamPlan::Output { .. })) {
            return Err(DeviceError::NotOpen("output"));
        }

        let frames = buffer.frame_count();
        let mut cursor = self
            .cursor
            .lock()
            .map_err(|_| DeviceError::Backend("playback cursor poisoned".to_string()))?;
        cursor.buffer = Some(buffer);
        cursor.position = 0;
        self.playing.store(frames > 0, Ordering::SeqCst);

        info!("Playback scheduled: {} frames", frames);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), DeviceError> {
        let Some(plan) = self.plan.take() else {
            return Ok(());
        };

        let thread = match plan {
            StreamPlan::Input {
                format,
                buffer_frames,
                tx,
            } => {
                let name = self.input_device.clone();
                let dropped = Arc::clone(&self.dropped);
                spawn_stream("miccheck-input", move || {
                    build_input_stream(name.as_deref(), format, buffer_frames, tx, dropped)
                })
                .await?
            }
            StreamPlan::Output { format } => {
                let name = self.output_device.clone();
                let cursor = Arc::clone(&self.cursor);
                let playing = Arc::clone(&self.playing);
                spawn_stream("miccheck-output", move || {
                    build_output_stream(name.as_deref(), format, cursor, playing)
                })
                .await?
            }
        };

        self.running = Some(thread);
        info!("Audio stream started on {}", self.label);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        self.plan = None;

        if let Some(thread) = self.running.take() {
            tokio::task::spawn_blocking(move || thread.shutdown())
                .await
                .map_err(|e| DeviceError::Backend(format!("stream shutdown failed: {}", e)))?;
            info!("Audio stream stopped on {}", self.label);
        }

        self.playing.store(false, Ordering::SeqCst);
        if let Ok(mut cursor) = self.cursor.lock() {
            *cursor = PlaybackCursor::default();
        }
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn dropped_buffers(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn native_kind(format: SampleFormat) -> SampleKind {
    match format {
        SampleFormat::I16 => SampleKind::I16,
        SampleFormat::I32 => SampleKind::I32,
        _ => SampleKind::F32,
    }
}

fn find_input_device(name: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();

    if let Some(name) = name {
        let mut devices = host
            .input_devices()
            .map_err(|e| DeviceError::Backend(format!("Failed to enumerate devices: {}", e)))?;
        if let Some(device) = devices.find(|d| d.name().map(|n| n == name).unwrap_or(false)) {
            return Ok(device);
        }
        warn!("Input device '{}' not found, falling back to default device", name);
    }

    host.default_input_device()
        .ok_or(DeviceError::NoDevice("input"))
}

fn find_output_device(name: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();

    if let Some(name) = name {
        let mut devices = host
            .output_devices()
            .map_err(|e| DeviceError::Backend(format!("Failed to enumerate devices: {}", e)))?;
        if let Some(device) = devices.find(|d| d.name().map(|n| n == name).unwrap_or(false)) {
            return Ok(device);
        }
        warn!("Output device '{}' not found, falling back to default device", name);
    }

    host.default_output_device()
        .ok_or(DeviceError::NoDevice("output"))
}

/// Pick an output configuration that runs at `sample_rate`, preferring f32
fn output_config(
    device: &cpal::Device,
    sample_rate: u32,
) -> Result<(StreamConfig, SampleFormat), DeviceError> {
    let ranges: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| DeviceError::Backend(format!("Failed to get device configs: {}", e)))?
        .filter(|range| {
            range.min_sample_rate().0 <= sample_rate && range.max_sample_rate().0 >= sample_rate
        })
        .collect();

    let range = ranges
        .iter()
        .find(|range| range.sample_format() == SampleFormat::F32)
        .or_else(|| ranges.first())
        .cloned()
        .ok_or_else(|| {
            DeviceError::UnsupportedConfig(format!(
                "no output configuration supports {}Hz",
                sample_rate
            ))
        })?;

    let supported = range.with_sample_rate(cpal::SampleRate(sample_rate));
    Ok((supported.config(), supported.sample_format()))
}

fn build_input_stream(
    name: Option<&str>,
    format: StreamFormat,
    buffer_frames: usize,
    tx: mpsc::Sender<AudioBuffer>,
    dropped: Arc<AtomicU64>,
) -> Result<LiveStream, DeviceError> {
    let device = find_input_device(name)?;
    let supported = device
        .default_input_config()
        .map_err(|e| DeviceError::UnsupportedConfig(e.to_string()))?;
    let config = supported.config();

    info!(
        "Using audio input device: {} ({} Hz, {} channels, {:?})",
        device.name().unwrap_or_else(|_| "Unknown".to_string()),
        config.sample_rate.0,
        config.channels,
        supported.sample_format()
    );

    let queue = InputQueue {
        format,
        buffer_frames,
        tx,
        dropped,
    };
    match supported.sample_format() {
        SampleFormat::I16 => input_stream::<i16, i16>(&device, &config, queue),
        SampleFormat::I32 => input_stream::<i32, i32>(&device, &config, queue),
        SampleFormat::F32 => input_stream::<f32, f32>(&device, &config, queue),
        SampleFormat::U16 => input_stream::<u16, f32>(&device, &config, queue),
        SampleFormat::U8 => input_stream::<u8, f32>(&device, &config, queue),
        SampleFormat::I8 => input_stream::<i8, f32>(&device, &config, queue),
        SampleFormat::F64 => input_stream::<f64, f32>(&device, &config, queue),
        other => Err(DeviceError::UnsupportedConfig(format!(
            "{:?} input samples",
            other
        ))),
    }
}

/// Everything an input callback needs, before the sample type is known
struct InputQueue {
    format: StreamFormat,
    buffer_frames: usize,
    tx: mpsc::Sender<AudioBuffer>,
    dropped: Arc<AtomicU64>,
}

fn input_stream<T, S>(
    device: &cpal::Device,
    config: &StreamConfig,
    input: InputQueue,
) -> Result<LiveStream, DeviceError>
where
    T: SizedSample + Send + 'static,
    S: PcmSample + FromSample<T>,
{
    let queue = Arc::new(Mutex::new(CaptureQueue::<S>::new(
        input.format,
        input.buffer_frames,
        input.tx,
        input.dropped,
    )));
    let callback_queue = Arc::clone(&queue);
    let mut scratch: Vec<S> = Vec::new();

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Never block the audio thread; the stop hook locks once the stream is gone
                let Ok(mut queue) = callback_queue.try_lock() else {
                    return;
                };
                scratch.clear();
                scratch.extend(data.iter().map(|&sample| S::from_sample_(sample)));
                queue.push(&scratch);
            },
            |err| error!("Audio input stream error: {}", err),
            None,
        )
        .map_err(|e| DeviceError::Backend(format!("Failed to create input stream: {}", e)))?;

    Ok(LiveStream {
        stream,
        on_stop: Some(Box::new(move || {
            queue.lock().unwrap_or_else(|e| e.into_inner()).close();
        })),
    })
}

fn build_output_stream(
    name: Option<&str>,
    format: StreamFormat,
    cursor: Arc<Mutex<PlaybackCursor>>,
    playing: Arc<AtomicBool>,
) -> Result<LiveStream, DeviceError> {
    let device = find_output_device(name)?;
    let (config, sample_format) = output_config(&device, format.sample_rate)?;

    info!(
        "Using audio output device: {} ({} Hz, {} channels, {:?})",
        device.name().unwrap_or_else(|_| "Unknown".to_string()),
        config.sample_rate.0,
        config.channels,
        sample_format
    );

    let stream = match sample_format {
        SampleFormat::F32 => output_stream::<f32>(&device, &config, cursor, playing),
        SampleFormat::I16 => output_stream::<i16>(&device, &config, cursor, playing),
        SampleFormat::I32 => output_stream::<i32>(&device, &config, cursor, playing),
        SampleFormat::U16 => output_stream::<u16>(&device, &config, cursor, playing),
        other => Err(DeviceError::UnsupportedConfig(format!(
            "{:?} output samples",
            other
        ))),
    }?;

    Ok(LiveStream {
        stream,
        on_stop: None,
    })
}

fn output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    cursor: Arc<Mutex<PlaybackCursor>>,
    playing: Arc<AtomicBool>,
) -> Result<Stream, DeviceError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = config.channels as usize;

    device
        .build_output_stream(
            config,
            move |out: &mut [T], _: &cpal::OutputCallbackInfo| {
                // Never block the audio thread on the control side
                let Ok(mut cursor) = cursor.try_lock() else {
                    out.fill(T::EQUILIBRIUM);
                    return;
                };
                cursor.fill(out, channels);
                if cursor.finished() {
                    playing.store(false, Ordering::Release);
                }
            },
            |err| error!("Audio output stream error: {}", err),
            None,
        )
        .map_err(|e| DeviceError::Backend(format!("Failed to create output stream: {}", e)))
}

/// Read position into the scheduled playback buffer
#[derive(Default)]
struct PlaybackCursor {
    buffer: Option<AudioBuffer>,
    position: usize,
}

impl PlaybackCursor {
    fn fill<T: Sample + FromSample<f32>>(&mut self, out: &mut [T], channels: usize) {
        for frame in out.chunks_mut(channels.max(1)) {
            match &self.buffer {
                Some(buffer) if self.position < buffer.frame_count() => {
                    let source_channels = buffer.format.channels as usize;
                    for (channel, slot) in frame.iter_mut().enumerate() {
                        let source_channel = channel.min(source_channels - 1);
                        let value = buffer.sample_f32(self.position, source_channel);
                        *slot = T::from_sample(value);
                    }
                    self.position += 1;
                }
                _ => frame.fill(T::EQUILIBRIUM),
            }
        }
    }

    fn finished(&self) -> bool {
        match &self.buffer {
            Some(buffer) => self.position >= buffer.frame_count(),
            None => false,
        }
    }
}

/// A built stream plus the hook to run once it has been torn down
struct LiveStream {
    stream: Stream,
    on_stop: Option<Box<dyn FnOnce() + Send>>,
}

/// A cpal stream owned by a dedicated thread
struct StreamThread {
    stop_tx: std_mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl StreamThread {
    fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            error!("Audio stream thread panicked");
        }
    }
}

async fn spawn_stream<F>(name: &'static str, build: F) -> Result<StreamThread, DeviceError>
where
    F: FnOnce() -> Result<LiveStream, DeviceError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let live = match build().and_then(|live| {
                    live.stream.play().map_err(|e| {
                        DeviceError::Backend(format!("Failed to start stream: {}", e))
                    })?;
                    Ok(live)
                }) {
                    Ok(live) => {
                        let _ = ready_tx.send(Ok(()));
                        live
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until stop is requested or the owner goes away
                let _ = stop_rx.recv();
                let LiveStream { stream, on_stop } = live;
                if let Err(e) = stream.pause() {
                    debug!("Ignoring pause error during shutdown: {}", e);
                }
                drop(stream);
                if let Some(on_stop) = on_stop {
                    on_stop();
                }
            })
            .map_err(|e| DeviceError::Backend(format!("Failed to spawn audio thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(StreamThread { stop_tx, handle }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(DeviceError::Backend(
                    "audio thread exited before starting".to_string(),
                ))
            }
        }
    })
    .await
    .map_err(|e| DeviceError::Backend(format!("audio thread setup failed: {}", e)))?
}
