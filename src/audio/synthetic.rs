// Synthetic audio device
//
// Generates a sine tone in a configurable native format and records what gets
// scheduled for playback. Used by tests and by the `synthetic` backend for dry
// runs without hardware. Failure switches simulate a device that refuses to
// activate, start, or open its output. With `drop_when_full` the generator
// behaves like a hardware callback: it never waits for the consumer and drops
// buffers the queue has no room for.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::device::{AudioDevice, DeviceError, DeviceFactory, SessionMode};
use super::format::{AudioBuffer, PcmSample, SampleKind, StreamFormat};

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Format advertised as the native input format
    pub native_format: StreamFormat,
    /// Format the generator actually emits, when it differs from the advertised one
    pub emit_format: Option<StreamFormat>,
    /// Tone frequency in Hz
    pub tone_hz: f32,
    /// Peak amplitude (0.0 to 1.0)
    pub amplitude: f32,
    /// Stop generating after this many frames (None = until stopped)
    pub total_frames: Option<u64>,
    /// Pace buffers at wall-clock rate instead of as fast as the queue accepts
    pub realtime: bool,
    /// Scheduled playback completes immediately instead of playing until stopped
    pub instant_playback: bool,
    /// Drop buffers on a full queue instead of waiting for room
    ///
    /// Without realtime pacing a finite source then arrives as a single burst.
    pub drop_when_full: bool,
    pub fail_activation: bool,
    pub fail_input_start: bool,
    pub fail_output: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            native_format: StreamFormat {
                sample_rate: 48_000,
                channels: 1,
                sample_kind: SampleKind::F32,
                interleaved: true,
            },
            emit_format: None,
            tone_hz: 440.0,
            amplitude: 0.5,
            total_frames: None,
            realtime: true,
            instant_playback: false,
            drop_when_full: false,
            fail_activation: false,
            fail_input_start: false,
            fail_output: false,
        }
    }
}

/// Observation handle shared by a factory and every device it builds
#[derive(Clone)]
pub struct SyntheticProbe {
    inner: Arc<ProbeInner>,
}

struct ProbeInner {
    delivered: watch::Sender<u64>,
    scheduled: Mutex<Vec<usize>>,
    devices_built: AtomicUsize,
    active: AtomicBool,
}

impl SyntheticProbe {
    fn new() -> Self {
        let (delivered, _) = watch::channel(0);
        Self {
            inner: Arc::new(ProbeInner {
                delivered,
                scheduled: Mutex::new(Vec::new()),
                devices_built: AtomicUsize::new(0),
                active: AtomicBool::new(false),
            }),
        }
    }

    /// Frames the current or last input stream offered to the queue, dropped buffers included
    pub fn delivered_frames(&self) -> u64 {
        *self.inner.delivered.borrow()
    }

    /// Wait until at least `frames` frames have been delivered
    pub async fn wait_for_frames(&self, frames: u64) {
        let mut rx = self.inner.delivered.subscribe();
        // The sender lives in the probe, so the channel never closes here
        let _ = rx.wait_for(|&delivered| delivered >= frames).await;
    }

    /// Frame counts of every buffer scheduled for playback
    pub fn scheduled_frames(&self) -> Vec<usize> {
        self.inner
            .scheduled
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Number of devices the factory has built
    pub fn devices_built(&self) -> usize {
        self.inner.devices_built.load(Ordering::SeqCst)
    }

    /// Whether any device currently holds an active session
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }
}

pub struct SyntheticDeviceFactory {
    config: SyntheticConfig,
    probe: SyntheticProbe,
}

impl SyntheticDeviceFactory {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            probe: SyntheticProbe::new(),
        }
    }

    pub fn probe(&self) -> SyntheticProbe {
        self.probe.clone()
    }
}

impl DeviceFactory for SyntheticDeviceFactory {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn create(&self) -> Result<Box<dyn AudioDevice>, DeviceError> {
        let index = self.probe.inner.devices_built.fetch_add(1, Ordering::SeqCst);
        debug!("Building synthetic device #{}", index);

        Ok(Box::new(SyntheticDevice {
            config: self.config.clone(),
            probe: self.probe.clone(),
            mode: None,
            input: None,
            generator: None,
            output: None,
            playing: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
        }))
    }
}

struct PendingInput {
    tx: mpsc::Sender<AudioBuffer>,
    buffer_frames: usize,
}

struct Generator {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct SyntheticDevice {
    config: SyntheticConfig,
    probe: SyntheticProbe,
    mode: Option<SessionMode>,
    input: Option<PendingInput>,
    generator: Option<Generator>,
    output: Option<StreamFormat>,
    playing: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

#[async_trait::async_trait]
impl AudioDevice for SyntheticDevice {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn activate(&mut self, mode: SessionMode) -> Result<(), DeviceError> {
        if self.config.fail_activation {
            return Err(DeviceError::Activation(
                "synthetic device configured to refuse activation".to_string(),
            ));
        }

        self.mode = Some(mode);
        self.probe.inner.active.store(true, Ordering::SeqCst);
        debug!("Synthetic session activated ({:?})", mode);
        Ok(())
    }

    async fn deactivate(&mut self) -> Result<(), DeviceError> {
        if self.mode.take().is_some() {
            self.probe.inner.active.store(false, Ordering::SeqCst);
            debug!("Synthetic session deactivated");
        }
        Ok(())
    }

    fn native_input_format(&self) -> Result<StreamFormat, DeviceError> {
        Ok(self.config.native_format)
    }

    async fn open_input(
        &mut self,
        format: StreamFormat,
        buffer_frames: usize,
        queue_capacity: usize,
    ) -> Result<mpsc::Receiver<AudioBuffer>, DeviceError> {
        if format != self.config.native_format {
            return Err(DeviceError::UnsupportedConfig(format!(
                "synthetic input only delivers {}",
                self.config.native_format
            )));
        }

        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        self.input = Some(PendingInput {
            tx,
            buffer_frames: buffer_frames.max(1),
        });
        Ok(rx)
    }

    async fn open_output(&mut self, format: StreamFormat) -> Result<(), DeviceError> {
        if self.config.fail_output {
            return Err(DeviceError::Backend(
                "synthetic output configured to fail".to_string(),
            ));
        }

        self.output = Some(format);
        Ok(())
    }

    fn schedule_buffer(&mut self, buffer: AudioBuffer) -> Result<(), DeviceError> {
        let Some(format) = self.output else {
            return Err(DeviceError::NotOpen("output"));
        };
        if buffer.format != format {
            return Err(DeviceError::UnsupportedConfig(format!(
                "output opened for {}, got buffer in {}",
                format, buffer.format
            )));
        }

        let frames = buffer.frame_count();
        if let Ok(mut scheduled) = self.probe.inner.scheduled.lock() {
            scheduled.push(frames);
        }
        self.playing
            .store(!self.config.instant_playback && frames > 0, Ordering::SeqCst);

        info!("Synthetic playback scheduled: {} frames", frames);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), DeviceError> {
        let Some(input) = self.input.take() else {
            return Ok(());
        };

        if self.config.fail_input_start {
            return Err(DeviceError::Backend(
                "synthetic input configured to fail on start".to_string(),
            ));
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let tone = Tone {
            format: self.config.emit_format.unwrap_or(self.config.native_format),
            hz: self.config.tone_hz,
            amplitude: self.config.amplitude,
        };
        let run = GeneratorRun {
            tone,
            buffer_frames: input.buffer_frames,
            total_frames: self.config.total_frames,
            realtime: self.config.realtime,
            drop_when_full: self.config.drop_when_full,
            tx: input.tx,
            delivered: self.probe.clone(),
            dropped: Arc::clone(&self.dropped),
        };

        self.probe.inner.delivered.send_replace(0);
        let handle = tokio::spawn(run.run(stop_rx));
        self.generator = Some(Generator { stop_tx, handle });

        info!("Synthetic input started ({})", self.config.native_format);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        if let Some(generator) = self.generator.take() {
            let _ = generator.stop_tx.send(());
            generator
                .handle
                .await
                .map_err(|e| DeviceError::Backend(format!("generator task failed: {}", e)))?;
            info!(
                "Synthetic input stopped after {} frames",
                self.probe.delivered_frames()
            );
        }

        self.input = None;
        self.output = None;
        self.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn dropped_buffers(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }
}

struct Tone {
    format: StreamFormat,
    hz: f32,
    amplitude: f32,
}

impl Tone {
    fn render(&self, first_frame: u64, frames: usize) -> AudioBuffer {
        match self.format.sample_kind {
            SampleKind::I16 => self.render_as::<i16>(first_frame, frames),
            SampleKind::I32 => self.render_as::<i32>(first_frame, frames),
            SampleKind::F32 => self.render_as::<f32>(first_frame, frames),
        }
    }

    fn render_as<S: PcmSample + Default>(&self, first_frame: u64, frames: usize) -> AudioBuffer {
        let channels = self.format.channels as usize;
        let rate = self.format.sample_rate as f64;
        let mut samples = vec![S::default(); frames * channels];

        for f in 0..frames {
            let t = (first_frame + f as u64) as f64 / rate;
            let phase = (t * self.hz as f64).fract() as f32;
            let value = S::from_f32(self.amplitude * (TAU * phase).sin());
            for c in 0..channels {
                let index = if self.format.interleaved {
                    f * channels + c
                } else {
                    c * frames + f
                };
                samples[index] = value;
            }
        }

        AudioBuffer::new(self.format, S::wrap(samples))
    }
}

struct GeneratorRun {
    tone: Tone,
    buffer_frames: usize,
    total_frames: Option<u64>,
    realtime: bool,
    drop_when_full: bool,
    tx: mpsc::Sender<AudioBuffer>,
    delivered: SyntheticProbe,
    dropped: Arc<AtomicU64>,
}

impl GeneratorRun {
    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        let mut next_frame: u64 = 0;

        loop {
            let frames = match self.total_frames {
                Some(total) if next_frame >= total => break,
                Some(total) => (total - next_frame).min(self.buffer_frames as u64) as usize,
                None => self.buffer_frames,
            };
            let buffer = self.tone.render(next_frame, frames);

            let open = if self.drop_when_full {
                if !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
                    break;
                }
                self.offer(buffer)
            } else {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    sent = self.tx.send(buffer) => sent.is_ok(),
                }
            };
            if !open {
                debug!("Synthetic input queue closed");
                break;
            }

            next_frame += frames as u64;
            self.delivered.inner.delivered.send_replace(next_frame);

            if self.realtime {
                let period = Duration::from_secs_f64(
                    frames as f64 / self.tone.format.sample_rate as f64,
                );
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep(period) => {}
                }
            } else if !(self.drop_when_full && self.total_frames.is_some()) {
                tokio::task::yield_now().await;
            }
        }
    }

    /// Non-blocking send; returns false once the consumer is gone
    fn offer(&self, buffer: AudioBuffer) -> bool {
        match self.tx.try_send(buffer) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}
