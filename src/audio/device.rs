use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use super::format::{AudioBuffer, PcmSample, StreamFormat};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no {0} device available")]
    NoDevice(&'static str),

    #[error("audio device '{0}' not found")]
    NotFound(String),

    #[error("unsupported stream configuration: {0}")]
    UnsupportedConfig(String),

    #[error("audio session activation refused: {0}")]
    Activation(String),

    #[error("{0} stream is not open")]
    NotOpen(&'static str),

    #[error("audio backend error: {0}")]
    Backend(String),
}

/// Audio session category requested from the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Capture from the microphone (output may stay inactive)
    Record,
    /// One-shot playback to the output device
    Playback,
}

/// Audio device backend trait
///
/// One device instance serves one record or playback cycle. The engine
/// discards it after every stop and asks its [`DeviceFactory`] for a fresh
/// one, so implementations never need to support reconfiguration.
///
/// Platform-specific implementations:
/// - cpal: hardware input/output streams (desktop)
/// - Synthetic: generated tone for tests and dry runs
#[async_trait::async_trait]
pub trait AudioDevice: Send {
    /// Get device name for logging
    fn name(&self) -> &str;

    /// Activate the audio session for the given mode
    async fn activate(&mut self, mode: SessionMode) -> Result<(), DeviceError>;

    /// Deactivate the audio session. Safe to call when inactive.
    async fn deactivate(&mut self) -> Result<(), DeviceError>;

    /// Query the format the hardware input delivers
    fn native_input_format(&self) -> Result<StreamFormat, DeviceError>;

    /// Open the input stream
    ///
    /// Returns a bounded channel receiver that will receive one buffer of
    /// `buffer_frames` frames per hardware buffer-ready notification, in
    /// arrival order. When the queue is full the device drops the buffer and
    /// counts it in [`AudioDevice::dropped_buffers`]. The channel closes once
    /// the device is stopped.
    async fn open_input(
        &mut self,
        format: StreamFormat,
        buffer_frames: usize,
        queue_capacity: usize,
    ) -> Result<mpsc::Receiver<AudioBuffer>, DeviceError>;

    /// Open an output player for buffers in `format`
    async fn open_output(&mut self, format: StreamFormat) -> Result<(), DeviceError>;

    /// Enqueue a buffer for one-shot playback on the open output
    fn schedule_buffer(&mut self, buffer: AudioBuffer) -> Result<(), DeviceError>;

    /// Start the open streams
    async fn start(&mut self) -> Result<(), DeviceError>;

    /// Stop all streams
    ///
    /// Returns only after any in-flight buffer callback has completed. Safe to
    /// call more than once.
    async fn stop(&mut self) -> Result<(), DeviceError>;

    /// Whether scheduled playback is still producing audio
    fn is_playing(&self) -> bool;

    /// Input buffers dropped because the queue was full
    fn dropped_buffers(&self) -> u64;
}

/// Builds a fresh [`AudioDevice`] for every record/playback cycle
pub trait DeviceFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self) -> Result<Box<dyn AudioDevice>, DeviceError>;
}

/// Groups incoming interleaved samples into fixed-size buffers
///
/// Hardware callbacks deliver whatever period size the driver picked; the
/// assembler re-slices them into `buffer_frames`-frame buffers.
#[derive(Debug)]
pub struct BufferAssembler<S: PcmSample> {
    format: StreamFormat,
    buffer_samples: usize,
    pending: Vec<S>,
}

impl<S: PcmSample> BufferAssembler<S> {
    pub fn new(format: StreamFormat, buffer_frames: usize) -> Self {
        let buffer_samples = buffer_frames.max(1) * format.channels.max(1) as usize;
        Self {
            format,
            buffer_samples,
            pending: Vec::with_capacity(buffer_samples),
        }
    }

    /// Append samples, invoking `emit` for each completed buffer
    pub fn push(&mut self, data: &[S], mut emit: impl FnMut(AudioBuffer)) {
        let mut rest = data;
        while !rest.is_empty() {
            let take = (self.buffer_samples - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.buffer_samples {
                let full = std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.buffer_samples),
                );
                emit(AudioBuffer::new(self.format, S::wrap(full)));
            }
        }
    }

    /// Flush the partial buffer, if any
    pub fn flush(&mut self) -> Option<AudioBuffer> {
        if self.pending.is_empty() {
            return None;
        }
        let partial = std::mem::take(&mut self.pending);
        Some(AudioBuffer::new(self.format, S::wrap(partial)))
    }
}

/// Realtime side of an input stream
///
/// Re-slices callback data into fixed-size buffers and offers each one to the
/// bounded queue without blocking. A full queue drops the buffer and bumps the
/// shared counter. [`CaptureQueue::close`] delivers the partial tail and then
/// releases the sender so the consumer sees the end of the stream.
pub struct CaptureQueue<S: PcmSample> {
    assembler: BufferAssembler<S>,
    tx: Option<mpsc::Sender<AudioBuffer>>,
    dropped: Arc<AtomicU64>,
}

impl<S: PcmSample> CaptureQueue<S> {
    pub fn new(
        format: StreamFormat,
        buffer_frames: usize,
        tx: mpsc::Sender<AudioBuffer>,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            assembler: BufferAssembler::new(format, buffer_frames),
            tx: Some(tx),
            dropped,
        }
    }

    /// Feed one callback's worth of samples
    pub fn push(&mut self, data: &[S]) {
        let Self {
            assembler,
            tx,
            dropped,
        } = self;
        assembler.push(data, |buffer| offer(tx.as_ref(), &**dropped, buffer));
    }

    /// Deliver the pending partial buffer and close the queue
    pub fn close(&mut self) {
        if let Some(tail) = self.assembler.flush() {
            debug!("Delivering {} trailing input frames", tail.frame_count());
            offer(self.tx.as_ref(), &self.dropped, tail);
        }
        self.tx = None;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

fn offer(tx: Option<&mpsc::Sender<AudioBuffer>>, dropped: &AtomicU64, buffer: AudioBuffer) {
    let Some(tx) = tx else {
        return;
    };
    if let Err(TrySendError::Full(_)) = tx.try_send(buffer) {
        dropped.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::{SampleKind, Samples};

    #[test]
    fn test_assembler_reslices_callbacks() {
        let format = StreamFormat {
            sample_rate: 48_000,
            channels: 2,
            sample_kind: SampleKind::I16,
            interleaved: true,
        };
        let mut assembler = BufferAssembler::<i16>::new(format, 4);
        let mut emitted = Vec::new();

        // 3 frames, then 7 frames: one full buffer after the second push plus one more
        assembler.push(&[1; 6], |b| emitted.push(b));
        assert!(emitted.is_empty());
        assembler.push(&[2; 14], |b| emitted.push(b));

        assert_eq!(emitted.len(), 2);
        assert!(emitted.iter().all(|b| b.frame_count() == 4));
        assert_eq!(emitted[0].samples, Samples::I16(vec![1, 1, 1, 1, 1, 1, 2, 2]));

        let partial = assembler.flush().unwrap();
        assert_eq!(partial.frame_count(), 2);
        assert!(assembler.flush().is_none());
    }

    fn mono_i16() -> StreamFormat {
        StreamFormat {
            sample_rate: 48_000,
            channels: 1,
            sample_kind: SampleKind::I16,
            interleaved: true,
        }
    }

    #[test]
    fn test_capture_queue_close_delivers_tail() {
        let (tx, mut rx) = mpsc::channel(4);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut queue = CaptureQueue::<i16>::new(mono_i16(), 1024, tx, Arc::clone(&dropped));

        queue.push(&[7; 1500]);
        assert_eq!(rx.try_recv().unwrap().frame_count(), 1024);
        assert!(rx.try_recv().is_err(), "tail stays pending until close");

        queue.close();
        assert!(queue.is_closed());
        assert_eq!(rx.try_recv().unwrap().frame_count(), 476);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert_eq!(dropped.load(Ordering::Relaxed), 0);

        // Late callbacks after close go nowhere
        queue.push(&[1; 2048]);
        assert_eq!(dropped.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_capture_queue_counts_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut queue = CaptureQueue::<i16>::new(mono_i16(), 256, tx, Arc::clone(&dropped));

        queue.push(&[3; 256 * 3]);
        assert_eq!(dropped.load(Ordering::Relaxed), 2);

        queue.push(&[3; 100]);
        queue.close();
        assert_eq!(dropped.load(Ordering::Relaxed), 3, "tail is dropped too when full");
        assert_eq!(rx.try_recv().unwrap().frame_count(), 256);
    }
}
