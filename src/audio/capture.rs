//! Audio capture from input devices
//!
//! The cpal stream lives on its own thread because cpal streams are not
//! `Send`. Its callback pushes whole frames into the ring producer; the
//! worker pulls fixed-size frames through [`CaptureDevice::read`].

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::buffer::{frame_ring, FrameConsumer, RingStats};
use super::device::{
    classify_stream_error, find_device, stream_config, CaptureDevice, Recoverable, StreamHealth,
};
use super::{Direction, PcmSample};
use crate::config::StreamParams;
use crate::error::AudioError;

/// Shortest time the worker waits for a full frame before reporting a short read
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Capture stream feeding the send path
pub struct CaptureStream<S: PcmSample> {
    /// Worker side of the ring; the callback owns the producer
    consumer: FrameConsumer<S>,

    /// Whether the stream thread should keep running
    running: Arc<AtomicBool>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Errors reported by the cpal error callback
    health: StreamHealth,

    /// Frames accepted into the ring by the callback
    frames_captured: Arc<AtomicU64>,

    channels: u16,
    read_timeout: Duration,
    poll_interval: Duration,
}

impl<S: PcmSample> CaptureStream<S> {
    /// Open and start capturing from `device_id` (or the default input device)
    pub fn open(device_id: Option<&str>, params: &StreamParams) -> Result<Self, AudioError> {
        let device = find_device(Direction::Capture, device_id)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let config = stream_config(params.sample_rate, params.channels);

        let (mut producer, consumer) = frame_ring::<S>(params.ring_frames, params.channels);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running = Arc::new(AtomicBool::new(true));
        let running_for_callback = running.clone();
        let running_for_loop = running.clone();
        let frames_captured = Arc::new(AtomicU64::new(0));
        let frames_for_callback = frames_captured.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let stream = device.build_input_stream(
                    &config,
                    move |data: &[S], _: &cpal::InputCallbackInfo| {
                        if !running_for_callback.load(Ordering::Relaxed) {
                            return;
                        }
                        let accepted = producer.write(data);
                        frames_for_callback.fetch_add(accepted as u64, Ordering::Relaxed);
                    },
                    move |err| {
                        let _ = error_tx.try_send(classify_stream_error(&err));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, stopping capture
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("capture thread exited".to_string())));
        if let Err(e) = started {
            running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        tracing::info!(
            device = %name,
            sample_rate = params.sample_rate,
            channels = params.channels,
            ring_frames = params.ring_frames,
            "Capture stream started"
        );

        let frame_duration = params.frame_duration();
        Ok(Self {
            consumer,
            running,
            thread_handle: Some(handle),
            health: StreamHealth::new(Direction::Capture, error_rx),
            frames_captured,
            channels: params.channels,
            read_timeout: (frame_duration * 4).max(MIN_READ_TIMEOUT),
            poll_interval: (frame_duration / 4).max(Duration::from_micros(250)),
        })
    }

    /// Stop the stream and join its thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    /// Check if capture is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self
                .thread_handle
                .as_ref()
                .map(|h| !h.is_finished())
                .unwrap_or(false)
    }

    /// Frames accepted into the ring since open
    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    /// Ring over/underflow counters
    pub fn ring_stats(&self) -> Arc<RingStats> {
        self.consumer.stats()
    }
}

impl<S: PcmSample> CaptureDevice<S> for CaptureStream<S> {
    fn read(&mut self, buf: &mut [S]) -> Result<usize, AudioError> {
        let channels = self.channels as usize;
        let wanted = buf.len() / channels;
        let deadline = Instant::now() + self.read_timeout;

        loop {
            self.health.check()?;
            if self.consumer.available_to_read() >= wanted {
                break;
            }
            if !self.is_running() {
                return Err(AudioError::Disconnected);
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(self.poll_interval);
        }

        let ready = wanted.min(self.consumer.available_to_read());
        Ok(self.consumer.read(&mut buf[..ready * channels]))
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

impl<S: PcmSample> Recoverable for CaptureStream<S> {
    fn recover(&mut self) -> Result<(), AudioError> {
        let running = self.is_running();
        if self.health.recover(running)? {
            let flushed = self.consumer.flush();
            tracing::debug!(flushed, "Capture stream recovered");
        }
        Ok(())
    }
}

impl<S: PcmSample> Drop for CaptureStream<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
