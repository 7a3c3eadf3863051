//! Audio playback to output devices
//!
//! Mirror image of capture: the worker pushes decoded frames into the ring,
//! the cpal callback drains it and pads any shortfall with silence.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::buffer::{frame_ring, FrameProducer, RingStats};
use super::device::{
    classify_stream_error, find_device, stream_config, PlaybackDevice, Recoverable, StreamHealth,
};
use super::{Direction, PcmSample};
use crate::config::StreamParams;
use crate::error::AudioError;

/// Shortest time the worker waits for ring space before reporting a short write
const MIN_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// Playback stream fed by the receive path
pub struct PlaybackStream<S: PcmSample> {
    /// Worker side of the ring; the callback owns the consumer
    producer: FrameProducer<S>,

    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    health: StreamHealth,

    /// Frames taken from the ring by the callback (excluding padding)
    frames_played: Arc<AtomicU64>,

    /// Set by the worker to make the callback drop whatever is queued
    flush_request: Arc<AtomicBool>,

    channels: u16,
    write_timeout: Duration,
    poll_interval: Duration,
}

impl<S: PcmSample> PlaybackStream<S> {
    /// Open and start playback on `device_id` (or the default output device)
    pub fn open(device_id: Option<&str>, params: &StreamParams) -> Result<Self, AudioError> {
        let device = find_device(Direction::Playback, device_id)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let config = stream_config(params.sample_rate, params.channels);

        let (producer, mut consumer) = frame_ring::<S>(params.ring_frames, params.channels);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running = Arc::new(AtomicBool::new(true));
        let running_for_callback = running.clone();
        let running_for_loop = running.clone();
        let frames_played = Arc::new(AtomicU64::new(0));
        let frames_for_callback = frames_played.clone();
        let flush_request = Arc::new(AtomicBool::new(false));
        let flush_for_callback = flush_request.clone();

        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [S], _: &cpal::OutputCallbackInfo| {
                        if !running_for_callback.load(Ordering::Relaxed) {
                            data.fill(S::silence());
                            return;
                        }
                        if flush_for_callback.swap(false, Ordering::AcqRel) {
                            consumer.flush();
                        }
                        let produced = consumer.read(data);
                        frames_for_callback.fetch_add(produced as u64, Ordering::Relaxed);
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
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("playback thread exited".to_string())));
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
            "Playback stream started"
        );

        let frame_duration = params.frame_duration();
        Ok(Self {
            producer,
            running,
            thread_handle: Some(handle),
            health: StreamHealth::new(Direction::Playback, error_rx),
            frames_played,
            flush_request,
            channels: params.channels,
            write_timeout: (frame_duration * 4).max(MIN_WRITE_TIMEOUT),
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

    /// Check if playback is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self
                .thread_handle
                .as_ref()
                .map(|h| !h.is_finished())
                .unwrap_or(false)
    }

    /// Frames handed to the device since open
    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }

    /// Ring over/underflow counters
    pub fn ring_stats(&self) -> Arc<RingStats> {
        self.producer.stats()
    }
}

impl<S: PcmSample> PlaybackDevice<S> for PlaybackStream<S> {
    fn write(&mut self, buf: &[S]) -> Result<usize, AudioError> {
        let channels = self.channels as usize;
        let wanted = buf.len() / channels;
        let deadline = Instant::now() + self.write_timeout;

        loop {
            self.health.check()?;
            if self.producer.available_to_write() >= wanted {
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

        let room = wanted.min(self.producer.available_to_write());
        Ok(self.producer.write(&buf[..room * channels]))
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

impl<S: PcmSample> Recoverable for PlaybackStream<S> {
    fn recover(&mut self) -> Result<(), AudioError> {
        let running = self.is_running();
        if self.health.recover(running)? {
            // The consumer half belongs to the callback, so the flush happens there
            self.flush_request.store(true, Ordering::Release);
            tracing::debug!("Playback stream recovered");
        }
        Ok(())
    }
}

impl<S: PcmSample> Drop for PlaybackStream<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
