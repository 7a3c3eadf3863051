//! Lock-free ring buffer for PCM frames
//!
//! Single-producer single-consumer ring of interleaved samples shared by the
//! hardware callback and the worker loop. Storage is allocated once by
//! [`frame_ring`]; afterwards both halves only move atomic cursors and copy
//! whole sample-frames, so a reader never observes half of a frame.
//!
//! Overflow drops the newest frames (the write is truncated), underflow
//! zero-fills the reader's buffer. Neither side ever waits.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::PcmSample;

/// Over/underflow counters shared by both halves of a ring
#[derive(Debug, Default)]
pub struct RingStats {
    overflows: AtomicU64,
    dropped_frames: AtomicU64,
    underflows: AtomicU64,
    padded_frames: AtomicU64,
}

impl RingStats {
    /// Number of writes that could not be stored completely
    pub fn overflow_count(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Frames discarded by truncated writes
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Number of reads that had to be zero-padded
    pub fn underflow_count(&self) -> u64 {
        self.underflows.load(Ordering::Relaxed)
    }

    /// Frames of silence inserted by padded reads
    pub fn padded_frames(&self) -> u64 {
        self.padded_frames.load(Ordering::Relaxed)
    }
}

/// Create a ring holding `capacity_frames` frames of `channels` samples each.
///
/// # Panics
/// Panics if either argument is zero; both come from validated configuration.
pub fn frame_ring<S: PcmSample>(
    capacity_frames: usize,
    channels: u16,
) -> (FrameProducer<S>, FrameConsumer<S>) {
    assert!(capacity_frames > 0, "ring capacity must be non-zero");
    assert!(channels > 0, "channel count must be non-zero");

    let channels = channels as usize;
    let (prod, cons) = HeapRb::<S>::new(capacity_frames * channels).split();
    let stats = Arc::new(RingStats::default());

    (
        FrameProducer {
            inner: prod,
            channels,
            capacity: capacity_frames,
            stats: stats.clone(),
        },
        FrameConsumer {
            inner: cons,
            channels,
            capacity: capacity_frames,
            stats,
        },
    )
}

/// Writing half, owned by exactly one thread
pub struct FrameProducer<S: PcmSample> {
    inner: HeapProd<S>,
    channels: usize,
    capacity: usize,
    stats: Arc<RingStats>,
}

impl<S: PcmSample> FrameProducer<S> {
    /// Append whole frames from `samples`, returning the number of frames accepted.
    ///
    /// A trailing partial frame is ignored. When the ring lacks room the
    /// newest frames are dropped and the overflow counter is bumped once.
    pub fn write(&mut self, samples: &[S]) -> usize {
        let requested = samples.len() / self.channels;
        let accepted = requested.min(self.available_to_write());

        if accepted > 0 {
            // One push publishes the write cursor once for the whole batch
            self.inner.push_slice(&samples[..accepted * self.channels]);
        }

        if accepted < requested {
            self.stats.overflows.fetch_add(1, Ordering::Relaxed);
            self.stats
                .dropped_frames
                .fetch_add((requested - accepted) as u64, Ordering::Relaxed);
        }

        accepted
    }

    /// Frames that can be written without truncation
    pub fn available_to_write(&self) -> usize {
        self.inner.vacant_len() / self.channels
    }

    /// Capacity in frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples per frame
    pub fn channels(&self) -> u16 {
        self.channels as u16
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<RingStats> {
        self.stats.clone()
    }
}

/// Reading half, owned by exactly one thread
pub struct FrameConsumer<S: PcmSample> {
    inner: HeapCons<S>,
    channels: usize,
    capacity: usize,
    stats: Arc<RingStats>,
}

impl<S: PcmSample> FrameConsumer<S> {
    /// Fill `out` with whole frames, returning how many came from the ring.
    ///
    /// Any deficit is padded with silence and counted as an underflow.
    pub fn read(&mut self, out: &mut [S]) -> usize {
        let requested = out.len() / self.channels;
        let produced = requested.min(self.available_to_read());
        let filled = produced * self.channels;

        if filled > 0 {
            self.inner.pop_slice(&mut out[..filled]);
        }

        if produced < requested {
            out[filled..requested * self.channels].fill(S::silence());
            self.stats.underflows.fetch_add(1, Ordering::Relaxed);
            self.stats
                .padded_frames
                .fetch_add((requested - produced) as u64, Ordering::Relaxed);
        }

        produced
    }

    /// Frames ready to be read
    pub fn available_to_read(&self) -> usize {
        self.inner.occupied_len() / self.channels
    }

    /// Drop everything currently buffered, returning the number of frames discarded
    pub fn flush(&mut self) -> usize {
        let frames = self.available_to_read();
        self.inner.skip(frames * self.channels);
        frames
    }

    /// Capacity in frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples per frame
    pub fn channels(&self) -> u16 {
        self.channels as u16
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<RingStats> {
        self.stats.clone()
    }
}
