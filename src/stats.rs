//! Stream statistics
//!
//! Counters are plain atomics so the worker, the binaries and tests can
//! read them without coordination. Nothing here feeds back into control
//! flow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::RingStats;

/// Counters for one stream direction
#[derive(Debug, Default)]
pub struct StreamStats {
    /// Full frames taken from the capture device
    pub frames_captured: AtomicU64,
    /// Frames handed to the playback device
    pub frames_played: AtomicU64,
    pub packets_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub send_errors: AtomicU64,
    /// Capture cycles dropped because the read came back short
    pub encode_skips: AtomicU64,
    pub packets_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub receive_errors: AtomicU64,
    /// Frames synthesized by loss concealment
    pub frames_concealed: AtomicU64,
    pub decode_errors: AtomicU64,
    pub xruns: AtomicU64,
    pub recoveries: AtomicU64,
    /// Device reads/writes that moved fewer frames than asked
    pub short_cycles: AtomicU64,
    pub discontinuities: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`] plus ring counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub frames_played: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
    pub encode_skips: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub receive_errors: u64,
    pub frames_concealed: u64,
    pub decode_errors: u64,
    pub xruns: u64,
    pub recoveries: u64,
    pub short_cycles: u64,
    pub discontinuities: u64,
    pub ring_overflows: u64,
    pub ring_underflows: u64,
}

impl StreamStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    /// Copy all counters; `ring` adds the device ring's over/underflows
    pub fn snapshot(&self, ring: Option<&RingStats>) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_captured: load(&self.frames_captured),
            frames_played: load(&self.frames_played),
            packets_sent: load(&self.packets_sent),
            bytes_sent: load(&self.bytes_sent),
            send_errors: load(&self.send_errors),
            encode_skips: load(&self.encode_skips),
            packets_received: load(&self.packets_received),
            bytes_received: load(&self.bytes_received),
            receive_errors: load(&self.receive_errors),
            frames_concealed: load(&self.frames_concealed),
            decode_errors: load(&self.decode_errors),
            xruns: load(&self.xruns),
            recoveries: load(&self.recoveries),
            short_cycles: load(&self.short_cycles),
            discontinuities: load(&self.discontinuities),
            ring_overflows: ring.map(|r| r.overflow_count()).unwrap_or(0),
            ring_underflows: ring.map(|r| r.underflow_count()).unwrap_or(0),
        }
    }
}

/// Emits aggregate statistics at a fixed interval
pub struct StatsReporter {
    interval: Duration,
    last: Instant,
    previous: StatsSnapshot,
}

impl StatsReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
            previous: StatsSnapshot::default(),
        }
    }

    /// Log a summary when the interval has elapsed; returns whether it did
    pub fn maybe_report(&mut self, label: &str, snapshot: impl FnOnce() -> StatsSnapshot) -> bool {
        if self.interval.is_zero() || self.last.elapsed() < self.interval {
            return false;
        }

        let now = snapshot();
        let secs = self.last.elapsed().as_secs_f64();
        let sent = now.packets_sent - self.previous.packets_sent;
        let received = now.packets_received - self.previous.packets_received;
        let kbps = ((now.bytes_sent - self.previous.bytes_sent)
            + (now.bytes_received - self.previous.bytes_received)) as f64
            * 8.0
            / 1000.0
            / secs;

        tracing::info!(
            "{}: {} sent, {} received, {} concealed, {} xruns, {:.1} kbit/s",
            label,
            sent,
            received,
            now.frames_concealed - self.previous.frames_concealed,
            now.xruns - self.previous.xruns,
            kbps
        );

        self.previous = now;
        self.last = Instant::now();
        true
    }
}
