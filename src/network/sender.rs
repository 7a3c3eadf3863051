//! Send path
//!
//! One cycle: read a full frame from the capture device, encode it, stamp
//! it with the sender clock and hand it to the transport. Short reads skip
//! the cycle entirely; partial frames are never encoded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::TransportSender;
use crate::audio::{CaptureDevice, Direction, PcmSample, RingStats};
use crate::clock::SenderClock;
use crate::codec::{AudioEncoder, FrameEncoder};
use crate::config::StreamParams;
use crate::error::Result;
use crate::recovery::{Cycle, RecoveryPolicy};
use crate::stats::{StatsReporter, StreamStats};

/// Capture → encode → send loop
pub struct AudioSender<S: PcmSample, E: AudioEncoder<S>> {
    encoder: FrameEncoder<S, E>,
    policy: RecoveryPolicy,
    stats: Arc<StreamStats>,
    ring_stats: Option<Arc<RingStats>>,
    /// Capture buffer for one frame (reused to avoid allocations)
    frame: Vec<S>,
}

impl<S: PcmSample, E: AudioEncoder<S>> AudioSender<S, E> {
    pub fn new(encoder: FrameEncoder<S, E>, params: &StreamParams, stats: Arc<StreamStats>) -> Self {
        Self {
            encoder,
            policy: RecoveryPolicy::new(Direction::Capture, stats.clone()),
            stats,
            ring_stats: None,
            frame: vec![S::silence(); params.samples_per_frame()],
        }
    }

    /// Include the capture ring's counters in periodic reports
    pub fn with_ring_stats(mut self, ring_stats: Arc<RingStats>) -> Self {
        self.ring_stats = Some(ring_stats);
        self
    }

    pub fn stats(&self) -> &Arc<StreamStats> {
        &self.stats
    }

    /// Run one capture/encode/send cycle.
    ///
    /// Send failures are counted and the timestamp still advances.
    /// Encoder failures and failed device recovery are fatal.
    pub fn send_one_frame<C, T>(
        &mut self,
        device: &mut C,
        clock: &mut SenderClock,
        transport: &mut T,
    ) -> Result<Cycle>
    where
        C: CaptureDevice<S> + ?Sized,
        T: TransportSender + ?Sized,
    {
        let requested = self.encoder.frame_size();
        let result = device.read(&mut self.frame);

        match self.policy.handle(device, result, requested)? {
            Cycle::Full => {}
            Cycle::Short(frames) => {
                StreamStats::incr(&self.stats.encode_skips);
                return Ok(Cycle::Short(frames));
            }
            Cycle::Recovered { suspended } => {
                if suspended {
                    // A resumed device restarts its sample clock
                    clock.reset();
                }
                return Ok(Cycle::Recovered { suspended });
            }
        }

        StreamStats::incr(&self.stats.frames_captured);

        let timestamp = clock.current();
        let packet = self.encoder.encode(&self.frame)?;

        match transport.send(packet, timestamp) {
            Ok(()) => {
                StreamStats::incr(&self.stats.packets_sent);
                StreamStats::add(&self.stats.bytes_sent, packet.len() as u64);
                tracing::trace!(timestamp, len = packet.len(), ">");
            }
            Err(e) => {
                StreamStats::incr(&self.stats.send_errors);
                tracing::debug!(timestamp, "Send failed: {}", e);
            }
        }

        clock.advance();
        Ok(Cycle::Full)
    }

    /// Cycle until `shutdown` is set or a fatal error occurs
    pub fn run<C, T>(
        &mut self,
        device: &mut C,
        clock: &mut SenderClock,
        transport: &mut T,
        shutdown: &AtomicBool,
        reporter: &mut StatsReporter,
    ) -> Result<()>
    where
        C: CaptureDevice<S> + ?Sized,
        T: TransportSender + ?Sized,
    {
        tracing::info!(
            frame_size = self.encoder.frame_size(),
            budget = self.encoder.bytes_per_frame(),
            "Send loop running"
        );

        while !shutdown.load(Ordering::Relaxed) {
            self.send_one_frame(device, clock, transport)?;

            let stats = &self.stats;
            let ring = self.ring_stats.as_deref();
            reporter.maybe_report("tx", || stats.snapshot(ring));
        }

        let encoder = self.encoder.stats();
        tracing::info!(
            "Send loop stopped: {} frames encoded, avg {:.0} bytes",
            encoder.frames_encoded,
            encoder.average_frame_size
        );
        Ok(())
    }
}
