//! Receive path
//!
//! One cycle: apply any pending resync, ask the transport for the packet
//! due at the clock position, decode it (or conceal when nothing has
//! arrived), write the result to the playback device and advance the
//! clock by what the decoder produced.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{Received, TransportReceiver};
use crate::audio::{Direction, PcmSample, PlaybackDevice, RingStats};
use crate::clock::ReceiverClock;
use crate::codec::{AudioDecoder, FrameDecoder};
use crate::constants::MAX_PACKET_SIZE;
use crate::error::Result;
use crate::recovery::{Cycle, RecoveryPolicy};
use crate::stats::{StatsReporter, StreamStats};

/// Receive → decode → playback loop
pub struct AudioReceiver<S: PcmSample, D: AudioDecoder<S>> {
    decoder: FrameDecoder<S, D>,
    policy: RecoveryPolicy,
    stats: Arc<StreamStats>,
    ring_stats: Option<Arc<RingStats>>,
    /// Payload buffer (reused to avoid allocations)
    packet: Vec<u8>,
}

impl<S: PcmSample, D: AudioDecoder<S>> AudioReceiver<S, D> {
    pub fn new(decoder: FrameDecoder<S, D>, stats: Arc<StreamStats>) -> Self {
        Self {
            decoder,
            policy: RecoveryPolicy::new(Direction::Playback, stats.clone()),
            stats,
            ring_stats: None,
            packet: vec![0u8; MAX_PACKET_SIZE],
        }
    }

    /// Include the playback ring's counters in periodic reports
    pub fn with_ring_stats(mut self, ring_stats: Arc<RingStats>) -> Self {
        self.ring_stats = Some(ring_stats);
        self
    }

    pub fn stats(&self) -> &Arc<StreamStats> {
        &self.stats
    }

    /// Run one receive/decode/playback cycle, returning the frames decoded.
    ///
    /// Missing or undecodable packets are concealed; transport errors are
    /// counted and treated as nothing received. Only failed device recovery
    /// and failed concealment are fatal.
    pub fn receive_one_frame<P, T>(
        &mut self,
        device: &mut P,
        clock: &mut ReceiverClock,
        transport: &mut T,
    ) -> Result<usize>
    where
        P: PlaybackDevice<S> + ?Sized,
        T: TransportReceiver + ?Sized,
    {
        if clock.take_resync() {
            let position = transport.resync();
            clock.resync(position);
            // Predictor state belongs to the old stream
            self.decoder.reset()?;
            StreamStats::incr(&self.stats.discontinuities);
        }

        let expected = clock.position();
        let received = match transport.receive(expected, &mut self.packet) {
            Ok(received) => received,
            Err(e) => {
                StreamStats::incr(&self.stats.receive_errors);
                tracing::debug!(expected, "Receive failed: {}", e);
                Received::nothing()
            }
        };

        let packet = if received.is_empty() {
            None
        } else {
            StreamStats::incr(&self.stats.packets_received);
            StreamStats::add(&self.stats.bytes_received, received.len as u64);
            if received.more {
                tracing::debug!(expected, len = received.len, "Payload truncated");
            }
            Some(&self.packet[..received.len])
        };

        let before = self.decoder.stats();
        let channels = self.decoder.channels() as usize;

        let pcm = self.decoder.decode(packet)?;
        let decoded = pcm.len() / channels;
        let write = device.write(pcm);

        let after = self.decoder.stats();
        let concealed = after.frames_concealed - before.frames_concealed;
        StreamStats::add(&self.stats.frames_concealed, concealed);
        StreamStats::add(&self.stats.decode_errors, after.decode_errors - before.decode_errors);
        if concealed > 0 {
            tracing::trace!(expected, "#");
        } else {
            tracing::trace!(expected, len = received.len, ".");
        }

        let cycle = self.policy.handle(device, write, decoded);
        clock.advance(decoded);

        match cycle? {
            Cycle::Full => StreamStats::add(&self.stats.frames_played, decoded as u64),
            Cycle::Short(frames) => StreamStats::add(&self.stats.frames_played, frames as u64),
            Cycle::Recovered { .. } => {}
        }

        Ok(decoded)
    }

    /// Cycle until `shutdown` is set or a fatal error occurs
    pub fn run<P, T>(
        &mut self,
        device: &mut P,
        clock: &mut ReceiverClock,
        transport: &mut T,
        shutdown: &AtomicBool,
        reporter: &mut StatsReporter,
    ) -> Result<()>
    where
        P: PlaybackDevice<S> + ?Sized,
        T: TransportReceiver + ?Sized,
    {
        tracing::info!(frame_size = self.decoder.frame_size(), "Receive loop running");

        while !shutdown.load(Ordering::Relaxed) {
            self.receive_one_frame(device, clock, transport)?;

            let stats = &self.stats;
            let ring = self.ring_stats.as_deref();
            reporter.maybe_report("rx", || stats.snapshot(ring));
        }

        let decoder = self.decoder.stats();
        tracing::info!(
            "Receive loop stopped: {} decoded, {} concealed ({:.1}% loss), {} resyncs",
            decoder.frames_decoded,
            decoder.frames_concealed,
            decoder.loss_rate * 100.0,
            clock.resyncs()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamParams;
    use crate::error::{AudioError, Error};
    use crate::test_support::{FakeDecoder, FakePlayback, FakeReceiver, Incoming, Step};

    fn receiver() -> AudioReceiver<i16, FakeDecoder> {
        receiver_with(FakeDecoder::new(960, 1))
    }

    fn receiver_with(codec: FakeDecoder) -> AudioReceiver<i16, FakeDecoder> {
        let params = StreamParams::new(48000, 1, 960, 64, 16).unwrap();
        let decoder = FrameDecoder::<i16, _>::new(codec, &params).unwrap();
        AudioReceiver::new(decoder, StreamStats::new())
    }

    #[test]
    fn test_three_missing_packets_conceal_full_frames() {
        let mut receiver = receiver();
        let mut device = FakePlayback::new(1);
        let mut clock = ReceiverClock::new();
        let mut transport = FakeReceiver::new([Incoming::Nothing, Incoming::Nothing, Incoming::Nothing], None);

        for _ in 0..3 {
            assert_eq!(
                receiver.receive_one_frame(&mut device, &mut clock, &mut transport).unwrap(),
                960
            );
        }

        assert_eq!(clock.position(), 3 * 960);
        assert_eq!(transport.expected, vec![0, 960, 1920]);
        assert_eq!(device.written.len(), 3 * 960);
        assert!(device.written.iter().all(|&s| s == -1));

        let snap = receiver.stats().snapshot(None);
        assert_eq!(snap.frames_concealed, 3);
        assert_eq!(snap.frames_played, 3 * 960);
    }

    #[test]
    fn test_packets_decoded_in_order() {
        let mut receiver = receiver();
        let mut device = FakePlayback::new(1);
        let mut clock = ReceiverClock::new();
        let mut transport = FakeReceiver::new(
            [
                Incoming::Packet(vec![0, 5]),
                Incoming::Nothing,
                Incoming::Packet(vec![0, 7]),
            ],
            None,
        );

        for _ in 0..3 {
            receiver.receive_one_frame(&mut device, &mut clock, &mut transport).unwrap();
        }

        assert_eq!(device.written[0], 5);
        assert_eq!(device.written[960], -1);
        assert_eq!(device.written[1920], 7);

        let snap = receiver.stats().snapshot(None);
        assert_eq!(snap.packets_received, 2);
        assert_eq!(snap.frames_concealed, 1);
    }

    #[test]
    fn test_corrupt_packet_concealed() {
        let mut receiver = receiver();
        let mut device = FakePlayback::new(1);
        let mut clock = ReceiverClock::new();
        let mut transport = FakeReceiver::new([Incoming::Packet(vec![1])], None);

        assert_eq!(
            receiver.receive_one_frame(&mut device, &mut clock, &mut transport).unwrap(),
            960
        );
        let snap = receiver.stats().snapshot(None);
        assert_eq!(snap.decode_errors, 1);
        assert_eq!(snap.frames_concealed, 1);
    }

    #[test]
    fn test_transport_error_is_not_fatal() {
        let mut receiver = receiver();
        let mut device = FakePlayback::new(1);
        let mut clock = ReceiverClock::new();
        let mut transport = FakeReceiver::new([Incoming::Fail], None);

        receiver.receive_one_frame(&mut device, &mut clock, &mut transport).unwrap();
        let snap = receiver.stats().snapshot(None);
        assert_eq!(snap.receive_errors, 1);
        assert_eq!(snap.frames_concealed, 1);
    }

    #[test]
    fn test_discontinuity_resyncs_next_cycle() {
        let codec = FakeDecoder::new(960, 1);
        let resets = codec.resets.clone();
        let mut receiver = receiver_with(codec);
        let mut device = FakePlayback::new(1);
        let mut clock = ReceiverClock::new();
        let handler = clock.discontinuity_handler();
        let mut transport = FakeReceiver::new(
            [Incoming::Nothing, Incoming::Jump, Incoming::Nothing],
            Some(handler),
        );
        transport.resync_to = 50_000;

        for _ in 0..3 {
            receiver.receive_one_frame(&mut device, &mut clock, &mut transport).unwrap();
        }

        assert_eq!(transport.resync_calls, 1);
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert_eq!(transport.expected, vec![0, 960, 50_000]);
        assert_eq!(clock.position(), 50_960);
        assert_eq!(receiver.stats().snapshot(None).discontinuities, 1);
    }

    #[test]
    fn test_xrun_recovered_and_clock_advances() {
        let mut receiver = receiver();
        let mut device = FakePlayback::scripted(1, [Step::Fail(AudioError::Xrun), Step::Short(100)]);
        let mut clock = ReceiverClock::new();
        let mut transport = FakeReceiver::new([], None);

        receiver.receive_one_frame(&mut device, &mut clock, &mut transport).unwrap();
        assert_eq!(device.recover_calls, 1);
        assert_eq!(clock.position(), 960);

        receiver.receive_one_frame(&mut device, &mut clock, &mut transport).unwrap();
        assert_eq!(clock.position(), 1920);

        let snap = receiver.stats().snapshot(None);
        assert_eq!(snap.xruns, 1);
        assert_eq!(snap.short_cycles, 1);
        assert_eq!(snap.frames_played, 100);
    }

    #[test]
    fn test_failed_recovery_is_fatal() {
        let mut receiver = receiver();
        let mut device = FakePlayback::scripted(1, [Step::Fail(AudioError::Xrun)]);
        device.fail_recovery = true;
        let mut clock = ReceiverClock::new();
        let mut transport = FakeReceiver::new([], None);

        let result = receiver.receive_one_frame(&mut device, &mut clock, &mut transport);
        assert!(matches!(
            result,
            Err(Error::Audio(AudioError::RecoveryFailed(_)))
        ));
    }
}
