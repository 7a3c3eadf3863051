//! Timestamp clocks
//!
//! Timestamps count samples, never wall time. The sender steps by a fixed
//! amount of 8 kHz reference ticks per frame; the receiver steps by what
//! the decoder actually produced and realigns when the transport session
//! reports a jump.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::constants::REFERENCE_CLOCK_RATE;
use crate::network::{Discontinuity, DiscontinuityHandler};

/// Wire timestamp increment for one frame of `frame_size` samples at `sample_rate`
pub fn ts_per_frame(frame_size: usize, sample_rate: u32) -> u32 {
    (frame_size as u64 * REFERENCE_CLOCK_RATE as u64 / sample_rate as u64) as u32
}

/// Signed distance from `from` to `to`, handling wraparound
pub fn ts_delta(from: u32, to: u32) -> i32 {
    to.wrapping_sub(from) as i32
}

/// Extends 32-bit timestamps into a 64-bit timeline that never wraps.
///
/// Each value is placed at the 64-bit position nearest the highest one seen
/// so far, counting a wrap cycle whenever the low 32 bits roll over. Values
/// must arrive within 2^31 ticks of that reference.
#[derive(Debug, Clone, Default)]
pub struct TimestampUnwrapper {
    /// Highest extended value seen
    highest: Option<i64>,
    /// Completed 2^32 cycles of `highest`
    cycles: i64,
}

impl TimestampUnwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extended value of `ts`
    pub fn extend(&mut self, ts: u32) -> i64 {
        let Some(highest) = self.highest else {
            self.highest = Some(ts as i64);
            return ts as i64;
        };

        let extended = highest + ts_delta(highest as u32, ts) as i64;
        if extended > highest {
            if (extended >> 32) > self.cycles {
                self.cycles = extended >> 32;
                tracing::debug!(ts, cycles = self.cycles, "Timestamp wrapped");
            }
            self.highest = Some(extended);
        }
        extended
    }

    /// Make `extended` the reference, even when it lies behind the highest value
    pub fn rebase(&mut self, extended: i64) {
        self.highest = Some(extended);
        self.cycles = extended >> 32;
    }

    /// Completed wrap cycles of the reference
    pub fn cycles(&self) -> i64 {
        self.cycles
    }
}

/// Sender-side timestamp
#[derive(Debug, Clone)]
pub struct SenderClock {
    current: u32,
    step: u32,
}

impl SenderClock {
    pub fn new(ts_per_frame: u32) -> Self {
        Self::starting_at(0, ts_per_frame)
    }

    pub fn starting_at(start: u32, ts_per_frame: u32) -> Self {
        Self {
            current: start,
            step: ts_per_frame,
        }
    }

    /// Timestamp for the next outgoing packet
    pub fn current(&self) -> u32 {
        self.current
    }

    /// Step one frame forward after a successful encode
    pub fn advance(&mut self) -> u32 {
        self.current = self.current.wrapping_add(self.step);
        self.current
    }

    /// Restart from zero (after the capture device was suspended)
    pub fn reset(&mut self) {
        self.current = 0;
    }
}

/// Receiver-side position in media samples
///
/// The position is what the receive loop asks the transport for next.
/// A discontinuity from the session only raises a flag; the worker
/// applies it at the start of its next cycle.
pub struct ReceiverClock {
    position: u32,
    resync_pending: Arc<AtomicBool>,
    resyncs: u64,
}

impl ReceiverClock {
    pub fn new() -> Self {
        Self {
            position: 0,
            resync_pending: Arc::new(AtomicBool::new(false)),
            resyncs: 0,
        }
    }

    /// Expected timestamp for the next receive
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Step by the number of sample-frames the decoder produced
    pub fn advance(&mut self, decoded_frames: usize) -> u32 {
        self.position = self.position.wrapping_add(decoded_frames as u32);
        self.position
    }

    /// Handler to register with the transport session.
    ///
    /// It may be called from any thread; it only sets a flag.
    pub fn discontinuity_handler(&self) -> DiscontinuityHandler {
        let pending = self.resync_pending.clone();
        Box::new(move |jump: Discontinuity| {
            tracing::debug!(
                expected = jump.expected,
                received = jump.received,
                "Timestamp jump reported"
            );
            pending.store(true, Ordering::Release);
        })
    }

    /// Consume a pending discontinuity, if any
    pub fn take_resync(&self) -> bool {
        self.resync_pending.swap(false, Ordering::AcqRel)
    }

    /// Align to the position reported by the transport session
    pub fn resync(&mut self, position: u32) {
        tracing::trace!(from = self.position, to = position, "|");
        self.position = position;
        self.resyncs += 1;
    }

    /// Number of resynchronizations applied
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }
}

impl Default for ReceiverClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ts_per_frame() {
        assert_eq!(ts_per_frame(960, 48000), 160);
        assert_eq!(ts_per_frame(480, 48000), 80);
        assert_eq!(ts_per_frame(160, 8000), 160);
        assert_eq!(ts_per_frame(320, 16000), 160);
    }

    #[test]
    fn test_sender_ten_cycles() {
        let mut clock = SenderClock::new(ts_per_frame(960, 48000));
        for _ in 0..10 {
            clock.advance();
        }
        assert_eq!(clock.current(), 1600);
    }

    #[test]
    fn test_sender_wraps() {
        let mut clock = SenderClock::starting_at(u32::MAX - 100, 160);
        assert_eq!(clock.advance(), 59);

        clock.reset();
        assert_eq!(clock.current(), 0);
    }

    #[test]
    fn test_ts_delta() {
        assert_eq!(ts_delta(1000, 1160), 160);
        assert_eq!(ts_delta(1160, 1000), -160);
        assert_eq!(ts_delta(u32::MAX - 9, 10), 20);
        assert_eq!(ts_delta(10, u32::MAX - 9), -20);
    }

    #[test]
    fn test_unwrapper_crosses_wrap() {
        let mut unwrap = TimestampUnwrapper::new();
        assert_eq!(unwrap.extend(u32::MAX - 159), u32::MAX as i64 - 159);
        assert_eq!(unwrap.extend(0), 1i64 << 32);
        assert_eq!(unwrap.extend(160), (1i64 << 32) + 160);
        assert_eq!(unwrap.cycles(), 1);

        // A late packet from before the wrap stays in the previous cycle
        assert_eq!(unwrap.extend(u32::MAX - 159), u32::MAX as i64 - 159);
        assert_eq!(unwrap.extend(320), (1i64 << 32) + 320);
    }

    #[test]
    fn test_unwrapper_past_signed_range() {
        let mut unwrap = TimestampUnwrapper::new();
        unwrap.extend(0);
        let half = 1u32 << 31;
        assert_eq!(unwrap.extend(half - 320), half as i64 - 320);
        assert_eq!(unwrap.extend(half + 160), half as i64 + 160);
        assert_eq!(unwrap.cycles(), 0);
    }

    #[test]
    fn test_unwrapper_rebase_backwards() {
        let mut unwrap = TimestampUnwrapper::new();
        unwrap.extend(1_000_000);
        unwrap.rebase(500);
        assert_eq!(unwrap.extend(660), 660);
        assert_eq!(unwrap.extend(820), 820);
    }

    #[test]
    fn test_receiver_advances_by_decoded() {
        let mut clock = ReceiverClock::new();
        for _ in 0..3 {
            clock.advance(960);
        }
        assert_eq!(clock.position(), 2880);
        clock.advance(480);
        assert_eq!(clock.position(), 3360);
    }

    #[test]
    fn test_discontinuity_handler_sets_flag() {
        let mut clock = ReceiverClock::new();
        let handler = clock.discontinuity_handler();

        assert!(!clock.take_resync());

        let remote = std::thread::spawn(move || {
            handler(Discontinuity {
                expected: 1000,
                received: 90000,
            })
        });
        remote.join().unwrap();

        assert!(clock.take_resync());
        assert!(!clock.take_resync());

        clock.resync(5000);
        assert_eq!(clock.position(), 5000);
        assert_eq!(clock.resyncs(), 1);
    }
}
