//! Device recovery policy
//!
//! One [`RecoveryPolicy`] per stream direction classifies every device
//! read/write result:
//!
//! - full cycle: back to `Normal`
//! - short cycle: counted, the caller drops or pads the data
//! - xrun / suspend: `Recovering`, the device's recovery primitive runs once
//! - anything else, or a failed recovery: fatal for this direction
//!
//! Ring over/underflow never reaches this layer; the ring handles it in
//! place and only counts it.

use std::sync::Arc;

use crate::audio::{Direction, Recoverable};
use crate::error::AudioError;
use crate::stats::StreamStats;

/// Recovery state of one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Normal,
    Recovering,
}

/// What the caller should do with the current cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// All requested frames moved
    Full,
    /// Only this many frames moved
    Short(usize),
    /// The device was reset; the cycle's data is gone
    Recovered { suspended: bool },
}

pub struct RecoveryPolicy {
    direction: Direction,
    state: RecoveryState,
    stats: Arc<StreamStats>,
}

impl RecoveryPolicy {
    pub fn new(direction: Direction, stats: Arc<StreamStats>) -> Self {
        Self {
            direction,
            state: RecoveryState::Normal,
            stats,
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// Classify `result` of a device call that asked for `requested` frames.
    ///
    /// Only unrecoverable errors are returned.
    pub fn handle<D: Recoverable + ?Sized>(
        &mut self,
        device: &mut D,
        result: Result<usize, AudioError>,
        requested: usize,
    ) -> Result<Cycle, AudioError> {
        match result {
            Ok(frames) if frames >= requested => {
                if self.state == RecoveryState::Recovering {
                    tracing::debug!("{} back to normal", self.direction);
                }
                self.state = RecoveryState::Normal;
                Ok(Cycle::Full)
            }
            Ok(frames) => {
                StreamStats::incr(&self.stats.short_cycles);
                tracing::trace!(frames, requested, "Short {} cycle", self.direction);
                Ok(Cycle::Short(frames))
            }
            Err(err) if err.is_recoverable() => {
                StreamStats::incr(&self.stats.xruns);
                self.state = RecoveryState::Recovering;
                tracing::debug!(error = %err, "{} xrun, recovering", self.direction);

                match device.recover() {
                    Ok(()) => {
                        StreamStats::incr(&self.stats.recoveries);
                        Ok(Cycle::Recovered {
                            suspended: matches!(err, AudioError::Suspended),
                        })
                    }
                    Err(e) => {
                        tracing::error!("{} recovery failed: {}", self.direction, e);
                        Err(match e {
                            AudioError::RecoveryFailed(_) => e,
                            other => AudioError::RecoveryFailed(other.to_string()),
                        })
                    }
                }
            }
            Err(err) => {
                tracing::error!("{} device failed: {}", self.direction, err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeCapture;

    fn policy() -> (RecoveryPolicy, Arc<StreamStats>) {
        let stats = StreamStats::new();
        (RecoveryPolicy::new(Direction::Capture, stats.clone()), stats)
    }

    #[test]
    fn test_full_cycle() {
        let (mut policy, _) = policy();
        let mut device = FakeCapture::silent(1);
        assert_eq!(policy.handle(&mut device, Ok(960), 960).unwrap(), Cycle::Full);
        assert_eq!(policy.state(), RecoveryState::Normal);
        assert_eq!(device.recover_calls, 0);
    }

    #[test]
    fn test_short_cycle_is_not_fatal() {
        let (mut policy, stats) = policy();
        let mut device = FakeCapture::silent(1);
        assert_eq!(policy.handle(&mut device, Ok(100), 960).unwrap(), Cycle::Short(100));
        assert_eq!(stats.snapshot(None).short_cycles, 1);
        assert_eq!(device.recover_calls, 0);
    }

    #[test]
    fn test_xrun_recovers_then_normal() {
        let (mut policy, stats) = policy();
        let mut device = FakeCapture::silent(1);

        let cycle = policy.handle(&mut device, Err(AudioError::Xrun), 960).unwrap();
        assert_eq!(cycle, Cycle::Recovered { suspended: false });
        assert_eq!(policy.state(), RecoveryState::Recovering);
        assert_eq!(device.recover_calls, 1);

        policy.handle(&mut device, Ok(960), 960).unwrap();
        assert_eq!(policy.state(), RecoveryState::Normal);

        let snap = stats.snapshot(None);
        assert_eq!(snap.xruns, 1);
        assert_eq!(snap.recoveries, 1);
    }

    #[test]
    fn test_suspend_is_flagged() {
        let (mut policy, _) = policy();
        let mut device = FakeCapture::silent(1);
        let cycle = policy.handle(&mut device, Err(AudioError::Suspended), 960).unwrap();
        assert_eq!(cycle, Cycle::Recovered { suspended: true });
    }

    #[test]
    fn test_failed_recovery_is_fatal() {
        let (mut policy, stats) = policy();
        let mut device = FakeCapture::silent(1);
        device.fail_recovery = true;

        let result = policy.handle(&mut device, Err(AudioError::Xrun), 960);
        assert!(matches!(result, Err(AudioError::RecoveryFailed(_))));
        assert_eq!(stats.snapshot(None).recoveries, 0);
    }

    #[test]
    fn test_disconnect_is_fatal_without_recovery() {
        let (mut policy, _) = policy();
        let mut device = FakeCapture::silent(1);
        let result = policy.handle(&mut device, Err(AudioError::Disconnected), 960);
        assert!(matches!(result, Err(AudioError::Disconnected)));
        assert_eq!(device.recover_calls, 0);
    }

    #[test]
    fn test_recover_on_healthy_device_is_noop() {
        use crate::audio::CaptureDevice;

        let mut device = FakeCapture::silent(1);
        assert!(device.recover().is_ok());
        assert!(device.recover().is_ok());

        let mut frame = [1i16; 960];
        assert_eq!(device.read(&mut frame).unwrap(), 960);
    }
}
