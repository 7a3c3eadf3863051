//! Audio device abstraction and cpal device lookup
//!
//! The worker loop only sees [`CaptureDevice`] and [`PlaybackDevice`]; the
//! cpal-backed implementations live in `capture` and `playback`.

use cpal::traits::{DeviceTrait, HostTrait};
use crossbeam_channel::Receiver;

use super::{Direction, PcmSample};
use crate::error::AudioError;

/// Streams that can be brought back after an xrun
pub trait Recoverable {
    /// Reset/flush the stream after an xrun or suspend.
    ///
    /// Must return `Ok(())` without side effects when the stream is healthy.
    /// An error means the stream cannot continue.
    fn recover(&mut self) -> Result<(), AudioError>;
}

/// Blocking capture contract used by the send path
pub trait CaptureDevice<S: PcmSample>: Recoverable {
    /// Read up to `buf.len() / channels` frames, returning the frames read.
    ///
    /// A count below the request is a short read; xruns surface as errors.
    fn read(&mut self, buf: &mut [S]) -> Result<usize, AudioError>;

    fn channels(&self) -> u16;
}

/// Blocking playback contract used by the receive path
pub trait PlaybackDevice<S: PcmSample>: Recoverable {
    /// Write up to `buf.len() / channels` frames, returning the frames written.
    fn write(&mut self, buf: &[S]) -> Result<usize, AudioError>;

    fn channels(&self) -> u16;
}

/// Description of a device as shown by `--list-devices`
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_input: bool,
    pub is_default: bool,
    pub max_channels: u16,
    pub default_sample_rate: Option<u32>,
}

/// List all available input and output devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    for direction in [Direction::Capture, Direction::Playback] {
        let is_input = direction == Direction::Capture;
        let default_name = if is_input {
            host.default_input_device()
        } else {
            host.default_output_device()
        }
        .and_then(|d| d.name().ok());

        let iter = if is_input {
            host.input_devices()
        } else {
            host.output_devices()
        };
        let Ok(iter) = iter else {
            tracing::warn!("Failed to enumerate {} devices", direction);
            continue;
        };

        for (index, device) in iter.enumerate() {
            let Ok(name) = device.name() else { continue };

            let default_config = if is_input {
                device.default_input_config().ok()
            } else {
                device.default_output_config().ok()
            };

            devices.push(AudioDeviceInfo {
                index,
                is_default: default_name.as_ref() == Some(&name),
                name,
                is_input,
                max_channels: max_channels(&device, is_input),
                default_sample_rate: default_config.map(|c| c.sample_rate().0),
            });
        }
    }

    devices
}

fn max_channels(device: &cpal::Device, is_input: bool) -> u16 {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    };

    configs.iter().map(|c| c.channels()).max().unwrap_or(0)
}

/// Resolve a device for `direction`.
///
/// `id` may be a numeric index into the device list, an exact device name,
/// or `None` for the system default.
pub fn find_device(direction: Direction, id: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    let Some(id) = id else {
        let device = match direction {
            Direction::Capture => host.default_input_device(),
            Direction::Playback => host.default_output_device(),
        };
        return device
            .ok_or_else(|| AudioError::DeviceNotFound(format!("no default {} device", direction)));
    };

    let devices = match direction {
        Direction::Capture => host.input_devices(),
        Direction::Playback => host.output_devices(),
    }
    .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    let index = id.parse::<usize>().ok();
    for (i, device) in devices.enumerate() {
        if index == Some(i) {
            return Ok(device);
        }
        if device.name().map(|name| name == id).unwrap_or(false) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}

/// Stream configuration for a fixed rate and channel count
pub fn stream_config(sample_rate: u32, channels: u16) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Map a cpal stream error onto the recovery taxonomy.
///
/// cpal only distinguishes a vanished device from backend-specific
/// failures and has no suspend notification, so a cpal stream never
/// produces [`AudioError::Suspended`]. A host suspend shows up either as
/// `DeviceNotAvailable` or as a backend error, i.e. an xrun.
pub fn classify_stream_error(err: &cpal::StreamError) -> AudioError {
    match err {
        cpal::StreamError::DeviceNotAvailable => AudioError::Disconnected,
        _ => AudioError::Xrun,
    }
}

/// Error bookkeeping for a cpal-backed stream.
///
/// The stream's error callback sends classified errors into a channel;
/// the worker side drains it here, both while moving data and when the
/// recovery policy asks the stream to recover.
pub struct StreamHealth {
    direction: Direction,
    errors: Receiver<AudioError>,
    /// An xrun was reported and not yet recovered
    needs_recovery: bool,
    /// The device went away; recovery is impossible
    disconnected: bool,
}

impl StreamHealth {
    pub fn new(direction: Direction, errors: Receiver<AudioError>) -> Self {
        Self {
            direction,
            errors,
            needs_recovery: false,
            disconnected: false,
        }
    }

    /// Pull the next pending stream error, if any
    pub fn check(&mut self) -> Result<(), AudioError> {
        match self.errors.try_recv() {
            Ok(err) => {
                self.note(&err);
                Err(err)
            }
            Err(_) => Ok(()),
        }
    }

    /// Settle every pending error for a stream that is `running` or not.
    ///
    /// Returns `true` exactly once per reported xrun: the caller flushes its
    /// ring then. A healthy stream gets `false` and nothing changes.
    pub fn recover(&mut self, running: bool) -> Result<bool, AudioError> {
        while let Ok(err) = self.errors.try_recv() {
            self.note(&err);
        }

        if self.disconnected {
            return Err(AudioError::RecoveryFailed(format!(
                "{} device disconnected",
                self.direction
            )));
        }
        if !running {
            return Err(AudioError::RecoveryFailed(format!("{} stream stopped", self.direction)));
        }

        Ok(std::mem::take(&mut self.needs_recovery))
    }

    fn note(&mut self, err: &AudioError) {
        match err {
            AudioError::Disconnected => self.disconnected = true,
            _ => self.needs_recovery = true,
        }
    }
}
