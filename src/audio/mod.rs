//! Audio subsystem module
//!
//! The hardware side runs inside cpal callbacks and only ever touches a
//! ring buffer half plus atomics. The worker side sees the device through
//! the blocking [`CaptureDevice`] / [`PlaybackDevice`] contracts.

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;

pub use buffer::{frame_ring, FrameConsumer, FrameProducer, RingStats};
pub use capture::CaptureStream;
pub use device::{
    list_devices, AudioDeviceInfo, CaptureDevice, PlaybackDevice, Recoverable, StreamHealth,
};
pub use playback::PlaybackStream;

use serde::{Deserialize, Serialize};

/// Stream direction of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Capture,
    Playback,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Capture => f.write_str("capture"),
            Direction::Playback => f.write_str("playback"),
        }
    }
}

/// Sample width used end to end (device, ring buffer, codec)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    #[default]
    I16,
    F32,
}

impl std::str::FromStr for SampleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "i16" | "s16" => Ok(SampleFormat::I16),
            "f32" | "float" => Ok(SampleFormat::F32),
            other => Err(format!("unknown sample format '{}'", other)),
        }
    }
}

/// One interleaved PCM sample as it travels through the pipeline
pub trait PcmSample: cpal::SizedSample + Copy + Default + Send + Sync + 'static {
    const FORMAT: SampleFormat;

    /// Value written for silence and for padding
    fn silence() -> Self {
        <Self as cpal::Sample>::EQUILIBRIUM
    }

    /// Normalized value in [-1.0, 1.0]
    fn to_f32(self) -> f32;
}

impl PcmSample for i16 {
    const FORMAT: SampleFormat = SampleFormat::I16;

    fn to_f32(self) -> f32 {
        self as f32 / 32768.0
    }
}

impl PcmSample for f32 {
    const FORMAT: SampleFormat = SampleFormat::F32;

    fn to_f32(self) -> f32 {
        self
    }
}

/// Fill `buf` with silence
pub fn fill_silence<S: PcmSample>(buf: &mut [S]) {
    buf.fill(S::silence());
}
