//! Configuration
//!
//! [`AppConfig`] is read from a TOML file (optional) and then overridden
//! by command-line flags. Everything the real-time path needs is derived
//! once into [`StreamParams`]; nothing is reconfigured mid-session.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::SampleFormat;
use crate::clock::ts_per_frame;
use crate::codec::{self, CodecApplication};
use crate::constants;
use crate::error::{CodecError, Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub codec: CodecConfig,
    pub network: NetworkConfig,
    pub log: LogConfig,
}

/// Audio device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Device index or exact name; `None` selects the system default
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in one frame
    pub frame_size: usize,
    /// Device-side buffering in milliseconds
    pub buffer_ms: u32,
    pub format: SampleFormat,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: constants::DEFAULT_SAMPLE_RATE,
            channels: constants::DEFAULT_CHANNELS,
            frame_size: constants::DEFAULT_FRAME_SIZE,
            buffer_ms: constants::DEFAULT_BUFFER_MS,
            format: SampleFormat::default(),
        }
    }
}

/// Opus encoder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub bitrate_kbps: u32,
    pub application: CodecApplication,
    /// Variable bitrate (constrained to the frame budget)
    pub vbr: bool,
    /// In-band forward error correction
    pub inband_fec: bool,
    /// Expected packet loss percentage (0-100), used with FEC
    pub packet_loss_perc: u8,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            bitrate_kbps: constants::DEFAULT_BITRATE_KBPS,
            application: CodecApplication::default(),
            vbr: true,
            inband_fec: false,
            packet_loss_perc: 0,
        }
    }
}

/// RTP/UDP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Destination host (sender) or bind address (receiver)
    pub address: String,
    pub port: u16,
    /// Playout delay and jump tolerance base, in milliseconds
    pub jitter_ms: u32,
    pub payload_type: u8,
    pub dscp: u8,
    pub multicast_ttl: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: constants::DEFAULT_UDP_PORT,
            jitter_ms: constants::DEFAULT_JITTER_MS,
            payload_type: constants::PAYLOAD_TYPE_OPUS_MONO,
            dscp: constants::DEFAULT_DSCP,
            multicast_ttl: constants::DEFAULT_MULTICAST_TTL,
        }
    }
}

/// Diagnostics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 0 = warnings only, 1 = info, 2 = debug, 3+ = trace
    pub verbosity: u8,
    pub stats_interval_ms: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            verbosity: 1,
            stats_interval_ms: constants::DEFAULT_STATS_INTERVAL_MS,
        }
    }
}

impl LogConfig {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

impl AppConfig {
    /// Default location of the config file for this user
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "rtp-audio-link", "rtp-audio-link")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, or from [`Self::default_path`] when it exists.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let text = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check the whole configuration before any resource is opened
    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;

        if !(1..=2).contains(&audio.channels) {
            return Err(Error::Config(format!(
                "channels must be 1 or 2, got {}",
                audio.channels
            )));
        }

        codec::check_frame_size(audio.sample_rate, audio.frame_size).map_err(|e| match e {
            CodecError::UnsupportedRate(rate) => Error::Config(format!(
                "sample rate {} not supported (use one of {:?})",
                rate,
                codec::SUPPORTED_RATES
            )),
            _ => Error::Config(format!(
                "frame size {} not permitted at {} Hz (use one of {:?})",
                audio.frame_size,
                audio.sample_rate,
                codec::permitted_frame_sizes(audio.sample_rate).unwrap_or_default()
            )),
        })?;

        let budget = codec::bytes_per_frame(self.codec.bitrate_kbps, audio.frame_size, audio.sample_rate);
        if !(3..=constants::MAX_PAYLOAD_SIZE).contains(&budget) {
            return Err(Error::Config(format!(
                "{} kbit/s gives {} bytes per frame, outside 3..={}",
                self.codec.bitrate_kbps,
                budget,
                constants::MAX_PAYLOAD_SIZE
            )));
        }

        if self.codec.packet_loss_perc > 100 {
            return Err(Error::Config("packet_loss_perc must be 0-100".to_string()));
        }

        let network = &self.network;
        if !(96..=127).contains(&network.payload_type) {
            return Err(Error::Config(format!(
                "payload type {} is not a dynamic type (96-127)",
                network.payload_type
            )));
        }
        if network.jitter_ms == 0 {
            return Err(Error::Config("jitter_ms must be positive".to_string()));
        }
        if network.dscp > 63 {
            return Err(Error::Config(format!("dscp {} out of range", network.dscp)));
        }

        Ok(())
    }

    /// Derive the fixed stream parameters
    pub fn stream_params(&self) -> Result<StreamParams> {
        self.validate()?;
        Ok(StreamParams::new(
            self.audio.sample_rate,
            self.audio.channels,
            self.audio.frame_size,
            self.codec.bitrate_kbps,
            self.audio.buffer_ms,
        )?)
    }
}

/// Per-session constants computed once at setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in one frame
    pub frame_size: usize,
    /// Encoder byte budget per frame
    pub bytes_per_frame: usize,
    /// Wire timestamp increment per frame (8 kHz units)
    pub ts_per_frame: u32,
    /// Ring capacity in frames (sample-frames, not codec frames).
    ///
    /// Never below the longest packet the decoder can return plus one
    /// nominal frame, so any decode fits in one write.
    pub ring_frames: usize,
}

impl StreamParams {
    pub fn new(
        sample_rate: u32,
        channels: u16,
        frame_size: usize,
        bitrate_kbps: u32,
        buffer_ms: u32,
    ) -> std::result::Result<Self, CodecError> {
        codec::check_frame_size(sample_rate, frame_size)?;

        let buffered = (sample_rate as u64 * buffer_ms as u64 / 1000) as usize + 2 * frame_size;
        let longest = codec::max_decoded_frame(sample_rate) + frame_size;

        Ok(Self {
            sample_rate,
            channels,
            frame_size,
            bytes_per_frame: codec::bytes_per_frame(bitrate_kbps, frame_size, sample_rate),
            ts_per_frame: ts_per_frame(frame_size, sample_rate),
            ring_frames: buffered.max(longest),
        })
    }

    /// Interleaved samples in one frame
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * self.channels as usize
    }

    /// Wall-clock length of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_size as u64 * 1_000_000 / self.sample_rate as u64)
    }
}
