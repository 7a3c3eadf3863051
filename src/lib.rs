//! # RTP Audio Link
//!
//! Low-latency point-to-point audio over RTP/UDP with Opus.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── TRANSMIT ────────────────────────────────┐
//! │                                                                          │
//! │  ┌──────────┐  callback  ┌────────────┐  read   ┌──────────────┐         │
//! │  │  cpal    │ ─────────▶ │ Frame Ring │ ──────▶ │ AudioSender  │         │
//! │  │  input   │  (no lock) │  (SPSC)    │ (worker)│ encode + ts  │         │
//! │  └──────────┘            └────────────┘         └──────┬───────┘         │
//! │                                                        │ RTP / UDP       │
//! └────────────────────────────────────────────────────────┼─────────────────┘
//!                                                          ▼
//! ┌──────────────────────────────── RECEIVE ─────────────────────────────────┐
//! │                                                                          │
//! │  ┌──────────────┐ packet / nothing-yet / jump  ┌───────────────┐         │
//! │  │  UdpSession  │ ───────────────────────────▶ │ AudioReceiver │         │
//! │  │ jitter buffer│ ◀── resync ──────────────────│ decode / PLC  │         │
//! │  └──────────────┘                              └──────┬────────┘         │
//! │                                                       │ write            │
//! │  ┌──────────┐  callback  ┌────────────┐               │                  │
//! │  │  cpal    │ ◀───────── │ Frame Ring │ ◀─────────────┘                  │
//! │  │  output  │ (pad zero) │  (SPSC)    │                                  │
//! │  └──────────┘            └────────────┘                                  │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The hardware callback and the worker loop share nothing but the ring.
//! Timestamps count samples of an 8 kHz reference clock on the wire; the
//! receiver advances by what the decoder actually produced.

pub mod audio;
pub mod clock;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod network;
pub mod recovery;
pub mod stats;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default Opus bitrate in kbit/s
    pub const DEFAULT_BITRATE_KBPS: u32 = 64;

    /// Default frame size in samples per channel (20 ms at 48 kHz)
    pub const DEFAULT_FRAME_SIZE: usize = 960;

    /// Default device buffer in milliseconds
    pub const DEFAULT_BUFFER_MS: u32 = 16;

    /// Default UDP port for audio streaming
    pub const DEFAULT_UDP_PORT: u16 = 1350;

    /// Default jitter buffer size in milliseconds
    pub const DEFAULT_JITTER_MS: u32 = 16;

    /// Maximum packet size for UDP
    pub const MAX_PACKET_SIZE: usize = 1472; // MTU - IP/UDP headers

    /// RTP fixed header length
    pub const RTP_HEADER_SIZE: usize = 12;

    /// Largest opus payload that still fits one datagram
    pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - RTP_HEADER_SIZE;

    /// Dynamic payload type for mono opus
    pub const PAYLOAD_TYPE_OPUS_MONO: u8 = 120;

    /// Clock rate of wire timestamps, independent of the media rate
    pub const REFERENCE_CLOCK_RATE: u32 = 8000;

    /// DSCP class for outgoing audio (CS5)
    pub const DEFAULT_DSCP: u8 = 40;

    /// TTL for multicast destinations
    pub const DEFAULT_MULTICAST_TTL: u32 = 16;

    /// Interval between aggregate statistics logs
    pub const DEFAULT_STATS_INTERVAL_MS: u64 = 5000;
}
