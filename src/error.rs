//! Error types for the audio link
//!
//! Setup failures (device open, codec creation, socket bind) abort startup.
//! Runtime failures that reach the caller are fatal for the affected
//! direction; transient conditions (short reads, ring over/underflow,
//! missing packets) are absorbed where they happen and only counted.

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Playback underrun or capture overrun reported by the device
    #[error("Device xrun")]
    Xrun,

    /// Device was suspended and must be resumed before use
    #[error("Device suspended")]
    Suspended,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Device recovery failed: {0}")]
    RecoveryFailed(String),
}

impl AudioError {
    /// Whether the recovery primitive may bring the stream back
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AudioError::Xrun | AudioError::Suspended)
    }
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("Unsupported sample rate: {0}")]
    UnsupportedRate(u32),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Address resolution failed: {0}")]
    AddressResolution(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
