//! Opus codec bridge
//!
//! [`AudioEncoder`] and [`AudioDecoder`] are the narrow contracts a codec
//! instance has to satisfy; the Opus library implements both for `i16` and
//! `f32` samples. [`FrameEncoder`] and [`FrameDecoder`] enforce the framing
//! rules on top: whole frames only, a fixed byte budget, and full-length
//! concealment frames for lost packets.

pub mod decoder;
pub mod encoder;

pub use decoder::{DecoderStats, FrameDecoder, OpusDecoder};
pub use encoder::{EncoderStats, FrameEncoder, OpusEncoder};

use serde::{Deserialize, Serialize};

use crate::audio::PcmSample;
use crate::error::CodecError;

/// Sample rates the codec accepts
pub const SUPPORTED_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// Largest frame the codec can emit for a single packet
pub const MAX_FRAME_DURATION_MS: u32 = 120;

/// Codec instance contract for the send path
pub trait AudioEncoder<S: PcmSample> {
    /// Encode one interleaved frame into `out`, returning the bytes written.
    ///
    /// `out.len()` is the byte budget for this frame.
    fn encode(&mut self, pcm: &[S], out: &mut [u8]) -> Result<usize, CodecError>;
}

/// Codec instance contract for the receive path
pub trait AudioDecoder<S: PcmSample> {
    /// Decode `packet` into `out`, returning samples per channel produced.
    ///
    /// `None` asks for loss concealment covering `out.len() / channels`
    /// frames. `fec` hints that in-band redundancy may be used.
    fn decode(&mut self, packet: Option<&[u8]>, out: &mut [S], fec: bool) -> Result<usize, CodecError>;

    /// Drop internal prediction state
    fn reset(&mut self) -> Result<(), CodecError>;
}

/// Encoder tuning preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodecApplication {
    /// General audio (music, mixed content)
    #[default]
    Audio,
    /// Speech
    Voip,
    /// Lowest algorithmic delay
    LowDelay,
}

impl std::str::FromStr for CodecApplication {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio" | "music" => Ok(CodecApplication::Audio),
            "voip" | "voice" => Ok(CodecApplication::Voip),
            "low-delay" | "lowdelay" => Ok(CodecApplication::LowDelay),
            other => Err(format!("unknown codec application '{}'", other)),
        }
    }
}

/// Frame sizes (samples per channel) accepted at `sample_rate`: 2.5, 5, 10 and 20 ms
pub fn permitted_frame_sizes(sample_rate: u32) -> Result<[usize; 4], CodecError> {
    if !SUPPORTED_RATES.contains(&sample_rate) {
        return Err(CodecError::UnsupportedRate(sample_rate));
    }
    let rate = sample_rate as usize;
    Ok([rate / 400, rate / 200, rate / 100, rate / 50])
}

/// Check `frame_size` against the permitted sizes for `sample_rate`
pub fn check_frame_size(sample_rate: u32, frame_size: usize) -> Result<(), CodecError> {
    if permitted_frame_sizes(sample_rate)?.contains(&frame_size) {
        Ok(())
    } else {
        Err(CodecError::InvalidFrameSize(frame_size))
    }
}

/// Byte budget for one encoded frame
///
/// `bitrate_kbps * 1024 * frame_size / sample_rate / 8`, in integer arithmetic.
pub fn bytes_per_frame(bitrate_kbps: u32, frame_size: usize, sample_rate: u32) -> usize {
    (bitrate_kbps as u64 * 1024 * frame_size as u64 / sample_rate as u64 / 8) as usize
}

/// Largest frame (samples per channel) a single packet can decode to
pub fn max_decoded_frame(sample_rate: u32) -> usize {
    (sample_rate * MAX_FRAME_DURATION_MS / 1000) as usize
}

fn opus_channels(channels: u16) -> Option<opus::Channels> {
    match channels {
        1 => Some(opus::Channels::Mono),
        2 => Some(opus::Channels::Stereo),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permitted_frame_sizes() {
        assert_eq!(permitted_frame_sizes(48000).unwrap(), [120, 240, 480, 960]);
        assert_eq!(permitted_frame_sizes(8000).unwrap(), [20, 40, 80, 160]);
        assert!(matches!(
            permitted_frame_sizes(44100),
            Err(CodecError::UnsupportedRate(44100))
        ));
    }

    #[test]
    fn test_check_frame_size() {
        assert!(check_frame_size(48000, 480).is_ok());
        assert!(matches!(
            check_frame_size(48000, 500),
            Err(CodecError::InvalidFrameSize(500))
        ));
    }

    #[test]
    fn test_bytes_per_frame() {
        assert_eq!(bytes_per_frame(32, 480, 48000), 40);
        assert_eq!(bytes_per_frame(64, 960, 48000), 163);
    }

    #[test]
    fn test_application_parse() {
        assert_eq!("voip".parse::<CodecApplication>().unwrap(), CodecApplication::Voip);
        assert_eq!(
            "low-delay".parse::<CodecApplication>().unwrap(),
            CodecApplication::LowDelay
        );
        assert!("speech".parse::<CodecApplication>().is_err());
    }
}
