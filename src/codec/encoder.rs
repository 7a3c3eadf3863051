//! Opus encoder wrapper
//!
//! [`OpusEncoder`] is the codec instance; [`FrameEncoder`] applies the
//! framing contract: exactly one configured frame in, at most
//! `bytes_per_frame` bytes out, no allocation per call.

use opus::{Application, Encoder};
use std::marker::PhantomData;

use super::{check_frame_size, opus_channels, AudioEncoder, CodecApplication};
use crate::audio::PcmSample;
use crate::config::{CodecConfig, StreamParams};
use crate::error::CodecError;

/// Opus encoder instance
pub struct OpusEncoder {
    encoder: Encoder,
}

impl OpusEncoder {
    /// Create an encoder for `sample_rate` / `channels` tuned by `config`
    pub fn new(sample_rate: u32, channels: u16, config: &CodecConfig) -> Result<Self, CodecError> {
        let opus_channels = opus_channels(channels).ok_or_else(|| {
            CodecError::EncoderInit(format!("Unsupported channel count: {}", channels))
        })?;

        let application = match config.application {
            CodecApplication::Audio => Application::Audio,
            CodecApplication::Voip => Application::Voip,
            CodecApplication::LowDelay => Application::LowDelay,
        };

        let mut encoder = Encoder::new(sample_rate, opus_channels, application)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        Self::configure_encoder(&mut encoder, config)?;

        Ok(Self { encoder })
    }

    fn configure_encoder(encoder: &mut Encoder, config: &CodecConfig) -> Result<(), CodecError> {
        encoder
            .set_bitrate(opus::Bitrate::Bits(config.bitrate_kbps as i32 * 1000))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        encoder
            .set_vbr(config.vbr)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set VBR: {}", e)))?;

        if config.vbr {
            encoder
                .set_vbr_constraint(true)
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set CVBR: {}", e)))?;
        }

        encoder
            .set_inband_fec(config.inband_fec)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set FEC: {}", e)))?;

        if config.inband_fec {
            encoder
                .set_packet_loss_perc(config.packet_loss_perc as i32)
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set packet loss: {}", e)))?;
        }

        Ok(())
    }
}

impl AudioEncoder<i16> for OpusEncoder {
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, CodecError> {
        self.encoder
            .encode(pcm, out)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))
    }
}

impl AudioEncoder<f32> for OpusEncoder {
    fn encode(&mut self, pcm: &[f32], out: &mut [u8]) -> Result<usize, CodecError> {
        self.encoder
            .encode_float(pcm, out)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))
    }
}

/// Frame-level encoder bridge
pub struct FrameEncoder<S, E> {
    codec: E,
    frame_size: usize,
    channels: u16,
    /// Packet buffer sized to the byte budget (reused to avoid allocations)
    packet: Vec<u8>,
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
    _sample: PhantomData<S>,
}

impl<S: PcmSample, E: AudioEncoder<S>> FrameEncoder<S, E> {
    /// Wrap `codec`, checking the frame size once for the whole session
    pub fn new(codec: E, params: &StreamParams) -> Result<Self, CodecError> {
        check_frame_size(params.sample_rate, params.frame_size)?;

        Ok(Self {
            codec,
            frame_size: params.frame_size,
            channels: params.channels,
            packet: vec![0u8; params.bytes_per_frame],
            frames_encoded: 0,
            bytes_produced: 0,
            _sample: PhantomData,
        })
    }

    /// Encode exactly one frame of interleaved samples.
    ///
    /// The returned slice borrows the internal packet buffer.
    pub fn encode(&mut self, pcm: &[S]) -> Result<&[u8], CodecError> {
        if pcm.len() != self.samples_per_frame() {
            return Err(CodecError::InvalidFrameSize(pcm.len() / self.channels as usize));
        }

        let size = self.codec.encode(pcm, &mut self.packet)?;
        if size == 0 || size > self.packet.len() {
            return Err(CodecError::EncodingFailed(format!(
                "encoder returned {} bytes for a {} byte budget",
                size,
                self.packet.len()
            )));
        }

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(&self.packet[..size])
    }

    /// Expected frame size in samples (per channel)
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Expected total samples per frame (including all channels)
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * self.channels as usize
    }

    /// Byte budget per frame
    pub fn bytes_per_frame(&self) -> usize {
        self.packet.len()
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}
