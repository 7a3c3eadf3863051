//! Opus decoder wrapper
//!
//! Provides Opus decoding with packet loss concealment. A missing packet,
//! or one the codec rejects, always yields a full nominal frame so the
//! playback clock keeps moving.

use opus::Decoder;

use super::{check_frame_size, max_decoded_frame, opus_channels, AudioDecoder};
use crate::audio::{fill_silence, PcmSample};
use crate::config::StreamParams;
use crate::error::CodecError;

/// Opus decoder instance
pub struct OpusDecoder {
    decoder: Decoder,
}

impl OpusDecoder {
    /// Create a new Opus decoder
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self, CodecError> {
        let opus_channels = opus_channels(channels).ok_or_else(|| {
            CodecError::DecoderInit(format!("Unsupported channel count: {}", channels))
        })?;

        let decoder = Decoder::new(sample_rate, opus_channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self { decoder })
    }
}

impl AudioDecoder<i16> for OpusDecoder {
    fn decode(&mut self, packet: Option<&[u8]>, out: &mut [i16], fec: bool) -> Result<usize, CodecError> {
        // An empty input selects concealment in libopus
        self.decoder
            .decode(packet.unwrap_or(&[]), out, fec)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))
    }

    fn reset(&mut self) -> Result<(), CodecError> {
        self.decoder
            .reset_state()
            .map_err(|e| CodecError::DecoderInit(e.to_string()))
    }
}

impl AudioDecoder<f32> for OpusDecoder {
    fn decode(&mut self, packet: Option<&[u8]>, out: &mut [f32], fec: bool) -> Result<usize, CodecError> {
        self.decoder
            .decode_float(packet.unwrap_or(&[]), out, fec)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))
    }

    fn reset(&mut self) -> Result<(), CodecError> {
        self.decoder
            .reset_state()
            .map_err(|e| CodecError::DecoderInit(e.to_string()))
    }
}

/// Frame-level decoder bridge
pub struct FrameDecoder<S, D> {
    codec: D,
    frame_size: usize,
    channels: u16,
    /// Decoding buffer sized for the largest packet (reused to avoid allocations)
    decode_buffer: Vec<S>,
    /// Packets decoded
    frames_decoded: u64,
    /// Frames synthesized by concealment
    frames_concealed: u64,
    /// Packets the codec rejected
    decode_errors: u64,
    /// Total samples produced
    samples_produced: u64,
}

impl<S: PcmSample, D: AudioDecoder<S>> FrameDecoder<S, D> {
    pub fn new(codec: D, params: &StreamParams) -> Result<Self, CodecError> {
        check_frame_size(params.sample_rate, params.frame_size)?;

        let capacity = max_decoded_frame(params.sample_rate).max(params.frame_size);

        Ok(Self {
            codec,
            frame_size: params.frame_size,
            channels: params.channels,
            decode_buffer: vec![S::silence(); capacity * params.channels as usize],
            frames_decoded: 0,
            frames_concealed: 0,
            decode_errors: 0,
            samples_produced: 0,
        })
    }

    /// Decode one packet, or conceal a missing one when `packet` is `None`.
    ///
    /// Returns interleaved samples borrowed from the internal buffer.
    /// A packet that fails to decode is replaced by concealment; only a
    /// failing concealment is reported as an error.
    pub fn decode(&mut self, packet: Option<&[u8]>) -> Result<&[S], CodecError> {
        let channels = self.channels as usize;

        if let Some(data) = packet {
            match self.codec.decode(Some(data), &mut self.decode_buffer, false) {
                Ok(frames) if frames > 0 => {
                    let total = frames * channels;
                    self.frames_decoded += 1;
                    self.samples_produced += total as u64;
                    return Ok(&self.decode_buffer[..total]);
                }
                Ok(_) => {
                    self.decode_errors += 1;
                    tracing::debug!(len = data.len(), "Packet decoded to nothing, concealing");
                }
                Err(e) => {
                    self.decode_errors += 1;
                    tracing::debug!(error = %e, len = data.len(), "Packet rejected, concealing");
                }
            }
        }

        self.conceal()
    }

    fn conceal(&mut self) -> Result<&[S], CodecError> {
        let nominal = self.frame_size * self.channels as usize;
        let out = &mut self.decode_buffer[..nominal];

        let frames = self.codec.decode(None, out, false)?;
        let produced = (frames * self.channels as usize).min(nominal);
        fill_silence(&mut out[produced..]);

        self.frames_concealed += 1;
        self.samples_produced += nominal as u64;

        Ok(&self.decode_buffer[..nominal])
    }

    /// Drop predictor state, e.g. after the stream restarted
    pub fn reset(&mut self) -> Result<(), CodecError> {
        self.codec.reset()
    }

    /// Nominal frame size in samples (per channel)
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Get channel count
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        let total = self.frames_decoded + self.frames_concealed;
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_concealed: self.frames_concealed,
            decode_errors: self.decode_errors,
            samples_produced: self.samples_produced,
            loss_rate: if total > 0 {
                self.frames_concealed as f32 / total as f32
            } else {
                0.0
            },
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_concealed: u64,
    pub decode_errors: u64,
    pub samples_produced: u64,
    pub loss_rate: f32,
}
