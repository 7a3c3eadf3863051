//! RTP fixed header (RFC 3550)
//!
//! Only what a single-source audio stream needs: no CSRC list or
//! extension is ever written, but both are skipped when parsing so
//! packets from other RTP stacks still decode.

use bytes::{Buf, BufMut, Bytes};

use crate::constants::RTP_HEADER_SIZE;
use crate::error::NetworkError;

/// RTP protocol version (always 2 in practice)
pub const RTP_VERSION: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Set on the first packet of a talk spurt
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            marker: false,
            payload_type,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Parse a header, leaving `buf` positioned at the payload
    pub fn parse(buf: &mut impl Buf) -> Result<Self, NetworkError> {
        if buf.remaining() < RTP_HEADER_SIZE {
            return Err(NetworkError::InvalidPacket(format!(
                "{} bytes is shorter than an RTP header",
                buf.remaining()
            )));
        }

        // Version (2 bits), padding (1 bit), extension (1 bit), CSRC count (4 bits)
        let first = buf.get_u8();
        let version = first >> 6;
        if version != RTP_VERSION {
            return Err(NetworkError::InvalidPacket(format!("Invalid RTP version: {}", version)));
        }
        let extension = first & 0x10 != 0;
        let csrc_count = (first & 0x0F) as usize;

        // Marker (1 bit), payload type (7 bits)
        let second = buf.get_u8();
        let marker = second & 0x80 != 0;
        let payload_type = second & 0x7F;

        let sequence = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        let csrc_len = csrc_count * 4;
        if buf.remaining() < csrc_len {
            return Err(NetworkError::InvalidPacket("truncated CSRC list".to_string()));
        }
        buf.advance(csrc_len);

        if extension {
            if buf.remaining() < 4 {
                return Err(NetworkError::InvalidPacket("truncated extension header".to_string()));
            }
            let _profile = buf.get_u16();
            let words = buf.get_u16() as usize;
            if buf.remaining() < words * 4 {
                return Err(NetworkError::InvalidPacket("truncated extension".to_string()));
            }
            buf.advance(words * 4);
        }

        Ok(Self {
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
        })
    }

    /// Write the 12-byte fixed header
    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(RTP_VERSION << 6);

        let mut second = self.payload_type & 0x7F;
        if self.marker {
            second |= 0x80;
        }
        buf.put_u8(second);

        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }
}

/// Split a datagram into header and payload, honoring the padding flag
pub fn parse_packet(mut data: Bytes) -> Result<(RtpHeader, Bytes), NetworkError> {
    let padded = data.first().map(|b| b & 0x20 != 0).unwrap_or(false);
    let header = RtpHeader::parse(&mut data)?;

    let padding = if padded {
        let count = data.last().copied().unwrap_or(0) as usize;
        if count == 0 || count > data.len() {
            return Err(NetworkError::InvalidPacket(format!(
                "Invalid padding value: {} with {} payload bytes",
                count,
                data.len()
            )));
        }
        count
    } else {
        0
    };

    let payload_len = data.len() - padding;
    Ok((header, data.slice(..payload_len)))
}
