//! Scripted devices, codecs and transports for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::audio::{CaptureDevice, PcmSample, PlaybackDevice, Recoverable};
use crate::codec::{AudioDecoder, AudioEncoder};
use crate::error::{AudioError, CodecError, NetworkError};
use crate::network::{Discontinuity, DiscontinuityHandler, Received, TransportReceiver, TransportSender};

/// One scripted device call
pub(crate) enum Step {
    /// Full frame with every sample set to this value
    Fill(i16),
    /// Only this many frames
    Short(usize),
    Fail(AudioError),
}

fn recover_fake(calls: &mut usize, fail: bool) -> Result<(), AudioError> {
    *calls += 1;
    if fail {
        Err(AudioError::RecoveryFailed("scripted".to_string()))
    } else {
        Ok(())
    }
}

/// Capture device; full silent frames once the script runs out
pub(crate) struct FakeCapture {
    channels: u16,
    script: VecDeque<Step>,
    pub recover_calls: usize,
    pub fail_recovery: bool,
}

impl FakeCapture {
    pub fn silent(channels: u16) -> Self {
        Self::scripted(channels, [])
    }

    pub fn scripted(channels: u16, steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            channels,
            script: steps.into_iter().collect(),
            recover_calls: 0,
            fail_recovery: false,
        }
    }
}

impl CaptureDevice<i16> for FakeCapture {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, AudioError> {
        let channels = self.channels as usize;
        match self.script.pop_front() {
            None => {
                buf.fill(0);
                Ok(buf.len() / channels)
            }
            Some(Step::Fill(value)) => {
                buf.fill(value);
                Ok(buf.len() / channels)
            }
            Some(Step::Short(frames)) => {
                buf[..frames * channels].fill(0);
                Ok(frames)
            }
            Some(Step::Fail(err)) => Err(err),
        }
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

impl Recoverable for FakeCapture {
    fn recover(&mut self) -> Result<(), AudioError> {
        recover_fake(&mut self.recover_calls, self.fail_recovery)
    }
}

/// Playback device recording everything written
pub(crate) struct FakePlayback {
    channels: u16,
    script: VecDeque<Step>,
    pub written: Vec<i16>,
    pub writes: usize,
    pub recover_calls: usize,
    pub fail_recovery: bool,
}

impl FakePlayback {
    pub fn new(channels: u16) -> Self {
        Self::scripted(channels, [])
    }

    pub fn scripted(channels: u16, steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            channels,
            script: steps.into_iter().collect(),
            written: Vec::new(),
            writes: 0,
            recover_calls: 0,
            fail_recovery: false,
        }
    }
}

impl PlaybackDevice<i16> for FakePlayback {
    fn write(&mut self, buf: &[i16]) -> Result<usize, AudioError> {
        let channels = self.channels as usize;
        self.writes += 1;
        match self.script.pop_front() {
            None | Some(Step::Fill(_)) => {
                self.written.extend_from_slice(buf);
                Ok(buf.len() / channels)
            }
            Some(Step::Short(frames)) => {
                self.written.extend_from_slice(&buf[..frames * channels]);
                Ok(frames)
            }
            Some(Step::Fail(err)) => Err(err),
        }
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

impl Recoverable for FakePlayback {
    fn recover(&mut self) -> Result<(), AudioError> {
        recover_fake(&mut self.recover_calls, self.fail_recovery)
    }
}

/// Encodes a frame as `[first sample as bytes, frame length]`
pub(crate) struct FakeEncoder {
    pub fail: bool,
}

impl<S: PcmSample> AudioEncoder<S> for FakeEncoder {
    fn encode(&mut self, pcm: &[S], out: &mut [u8]) -> Result<usize, CodecError> {
        if self.fail {
            return Err(CodecError::EncodingFailed("scripted".to_string()));
        }
        let first = (pcm[0].to_f32() * 32768.0) as i16;
        out[..2].copy_from_slice(&first.to_be_bytes());
        out[2] = (pcm.len() % 256) as u8;
        Ok(3)
    }
}

/// Decodes `[hi, lo, ..]` into a frame of that sample value; conceals with -1
pub(crate) struct FakeDecoder {
    pub frame_size: usize,
    pub channels: u16,
    /// Shared so tests can watch it after the decoder is moved
    pub resets: Arc<AtomicUsize>,
}

impl FakeDecoder {
    pub fn new(frame_size: usize, channels: u16) -> Self {
        Self {
            frame_size,
            channels,
            resets: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl AudioDecoder<i16> for FakeDecoder {
    fn decode(&mut self, packet: Option<&[u8]>, out: &mut [i16], _fec: bool) -> Result<usize, CodecError> {
        let total = self.frame_size * self.channels as usize;
        match packet {
            Some(data) if data.len() >= 2 => {
                out[..total].fill(i16::from_be_bytes([data[0], data[1]]));
                Ok(self.frame_size)
            }
            Some(_) => Err(CodecError::DecodingFailed("short packet".to_string())),
            None => {
                out[..total].fill(-1);
                Ok(self.frame_size)
            }
        }
    }

    fn reset(&mut self) -> Result<(), CodecError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every send
#[derive(Default)]
pub(crate) struct FakeTransport {
    pub sent: Vec<(Vec<u8>, u32)>,
    pub fail_sends: bool,
}

impl TransportSender for FakeTransport {
    fn send(&mut self, payload: &[u8], timestamp: u32) -> Result<(), NetworkError> {
        if self.fail_sends {
            return Err(NetworkError::SendFailed("scripted".to_string()));
        }
        self.sent.push((payload.to_vec(), timestamp));
        Ok(())
    }
}

/// One scripted receive
pub(crate) enum Incoming {
    Packet(Vec<u8>),
    Nothing,
    /// Report a jump to the handler, then deliver nothing
    Jump,
    Fail,
}

/// Replays a script of receive outcomes
pub(crate) struct FakeReceiver {
    script: VecDeque<Incoming>,
    handler: Option<DiscontinuityHandler>,
    pub expected: Vec<u32>,
    pub resync_to: u32,
    pub resync_calls: usize,
}

impl FakeReceiver {
    pub fn new(script: impl IntoIterator<Item = Incoming>, handler: Option<DiscontinuityHandler>) -> Self {
        Self {
            script: script.into_iter().collect(),
            handler,
            expected: Vec::new(),
            resync_to: 0,
            resync_calls: 0,
        }
    }
}

impl TransportReceiver for FakeReceiver {
    fn receive(&mut self, expected: u32, buf: &mut [u8]) -> Result<Received, NetworkError> {
        self.expected.push(expected);
        match self.script.pop_front() {
            Some(Incoming::Packet(data)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(Received {
                    len,
                    more: data.len() > buf.len(),
                })
            }
            Some(Incoming::Jump) => {
                if let Some(handler) = &self.handler {
                    handler(Discontinuity {
                        expected,
                        received: expected.wrapping_add(1_000_000),
                    });
                }
                Ok(Received::nothing())
            }
            Some(Incoming::Fail) => Err(NetworkError::ReceiveFailed("scripted".to_string())),
            Some(Incoming::Nothing) | None => Ok(Received::nothing()),
        }
    }

    fn resync(&mut self) -> u32 {
        self.resync_calls += 1;
        self.resync_to
    }
}
