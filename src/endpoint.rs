//! Session endpoints
//!
//! An endpoint owns everything one direction needs for its whole life:
//! the device stream, the codec (inside the sender/receiver), the clock
//! and the transport session. Fields drop in declaration order, so the
//! device stream (and its callback) always goes first.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::{CaptureStream, PcmSample, PlaybackStream};
use crate::clock::{ReceiverClock, SenderClock};
use crate::codec::{AudioDecoder, AudioEncoder, FrameDecoder, FrameEncoder, OpusDecoder, OpusEncoder};
use crate::config::{AppConfig, StreamParams};
use crate::error::Result;
use crate::network::{AudioReceiver, AudioSender, ReceiveSession, SendSession};
use crate::stats::{StatsReporter, StatsSnapshot, StreamStats};

/// Transmit endpoint: capture → opus → RTP
pub struct TxEndpoint<S: PcmSample>
where
    OpusEncoder: AudioEncoder<S>,
{
    device: CaptureStream<S>,
    sender: AudioSender<S, OpusEncoder>,
    clock: SenderClock,
    session: SendSession,
    stats: Arc<StreamStats>,
    params: StreamParams,
    stats_interval: Duration,
}

impl<S: PcmSample> TxEndpoint<S>
where
    OpusEncoder: AudioEncoder<S>,
{
    /// Create codec, session and device; any failure aborts setup
    pub fn open(config: &AppConfig) -> Result<Self> {
        let params = config.stream_params()?;

        let codec = OpusEncoder::new(params.sample_rate, params.channels, &config.codec)?;
        let encoder = FrameEncoder::<S, _>::new(codec, &params)?;
        let session = SendSession::connect(&config.network)?;
        let device = CaptureStream::<S>::open(config.audio.device.as_deref(), &params)?;

        let stats = StreamStats::new();
        let sender = AudioSender::new(encoder, &params, stats.clone()).with_ring_stats(device.ring_stats());

        tracing::info!(
            "Transmit: {} Hz, {} ch, {} samples/frame, {} bytes/frame, {:?} samples",
            params.sample_rate,
            params.channels,
            params.frame_size,
            params.bytes_per_frame,
            <S as PcmSample>::FORMAT
        );

        Ok(Self {
            device,
            sender,
            clock: SenderClock::new(params.ts_per_frame),
            session,
            stats,
            params,
            stats_interval: config.log.stats_interval(),
        })
    }

    /// Stream until `shutdown` is set
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        let mut reporter = StatsReporter::new(self.stats_interval);
        self.sender.run(
            &mut self.device,
            &mut self.clock,
            &mut self.session,
            shutdown,
            &mut reporter,
        )
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(Some(&self.device.ring_stats()))
    }

    /// Stop the device stream first, then release codec and session
    pub fn close(mut self) -> StatsSnapshot {
        self.device.stop();
        let snapshot = self.snapshot();
        tracing::debug!(
            timestamp = self.clock.current(),
            device_frames = self.device.frames_captured(),
            "Transmit endpoint closed"
        );
        snapshot
    }
}

/// Receive endpoint: RTP → opus → playback
pub struct RxEndpoint<S: PcmSample>
where
    OpusDecoder: AudioDecoder<S>,
{
    device: PlaybackStream<S>,
    receiver: AudioReceiver<S, OpusDecoder>,
    clock: ReceiverClock,
    session: ReceiveSession,
    stats: Arc<StreamStats>,
    params: StreamParams,
    stats_interval: Duration,
}

impl<S: PcmSample> RxEndpoint<S>
where
    OpusDecoder: AudioDecoder<S>,
{
    pub fn open(config: &AppConfig) -> Result<Self> {
        let params = config.stream_params()?;

        let codec = OpusDecoder::new(params.sample_rate, params.channels)?;
        let decoder = FrameDecoder::<S, _>::new(codec, &params)?;

        let clock = ReceiverClock::new();
        let session = ReceiveSession::bind(
            &config.network,
            params.sample_rate,
            Some(clock.discontinuity_handler()),
        )?;
        let device = PlaybackStream::<S>::open(config.audio.device.as_deref(), &params)?;

        let stats = StreamStats::new();
        let receiver = AudioReceiver::new(decoder, stats.clone()).with_ring_stats(device.ring_stats());

        tracing::info!(
            "Receive: {} Hz, {} ch, {} samples/frame, jitter {} ms, {:?} samples",
            params.sample_rate,
            params.channels,
            params.frame_size,
            config.network.jitter_ms,
            <S as PcmSample>::FORMAT
        );

        Ok(Self {
            device,
            receiver,
            clock,
            session,
            stats,
            params,
            stats_interval: config.log.stats_interval(),
        })
    }

    /// Play until `shutdown` is set
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        let mut reporter = StatsReporter::new(self.stats_interval);
        self.receiver.run(
            &mut self.device,
            &mut self.clock,
            &mut self.session,
            shutdown,
            &mut reporter,
        )
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(Some(&self.device.ring_stats()))
    }

    /// Stop the device stream first, then release codec and session
    pub fn close(mut self) -> StatsSnapshot {
        self.device.stop();
        let snapshot = self.snapshot();
        let session = self.session.stats();
        tracing::debug!(
            received = session.packets_received,
            stale = session.stale,
            jumps = session.jumps,
            device_frames = self.device.frames_played(),
            "Receive endpoint closed"
        );
        snapshot
    }
}
