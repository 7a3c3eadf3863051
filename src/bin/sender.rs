//! Audio Sender Application
//!
//! Captures audio from an input device and streams it to a receiver as
//! Opus over RTP/UDP.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rtp_audio_link::{
    audio::{list_devices, PcmSample, SampleFormat},
    codec::{AudioEncoder, OpusEncoder},
    config::AppConfig,
    endpoint::TxEndpoint,
    logging,
    stats::StatsSnapshot,
};

#[derive(Parser, Debug)]
#[command(name = "sender", version, about = "Stream an audio input over RTP/UDP")]
#[command(disable_help_flag = true)]
struct Args {
    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Input device (index or exact name)
    #[arg(short = 'd', long)]
    device: Option<String>,

    /// Device buffer in milliseconds
    #[arg(short = 'm', long = "buffer")]
    buffer_ms: Option<u32>,

    /// Destination host or multicast group
    #[arg(short = 'h', long)]
    host: Option<String>,

    /// Destination UDP port
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Sample rate in Hz
    #[arg(short = 'r', long)]
    rate: Option<u32>,

    /// Channel count (1 or 2)
    #[arg(short = 'c', long)]
    channels: Option<u16>,

    /// Frame size in samples per channel
    #[arg(short = 'f', long = "frame")]
    frame_size: Option<usize>,

    /// Encoder bitrate in kbit/s
    #[arg(short = 'b', long = "bitrate")]
    kbps: Option<u32>,

    /// Verbosity (0 = warnings only)
    #[arg(short = 'v', long)]
    verbosity: Option<u8>,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sample format: i16 or f32
    #[arg(long)]
    format: Option<SampleFormat>,

    /// List audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(device) = &self.device {
            config.audio.device = Some(device.clone());
        }
        if let Some(buffer_ms) = self.buffer_ms {
            config.audio.buffer_ms = buffer_ms;
        }
        if let Some(host) = &self.host {
            config.network.address = host.clone();
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(rate) = self.rate {
            config.audio.sample_rate = rate;
        }
        if let Some(channels) = self.channels {
            config.audio.channels = channels;
        }
        if let Some(frame_size) = self.frame_size {
            config.audio.frame_size = frame_size;
        }
        if let Some(kbps) = self.kbps {
            config.codec.bitrate_kbps = kbps;
        }
        if let Some(verbosity) = self.verbosity {
            config.log.verbosity = verbosity;
        }
        if let Some(format) = self.format {
            config.audio.format = format;
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!("{:#}", e);
        eprintln!("sender: {:#}", e);
        std::process::exit(-1);
    }
}

async fn run(args: Args) -> Result<()> {
    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);

    logging::init(config.log.verbosity);
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        "Sending to {}:{} ({} kbit/s)",
        config.network.address,
        config.network.port,
        config.codec.bitrate_kbps
    );

    let shutdown = Arc::new(AtomicBool::new(false));

    let signal_flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            signal_flag.store(true, Ordering::SeqCst);
        }
    });

    let worker_flag = shutdown.clone();
    let snapshot = tokio::task::spawn_blocking(move || match config.audio.format {
        SampleFormat::I16 => transmit::<i16>(&config, &worker_flag),
        SampleFormat::F32 => transmit::<f32>(&config, &worker_flag),
    })
    .await
    .context("Send worker panicked")??;

    tracing::info!(
        "Sent {} packets ({:.1} KB), {} send errors, {} skipped frames, {} xruns",
        snapshot.packets_sent,
        snapshot.bytes_sent as f64 / 1024.0,
        snapshot.send_errors,
        snapshot.encode_skips,
        snapshot.xruns
    );

    Ok(())
}

fn transmit<S: PcmSample>(config: &AppConfig, shutdown: &AtomicBool) -> Result<StatsSnapshot>
where
    OpusEncoder: AudioEncoder<S>,
{
    let mut endpoint = TxEndpoint::<S>::open(config).context("Failed to set up transmit path")?;
    let result = endpoint.run(shutdown);
    let snapshot = endpoint.close();
    result.context("Transmit stopped")?;
    Ok(snapshot)
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = if device.is_input { "Input" } else { "Output" };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}: {} ({}){}", device.index, device.name, device_type, default_marker);
        println!("    Max channels: {}", device.max_channels);
        if let Some(rate) = device.default_sample_rate {
            println!("    Default rate: {} Hz", rate);
        }
    }
    println!();
}
