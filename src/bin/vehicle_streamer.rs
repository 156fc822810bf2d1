/**
 * Vehicle Streamer Binary
 *
 * Stands in for the vehicle's camera end of the video link. Accepts one
 * station connection at a time, waits for the start byte and streams a solid
 * test pattern until the station sends stop or hangs up.
 *
 * Usage: vehicle_streamer [--bind 0.0.0.0:5000] [--fps 10]
 */

use std::net::TcpListener;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{Context, Result};
use auv_station::link::TcpTransport;
use auv_station::vehicle::{FrameStreamer, SolidColorSource};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "vehicle_streamer")]
#[command(about = "Synthetic camera feed for exercising the station video link", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "0.0.0.0:5000")]
    bind: String,

    /// Frames per second while streaming
    #[arg(long, default_value_t = 10)]
    fps: u32,

    #[arg(long, default_value_t = 320)]
    width: u32,

    #[arg(long, default_value_t = 240)]
    height: u32,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // BGR red
    let source = SolidColorSource::new(cli.width, cli.height, &[0, 0, 255])
        .context("frame dimensions are too large")?;
    let interval = Duration::from_secs(1) / cli.fps.max(1);
    let mut streamer = FrameStreamer::new(source, interval);

    let listener = TcpListener::bind(&cli.bind).with_context(|| format!("binding {}", cli.bind))?;
    info!("waiting for station on {}", cli.bind);
    let running = AtomicBool::new(true);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_default();
        info!("station connected from {}", peer);

        let transport = TcpTransport::from_stream(stream)?;
        match streamer.serve(Box::new(transport), &running) {
            Ok(stats) => info!(
                "station {} left after {} frames ({} bytes)",
                peer, stats.frames_sent, stats.bytes_sent
            ),
            Err(e) => warn!("stream to {} ended: {}", peer, e),
        }
    }
    Ok(())
}
