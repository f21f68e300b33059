mod engine;
mod input;
mod network;

use clap::Parser;
use engine::EngineOptions;
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:4004")]
    server: String,

    /// Input pattern: square, wander, or idle
    #[arg(long, default_value = "square")]
    pattern: String,

    /// Seed for the wander pattern
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Teleport avatars straight to snapshots (no prediction, no smoothing)
    #[arg(long)]
    naive: bool,

    /// Disable client-side prediction
    #[arg(long)]
    no_prediction: bool,

    /// Disable smoothing of interpolated motion
    #[arg(long)]
    no_smoothing: bool,

    /// Render delay for the remote avatar in milliseconds
    #[arg(long, default_value = "100")]
    net_offset: u64,

    /// Snapshot buffer length in seconds
    #[arg(long, default_value = "2")]
    buffer_secs: usize,

    /// Avatar color announced to the session peer
    #[arg(long, default_value = "#cc8822")]
    color: String,

    /// Ask the server to delay our inputs by this many milliseconds
    #[arg(short = 'l', long)]
    fake_latency: Option<u64>,

    /// Stop after this many seconds (runs until Ctrl+C otherwise)
    #[arg(short = 'd', long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if let Some(ms) = args.fake_latency {
        info!("Requesting {}ms of artificial input latency", ms);
    }

    let options = EngineOptions {
        naive: args.naive,
        prediction: !args.no_prediction && !args.naive,
        smoothing: !args.no_smoothing && !args.naive,
        net_offset_ms: args.net_offset,
        buffer_secs: args.buffer_secs,
        color: args.color.clone(),
        fake_latency_ms: args.fake_latency.unwrap_or(0),
    };
    let source = input::source_for(&args.pattern, args.seed);

    let mut client = network::Client::new(&args.server, options, source).await?;

    let interrupted = tokio::select! {
        result = client.run(args.duration) => {
            result?;
            false
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            true
        }
    };

    if interrupted {
        client.disconnect().await;
    }

    Ok(())
}
