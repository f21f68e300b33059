mod http;
mod lobby;
mod network;
mod session;

use clap::Parser;
use log::{error, info};
use network::Server;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the realtime UDP socket to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// UDP port for the realtime protocol
    #[arg(short = 'p', long, default_value = "4004")]
    port: u16,

    /// TCP port for the HTTP bootstrap endpoint (PORT env overrides)
    #[arg(long, default_value = "4004")]
    http_port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let http_port = match std::env::var("PORT") {
        Ok(value) => value.parse().unwrap_or(args.http_port),
        Err(_) => args.http_port,
    };

    let mut server = Server::new(&format!("{}:{}", args.host, args.port)).await?;

    tokio::spawn(async move {
        if let Err(e) = http::serve(http_port).await {
            error!("HTTP endpoint failed: {}", e);
        }
    });

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
