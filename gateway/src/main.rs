use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// wsrtunnel gateway: the publicly reachable process accepting HTTP callers
/// and one Agent, multiplexing HTTP exchanges over that single WebSocket.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// UNIX domain socket path to bind.
    #[arg(long, default_value = "/tmp/wsrtunnel.sock")]
    path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    gateway::run(&args.path).await
}
