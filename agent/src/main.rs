use clap::Parser;
use tracing_subscriber::EnvFilter;

/// wsrtunnel agent: dials the Gateway's WebSocket and replays framed
/// requests against an internal target service.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Gateway WebSocket URL, e.g. wss://public.example/_ws
    #[arg(long)]
    gateway_url: String,

    /// Base URL of the internal target service, e.g. http://10.0.0.5:8080
    #[arg(long)]
    service_url: String,

    /// HTTP CONNECT proxy used for the outbound gateway dial.
    #[arg(long)]
    gateway_proxy_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    agent::run(
        &args.gateway_url,
        &args.service_url,
        args.gateway_proxy_url.as_deref(),
    )
    .await
}
