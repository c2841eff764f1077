//! The wsrtunnel Agent: dials the Gateway's WebSocket, and for each framed
//! request performs the matching call against the configured target
//! service. See SPEC_FULL.md §4.3 for the protocol this implements.

pub mod dial;
pub mod error;
mod exchange;

/// The wire frame types, re-exported under the name this library's own
/// surface uses for them.
pub use wire as frame;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{error, info, warn};
use url::Url;
use wire::RequestFrame;

use error::AgentError;

/// Fixed reconnect delay on any connection failure (§5) — no backoff, no jitter.
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Run the Agent until the process receives Ctrl-C: forever attempt to
/// connect to `gateway_url`, and while connected, dispatch every inbound
/// RequestFrame against `service_url` concurrently.
pub async fn run(gateway_url: &str, service_url: &str, proxy_url: Option<&str>) -> anyhow::Result<()> {
    let target_host = target_host(service_url)?;
    let client = build_target_client()?;

    loop {
        tokio::select! {
            result = run_once(gateway_url, proxy_url, &client, service_url, &target_host) => {
                match result {
                    Ok(()) => info!("gateway connection closed, reconnecting"),
                    Err(e) => error!(error = %e, "connection attempt failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                return Ok(());
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received during reconnect delay");
                return Ok(());
            }
        }
    }
}

/// One connection attempt: dial, then loop dispatching RequestFrames until
/// the socket closes or errors. Each dispatch runs as its own task — per
/// §4.3 the Agent does not serialise exchanges — with the send half shared
/// behind a mutex so concurrent ResponseFrames never interleave on the wire.
async fn run_once(
    gateway_url: &str,
    proxy_url: Option<&str>,
    client: &reqwest::Client,
    service_url: &str,
    target_host: &str,
) -> Result<(), AgentError> {
    info!(gateway = %gateway_url, "connecting to gateway");
    let stream = dial::connect(gateway_url, proxy_url).await?;
    info!("connected to gateway");

    let (sink, mut stream) = stream.split();
    let sink = Arc::new(Mutex::new(sink));

    while let Some(message) = stream.next().await {
        match message? {
            Message::Text(text) => {
                let frame: RequestFrame = serde_json::from_str(&text)?;
                let client = client.clone();
                let service_url = service_url.to_string();
                let target_host = target_host.to_string();
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    let guid = frame.guid.clone();
                    if let Some(response) = exchange::dispatch(&client, &service_url, &target_host, frame).await {
                        match serde_json::to_string(&response) {
                            Ok(payload) => {
                                if let Err(e) = sink.lock().await.send(Message::Text(payload)).await {
                                    warn!(guid = %guid, error = %e, "failed to send response frame");
                                }
                            }
                            Err(e) => warn!(guid = %guid, error = %e, "failed to encode response frame"),
                        }
                    }
                });
            }
            Message::Ping(data) => {
                if let Err(e) = sink.lock().await.send(Message::Pong(data)).await {
                    warn!(error = %e, "failed to send pong");
                }
            }
            Message::Close(_) => {
                info!("gateway closed the connection");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}

/// Build the one `reqwest::Client` used for every target-service call, with
/// TLS verification disabled (§9 decision 2) — isolated here rather than a
/// process-wide setting.
fn build_target_client() -> Result<reqwest::Client, AgentError> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| AgentError::InvalidUrl(e.to_string()))
}

/// The `Host` header value to present to the target service: host plus
/// non-default port, exactly as it would appear addressed directly.
fn target_host(service_url: &str) -> Result<String, AgentError> {
    let url = Url::parse(service_url).map_err(|e| AgentError::InvalidUrl(e.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| AgentError::InvalidUrl("service url has no host".to_string()))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_host_includes_explicit_port() {
        assert_eq!(target_host("http://10.0.0.5:8080").unwrap(), "10.0.0.5:8080");
    }

    #[test]
    fn target_host_omits_default_port() {
        assert_eq!(target_host("http://internal.example").unwrap(), "internal.example");
    }
}
