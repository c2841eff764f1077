//! Outbound WebSocket dial, optionally tunnelled through an HTTP CONNECT
//! proxy (§10.5). `tokio-tungstenite` has no native HTTP-proxy support, so
//! when a proxy is configured this opens the plain TCP connection itself,
//! negotiates the CONNECT tunnel by hand, and only then hands the stream to
//! tungstenite for the (possibly TLS) WebSocket handshake.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::AgentError;

pub type GatewayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connect to `gateway_url`, routing through `proxy_url` (an `http://host:port`
/// CONNECT proxy) when given, direct otherwise.
pub async fn connect(
    gateway_url: &str,
    proxy_url: Option<&str>,
) -> Result<GatewayStream, AgentError> {
    match proxy_url {
        None => {
            let (stream, _) = tokio_tungstenite::connect_async(gateway_url).await?;
            Ok(stream)
        }
        Some(proxy_url) => connect_via_proxy(gateway_url, proxy_url).await,
    }
}

async fn connect_via_proxy(
    gateway_url: &str,
    proxy_url: &str,
) -> Result<GatewayStream, AgentError> {
    let target = Url::parse(gateway_url).map_err(|e| AgentError::InvalidUrl(e.to_string()))?;
    let host = target
        .host_str()
        .ok_or_else(|| AgentError::InvalidUrl("gateway url has no host".to_string()))?
        .to_string();
    let port = target
        .port_or_known_default()
        .ok_or_else(|| AgentError::InvalidUrl("gateway url has no resolvable port".to_string()))?;

    let proxy = Url::parse(proxy_url).map_err(|e| AgentError::InvalidUrl(e.to_string()))?;
    let proxy_host = proxy
        .host_str()
        .ok_or_else(|| AgentError::InvalidUrl("proxy url has no host".to_string()))?;
    let proxy_port = proxy
        .port_or_known_default()
        .ok_or_else(|| AgentError::InvalidUrl("proxy url has no resolvable port".to_string()))?;

    let tcp = TcpStream::connect((proxy_host, proxy_port)).await?;
    let tunnelled = negotiate_connect(tcp, &host, port).await?;

    let request = gateway_url.into_client_request()?;
    let (stream, _) = tokio_tungstenite::client_async_tls(request, tunnelled).await?;
    Ok(stream)
}

/// Issue `CONNECT host:port HTTP/1.1` on an already-open proxy connection and
/// return the raw stream once the proxy answers with a `2xx` status line.
async fn negotiate_connect(mut tcp: TcpStream, host: &str, port: u16) -> Result<TcpStream, AgentError> {
    let request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n");
    tcp.write_all(request.as_bytes()).await?;

    {
        let mut reader = BufReader::new(&mut tcp);
        let mut status_line = String::new();
        reader.read_line(&mut status_line).await?;

        let status = parse_connect_status(&status_line)?;
        if !(200..300).contains(&status) {
            return Err(AgentError::ProxyRejected(status));
        }

        // Drain the remaining header lines up to the blank line that ends
        // the CONNECT response; the tunnelled protocol's first bytes start
        // right after it.
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await?;
            if n == 0 || line == "\r\n" || line == "\n" {
                break;
            }
        }
    }

    Ok(tcp)
}

fn parse_connect_status(status_line: &str) -> Result<u16, AgentError> {
    status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or(AgentError::ProxyRejected(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn accepts_a_2xx_connect_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]);
            assert!(request.starts_with("CONNECT example.internal:443 HTTP/1.1"));
            socket
                .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                .await
                .unwrap();
            socket
        });

        let tcp = TcpStream::connect(addr).await.unwrap();
        let tunnelled = negotiate_connect(tcp, "example.internal", 443).await.unwrap();
        drop(tunnelled);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_a_non_2xx_connect_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let tcp = TcpStream::connect(addr).await.unwrap();
        let err = negotiate_connect(tcp, "example.internal", 443).await.unwrap_err();
        assert!(matches!(err, AgentError::ProxyRejected(407)));
    }
}
