use tokio_tungstenite::tungstenite;

/// Structurally distinct Agent failures, matched on by [`crate::run`]'s
/// reconnect loop and by `dial`'s proxy-negotiation path.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("websocket transport error: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("proxy connect failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("proxy rejected CONNECT with status {0}")]
    ProxyRejected(u16),
    #[error("request frame decode failed: {0}")]
    FrameDecode(#[from] serde_json::Error),
}
