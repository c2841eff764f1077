//! Gateway-internal error taxonomy (§7 of the spec). HTTP-facing outcomes
//! (502/409) are still encoded directly as `axum` responses in `handlers`;
//! these variants exist for the cases callers actually need to match on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no agent connected")]
    NoAgent,
    #[error("agent websocket send failed")]
    TransportLoss,
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}
