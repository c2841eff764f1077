//! The wsrtunnel wire protocol: the two frame shapes exchanged as WebSocket
//! text messages over the single Gateway<->Agent link, and the small set of
//! helpers (body base64, hop-by-hop header stripping) both ends need to stay
//! in sync on. Shared by `gateway` and `agent` so the contract lives in one
//! place instead of two copies that could drift apart.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// One inbound HTTP exchange, framed for the trip Gateway -> Agent.
///
/// `headers` preserves the caller's exact header order, duplicates included;
/// `data` is the request body, base64-encoded, empty string for no body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub guid: String,
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub data: String,
}

/// The paired reply, framed for the trip Agent -> Gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub guid: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub content: String,
}

/// Headers defined to apply only to a single transport hop; stripped from a
/// ResponseFrame's headers before it is forwarded to the original HTTP caller.
pub const HOP_BY_HOP_HEADERS: [&str; 6] = [
    "connection",
    "keep-alive",
    "public",
    "proxy-authenticate",
    "transfer-encoding",
    "upgrade",
];

/// Case-insensitive membership test against [`HOP_BY_HOP_HEADERS`].
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hbh| name.eq_ignore_ascii_case(hbh))
}

/// Encode raw octets as the frame's base64 body representation.
pub fn encode_body(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64 body: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Decode a frame's base64 body back to raw octets. Tolerates a trailing
/// newline (some base64 encoders, notably Python's `binascii.b2a_base64`,
/// append one).
pub fn decode_body(data: &str) -> Result<Vec<u8>, DecodeError> {
    STANDARD.decode(data.trim_end()).map_err(DecodeError::from)
}
