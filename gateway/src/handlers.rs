//! HTTP surface: the catch-all proxy route (§4.1) and the `/_ws` Agent
//! upgrade endpoint (§4.2).

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{
        ws::{Message, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use futures::StreamExt;
use tokio::time::timeout;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;
use wire::{decode_body, encode_body, is_hop_by_hop, RequestFrame, ResponseFrame};

use crate::state::{AgentSession, GatewayState};

/// Gateway holds each HTTP caller waiting on its ResponseFrame for this long
/// before treating the exchange as lost (§5).
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(600);

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/_ws", get(ws_upgrade_handler))
        .route("/", any(proxy_handler))
        .route("/*path", any(proxy_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The catch-all proxied route: mints a RequestFrame, hands it to the
/// attached Agent, and waits for the matching ResponseFrame.
async fn proxy_handler(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.has_agent().await {
        return service_not_available();
    }

    let guid = Uuid::new_v4().to_string();
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());

    let header_pairs: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let frame = RequestFrame {
        guid: guid.clone(),
        method: method.as_str().to_string(),
        path,
        headers: header_pairs,
        data: encode_body(&body),
    };

    let payload = match serde_json::to_string(&frame) {
        Ok(payload) => payload,
        Err(e) => {
            error!(guid = %guid, error = %e, "failed to encode request frame");
            return internal_error("failed to encode request");
        }
    };

    // Register before sending, so a ResponseFrame that arrives "immediately"
    // can never race ahead of the pending-table entry it needs to find (§4.1
    // step 3).
    let rx = state.register(guid.clone());

    if state.send_request(payload).await.is_err() {
        state.unregister(&guid);
        return service_not_available();
    }

    let outcome = timeout(EXCHANGE_TIMEOUT, rx).await;
    // Guaranteed removal on every exit path (§3 Lifecycles): a no-op if
    // `deliver` already consumed this guid.
    state.unregister(&guid);

    match outcome {
        Ok(Ok(response_frame)) => build_response(response_frame),
        Ok(Err(_)) => {
            warn!(guid = %guid, "agent detached before completing this exchange");
            service_not_available()
        }
        Err(_) => {
            warn!(guid = %guid, "exchange timed out after {}s", EXCHANGE_TIMEOUT.as_secs());
            (StatusCode::GATEWAY_TIMEOUT, "exchange timed out").into_response()
        }
    }
}

/// Translate a ResponseFrame into the HTTP response the original caller
/// sees: status, ordered headers minus hop-by-hop, decoded body (§4.1).
fn build_response(frame: ResponseFrame) -> Response {
    let status = StatusCode::from_u16(frame.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let body = match decode_body(&frame.content) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(guid = %frame.guid, error = %e, "failed to decode response body");
            return internal_error("failed to decode response body");
        }
    };

    let mut builder = Response::builder().status(status);
    for (name, value) in frame.headers.iter().filter(|(name, _)| !is_hop_by_hop(name)) {
        builder = builder.header(name, value);
    }

    match builder.body(Body::from(body)) {
        Ok(response) => response,
        Err(e) => {
            error!(guid = %frame.guid, error = %e, "failed to build response");
            internal_error("failed to build response")
        }
    }
}

/// `/_ws`: admit at most one Agent (§4.2). Rejected before the upgrade
/// completes so a second Agent sees a handshake error, not a silent drop.
async fn ws_upgrade_handler(
    State(state): State<Arc<GatewayState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let guard = match GatewayState::try_reserve(Arc::clone(&state)) {
        Some(guard) => guard,
        None => {
            warn!("denying new agent, one already connected");
            return (
                StatusCode::CONFLICT,
                "409 - Other client already connected",
            )
                .into_response();
        }
    };

    // `disarm()` runs only if this callback is actually invoked, i.e. the
    // handshake completed; a failed or abandoned handshake drops `guard`
    // still armed, releasing the reservation instead of bricking it (§4.2).
    ws.on_upgrade(move |socket| {
        guard.disarm();
        handle_agent_socket(socket, state)
    })
    .into_response()
}

/// The fan-in loop (§4.2): attach the session, read ResponseFrames until the
/// socket closes or errors, then detach unconditionally.
async fn handle_agent_socket(socket: axum::extract::ws::WebSocket, state: Arc<GatewayState>) {
    let (sender, mut receiver) = socket.split();
    state.attach_agent(AgentSession::new(sender)).await;
    info!("agent attached");

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ResponseFrame>(&text) {
                Ok(frame) => state.deliver(frame),
                Err(e) => warn!(error = %e, "failed to decode response frame, discarding"),
            },
            Ok(Message::Close(_)) => {
                info!("agent closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "agent websocket error");
                break;
            }
        }
    }

    state.detach_agent().await;
    info!("agent detached");
}

fn service_not_available() -> Response {
    (StatusCode::BAD_GATEWAY, "502 - Service not available").into_response()
}

fn internal_error(message: &'static str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
}
