//! The Gateway's process-singleton state: the pending-exchange table and the
//! one attached Agent's WebSocket session. Every mutation goes through a
//! method on [`GatewayState`]; nothing outside this module touches the inner
//! maps directly (§9's "global state" design note).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::{stream::SplitSink, SinkExt};
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::warn;
use wire::ResponseFrame;

use crate::error::GatewayError;

/// One in-flight HTTP exchange, identified by its `guid`, waiting on the
/// matching ResponseFrame. Resolved exactly once, by [`GatewayState::deliver`]
/// or dropped on timeout (§5's completion-signal contract).
struct PendingExchange {
    complete: oneshot::Sender<ResponseFrame>,
}

/// The attached Agent's outbound WebSocket half, guarded by a send mutex so
/// concurrently dispatched RequestFrames never interleave on the wire.
pub struct AgentSession {
    sender: Mutex<SplitSink<WebSocket, Message>>,
}

impl AgentSession {
    pub fn new(sender: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }

    async fn send_text(&self, text: String) -> Result<(), axum::Error> {
        self.sender.lock().await.send(Message::Text(text)).await
    }
}

/// The Gateway's process-wide pending-exchange table and attached-agent slot.
pub struct GatewayState {
    pending: DashMap<String, PendingExchange>,
    agent: RwLock<Option<AgentSession>>,
    /// Reservation flag for admission control (§4.2): flipped true the
    /// instant a `/_ws` upgrade is accepted, before the socket handshake
    /// completes, so a second concurrent upgrade attempt is rejected rather
    /// than racing to attach.
    occupied: AtomicBool,
}

impl GatewayState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: DashMap::new(),
            agent: RwLock::new(None),
            occupied: AtomicBool::new(false),
        })
    }

    /// Atomically reserve the single Agent slot. Returns `None` if a session
    /// is already reserved or attached — the caller should answer with `409`
    /// before attempting the WS upgrade. On success, returns a guard that
    /// releases the reservation if dropped before `disarm()` is called, so a
    /// handshake that fails (or whose `on_upgrade` callback is never invoked)
    /// doesn't leave the slot stuck occupied forever.
    pub fn try_reserve(state: Arc<Self>) -> Option<ReservationGuard> {
        state
            .occupied
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ReservationGuard {
                state,
                armed: true,
            })
    }

    /// Attach the now-established Agent session. Must follow a successful
    /// `try_reserve`.
    pub async fn attach_agent(&self, session: AgentSession) {
        *self.agent.write().await = Some(session);
    }

    /// Detach the Agent session on transport loss or clean close, freeing the
    /// slot for a future Agent. Pending exchanges are deliberately left
    /// untouched here — see SPEC_FULL.md §9, decision 1.
    pub async fn detach_agent(&self) {
        *self.agent.write().await = None;
        self.occupied.store(false, Ordering::Release);
    }

    pub async fn has_agent(&self) -> bool {
        self.agent.read().await.is_some()
    }

    /// Send a JSON-encoded RequestFrame to the attached Agent, if any.
    pub async fn send_request(&self, text: String) -> Result<(), GatewayError> {
        let slot = self.agent.read().await;
        match slot.as_ref() {
            Some(session) => session
                .send_text(text)
                .await
                .map_err(|_| GatewayError::TransportLoss),
            None => Err(GatewayError::NoAgent),
        }
    }

    /// Register a new pending exchange, returning the receiver half the HTTP
    /// handler awaits with its 600s deadline.
    pub fn register(&self, guid: String) -> oneshot::Receiver<ResponseFrame> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(guid, PendingExchange { complete: tx });
        rx
    }

    /// Remove a pending exchange unconditionally (used on the timeout path;
    /// a no-op if `deliver` already removed it, which is the point).
    pub fn unregister(&self, guid: &str) {
        self.pending.remove(guid);
    }

    /// Deliver a ResponseFrame to its matching pending exchange. An unknown
    /// `guid` is logged at warning and discarded — not an error (§7, UnknownId).
    pub fn deliver(&self, frame: ResponseFrame) {
        match self.pending.remove(&frame.guid) {
            Some((_, pending)) => {
                let _ = pending.complete.send(frame);
            }
            None => {
                warn!(guid = %frame.guid, "response with unknown id, discarding");
            }
        }
    }
}

/// RAII guard for a reservation made by [`GatewayState::try_reserve`].
/// Disarm it once the reservation has been handed off to a real
/// `attach_agent` call, whose own `detach_agent` becomes responsible for
/// clearing `occupied` from then on. While still armed, dropping the guard
/// releases the reservation — this is what keeps a WebSocket handshake that
/// fails (or a callback `on_upgrade` never invokes) from bricking admission
/// for every Agent that tries to connect afterwards (§4.2).
pub struct ReservationGuard {
    state: Arc<GatewayState>,
    armed: bool,
}

impl ReservationGuard {
    /// Hand responsibility for releasing the reservation to `detach_agent`.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!("agent websocket upgrade did not complete, releasing reservation");
            self.state.occupied.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reservation_is_exclusive() {
        let state = GatewayState::new();
        assert!(GatewayState::try_reserve(Arc::clone(&state)).is_some());
        assert!(GatewayState::try_reserve(Arc::clone(&state)).is_none());
    }

    #[tokio::test]
    async fn dropping_an_undisarmed_guard_releases_the_reservation() {
        let state = GatewayState::new();
        {
            let _guard = GatewayState::try_reserve(Arc::clone(&state)).unwrap();
            assert!(GatewayState::try_reserve(Arc::clone(&state)).is_none());
        }
        assert!(GatewayState::try_reserve(Arc::clone(&state)).is_some());
    }

    #[tokio::test]
    async fn disarming_a_guard_keeps_the_slot_occupied() {
        let state = GatewayState::new();
        let guard = GatewayState::try_reserve(Arc::clone(&state)).unwrap();
        guard.disarm();
        assert!(GatewayState::try_reserve(Arc::clone(&state)).is_none());
    }

    #[tokio::test]
    async fn unknown_response_id_is_discarded_not_panicking() {
        let state = GatewayState::new();
        state.deliver(ResponseFrame {
            guid: "does-not-exist".to_string(),
            status: 200,
            headers: vec![],
            content: String::new(),
        });
    }

    #[tokio::test]
    async fn register_then_deliver_resolves_the_receiver() {
        let state = GatewayState::new();
        let rx = state.register("abc".to_string());
        state.deliver(ResponseFrame {
            guid: "abc".to_string(),
            status: 200,
            headers: vec![("X-Test".to_string(), "1".to_string())],
            content: String::new(),
        });
        let frame = rx.await.unwrap();
        assert_eq!(frame.status, 200);
        state.unregister("abc");
    }

    #[tokio::test]
    async fn unregister_after_timeout_is_a_guaranteed_cleanup_even_without_delivery() {
        let state = GatewayState::new();
        let _rx = state.register("timed-out".to_string());
        state.unregister("timed-out");
        assert!(state.pending.is_empty());
    }
}
