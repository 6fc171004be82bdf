//! Per-session event fan-out (spec §4.5) — the one place that turns a
//! [`WireEvent`]/[`WireResponse`] into a framed WebSocket message and
//! hands it to a session's forwarder task. Shared by the Signaling Layer
//! (which registers/unregisters sessions) and the Routing Core (which
//! fans events out as registry state changes).

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::models::{ClientId, WireEvent, WireResponse};

pub struct EventBus {
    /// Per-session outbound queue — the forwarder task owns the receiving
    /// half and writes frames to the physical socket in the order they're
    /// queued here, which is what gives per-channel event ordering (§5).
    senders: DashMap<ClientId, mpsc::UnboundedSender<Message>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            senders: DashMap::new(),
        }
    }

    pub fn register(&self, client: ClientId, sender: mpsc::UnboundedSender<Message>) {
        self.senders.insert(client, sender);
    }

    pub fn unregister(&self, client: ClientId) {
        self.senders.remove(&client);
    }

    pub fn send_response(&self, client: ClientId, response: &WireResponse) {
        self.send_text(client, response);
    }

    pub fn send_event(&self, client: ClientId, event: &WireEvent) {
        self.send_text(client, event);
    }

    fn send_text(&self, client: ClientId, payload: &impl serde::Serialize) {
        let Some(sender) = self.senders.get(&client) else {
            return;
        };
        let Ok(text) = serde_json::to_string(payload) else {
            tracing::error!(%client, "failed to serialize outgoing frame");
            return;
        };
        let _ = sender.send(Message::Text(text.into()));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
