//! Core domain types: channels, clients, the permission matrix, and the
//! wire-protocol envelopes/payloads carried over the signaling socket
//! (spec §3, §4.5, §6).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ─── Identifiers ────────────────────────────────────────────────────────────

/// Defines a `Uuid`-backed newtype so channel/client/transport/producer/
/// consumer ids can't be mixed up at compile time, mirroring the pattern
/// real mediasoup bindings use for their own id types.
macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(ChannelId);
id_type!(ClientId);
id_type!(TransportId);
id_type!(ProducerId);
id_type!(ConsumerId);

impl ClientId {
    pub fn new_v7() -> Self {
        Self(Uuid::now_v7())
    }
}

impl ChannelId {
    pub fn new_v7() -> Self {
        Self(Uuid::now_v7())
    }
}

// ─── Direction ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Speak,
    Listen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Receive,
}

// ─── Permission matrix ──────────────────────────────────────────────────────

/// Per-client talk/listen rights, global and per channel (spec §3). Does
/// not itself check channel membership — callers (the evaluator) combine
/// this with membership.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionMatrix {
    #[serde(default)]
    pub speak_to_all: bool,
    #[serde(default)]
    pub listen_to_all: bool,
    #[serde(default)]
    pub speak_to: HashMap<ChannelId, bool>,
    #[serde(default)]
    pub listen_to: HashMap<ChannelId, bool>,
}

impl PermissionMatrix {
    pub fn can_speak(&self, channel: ChannelId) -> bool {
        self.speak_to_all || self.speak_to.get(&channel).copied().unwrap_or(false)
    }

    pub fn can_listen(&self, channel: ChannelId) -> bool {
        self.listen_to_all || self.listen_to.get(&channel).copied().unwrap_or(false)
    }

    /// Apply a sparse patch (as sent by `updatePermissions`), leaving
    /// unspecified fields untouched.
    pub fn apply_patch(&mut self, patch: PermissionPatch) {
        if let Some(v) = patch.speak_to_all {
            self.speak_to_all = v;
        }
        if let Some(v) = patch.listen_to_all {
            self.listen_to_all = v;
        }
        for (channel, allowed) in patch.speak_to {
            self.speak_to.insert(channel, allowed);
        }
        for (channel, allowed) in patch.listen_to {
            self.listen_to.insert(channel, allowed);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionPatch {
    #[serde(default)]
    pub speak_to_all: Option<bool>,
    #[serde(default)]
    pub listen_to_all: Option<bool>,
    #[serde(default)]
    pub speak_to: HashMap<ChannelId, bool>,
    #[serde(default)]
    pub listen_to: HashMap<ChannelId, bool>,
}

// ─── Per-channel user settings ─────────────────────────────────────────────

/// What this client hears from a channel it belongs to. Never affects
/// producer state (spec §3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UserSettings {
    pub muted: bool,
    pub volume: f32,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            muted: false,
            volume: 1.0,
        }
    }
}

impl UserSettings {
    pub fn with_volume_clamped(volume: f32) -> f32 {
        volume.clamp(0.0, 1.0)
    }
}

// ─── Client ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Pending,
    Active,
    Closed,
}

/// A signaling session's identifying handle — opaque to everything but
/// the Signaling Layer, which uses it to find the live socket sender for
/// a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(pub Uuid);

impl SessionHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub display_name: String,
    pub session_handle: Option<SessionHandle>,
    pub admin_flag: bool,
    pub status: ClientStatus,
    /// Ordered set — insertion order is preserved, duplicates rejected.
    pub channels: Vec<ChannelId>,
    pub permissions: PermissionMatrix,
    pub user_settings: HashMap<ChannelId, UserSettings>,
}

impl Client {
    pub fn is_member_of(&self, channel: ChannelId) -> bool {
        self.channels.contains(&channel)
    }
}

/// Sanitized client projection handed to admins / other clients — never
/// exposes the permission matrix or session handle.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    pub id: ClientId,
    pub display_name: String,
    pub admin_flag: bool,
    pub status: ClientStatus,
    pub channels: Vec<ChannelId>,
}

impl From<&Client> for ClientSnapshot {
    fn from(c: &Client) -> Self {
        Self {
            id: c.id,
            display_name: c.display_name.clone(),
            admin_flag: c.admin_flag,
            status: c.status,
            channels: c.channels.clone(),
        }
    }
}

// ─── Channel ────────────────────────────────────────────────────────────────

pub const SYSTEM_CHANNEL_NAME: &str = "system";

#[derive(Debug, Clone)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub description: String,
    pub members: std::collections::HashSet<ClientId>,
    pub producers: std::collections::HashSet<ProducerId>,
    pub protected: bool,
}

/// Sanitized channel projection returned by `list`/`get` — ids, names,
/// descriptions, and member *counts*, never the internal sets (spec
/// §4.2).
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSnapshot {
    pub id: ChannelId,
    pub name: String,
    pub description: String,
    pub member_count: usize,
    pub producer_count: usize,
}

impl From<&Channel> for ChannelSnapshot {
    fn from(c: &Channel) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            description: c.description.clone(),
            member_count: c.members.len(),
            producer_count: c.producers.len(),
        }
    }
}

// ─── Wire envelope (spec §6) ────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct WireRequest {
    pub id: u64,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireResponse {
    pub id: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::error::ErrorKind>,
}

impl WireResponse {
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: crate::error::ErrorKind) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WireEvent {
    pub event: &'static str,
    pub payload: serde_json::Value,
}

impl WireEvent {
    pub fn new(event: &'static str, payload: impl Serialize) -> Self {
        Self {
            event,
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }
}
