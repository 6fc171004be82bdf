//! Client Registry (spec §4.3) — client id → client record map, plus the
//! pending-admission queue. Mirrors [`crate::channel_registry::ChannelRegistry`]'s
//! DashMap-of-RwLock shape.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::models::{
    ChannelId, Client, ClientId, ClientSnapshot, ClientStatus, PermissionMatrix, PermissionPatch,
    SessionHandle, UserSettings,
};

pub struct ClientRegistry {
    clients: DashMap<ClientId, RwLock<Client>>,
    /// Ids awaiting admin authorize/reject, in arrival order.
    pending: RwLock<Vec<ClientId>>,
}

impl ClientRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: DashMap::new(),
            pending: RwLock::new(Vec::new()),
        })
    }

    /// Enrolls a freshly-authenticated client in `Pending` status, queued
    /// for admin authorization (spec §4.6/§8-S1).
    pub async fn enroll_pending(&self, display_name: String, session_handle: SessionHandle) -> ClientId {
        let id = ClientId::new_v7();
        self.clients.insert(
            id,
            RwLock::new(Client {
                id,
                display_name,
                session_handle: Some(session_handle),
                admin_flag: false,
                status: ClientStatus::Pending,
                channels: Vec::new(),
                permissions: PermissionMatrix::default(),
                user_settings: Default::default(),
            }),
        );
        self.pending.write().await.push(id);
        id
    }

    /// Enrolls an admin-authenticated client directly in `Active` status
    /// with unrestricted speak/listen rights — no admission step needed.
    pub async fn enroll_admin(&self, display_name: String, session_handle: SessionHandle) -> ClientId {
        let id = ClientId::new_v7();
        self.clients.insert(
            id,
            RwLock::new(Client {
                id,
                display_name,
                session_handle: Some(session_handle),
                admin_flag: true,
                status: ClientStatus::Active,
                channels: Vec::new(),
                permissions: PermissionMatrix {
                    speak_to_all: true,
                    listen_to_all: true,
                    ..Default::default()
                },
                user_settings: Default::default(),
            }),
        );
        id
    }

    /// Moves a pending client to `Active` and grants the given permissions.
    /// `Conflict` if the client isn't currently pending.
    pub async fn authorize(&self, id: ClientId, permissions: PermissionMatrix) -> AppResult<()> {
        let entry = self.get_entry(id)?;
        let mut client = entry.write().await;
        if client.status != ClientStatus::Pending {
            return Err(AppError::Conflict(format!("client {id} is not pending")));
        }
        client.status = ClientStatus::Active;
        client.permissions = permissions;
        drop(client);
        self.pending.write().await.retain(|pending_id| *pending_id != id);
        Ok(())
    }

    /// Rejects a pending client, closing it outright. Rejecting a client
    /// that isn't queued (already authorized/rejected, or never pending)
    /// is `NotFound` — authorize-then-reject is a no-op on the second
    /// call, not a conflict.
    pub async fn reject(&self, id: ClientId) -> AppResult<()> {
        if !self.pending.read().await.contains(&id) {
            return Err(AppError::NotFound(format!("client {id} is not pending")));
        }
        let entry = self.get_entry(id)?;
        entry.write().await.status = ClientStatus::Closed;
        self.pending.write().await.retain(|pending_id| *pending_id != id);
        Ok(())
    }

    pub async fn update_permissions(&self, id: ClientId, patch: PermissionPatch) -> AppResult<()> {
        let entry = self.get_entry(id)?;
        entry.write().await.permissions.apply_patch(patch);
        Ok(())
    }

    /// Adds the client to a channel's membership list and seeds default
    /// per-channel user settings. No-op (not an error) if already a member.
    pub async fn add_to_channel(&self, id: ClientId, channel: ChannelId) -> AppResult<()> {
        let entry = self.get_entry(id)?;
        let mut client = entry.write().await;
        if !client.channels.contains(&channel) {
            client.channels.push(channel);
            client.user_settings.entry(channel).or_insert_with(UserSettings::default);
        }
        Ok(())
    }

    pub async fn remove_from_channel(&self, id: ClientId, channel: ChannelId) -> AppResult<()> {
        let entry = self.get_entry(id)?;
        let mut client = entry.write().await;
        client.channels.retain(|c| *c != channel);
        client.user_settings.remove(&channel);
        Ok(())
    }

    pub async fn set_channel_mute(&self, id: ClientId, channel: ChannelId, muted: bool) -> AppResult<()> {
        let entry = self.get_entry(id)?;
        let mut client = entry.write().await;
        if !client.channels.contains(&channel) {
            return Err(AppError::NotFound(format!("client {id} is not a member of channel {channel}")));
        }
        client.user_settings.entry(channel).or_insert_with(UserSettings::default).muted = muted;
        Ok(())
    }

    pub async fn set_channel_volume(&self, id: ClientId, channel: ChannelId, volume: f32) -> AppResult<()> {
        let entry = self.get_entry(id)?;
        let mut client = entry.write().await;
        if !client.channels.contains(&channel) {
            return Err(AppError::NotFound(format!("client {id} is not a member of channel {channel}")));
        }
        client.user_settings.entry(channel).or_insert_with(UserSettings::default).volume =
            UserSettings::with_volume_clamped(volume);
        Ok(())
    }

    /// Marks a client `Closed` and returns the set of channels it was a
    /// member of, so the caller (routing core) can tear down its producers
    /// and consumers (spec §8-S6).
    pub async fn close(&self, id: ClientId) -> AppResult<Vec<ChannelId>> {
        let entry = self.get_entry(id)?;
        let mut client = entry.write().await;
        client.status = ClientStatus::Closed;
        let channels = std::mem::take(&mut client.channels);
        client.user_settings.clear();
        drop(client);
        self.pending.write().await.retain(|pending_id| *pending_id != id);
        Ok(channels)
    }

    pub async fn get(&self, id: ClientId) -> AppResult<Client> {
        let entry = self.get_entry(id)?;
        Ok(entry.read().await.clone())
    }

    pub async fn snapshot(&self, id: ClientId) -> AppResult<ClientSnapshot> {
        let entry = self.get_entry(id)?;
        Ok(ClientSnapshot::from(&*entry.read().await))
    }

    pub async fn find_by_session(&self, session_handle: SessionHandle) -> Option<ClientId> {
        for entry in self.clients.iter() {
            if entry.value().read().await.session_handle == Some(session_handle) {
                return Some(*entry.key());
            }
        }
        None
    }

    pub async fn pending_ids(&self) -> Vec<ClientId> {
        self.pending.read().await.clone()
    }

    /// All currently-active client ids — used for registry-wide fan-out
    /// events (`channelCreated`/`channelUpdated`/`channelDeleted`) that
    /// aren't scoped to one channel's membership.
    pub async fn active_ids(&self) -> Vec<ClientId> {
        let mut ids = Vec::new();
        for entry in self.clients.iter() {
            if entry.value().read().await.status == ClientStatus::Active {
                ids.push(*entry.key());
            }
        }
        ids
    }

    pub async fn active_admin_ids(&self) -> Vec<ClientId> {
        let mut ids = Vec::new();
        for entry in self.clients.iter() {
            let client = entry.value().read().await;
            if client.status == ClientStatus::Active && client.admin_flag {
                ids.push(client.id);
            }
        }
        ids
    }

    pub async fn channel_members(&self, channel: ChannelId) -> HashSet<ClientId> {
        let mut members = HashSet::new();
        for entry in self.clients.iter() {
            let client = entry.value().read().await;
            if client.status == ClientStatus::Active && client.channels.contains(&channel) {
                members.insert(client.id);
            }
        }
        members
    }

    fn get_entry(&self, id: ClientId) -> AppResult<dashmap::mapref::one::Ref<'_, ClientId, RwLock<Client>>> {
        self.clients
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("client {id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_client_is_queued_and_authorize_activates_it() {
        let registry = ClientRegistry::new();
        let id = registry.enroll_pending("alice".into(), SessionHandle::new()).await;
        assert_eq!(registry.pending_ids().await, vec![id]);

        registry.authorize(id, PermissionMatrix::default()).await.unwrap();
        assert!(registry.pending_ids().await.is_empty());
        assert_eq!(registry.get(id).await.unwrap().status, ClientStatus::Active);
    }

    #[tokio::test]
    async fn authorizing_a_non_pending_client_is_a_conflict() {
        let registry = ClientRegistry::new();
        let id = registry.enroll_pending("alice".into(), SessionHandle::new()).await;
        registry.authorize(id, PermissionMatrix::default()).await.unwrap();
        let err = registry.authorize(id, PermissionMatrix::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn reject_closes_and_dequeues() {
        let registry = ClientRegistry::new();
        let id = registry.enroll_pending("alice".into(), SessionHandle::new()).await;
        registry.reject(id).await.unwrap();
        assert!(registry.pending_ids().await.is_empty());
        assert_eq!(registry.get(id).await.unwrap().status, ClientStatus::Closed);
    }

    #[tokio::test]
    async fn rejecting_an_already_authorized_client_is_not_found() {
        let registry = ClientRegistry::new();
        let id = registry.enroll_pending("alice".into(), SessionHandle::new()).await;
        registry.authorize(id, PermissionMatrix::default()).await.unwrap();
        let err = registry.reject(id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn channel_membership_seeds_and_clears_user_settings() {
        let registry = ClientRegistry::new();
        let id = registry.enroll_admin("bob".into(), SessionHandle::new()).await;
        let channel = ChannelId::new_v4();

        registry.add_to_channel(id, channel).await.unwrap();
        let client = registry.get(id).await.unwrap();
        assert!(client.user_settings.contains_key(&channel));

        registry.set_channel_volume(id, channel, 2.0).await.unwrap();
        let client = registry.get(id).await.unwrap();
        assert_eq!(client.user_settings[&channel].volume, 1.0);

        registry.remove_from_channel(id, channel).await.unwrap();
        let client = registry.get(id).await.unwrap();
        assert!(!client.user_settings.contains_key(&channel));
        assert!(!client.channels.contains(&channel));
    }

    #[tokio::test]
    async fn close_returns_former_channels_and_dequeues_pending() {
        let registry = ClientRegistry::new();
        let id = registry.enroll_pending("carol".into(), SessionHandle::new()).await;
        let channel = ChannelId::new_v4();
        registry.authorize(id, PermissionMatrix::default()).await.unwrap();
        registry.add_to_channel(id, channel).await.unwrap();

        let former = registry.close(id).await.unwrap();
        assert_eq!(former, vec![channel]);
        assert_eq!(registry.get(id).await.unwrap().status, ClientStatus::Closed);
    }

    #[tokio::test]
    async fn find_by_session_locates_the_owning_client() {
        let registry = ClientRegistry::new();
        let handle = SessionHandle::new();
        let id = registry.enroll_admin("dora".into(), handle).await;
        assert_eq!(registry.find_by_session(handle).await, Some(id));
        assert_eq!(registry.find_by_session(SessionHandle::new()).await, None);
    }
}
