//! Channel Registry (spec §4.2) — in-memory channel id → channel record
//! map. One always-present, undeletable system channel; every mutation
//! is a single short critical section per channel, consistent with the
//! no-I/O-under-lock rule in spec §5.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::models::{Channel, ChannelId, ChannelSnapshot, ClientId, ProducerId, SYSTEM_CHANNEL_NAME};

pub struct ChannelRegistry {
    channels: DashMap<ChannelId, RwLock<Channel>>,
    system_channel_id: ChannelId,
}

impl ChannelRegistry {
    /// Creates the registry with its one always-present system channel.
    pub fn new() -> Arc<Self> {
        let system_channel_id = ChannelId::new_v7();
        let channels = DashMap::new();
        channels.insert(
            system_channel_id,
            RwLock::new(Channel {
                id: system_channel_id,
                name: SYSTEM_CHANNEL_NAME.to_string(),
                description: "Always-present default channel".to_string(),
                members: Default::default(),
                producers: Default::default(),
                protected: true,
            }),
        );

        Arc::new(Self {
            channels,
            system_channel_id,
        })
    }

    pub fn system_channel_id(&self) -> ChannelId {
        self.system_channel_id
    }

    pub fn create(&self, name: String, description: String) -> ChannelId {
        let id = ChannelId::new_v7();
        self.channels.insert(
            id,
            RwLock::new(Channel {
                id,
                name,
                description,
                members: Default::default(),
                producers: Default::default(),
                protected: false,
            }),
        );
        id
    }

    pub async fn update_metadata(
        &self,
        id: ChannelId,
        name: Option<String>,
        description: Option<String>,
    ) -> AppResult<()> {
        let entry = self.get_entry(id)?;
        let mut channel = entry.write().await;
        if let Some(name) = name {
            channel.name = name;
        }
        if let Some(description) = description {
            channel.description = description;
        }
        Ok(())
    }

    /// Deletion is rejected for the system channel (`ProtectedChannel`,
    /// surfaced here as `Conflict` per spec §7/§8-S4).
    pub fn delete(&self, id: ChannelId) -> AppResult<()> {
        if id == self.system_channel_id {
            return Err(AppError::Conflict("cannot delete the system channel".into()));
        }
        self.channels
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("channel {id} not found")))
    }

    pub async fn add_member(&self, id: ChannelId, client: ClientId) -> AppResult<()> {
        let entry = self.get_entry(id)?;
        entry.write().await.members.insert(client);
        Ok(())
    }

    pub async fn remove_member(&self, id: ChannelId, client: ClientId) -> AppResult<()> {
        let entry = self.get_entry(id)?;
        entry.write().await.members.remove(&client);
        Ok(())
    }

    pub async fn add_producer(&self, id: ChannelId, producer: ProducerId) -> AppResult<()> {
        let entry = self.get_entry(id)?;
        entry.write().await.producers.insert(producer);
        Ok(())
    }

    pub async fn remove_producer(&self, id: ChannelId, producer: ProducerId) -> AppResult<()> {
        let entry = self.get_entry(id)?;
        entry.write().await.producers.remove(&producer);
        Ok(())
    }

    pub async fn get(&self, id: ChannelId) -> AppResult<ChannelSnapshot> {
        let entry = self.get_entry(id)?;
        Ok(ChannelSnapshot::from(&*entry.read().await))
    }

    pub async fn list(&self) -> Vec<ChannelSnapshot> {
        let mut snapshots = Vec::with_capacity(self.channels.len());
        for entry in self.channels.iter() {
            snapshots.push(ChannelSnapshot::from(&*entry.value().read().await));
        }
        snapshots
    }

    pub async fn exists(&self, id: ChannelId) -> bool {
        self.channels.contains_key(&id)
    }

    pub async fn is_member(&self, id: ChannelId, client: ClientId) -> bool {
        match self.channels.get(&id) {
            Some(entry) => entry.read().await.members.contains(&client),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    fn get_entry(&self, id: ChannelId) -> AppResult<dashmap::mapref::one::Ref<'_, ChannelId, RwLock<Channel>>> {
        self.channels
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("channel {id} not found")))
    }
}
