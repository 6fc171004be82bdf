//! Audio Routing Core (spec §4.7) — keeps the producer/consumer graph
//! consistent with the permission matrix and channel membership, and
//! turns the Media Worker's active-speaker samples into
//! `clientSpeaking`/`clientStoppedSpeaking` fan-out.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::channel_registry::ChannelRegistry;
use crate::client_registry::ClientRegistry;
use crate::error::AppResult;
use crate::events::EventBus;
use crate::media::{MediaId, MediaWorker, SpeakingSample};
use crate::models::{ChannelId, ClientId, Direction, ProducerId, WireEvent};
use crate::permissions;

pub struct RoutingCore {
    channels: Arc<ChannelRegistry>,
    clients: Arc<ClientRegistry>,
    media: Arc<MediaWorker>,
    events: Arc<EventBus>,
    /// Client that owns each live producer.
    producer_owner: DashMap<ProducerId, ClientId>,
    /// Channels a producer is registered into (every channel its owner
    /// had *speak* in at the moment it was produced).
    producer_channels: DashMap<ProducerId, HashSet<ChannelId>>,
    /// (producer, subscriber) → consumer id, so closes can find the
    /// right consumer and duplicates are never created.
    consumers: DashMap<(ProducerId, ClientId), crate::models::ConsumerId>,
    /// Producers currently considered "speaking", with a pending
    /// hold-off task if they just dropped out of the latest sample.
    speaking: DashMap<ProducerId, ()>,
    pending_stops: DashMap<ProducerId, JoinHandle<()>>,
}

impl RoutingCore {
    pub fn new(
        channels: Arc<ChannelRegistry>,
        clients: Arc<ClientRegistry>,
        media: Arc<MediaWorker>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            channels,
            clients,
            media,
            events,
            producer_owner: DashMap::new(),
            producer_channels: DashMap::new(),
            consumers: DashMap::new(),
            speaking: DashMap::new(),
            pending_stops: DashMap::new(),
        })
    }

    /// Registers a producer the Media Worker has already created: attaches
    /// it to every channel its owner currently has *speak* in, and tells
    /// eligible listeners a new producer is available (`producerOpened`).
    pub async fn register_producer(&self, owner: ClientId, producer_id: ProducerId) -> AppResult<()> {
        let client = self.clients.get(owner).await?;
        let speakable: HashSet<ChannelId> = client
            .channels
            .iter()
            .copied()
            .filter(|c| permissions::allow(&client, *c, Direction::Speak))
            .collect();

        for channel in &speakable {
            self.channels.add_producer(*channel, producer_id).await?;
            self.notify_producer_opened(*channel, owner, producer_id).await;
        }

        self.producer_owner.insert(producer_id, owner);
        self.producer_channels.insert(producer_id, speakable);
        Ok(())
    }

    async fn notify_producer_opened(&self, channel: ChannelId, owner: ClientId, producer_id: ProducerId) {
        for subscriber in self.eligible_listeners(channel, owner).await {
            self.events.send_event(
                subscriber,
                &WireEvent::new(
                    "producerOpened",
                    serde_json::json!({ "producerId": producer_id, "clientId": owner, "channelId": channel }),
                ),
            );
        }
    }

    async fn eligible_listeners(&self, channel: ChannelId, exclude: ClientId) -> Vec<ClientId> {
        let mut out = Vec::new();
        for member in self.clients.channel_members(channel).await {
            if member == exclude {
                continue;
            }
            if let Ok(client) = self.clients.get(member).await {
                if permissions::allow(&client, channel, Direction::Listen) {
                    out.push(member);
                }
            }
        }
        out
    }

    /// Records a consumer the Signaling Layer just had the Media Worker
    /// create, keyed by (producer, subscriber) so later reconciliation
    /// can find and close it without creating a duplicate.
    pub fn register_consumer(&self, producer_id: ProducerId, subscriber: ClientId, consumer_id: crate::models::ConsumerId) {
        self.consumers.insert((producer_id, subscriber), consumer_id);
    }

    pub fn owner_of(&self, producer_id: ProducerId) -> Option<ClientId> {
        self.producer_owner.get(&producer_id).map(|e| *e.value())
    }

    /// Finds `owner`'s live producer registered in `channel`, if any —
    /// used to route `startSpeaking`/`stopSpeaking` advisories to the
    /// Media Worker's simulated level reporting.
    pub fn producer_for(&self, owner: ClientId, channel: ChannelId) -> Option<ProducerId> {
        self.producer_owner
            .iter()
            .filter(|e| *e.value() == owner)
            .map(|e| *e.key())
            .find(|producer_id| {
                self.producer_channels
                    .get(producer_id)
                    .map(|channels| channels.contains(&channel))
                    .unwrap_or(false)
            })
    }

    /// Channels in which `producer_id` is registered and `subscriber` has
    /// both membership and *listen* — i.e. the channels that justify a
    /// `consume` call for this pair. Empty means the call should fail
    /// `PermissionDenied` without ever reaching the Media Worker.
    pub fn permitted_channels_for(&self, producer_id: ProducerId, subscriber: &crate::models::Client) -> Vec<ChannelId> {
        self.producer_channels
            .get(&producer_id)
            .map(|channels| {
                channels
                    .iter()
                    .copied()
                    .filter(|c| permissions::allow(subscriber, *c, Direction::Listen))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Closes a producer: cascades through the Media Worker (which closes
    /// its consumers), detaches it from every channel registry entry, and
    /// notifies whoever held a consumer of it.
    pub async fn close_producer(&self, producer_id: ProducerId) -> AppResult<()> {
        let Some((_, owner)) = self.producer_owner.remove(&producer_id) else {
            return Ok(());
        };
        let channels = self.producer_channels.remove(&producer_id).map(|(_, c)| c).unwrap_or_default();

        let subscribers: Vec<ClientId> = self
            .consumers
            .iter()
            .filter(|entry| entry.key().0 == producer_id)
            .map(|entry| entry.key().1)
            .collect();
        for subscriber in &subscribers {
            self.consumers.remove(&(producer_id, *subscriber));
        }

        self.media.close(MediaId::Producer(producer_id)).await?;

        for channel in channels {
            self.channels.remove_producer(channel, producer_id).await?;
        }

        for subscriber in subscribers {
            self.events.send_event(
                subscriber,
                &WireEvent::new("producerClosed", serde_json::json!({ "producerId": producer_id, "clientId": owner })),
            );
        }

        self.speaking.remove(&producer_id);
        if let Some((_, handle)) = self.pending_stops.remove(&producer_id) {
            handle.abort();
        }
        Ok(())
    }

    /// Re-derives a client's speak-eligible channel set after a
    /// permission or membership change, closing the producer outright if
    /// it no longer has anywhere to speak, and closing any consumer the
    /// client subscribes to that it may no longer listen on.
    pub async fn reconcile_client(&self, client_id: ClientId) -> AppResult<()> {
        let client = match self.clients.get(client_id).await {
            Ok(c) => c,
            Err(_) => return Ok(()),
        };

        let owned_producers: Vec<ProducerId> = self
            .producer_owner
            .iter()
            .filter(|e| *e.value() == client_id)
            .map(|e| *e.key())
            .collect();
        for producer_id in owned_producers {
            let still_speakable = client
                .channels
                .iter()
                .any(|c| permissions::allow(&client, *c, Direction::Speak));
            if !still_speakable {
                self.close_producer(producer_id).await?;
            }
        }

        let subscribed: Vec<(ProducerId, crate::models::ConsumerId)> = self
            .consumers
            .iter()
            .filter(|e| e.key().1 == client_id)
            .map(|e| (e.key().0, *e.value()))
            .collect();
        for (producer_id, consumer_id) in subscribed {
            let still_allowed = self
                .producer_channels
                .get(&producer_id)
                .map(|channels| channels.iter().any(|c| permissions::allow(&client, *c, Direction::Listen)))
                .unwrap_or(false);
            if !still_allowed {
                self.consumers.remove(&(producer_id, client_id));
                self.media.close(MediaId::Consumer(consumer_id)).await?;
            }
        }
        Ok(())
    }

    /// Called on session close (spec §8-S6): closes every producer the
    /// client owned and every consumer it subscribed to.
    pub async fn close_client(&self, client_id: ClientId) -> AppResult<()> {
        let owned: Vec<ProducerId> = self
            .producer_owner
            .iter()
            .filter(|e| *e.value() == client_id)
            .map(|e| *e.key())
            .collect();
        for producer_id in owned {
            self.close_producer(producer_id).await?;
        }

        let subscribed: Vec<(ProducerId, crate::models::ConsumerId)> = self
            .consumers
            .iter()
            .filter(|e| e.key().1 == client_id)
            .map(|e| (e.key().0, *e.value()))
            .collect();
        for (producer_id, consumer_id) in subscribed {
            self.consumers.remove(&(producer_id, client_id));
            self.media.close(MediaId::Consumer(consumer_id)).await?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn consumer_pairs(&self) -> HashSet<(ProducerId, ClientId)> {
        self.consumers.iter().map(|e| *e.key()).collect()
    }

    /// Drives the shared active-speaker observer into
    /// `clientSpeaking`/`clientStoppedSpeaking` events, with a hold-off
    /// before declaring silence (spec §4.7).
    pub fn spawn_active_speaker_loop(self: &Arc<Self>, threshold: f32, interval: Duration, hold_off: Duration) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut samples = this.media.observe_speaking_producers(threshold, interval);
            while let Some(sample) = samples.recv().await {
                this.on_speaking_sample(sample, hold_off).await;
            }
        });
    }

    async fn on_speaking_sample(self: &Arc<Self>, sample: SpeakingSample, hold_off: Duration) {
        let reported = match sample {
            SpeakingSample::Speaking { producer_id, .. } => Some(producer_id),
            SpeakingSample::Silence => None,
        };

        if let Some(producer_id) = reported {
            if let Some((_, handle)) = self.pending_stops.remove(&producer_id) {
                handle.abort();
            }
            if self.speaking.insert(producer_id, ()).is_none() {
                self.fan_out_speaking_event(producer_id, "clientSpeaking").await;
            }
        }

        let stale: Vec<ProducerId> = self
            .speaking
            .iter()
            .map(|e| *e.key())
            .filter(|p| Some(*p) != reported)
            .collect();
        for producer_id in stale {
            if self.pending_stops.contains_key(&producer_id) {
                continue;
            }
            let this = Arc::clone(self);
            let handle = tokio::spawn(async move {
                tokio::time::sleep(hold_off).await;
                this.pending_stops.remove(&producer_id);
                this.speaking.remove(&producer_id);
                this.fan_out_speaking_event(producer_id, "clientStoppedSpeaking").await;
            });
            self.pending_stops.insert(producer_id, handle);
        }
    }

    async fn fan_out_speaking_event(&self, producer_id: ProducerId, event: &'static str) {
        let Some(owner) = self.producer_owner.get(&producer_id).map(|e| *e.value()) else {
            return;
        };
        let Some(channels) = self.producer_channels.get(&producer_id).map(|e| e.value().clone()) else {
            return;
        };
        for channel in channels {
            for subscriber in self.eligible_listeners(channel, owner).await {
                self.events.send_event(
                    subscriber,
                    &WireEvent::new(event, serde_json::json!({ "clientId": owner, "channelId": channel })),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;
    use crate::media::types::RtpParameters;
    use crate::models::{PermissionMatrix, SessionHandle, TransportDirection};
    use std::net::{IpAddr, Ipv4Addr};

    fn media_config() -> MediaConfig {
        MediaConfig {
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            announced_ip: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)),
            port_min: 40000,
            port_max: 40010,
            speaker_threshold_dbfs: -70.0,
            speaker_interval: Duration::from_millis(50),
            speaker_hold_off: Duration::from_millis(50),
            ice_timeout: Duration::from_secs(5),
        }
    }

    fn opus_params() -> RtpParameters {
        RtpParameters {
            mime_type: "audio/opus".into(),
            clock_rate: 48_000,
            channels: 2,
            parameters: serde_json::Value::Null,
        }
    }

    async fn setup() -> (Arc<ChannelRegistry>, Arc<ClientRegistry>, Arc<MediaWorker>, Arc<RoutingCore>, ChannelId) {
        let channels = ChannelRegistry::new();
        let clients = ClientRegistry::new();
        let media = MediaWorker::new(&media_config());
        let events = Arc::new(EventBus::new());
        let routing = RoutingCore::new(channels.clone(), clients.clone(), media.clone(), events);
        let main = channels.create("main".into(), "".into());
        (channels, clients, media, routing, main)
    }

    #[tokio::test]
    async fn producing_client_with_speak_right_attaches_to_its_channel() {
        let (channels, clients, media, routing, main) = setup().await;
        let speaker = clients.enroll_admin("speaker".into(), SessionHandle::new()).await;
        clients.add_to_channel(speaker, main).await.unwrap();
        channels.add_member(main, speaker).await.unwrap();

        let transport = media
            .create_transport(TransportDirection::Send)
            .unwrap();
        let producer_id = media.produce(transport.id, "audio", TransportDirection::Send, opus_params()).await.unwrap();
        routing.register_producer(speaker, producer_id).await.unwrap();

        let snapshot = channels.get(main).await.unwrap();
        assert_eq!(snapshot.producer_count, 1);
    }

    #[tokio::test]
    async fn closing_producer_detaches_it_and_its_consumers() {
        let (channels, clients, media, routing, main) = setup().await;
        let speaker = clients.enroll_admin("speaker".into(), SessionHandle::new()).await;
        let listener = clients.enroll_admin("listener".into(), SessionHandle::new()).await;
        clients.add_to_channel(speaker, main).await.unwrap();
        clients.add_to_channel(listener, main).await.unwrap();
        clients
            .update_permissions(
                listener,
                crate::models::PermissionPatch {
                    listen_to_all: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let send = media.create_transport(TransportDirection::Send).unwrap();
        let recv = media.create_transport(TransportDirection::Receive).unwrap();
        let producer_id = media.produce(send.id, "audio", TransportDirection::Send, opus_params()).await.unwrap();
        routing.register_producer(speaker, producer_id).await.unwrap();

        let consumer = media
            .consume(recv.id, TransportDirection::Receive, producer_id, &media.rtp_capabilities(), false)
            .await
            .unwrap();
        routing.register_consumer(producer_id, listener, consumer.id);
        assert_eq!(routing.consumer_pairs().len(), 1);

        routing.close_producer(producer_id).await.unwrap();
        assert!(routing.consumer_pairs().is_empty());
        assert_eq!(channels.get(main).await.unwrap().producer_count, 0);
    }

    #[tokio::test]
    async fn revoking_speak_right_closes_the_producer() {
        let (channels, clients, media, routing, main) = setup().await;
        let speaker = clients.enroll_pending("speaker".into(), SessionHandle::new()).await;
        let mut perms = PermissionMatrix::default();
        perms.speak_to.insert(main, true);
        clients.authorize(speaker, perms).await.unwrap();
        clients.add_to_channel(speaker, main).await.unwrap();
        channels.add_member(main, speaker).await.unwrap();

        let transport = media.create_transport(TransportDirection::Send).unwrap();
        let producer_id = media.produce(transport.id, "audio", TransportDirection::Send, opus_params()).await.unwrap();
        routing.register_producer(speaker, producer_id).await.unwrap();

        clients
            .update_permissions(
                speaker,
                crate::models::PermissionPatch {
                    speak_to: std::collections::HashMap::from([(main, false)]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        routing.reconcile_client(speaker).await.unwrap();

        assert_eq!(channels.get(main).await.unwrap().producer_count, 0);
    }
}
