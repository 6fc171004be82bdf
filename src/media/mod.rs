//! Media Worker (spec §4.1) — owns all SFU-side transport/producer/
//! consumer state behind a narrow, idempotent-on-close interface. Modeled
//! as an in-process simulated SFU substrate (see `SPEC_FULL.md` §4.1):
//! it enforces the same lifecycle and codec policy a real mediasoup-style
//! worker would, but does not open UDP sockets or forward RTP bytes —
//! the server process is the routing/permission authority this system
//! specifies, and real packet forwarding is a swappable collaborator.

pub mod types;

use dashmap::DashMap;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};

use crate::config::MediaConfig;
use crate::error::{AppError, AppResult};
use crate::models::{ConsumerId, ProducerId, TransportDirection, TransportId};

pub use types::*;

struct Transport {
    id: TransportId,
    direction: TransportDirection,
    local_fingerprint: String,
    remote_dtls: Option<DtlsParameters>,
    connected: bool,
    closed: bool,
    producers: HashSet<ProducerId>,
    consumers: HashSet<ConsumerId>,
}

struct Producer {
    transport_id: TransportId,
    rtp_parameters: RtpParameters,
    paused: bool,
    closed: bool,
    consumers: HashSet<ConsumerId>,
}

struct Consumer {
    transport_id: TransportId,
    producer_id: ProducerId,
    rtp_parameters: RtpParameters,
    paused: bool,
    closed: bool,
}

pub struct MediaWorker {
    transports: DashMap<TransportId, RwLock<Transport>>,
    producers: DashMap<ProducerId, RwLock<Producer>>,
    consumers: DashMap<ConsumerId, RwLock<Consumer>>,
    /// Latest reported RMS level per producer, in dBFS. Fed by
    /// `report_volume` — stands in for an RTP-level audio-level reader.
    volume_samples: DashMap<ProducerId, f32>,
    announced_ip: IpAddr,
    port_min: u16,
    port_max: u16,
    died_tx: watch::Sender<bool>,
}

impl MediaWorker {
    pub fn new(config: &MediaConfig) -> Arc<Self> {
        let (died_tx, _rx) = watch::channel(false);
        Arc::new(Self {
            transports: DashMap::new(),
            producers: DashMap::new(),
            consumers: DashMap::new(),
            volume_samples: DashMap::new(),
            announced_ip: config.announced_ip,
            port_min: config.port_min,
            port_max: config.port_max,
            died_tx,
        })
    }

    pub fn rtp_capabilities(&self) -> RtpCapabilities {
        RtpCapabilities::opus_only()
    }

    /// `died` watch — flips to `true` if the worker hits an unrecoverable
    /// internal fault. `main.rs` selects on this next to the signaling
    /// listener and exits with the distinguished code from spec.md §6.
    pub fn died(&self) -> watch::Receiver<bool> {
        self.died_tx.subscribe()
    }

    fn mark_died(&self) {
        let _ = self.died_tx.send(true);
    }

    pub fn create_transport(&self, direction: TransportDirection) -> AppResult<TransportParams> {
        let id = TransportId::new_v4();
        let port = rand::thread_rng().gen_range(self.port_min..=self.port_max);
        let fingerprint = self.generate_fingerprint().inspect_err(|_| self.mark_died())?;

        self.transports.insert(
            id,
            RwLock::new(Transport {
                id,
                direction,
                local_fingerprint: fingerprint.clone(),
                remote_dtls: None,
                connected: false,
                closed: false,
                producers: HashSet::new(),
                consumers: HashSet::new(),
            }),
        );

        Ok(TransportParams {
            id,
            ice_candidates: vec![IceCandidate {
                foundation: "0".to_string(),
                ip: self.announced_ip,
                port,
                protocol: "udp",
                priority: 2_130_706_431,
                candidate_type: "host",
            }],
            ice_parameters: IceParameters {
                username_fragment: random_ice_token(8),
                password: random_ice_token(24),
                ice_lite: true,
            },
            dtls_fingerprint: DtlsFingerprint {
                algorithm: "sha-256",
                value: fingerprint,
            },
            sctp_parameters: SctpParameters {
                port: 5000,
                os: 1024,
                mis: 1024,
                max_message_size: 262_144,
            },
        })
    }

    pub async fn connect_transport(&self, id: TransportId, remote: DtlsParameters) -> AppResult<()> {
        let entry = self.get_transport(id)?;
        let mut transport = entry.write().await;
        if transport.closed {
            return Err(AppError::Conflict(format!("transport {id} is closed")));
        }
        if transport.connected {
            return Err(AppError::Conflict(format!("transport {id} is already connected")));
        }
        if remote.fingerprint.is_empty() {
            return Err(AppError::BadRequest("missing dtls fingerprint".into()));
        }
        transport.remote_dtls = Some(remote);
        transport.connected = true;
        Ok(())
    }

    pub async fn produce(
        &self,
        transport_id: TransportId,
        kind: &str,
        expected_direction: TransportDirection,
        rtp_parameters: RtpParameters,
    ) -> AppResult<ProducerId> {
        if kind != "audio" || !rtp_parameters.is_opus() {
            return Err(AppError::UnsupportedCodec);
        }

        let entry = self.get_transport(transport_id)?;
        let mut transport = entry.write().await;
        if transport.closed {
            return Err(AppError::Conflict(format!("transport {transport_id} is closed")));
        }
        if transport.direction != expected_direction {
            return Err(AppError::BadRequest(format!(
                "transport {transport_id} is not a {expected_direction:?} transport"
            )));
        }

        let id = ProducerId::new_v4();
        self.producers.insert(
            id,
            RwLock::new(Producer {
                transport_id,
                rtp_parameters,
                paused: false,
                closed: false,
                consumers: HashSet::new(),
            }),
        );
        transport.producers.insert(id);
        Ok(id)
    }

    pub async fn can_consume(&self, producer_id: ProducerId, remote_capabilities: &RtpCapabilities) -> bool {
        match self.producers.get(&producer_id) {
            Some(entry) => !entry.read().await.closed && remote_capabilities.supports_opus(),
            None => false,
        }
    }

    pub async fn consume(
        &self,
        transport_id: TransportId,
        expected_direction: TransportDirection,
        producer_id: ProducerId,
        remote_capabilities: &RtpCapabilities,
        start_paused: bool,
    ) -> AppResult<ConsumerParams> {
        let transport_entry = self.get_transport(transport_id)?;
        {
            let transport = transport_entry.read().await;
            if transport.closed {
                return Err(AppError::Conflict(format!("transport {transport_id} is closed")));
            }
            if transport.direction != expected_direction {
                return Err(AppError::BadRequest(format!(
                    "transport {transport_id} is not a {expected_direction:?} transport"
                )));
            }
        }

        if !self.can_consume(producer_id, remote_capabilities).await {
            return Err(AppError::UnsupportedCodec);
        }

        let producer_entry = self.get_producer(producer_id)?;
        let rtp_parameters = {
            let mut producer = producer_entry.write().await;
            let id = ConsumerId::new_v4();
            self.consumers.insert(
                id,
                RwLock::new(Consumer {
                    transport_id,
                    producer_id,
                    rtp_parameters: producer.rtp_parameters.clone(),
                    paused: start_paused,
                    closed: false,
                }),
            );
            producer.consumers.insert(id);
            transport_entry.write().await.consumers.insert(id);
            (id, producer.rtp_parameters.clone())
        };

        Ok(ConsumerParams {
            id: rtp_parameters.0,
            producer_id,
            rtp_parameters: rtp_parameters.1,
            consumer_type: ConsumerType::Simple,
        })
    }

    pub async fn pause(&self, id: MediaId) -> AppResult<()> {
        self.set_paused(id, true).await
    }

    pub async fn resume(&self, id: MediaId) -> AppResult<()> {
        self.set_paused(id, false).await
    }

    async fn set_paused(&self, id: MediaId, paused: bool) -> AppResult<()> {
        match id {
            MediaId::Producer(producer_id) => {
                self.get_producer(producer_id)?.write().await.paused = paused;
                Ok(())
            }
            MediaId::Consumer(consumer_id) => {
                self.get_consumer(consumer_id)?.write().await.paused = paused;
                Ok(())
            }
            MediaId::Transport(id) => Err(AppError::BadRequest(format!(
                "transport {id} cannot be paused, only producers/consumers can"
            ))),
        }
    }

    /// Idempotent: closing an already-closed id is a no-op, never an error.
    pub async fn close(&self, id: MediaId) -> AppResult<()> {
        match id {
            MediaId::Transport(id) => self.close_transport(id).await,
            MediaId::Producer(id) => self.close_producer(id).await,
            MediaId::Consumer(id) => self.close_consumer(id).await,
        }
    }

    async fn close_transport(&self, id: TransportId) -> AppResult<()> {
        let entry = self.get_transport(id)?;
        let (producers, consumers) = {
            let mut transport = entry.write().await;
            if transport.closed {
                return Ok(());
            }
            transport.closed = true;
            transport.connected = false;
            (
                std::mem::take(&mut transport.producers),
                std::mem::take(&mut transport.consumers),
            )
        };
        for producer_id in producers {
            self.close_producer(producer_id).await?;
        }
        for consumer_id in consumers {
            self.close_consumer(consumer_id).await?;
        }
        self.volume_samples.retain(|_, _| true);
        Ok(())
    }

    async fn close_producer(&self, id: ProducerId) -> AppResult<()> {
        let entry = self.get_producer(id)?;
        let consumers = {
            let mut producer = entry.write().await;
            if producer.closed {
                return Ok(());
            }
            producer.closed = true;
            std::mem::take(&mut producer.consumers)
        };
        for consumer_id in consumers {
            self.close_consumer(consumer_id).await?;
        }
        self.volume_samples.remove(&id);
        Ok(())
    }

    async fn close_consumer(&self, id: ConsumerId) -> AppResult<()> {
        let entry = self.get_consumer(id)?;
        entry.write().await.closed = true;
        Ok(())
    }

    /// Test/simulation hook standing in for an RTP-level audio-level
    /// reader: records the latest RMS sample for a producer so the
    /// active-speaker observer has something to react to.
    pub fn report_volume(&self, producer_id: ProducerId, dbfs: f32) {
        self.volume_samples.insert(producer_id, dbfs);
    }

    /// Single observer shared by all channels; ties within an interval
    /// are broken by highest volume (spec §4.1).
    pub fn observe_speaking_producers(
        self: &Arc<Self>,
        threshold: f32,
        interval: Duration,
    ) -> mpsc::Receiver<SpeakingSample> {
        let (tx, rx) = mpsc::channel(32);
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let loudest = worker
                    .volume_samples
                    .iter()
                    .filter(|entry| *entry.value() >= threshold)
                    .map(|entry| (*entry.key(), *entry.value()))
                    .max_by(|a, b| a.1.total_cmp(&b.1));

                let sample = match loudest {
                    Some((producer_id, volume)) => SpeakingSample::Speaking { producer_id, volume },
                    None => SpeakingSample::Silence,
                };

                if tx.send(sample).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    fn generate_fingerprint(&self) -> AppResult<String> {
        let cert_key = rcgen::generate_simple_self_signed(vec!["intercom-router".to_string()])
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to generate transport certificate: {e}")))?;
        let digest = Sha256::digest(cert_key.cert.der().as_ref());
        Ok(digest
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":"))
    }

    fn get_transport(&self, id: TransportId) -> AppResult<dashmap::mapref::one::Ref<'_, TransportId, RwLock<Transport>>> {
        self.transports
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("transport {id} not found")))
    }

    fn get_producer(&self, id: ProducerId) -> AppResult<dashmap::mapref::one::Ref<'_, ProducerId, RwLock<Producer>>> {
        self.producers
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("producer {id} not found")))
    }

    fn get_consumer(&self, id: ConsumerId) -> AppResult<dashmap::mapref::one::Ref<'_, ConsumerId, RwLock<Consumer>>> {
        self.consumers
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("consumer {id} not found")))
    }
}

fn random_ice_token(len: usize) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_config() -> MediaConfig {
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

    async fn connected_transport(worker: &MediaWorker, direction: TransportDirection) -> TransportId {
        let params = worker.create_transport(direction).unwrap();
        worker
            .connect_transport(
                params.id,
                DtlsParameters {
                    role: "client".into(),
                    fingerprint: "AA:BB".into(),
                },
            )
            .await
            .unwrap();
        params.id
    }

    #[tokio::test]
    async fn produce_and_consume_happy_path() {
        let worker = MediaWorker::new(&test_config());
        let send = connected_transport(&worker, TransportDirection::Send).await;
        let recv = connected_transport(&worker, TransportDirection::Receive).await;

        let producer_id = worker.produce(send, "audio", TransportDirection::Send, opus_params()).await.unwrap();
        let consumer = worker
            .consume(recv, TransportDirection::Receive, producer_id, &RtpCapabilities::opus_only(), false)
            .await
            .unwrap();

        assert_eq!(consumer.producer_id, producer_id);
        assert_eq!(consumer.consumer_type, ConsumerType::Simple);
    }

    #[tokio::test]
    async fn produce_rejects_non_opus_kind() {
        let worker = MediaWorker::new(&test_config());
        let send = connected_transport(&worker, TransportDirection::Send).await;
        let mut params = opus_params();
        params.mime_type = "video/vp8".into();

        let err = worker.produce(send, "audio", TransportDirection::Send, params).await.unwrap_err();
        assert!(matches!(err, AppError::UnsupportedCodec));
    }

    #[tokio::test]
    async fn produce_on_closed_transport_fails_without_leaking_a_producer() {
        let worker = MediaWorker::new(&test_config());
        let send = connected_transport(&worker, TransportDirection::Send).await;
        worker.close(MediaId::Transport(send)).await.unwrap();

        let err = worker.produce(send, "audio", TransportDirection::Send, opus_params()).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(worker.producers.len(), 0);
    }

    #[tokio::test]
    async fn consume_fails_unsupported_codec_when_cannot_consume() {
        let worker = MediaWorker::new(&test_config());
        let send = connected_transport(&worker, TransportDirection::Send).await;
        let recv = connected_transport(&worker, TransportDirection::Receive).await;
        let producer_id = worker.produce(send, "audio", TransportDirection::Send, opus_params()).await.unwrap();

        let empty_caps = RtpCapabilities { codecs: vec![] };
        let err = worker.consume(recv, TransportDirection::Receive, producer_id, &empty_caps, false).await.unwrap_err();
        assert!(matches!(err, AppError::UnsupportedCodec));
    }

    #[tokio::test]
    async fn closing_transport_cascades_to_producers_and_consumers() {
        let worker = MediaWorker::new(&test_config());
        let send = connected_transport(&worker, TransportDirection::Send).await;
        let recv = connected_transport(&worker, TransportDirection::Receive).await;
        let producer_id = worker.produce(send, "audio", TransportDirection::Send, opus_params()).await.unwrap();
        let consumer = worker
            .consume(recv, TransportDirection::Receive, producer_id, &RtpCapabilities::opus_only(), false)
            .await
            .unwrap();

        worker.close(MediaId::Transport(send)).await.unwrap();

        assert!(worker.get_producer(producer_id).unwrap().read().await.closed);
        assert!(worker.get_consumer(consumer.id).unwrap().read().await.closed);
    }

    #[tokio::test]
    async fn closing_twice_is_a_no_op() {
        let worker = MediaWorker::new(&test_config());
        let send = connected_transport(&worker, TransportDirection::Send).await;
        worker.close(MediaId::Transport(send)).await.unwrap();
        worker.close(MediaId::Transport(send)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn observer_reports_loudest_producer_above_threshold() {
        let worker = MediaWorker::new(&test_config());
        let send = connected_transport(&worker, TransportDirection::Send).await;
        let quiet = worker.produce(send, "audio", TransportDirection::Send, opus_params()).await.unwrap();
        let loud = worker.produce(send, "audio", TransportDirection::Send, opus_params()).await.unwrap();

        worker.report_volume(quiet, -80.0);
        worker.report_volume(loud, -40.0);

        let mut samples = worker.observe_speaking_producers(-70.0, Duration::from_millis(50));
        tokio::time::advance(Duration::from_millis(60)).await;

        match samples.recv().await.unwrap() {
            SpeakingSample::Speaking { producer_id, .. } => assert_eq!(producer_id, loud),
            SpeakingSample::Silence => panic!("expected a speaking sample"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn observer_reports_silence_when_nothing_crosses_threshold() {
        let worker = MediaWorker::new(&test_config());
        let mut samples = worker.observe_speaking_producers(-70.0, Duration::from_millis(50));
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(matches!(samples.recv().await.unwrap(), SpeakingSample::Silence));
    }

    #[tokio::test]
    async fn died_watch_flips_on_mark_died() {
        let worker = MediaWorker::new(&test_config());
        let mut died = worker.died();
        assert!(!*died.borrow());
        worker.mark_died();
        died.changed().await.unwrap();
        assert!(*died.borrow());
    }
}
