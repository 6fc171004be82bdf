//! Wire-shaped types the Media Worker hands back to the Signaling Layer —
//! ICE/DTLS/SCTP parameters and RTP capability/parameter objects, named
//! and shaped after the real mediasoup Rust bindings' API surface.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::models::{ConsumerId, ProducerId, TransportId};

#[derive(Debug, Clone, Serialize)]
pub struct RtpCodecCapability {
    pub mime_type: &'static str,
    pub clock_rate: u32,
    pub channels: u8,
    pub parameters: serde_json::Value,
}

/// Static once initialized — this system negotiates exactly one codec
/// profile (spec §4.1 "Codec policy").
#[derive(Debug, Clone, Serialize)]
pub struct RtpCapabilities {
    pub codecs: Vec<RtpCodecCapability>,
}

impl RtpCapabilities {
    pub fn opus_only() -> Self {
        Self {
            codecs: vec![RtpCodecCapability {
                mime_type: "audio/opus",
                clock_rate: 48_000,
                channels: 2,
                parameters: serde_json::json!({ "useinbandfec": 1, "usedtx": 1 }),
            }],
        }
    }

    pub fn supports_opus(&self) -> bool {
        self.codecs.iter().any(|c| c.mime_type == "audio/opus")
    }
}

/// Client-offered RTP parameters for a `produce`/`consume` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtpParameters {
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u8,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl RtpParameters {
    pub fn is_opus(&self) -> bool {
        self.mime_type.eq_ignore_ascii_case("audio/opus")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IceCandidate {
    pub foundation: String,
    pub ip: IpAddr,
    pub port: u16,
    pub protocol: &'static str,
    pub priority: u32,
    pub candidate_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    pub ice_lite: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DtlsFingerprint {
    pub algorithm: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SctpParameters {
    pub port: u16,
    pub os: u16,
    pub mis: u16,
    pub max_message_size: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransportParams {
    pub id: TransportId,
    pub ice_candidates: Vec<IceCandidate>,
    pub ice_parameters: IceParameters,
    pub dtls_fingerprint: DtlsFingerprint,
    pub sctp_parameters: SctpParameters,
}

/// What the client sends back to `connectTransport`.
#[derive(Debug, Clone, Deserialize)]
pub struct DtlsParameters {
    pub role: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerType {
    Simple,
}

/// What `consume` hands back alongside the new consumer id.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerParams {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub rtp_parameters: RtpParameters,
    pub consumer_type: ConsumerType,
}

/// A sample from the shared active-speaker observer (spec §4.1). Emitted
/// once per observer interval; `Silence` means no producer crossed the
/// threshold this tick.
#[derive(Debug, Clone)]
pub enum SpeakingSample {
    Speaking { producer_id: ProducerId, volume: f32 },
    Silence,
}

/// Either side of an id that `pause`/`resume`/`close` can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaId {
    Transport(TransportId),
    Producer(ProducerId),
    Consumer(ConsumerId),
}
