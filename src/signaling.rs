//! Signaling Layer (spec §4.5) — the axum WebSocket gateway. One reader
//! task per session processes frames in arrival order and awaits every
//! handler inline before reading the next one, which is what gives the
//! per-session ordering guarantee in spec §5; a paired forwarder task
//! drains the session's [`EventBus`] queue onto the physical socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::admission::AdmissionController;
use crate::channel_registry::ChannelRegistry;
use crate::client_registry::ClientRegistry;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::events::EventBus;
use crate::media::types::{DtlsParameters, RtpCapabilities, RtpParameters};
use crate::media::{MediaId, MediaWorker};
use crate::models::{
    ChannelId, Client, ClientId, ClientStatus, Direction, PermissionMatrix, PermissionPatch, TransportDirection,
    TransportId, WireEvent, WireRequest, WireResponse,
};
use crate::permissions;
use crate::routing::RoutingCore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub channels: Arc<ChannelRegistry>,
    pub clients: Arc<ClientRegistry>,
    pub media: Arc<MediaWorker>,
    pub routing: Arc<RoutingCore>,
    pub admission: Arc<AdmissionController>,
    pub events: Arc<EventBus>,
    /// Which session created each transport — needed so `connectTransport`/
    /// `produce`/`consume` can reject use of a transport from a session
    /// that didn't open it, and so disconnect can close them all.
    transport_owner: Arc<DashMap<TransportId, ClientId>>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        channels: Arc<ChannelRegistry>,
        clients: Arc<ClientRegistry>,
        media: Arc<MediaWorker>,
        routing: Arc<RoutingCore>,
        admission: Arc<AdmissionController>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            channels,
            clients,
            media,
            routing,
            admission,
            events,
            transport_owner: Arc::new(DashMap::new()),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/healthz", get(health_check))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let mut forwarder = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut session_client: Option<ClientId> = None;
    let request_timeout = state.config.signaling.request_timeout;

    while let Some(frame) = receiver.next().await {
        let Ok(Message::Text(text)) = frame else {
            break;
        };

        let request: WireRequest = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("malformed request frame: {e}");
                continue;
            }
        };
        let id = request.id;

        let response = match tokio::time::timeout(request_timeout, dispatch(&state, &tx, &mut session_client, request)).await {
            Ok(Ok(result)) => WireResponse::ok(id, result),
            Ok(Err(err)) => WireResponse::err(id, err.to_wire()),
            Err(_) => WireResponse::err(id, AppError::Timeout.to_wire()),
        };
        match *session_client {
            Some(client_id) => state.events.send_response(client_id, &response),
            None => {
                let _ = tx.send(Message::Text(serde_json::to_string(&response).unwrap_or_default().into()));
            }
        }
    }

    forwarder.abort();
    if let Some(client_id) = session_client {
        handle_disconnect(&state, client_id).await;
    }
}

async fn handle_disconnect(state: &AppState, client_id: ClientId) {
    state.events.unregister(client_id);

    let owned_transports: Vec<TransportId> = state
        .transport_owner
        .iter()
        .filter(|e| *e.value() == client_id)
        .map(|e| *e.key())
        .collect();
    for transport_id in &owned_transports {
        let _ = state.media.close(MediaId::Transport(*transport_id)).await;
        state.transport_owner.remove(transport_id);
    }

    if let Err(e) = state.routing.close_client(client_id).await {
        tracing::warn!(%client_id, error = %e, "error tearing down routing state on disconnect");
    }

    let former_channels = match state.clients.close(client_id).await {
        Ok(channels) => channels,
        Err(_) => return,
    };

    for channel in former_channels {
        let remaining = state.clients.channel_members(channel).await;
        if state.channels.remove_member(channel, client_id).await.is_ok() {
            for member in remaining {
                state.events.send_event(
                    member,
                    &WireEvent::new("clientLeftChannel", serde_json::json!({ "clientId": client_id, "channelId": channel })),
                );
            }
        }
    }

    for admin in state.clients.active_admin_ids().await {
        state.events.send_event(admin, &WireEvent::new("disconnected", serde_json::json!({ "clientId": client_id })));
    }
    tracing::info!(%client_id, "session disconnected");
}

async fn dispatch(
    state: &AppState,
    tx: &mpsc::UnboundedSender<Message>,
    session_client: &mut Option<ClientId>,
    request: WireRequest,
) -> AppResult<serde_json::Value> {
    match request.event.as_str() {
        "authenticate" => authenticate(state, tx, session_client, request.payload).await,
        "adminAuthenticate" => admin_authenticate(state, tx, session_client, request.payload).await,
        _ => {
            let client_id = session_client.ok_or(AppError::Unauthorized)?;
            let client = state.clients.get(client_id).await?;
            if client.status != ClientStatus::Active {
                return Err(AppError::Unauthorized);
            }
            dispatch_active(state, client_id, &client, request).await
        }
    }
}

async fn dispatch_active(state: &AppState, client_id: ClientId, client: &Client, request: WireRequest) -> AppResult<serde_json::Value> {
    match request.event.as_str() {
        "getRtpCapabilities" => Ok(serde_json::to_value(state.media.rtp_capabilities())?),
        "createTransport" => create_transport(state, client_id, request.payload).await,
        "connectTransport" => connect_transport(state, client_id, request.payload).await,
        "produce" => produce(state, client_id, request.payload).await,
        "consume" => consume(state, client_id, request.payload).await,
        "startSpeaking" => set_speaking(state, client, request.payload, true).await,
        "stopSpeaking" => set_speaking(state, client, request.payload, false).await,
        "setChannelMute" => set_channel_mute(state, client_id, request.payload).await,
        "setChannelVolume" => set_channel_volume(state, client_id, request.payload).await,
        "createChannel" => create_channel(state, client, request.payload).await,
        "updateChannel" => update_channel(state, client, request.payload).await,
        "deleteChannel" => delete_channel(state, client, request.payload).await,
        "authorizePending" => authorize_pending(state, client, request.payload).await,
        "rejectPending" => reject_pending(state, client, request.payload).await,
        "updatePermissions" => update_permissions(state, client, request.payload).await,
        other => Err(AppError::BadRequest(format!("unrecognized request '{other}'"))),
    }
}

fn require_admin(client: &Client) -> AppResult<()> {
    if !client.admin_flag {
        return Err(AppError::PermissionDenied("admin privileges required".into()));
    }
    Ok(())
}

#[derive(Deserialize)]
struct AuthenticatePayload {
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(rename = "serverSecret")]
    server_secret: String,
}

async fn authenticate(
    state: &AppState,
    tx: &mpsc::UnboundedSender<Message>,
    session_client: &mut Option<ClientId>,
    payload: serde_json::Value,
) -> AppResult<serde_json::Value> {
    if session_client.is_some() {
        return Err(AppError::Conflict("session already authenticated".into()));
    }
    let payload: AuthenticatePayload = serde_json::from_value(payload).map_err(bad_request)?;
    let session_handle = crate::models::SessionHandle::new();

    let enrollment = state
        .admission
        .authenticate(payload.display_name, &payload.server_secret, session_handle)
        .await?;

    *session_client = Some(enrollment.client_id);
    state.events.register(enrollment.client_id, tx.clone());

    for admin in state.clients.active_admin_ids().await {
        state.events.send_event(
            admin,
            &WireEvent::new("pendingClient", serde_json::json!({ "clientId": enrollment.client_id })),
        );
    }

    Ok(serde_json::json!({
        "clientId": enrollment.client_id,
        "token": enrollment.token,
        "status": enrollment.status,
        "adminFlag": enrollment.admin,
    }))
}

#[derive(Deserialize)]
struct AdminAuthenticatePayload {
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(rename = "serverSecret")]
    server_secret: String,
    #[serde(rename = "adminSecret")]
    admin_secret: String,
}

async fn admin_authenticate(
    state: &AppState,
    tx: &mpsc::UnboundedSender<Message>,
    session_client: &mut Option<ClientId>,
    payload: serde_json::Value,
) -> AppResult<serde_json::Value> {
    if session_client.is_some() {
        return Err(AppError::Conflict("session already authenticated".into()));
    }
    let payload: AdminAuthenticatePayload = serde_json::from_value(payload).map_err(bad_request)?;
    let session_handle = crate::models::SessionHandle::new();

    let enrollment = state
        .admission
        .admin_authenticate(payload.display_name, &payload.server_secret, &payload.admin_secret, session_handle)
        .await?;

    *session_client = Some(enrollment.client_id);
    state.events.register(enrollment.client_id, tx.clone());

    let system = state.channels.system_channel_id();
    state.clients.add_to_channel(enrollment.client_id, system).await?;
    state.channels.add_member(system, enrollment.client_id).await?;

    Ok(serde_json::json!({
        "clientId": enrollment.client_id,
        "token": enrollment.token,
        "status": enrollment.status,
        "adminFlag": enrollment.admin,
    }))
}

#[derive(Deserialize)]
struct CreateTransportPayload {
    direction: TransportDirection,
}

async fn create_transport(state: &AppState, client_id: ClientId, payload: serde_json::Value) -> AppResult<serde_json::Value> {
    let payload: CreateTransportPayload = serde_json::from_value(payload).map_err(bad_request)?;
    let params = state.media.create_transport(payload.direction)?;
    state.transport_owner.insert(params.id, client_id);
    Ok(serde_json::to_value(params)?)
}

#[derive(Deserialize)]
struct ConnectTransportPayload {
    #[serde(rename = "transportId")]
    transport_id: TransportId,
    #[serde(rename = "dtlsParameters")]
    dtls_parameters: DtlsParameters,
}

async fn connect_transport(state: &AppState, client_id: ClientId, payload: serde_json::Value) -> AppResult<serde_json::Value> {
    let payload: ConnectTransportPayload = serde_json::from_value(payload).map_err(bad_request)?;
    require_owned_transport(state, client_id, payload.transport_id)?;
    state.media.connect_transport(payload.transport_id, payload.dtls_parameters).await?;
    Ok(serde_json::json!({ "ok": true }))
}

#[derive(Deserialize)]
struct ProducePayload {
    #[serde(rename = "transportId")]
    transport_id: TransportId,
    #[serde(rename = "rtpParameters")]
    rtp_parameters: RtpParameters,
}

async fn produce(state: &AppState, client_id: ClientId, payload: serde_json::Value) -> AppResult<serde_json::Value> {
    let payload: ProducePayload = serde_json::from_value(payload).map_err(bad_request)?;
    require_owned_transport(state, client_id, payload.transport_id)?;

    let client = state.clients.get(client_id).await?;
    let has_speak_right = client
        .channels
        .iter()
        .any(|c| permissions::allow(&client, *c, Direction::Speak));
    if !has_speak_right {
        return Err(AppError::PermissionDenied("no channel grants speak for this client".into()));
    }

    let producer_id = state
        .media
        .produce(payload.transport_id, "audio", TransportDirection::Send, payload.rtp_parameters)
        .await?;
    state.routing.register_producer(client_id, producer_id).await?;
    Ok(serde_json::json!({ "producerId": producer_id }))
}

#[derive(Deserialize)]
struct ConsumePayload {
    #[serde(rename = "transportId")]
    transport_id: TransportId,
    #[serde(rename = "producerId")]
    producer_id: crate::models::ProducerId,
    #[serde(rename = "rtpCapabilities")]
    rtp_capabilities: RtpCapabilities,
}

async fn consume(state: &AppState, client_id: ClientId, payload: serde_json::Value) -> AppResult<serde_json::Value> {
    let payload: ConsumePayload = serde_json::from_value(payload).map_err(bad_request)?;
    require_owned_transport(state, client_id, payload.transport_id)?;

    if state.routing.owner_of(payload.producer_id).is_none() {
        return Err(AppError::NotFound(format!("producer {} not found", payload.producer_id)));
    }

    let subscriber = state.clients.get(client_id).await?;
    let permitted = state.routing.permitted_channels_for(payload.producer_id, &subscriber);
    if permitted.is_empty() {
        return Err(AppError::PermissionDenied("no channel grants listen for this producer".into()));
    }

    if !state.media.can_consume(payload.producer_id, &payload.rtp_capabilities).await {
        return Err(AppError::UnsupportedCodec);
    }

    let consumer = state
        .media
        .consume(
            payload.transport_id,
            TransportDirection::Receive,
            payload.producer_id,
            &payload.rtp_capabilities,
            false,
        )
        .await?;
    state.routing.register_consumer(payload.producer_id, client_id, consumer.id);
    Ok(serde_json::to_value(consumer)?)
}

#[derive(Deserialize)]
struct ChannelScopedPayload {
    #[serde(rename = "channelId")]
    channel_id: ChannelId,
}

async fn set_speaking(state: &AppState, client: &Client, payload: serde_json::Value, speaking: bool) -> AppResult<serde_json::Value> {
    let payload: ChannelScopedPayload = serde_json::from_value(payload).map_err(bad_request)?;
    if let Some(producer_id) = state.routing.producer_for(client.id, payload.channel_id) {
        let level = if speaking { 0.0 } else { -120.0 };
        state.media.report_volume(producer_id, level);
    }
    Ok(serde_json::json!({ "ok": true }))
}

#[derive(Deserialize)]
struct SetChannelMutePayload {
    #[serde(rename = "channelId")]
    channel_id: ChannelId,
    muted: bool,
}

async fn set_channel_mute(state: &AppState, client_id: ClientId, payload: serde_json::Value) -> AppResult<serde_json::Value> {
    let payload: SetChannelMutePayload = serde_json::from_value(payload).map_err(bad_request)?;
    state.clients.set_channel_mute(client_id, payload.channel_id, payload.muted).await?;
    Ok(serde_json::json!({ "ok": true }))
}

#[derive(Deserialize)]
struct SetChannelVolumePayload {
    #[serde(rename = "channelId")]
    channel_id: ChannelId,
    volume: f32,
}

async fn set_channel_volume(state: &AppState, client_id: ClientId, payload: serde_json::Value) -> AppResult<serde_json::Value> {
    let payload: SetChannelVolumePayload = serde_json::from_value(payload).map_err(bad_request)?;
    state.clients.set_channel_volume(client_id, payload.channel_id, payload.volume).await?;
    Ok(serde_json::json!({ "ok": true }))
}

#[derive(Deserialize)]
struct CreateChannelPayload {
    name: String,
    #[serde(default)]
    description: String,
}

async fn create_channel(state: &AppState, client: &Client, payload: serde_json::Value) -> AppResult<serde_json::Value> {
    require_admin(client)?;
    let payload: CreateChannelPayload = serde_json::from_value(payload).map_err(bad_request)?;
    let id = state.channels.create(payload.name, payload.description);
    let snapshot = state.channels.get(id).await?;

    for recipient in state.clients.active_ids().await {
        state.events.send_event(recipient, &WireEvent::new("channelCreated", serde_json::to_value(&snapshot)?));
    }
    Ok(serde_json::to_value(snapshot)?)
}

#[derive(Deserialize)]
struct UpdateChannelPayload {
    #[serde(rename = "channelId")]
    channel_id: ChannelId,
    name: Option<String>,
    description: Option<String>,
}

async fn update_channel(state: &AppState, client: &Client, payload: serde_json::Value) -> AppResult<serde_json::Value> {
    require_admin(client)?;
    let payload: UpdateChannelPayload = serde_json::from_value(payload).map_err(bad_request)?;
    state.channels.update_metadata(payload.channel_id, payload.name, payload.description).await?;
    let snapshot = state.channels.get(payload.channel_id).await?;

    for recipient in state.clients.active_ids().await {
        state.events.send_event(recipient, &WireEvent::new("channelUpdated", serde_json::to_value(&snapshot)?));
    }
    Ok(serde_json::to_value(snapshot)?)
}

async fn delete_channel(state: &AppState, client: &Client, payload: serde_json::Value) -> AppResult<serde_json::Value> {
    require_admin(client)?;
    let payload: ChannelScopedPayload = serde_json::from_value(payload).map_err(bad_request)?;

    let members = state.clients.channel_members(payload.channel_id).await;
    state.channels.delete(payload.channel_id)?;

    for member in &members {
        state.clients.remove_from_channel(*member, payload.channel_id).await.ok();
        state.routing.reconcile_client(*member).await?;
    }

    for recipient in state.clients.active_ids().await {
        state.events.send_event(
            recipient,
            &WireEvent::new("channelDeleted", serde_json::json!({ "channelId": payload.channel_id })),
        );
    }
    Ok(serde_json::json!({ "ok": true }))
}

#[derive(Deserialize)]
struct AuthorizePendingPayload {
    #[serde(rename = "clientId")]
    client_id: ClientId,
    #[serde(default)]
    channels: Vec<ChannelId>,
    #[serde(default)]
    permissions: PermissionMatrix,
}

async fn authorize_pending(state: &AppState, client: &Client, payload: serde_json::Value) -> AppResult<serde_json::Value> {
    require_admin(client)?;
    let payload: AuthorizePendingPayload = serde_json::from_value(payload).map_err(bad_request)?;

    state.clients.authorize(payload.client_id, payload.permissions.clone()).await?;

    for channel in &payload.channels {
        if !state.channels.exists(*channel).await {
            return Err(AppError::NotFound(format!("channel {channel} not found")));
        }
        state.clients.add_to_channel(payload.client_id, *channel).await?;
        state.channels.add_member(*channel, payload.client_id).await?;

        for member in state.clients.channel_members(*channel).await {
            state.events.send_event(
                member,
                &WireEvent::new(
                    "clientJoinedChannel",
                    serde_json::json!({ "clientId": payload.client_id, "channelId": channel }),
                ),
            );
        }
    }

    state.events.send_event(
        payload.client_id,
        &WireEvent::new(
            "authorized",
            serde_json::json!({ "clientId": payload.client_id, "channels": payload.channels }),
        ),
    );
    Ok(serde_json::json!({ "ok": true }))
}

async fn reject_pending(state: &AppState, client: &Client, payload: serde_json::Value) -> AppResult<serde_json::Value> {
    require_admin(client)?;
    let payload: ChannelIdFreePayload = serde_json::from_value(payload).map_err(bad_request)?;
    state.clients.reject(payload.client_id).await?;
    state.events.send_event(payload.client_id, &WireEvent::new("rejected", serde_json::json!({ "clientId": payload.client_id })));
    Ok(serde_json::json!({ "ok": true }))
}

#[derive(Deserialize)]
struct ChannelIdFreePayload {
    #[serde(rename = "clientId")]
    client_id: ClientId,
}

#[derive(Deserialize)]
struct UpdatePermissionsPayload {
    #[serde(rename = "clientId")]
    client_id: ClientId,
    #[serde(flatten)]
    patch: PermissionPatch,
}

/// Admin-only: patches a client's permission matrix, then re-derives its
/// producer/consumer graph so a revoked speak/listen right closes the
/// affected producers/consumers immediately (spec §8-S2).
async fn update_permissions(state: &AppState, client: &Client, payload: serde_json::Value) -> AppResult<serde_json::Value> {
    require_admin(client)?;
    let payload: UpdatePermissionsPayload = serde_json::from_value(payload).map_err(bad_request)?;

    state.clients.update_permissions(payload.client_id, payload.patch).await?;
    state.routing.reconcile_client(payload.client_id).await?;
    Ok(serde_json::json!({ "ok": true }))
}

fn require_owned_transport(state: &AppState, client_id: ClientId, transport_id: TransportId) -> AppResult<()> {
    match state.transport_owner.get(&transport_id) {
        Some(owner) if *owner == client_id => Ok(()),
        Some(_) => Err(AppError::PermissionDenied("transport belongs to another session".into())),
        None => Err(AppError::NotFound(format!("transport {transport_id} not found"))),
    }
}

fn bad_request(e: serde_json::Error) -> AppError {
    AppError::BadRequest(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionTokens;
    use crate::config::{LoggingConfig, MediaConfig, SecretsConfig, SignalingConfig};
    use futures_util::{SinkExt as _, StreamExt as _};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    fn test_config() -> AppConfig {
        AppConfig {
            secrets: SecretsConfig {
                server_secret: "wire".into(),
                admin_secret: Some("root-key".into()),
            },
            media: MediaConfig {
                listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                announced_ip: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)),
                port_min: 40000,
                port_max: 40010,
                speaker_threshold_dbfs: -70.0,
                speaker_interval: Duration::from_millis(50),
                speaker_hold_off: Duration::from_millis(50),
                ice_timeout: Duration::from_secs(5),
            },
            signaling: SignalingConfig {
                port: 0,
                request_timeout: Duration::from_secs(5),
            },
            logging: LoggingConfig { level: "error".into() },
        }
    }

    async fn spawn_server() -> std::net::SocketAddr {
        let config = Arc::new(test_config());
        let channels = ChannelRegistry::new();
        let clients = ClientRegistry::new();
        let media = MediaWorker::new(&config.media);
        let events = Arc::new(EventBus::new());
        let routing = RoutingCore::new(channels.clone(), clients.clone(), media.clone(), events.clone());
        let tokens = Arc::new(SessionTokens::new(&config.secrets.server_secret));
        let admission = Arc::new(AdmissionController::new(config.secrets.clone(), tokens, clients.clone()));
        let state = AppState::new(config, channels, clients, media, routing, admission, events);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn admin_authenticates_and_creates_a_channel_over_the_socket() {
        let addr = spawn_server().await;
        let url = format!("ws://{addr}/ws");
        let (mut socket, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        socket
            .send(WsMessage::Text(
                serde_json::json!({
                    "id": 1,
                    "event": "adminAuthenticate",
                    "payload": {
                        "displayName": "root",
                        "serverSecret": "wire",
                        "adminSecret": "root-key",
                    }
                })
                .to_string(),
            ))
            .await
            .unwrap();

        let frame = socket.next().await.unwrap().unwrap();
        let WsMessage::Text(text) = frame else { panic!("expected text frame") };
        let response: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(response["id"], 1);
        assert_eq!(response["ok"], true);
        assert_eq!(response["result"]["adminFlag"], true);

        socket
            .send(WsMessage::Text(
                serde_json::json!({
                    "id": 2,
                    "event": "createChannel",
                    "payload": { "name": "ops", "description": "operations" }
                })
                .to_string(),
            ))
            .await
            .unwrap();

        let frame = socket.next().await.unwrap().unwrap();
        let WsMessage::Text(text) = frame else { panic!("expected text frame") };
        let response: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(response["id"], 2);
        assert_eq!(response["ok"], true);
        assert_eq!(response["result"]["name"], "ops");
    }

    #[tokio::test]
    async fn unauthenticated_request_is_rejected() {
        let addr = spawn_server().await;
        let url = format!("ws://{addr}/ws");
        let (mut socket, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        socket
            .send(WsMessage::Text(
                serde_json::json!({ "id": 1, "event": "getRtpCapabilities", "payload": {} })
                    .to_string(),
            ))
            .await
            .unwrap();

        let frame = socket.next().await.unwrap().unwrap();
        let WsMessage::Text(text) = frame else { panic!("expected text frame") };
        let response: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(response["ok"], false);
        assert_eq!(response["error"]["kind"], "Unauthorized");
    }
}
