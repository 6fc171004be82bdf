use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

mod admission;
mod auth;
mod channel_registry;
mod client_registry;
mod config;
mod crypto;
mod error;
mod events;
mod media;
mod models;
mod permissions;
mod routing;
mod signaling;

use crate::admission::AdmissionController;
use crate::auth::SessionTokens;
use crate::channel_registry::ChannelRegistry;
use crate::client_registry::ClientRegistry;
use crate::config::AppConfig;
use crate::events::EventBus;
use crate::media::MediaWorker;
use crate::routing::RoutingCore;

/// Fatal Media Worker death exits with this code so an external
/// supervisor can tell it apart from a clean shutdown or an
/// initialization failure (spec §4.1, §6).
const EXIT_MEDIA_WORKER_DIED: u8 = 70;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal error during startup: {e:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging.level);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting intercom-router");

    let channels = ChannelRegistry::new();
    let clients = ClientRegistry::new();
    let media = MediaWorker::new(&config.media);
    let events = Arc::new(EventBus::new());
    let routing = RoutingCore::new(channels.clone(), clients.clone(), media.clone(), events.clone());
    let tokens = Arc::new(SessionTokens::new(&config.secrets.server_secret));
    let admission = Arc::new(AdmissionController::new(config.secrets.clone(), tokens, clients.clone()));

    routing.spawn_active_speaker_loop(
        config.media.speaker_threshold_dbfs,
        config.media.speaker_interval,
        config.media.speaker_hold_off,
    );

    let config = Arc::new(config);
    let state = signaling::AppState::new(
        config.clone(),
        channels,
        clients,
        media.clone(),
        routing,
        admission,
        events,
    );

    let addr = format!("0.0.0.0:{}", config.signaling.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "signaling layer listening");

    let app = signaling::build_router(state);
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    let mut died = media.died();

    tokio::select! {
        result = server => {
            result?;
            tracing::info!("intercom-router stopped gracefully");
            Ok(ExitCode::SUCCESS)
        }
        _ = died.changed() => {
            tracing::error!("media worker died — shutting down");
            Ok(ExitCode::from(EXIT_MEDIA_WORKER_DIED))
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
