use anyhow::{Context, Result};
use std::net::IpAddr;
use std::time::Duration;

/// Server configuration, loaded once at startup from the environment
/// (spec §6). There is no persisted deployment config underneath it —
/// this system is stateless across restarts beyond these settings.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub secrets: SecretsConfig,
    pub media: MediaConfig,
    pub signaling: SignalingConfig,
    pub logging: LoggingConfig,
}

/// Shared secrets gating the two authentication paths. Absence of
/// `admin_secret` disables the admin path entirely (fails closed).
#[derive(Clone)]
pub struct SecretsConfig {
    pub server_secret: String,
    pub admin_secret: Option<String>,
}

impl std::fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsConfig")
            .field("server_secret", &"<redacted>")
            .field("admin_secret", &self.admin_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub listen_ip: IpAddr,
    pub announced_ip: IpAddr,
    pub port_min: u16,
    pub port_max: u16,
    /// Active-speaker observer threshold, in dBFS. Default −70.
    pub speaker_threshold_dbfs: f32,
    /// Active-speaker observer sampling interval.
    pub speaker_interval: Duration,
    /// Hold-off before emitting `clientStoppedSpeaking`, to avoid flapping.
    pub speaker_hold_off: Duration,
    /// ICE establishment timeout.
    pub ice_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SignalingConfig {
    pub port: u16,
    /// Default per-request handler deadline (spec §5).
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl AppConfig {
    /// Load configuration from the environment. Fails fast with a
    /// descriptive error on any missing or malformed mandatory value —
    /// this system has no config file to fall back on.
    pub fn load() -> Result<Self> {
        let server_secret = std::env::var("SERVER_SECRET")
            .context("SERVER_SECRET is mandatory — no clients can authenticate without it")?;
        if server_secret.is_empty() {
            anyhow::bail!("SERVER_SECRET must not be empty");
        }

        let admin_secret = match std::env::var("ADMIN_SECRET") {
            Ok(s) if !s.is_empty() => Some(s),
            _ => {
                tracing::warn!("ADMIN_SECRET not set — admin authentication path disabled");
                None
            }
        };

        let listen_ip = env_or("MEDIA_LISTEN_IP", "0.0.0.0")
            .parse()
            .context("MEDIA_LISTEN_IP must be a valid IP address")?;
        let announced_ip = match std::env::var("MEDIA_ANNOUNCED_IP") {
            Ok(s) => s.parse().context("MEDIA_ANNOUNCED_IP must be a valid IP address")?,
            Err(_) => listen_ip,
        };

        let port_min = env_or("MEDIA_PORT_MIN", "40000")
            .parse()
            .context("MEDIA_PORT_MIN must be a u16")?;
        let port_max = env_or("MEDIA_PORT_MAX", "49999")
            .parse()
            .context("MEDIA_PORT_MAX must be a u16")?;
        if port_min > port_max {
            anyhow::bail!("MEDIA_PORT_MIN ({port_min}) must not exceed MEDIA_PORT_MAX ({port_max})");
        }

        let signaling_port = env_or("SIGNALING_PORT", "5000")
            .parse()
            .context("SIGNALING_PORT must be a u16")?;

        let level = env_or("LOG_LEVEL", "info");
        if !matches!(level.as_str(), "error" | "warn" | "info" | "debug") {
            anyhow::bail!("LOG_LEVEL must be one of error|warn|info|debug, got '{level}'");
        }

        Ok(Self {
            secrets: SecretsConfig {
                server_secret,
                admin_secret,
            },
            media: MediaConfig {
                listen_ip,
                announced_ip,
                port_min,
                port_max,
                speaker_threshold_dbfs: -70.0,
                speaker_interval: Duration::from_millis(800),
                speaker_hold_off: Duration::from_millis(800),
                ice_timeout: Duration::from_secs(20),
            },
            signaling: SignalingConfig {
                port: signaling_port,
                request_timeout: Duration::from_secs(10),
            },
            logging: LoggingConfig { level },
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
