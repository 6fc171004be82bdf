//! Admission Controller (spec §4.6) — the only place a raw shared secret
//! is compared, and the only path that mints a client id and a session
//! token. Fails closed: an unconfigured admin secret disables the admin
//! path entirely rather than leaving it open.

use std::sync::Arc;

use crate::auth::SessionTokens;
use crate::client_registry::ClientRegistry;
use crate::config::SecretsConfig;
use crate::crypto::secrets_match;
use crate::error::{AppError, AppResult};
use crate::models::{ClientId, ClientStatus, SessionHandle};

pub struct Enrollment {
    pub client_id: ClientId,
    pub token: String,
    pub status: ClientStatus,
    pub admin: bool,
}

pub struct AdmissionController {
    secrets: SecretsConfig,
    tokens: Arc<SessionTokens>,
    clients: Arc<ClientRegistry>,
}

impl AdmissionController {
    pub fn new(secrets: SecretsConfig, tokens: Arc<SessionTokens>, clients: Arc<ClientRegistry>) -> Self {
        Self {
            secrets,
            tokens,
            clients,
        }
    }

    /// `authenticate` — enrolls the session as pending. Emission of the
    /// `pendingClient` event to admin sessions is the Signaling Layer's
    /// job (it alone knows which sessions are admins and connected).
    pub async fn authenticate(&self, display_name: String, provided_secret: &str, session_handle: SessionHandle) -> AppResult<Enrollment> {
        if !secrets_match(provided_secret, &self.secrets.server_secret) {
            return Err(AppError::Unauthorized);
        }

        let client_id = self.clients.enroll_pending(display_name, session_handle).await;
        let token = self.tokens.issue(client_id.0, false)?;
        Ok(Enrollment {
            client_id,
            token,
            status: ClientStatus::Pending,
            admin: false,
        })
    }

    /// `adminAuthenticate` — requires both secrets and an admin secret
    /// actually configured; enrolls the session as active immediately.
    pub async fn admin_authenticate(
        &self,
        display_name: String,
        provided_secret: &str,
        provided_admin_secret: &str,
        session_handle: SessionHandle,
    ) -> AppResult<Enrollment> {
        let Some(admin_secret) = self.secrets.admin_secret.as_deref() else {
            return Err(AppError::Unauthorized);
        };
        if !secrets_match(provided_secret, &self.secrets.server_secret) || !secrets_match(provided_admin_secret, admin_secret) {
            return Err(AppError::Unauthorized);
        }

        let client_id = self.clients.enroll_admin(display_name, session_handle).await;
        let token = self.tokens.issue(client_id.0, true)?;
        Ok(Enrollment {
            client_id,
            token,
            status: ClientStatus::Active,
            admin: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(admin_secret: Option<&str>) -> AdmissionController {
        AdmissionController::new(
            SecretsConfig {
                server_secret: "wire".to_string(),
                admin_secret: admin_secret.map(str::to_string),
            },
            Arc::new(SessionTokens::new("wire")),
            ClientRegistry::new(),
        )
    }

    #[tokio::test]
    async fn correct_secret_enrolls_pending() {
        let admission = controller(Some("key"));
        let enrollment = admission
            .authenticate("bob".into(), "wire", SessionHandle::new())
            .await
            .unwrap();
        assert_eq!(enrollment.status, ClientStatus::Pending);
        assert!(!enrollment.admin);
    }

    #[tokio::test]
    async fn wrong_secret_is_unauthorized() {
        let admission = controller(Some("key"));
        let err = admission
            .authenticate("bob".into(), "not-wire", SessionHandle::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn admin_path_disabled_when_admin_secret_unset() {
        let admission = controller(None);
        let err = admission
            .admin_authenticate("root".into(), "wire", "key", SessionHandle::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn admin_authenticate_enrolls_active_admin() {
        let admission = controller(Some("key"));
        let enrollment = admission
            .admin_authenticate("root".into(), "wire", "key", SessionHandle::new())
            .await
            .unwrap();
        assert_eq!(enrollment.status, ClientStatus::Active);
        assert!(enrollment.admin);
    }
}
