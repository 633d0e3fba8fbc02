//! The authenticated session: created at login, cleared at logout or on a 401.
//!
//! Controller and poller receive the session explicitly and read the credential
//! per request, so clearing it here stops every consumer.

use std::sync::{Arc, PoisonError, RwLock};

use log::{info, warn};

use crate::{
    domain::port::{Credential, DeploymentBackend},
    errors::{BackendError, SessionError},
};

#[derive(Clone, Debug)]
struct SessionState {
    credential: Credential,
    username: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct Session(Arc<RwLock<Option<SessionState>>>);

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a previously issued credential.
    pub fn resume(&self, token: impl Into<String>) {
        self.set(Some(SessionState {
            credential: Credential::new(token),
            username: None,
        }));
    }

    pub async fn login(
        &self,
        backend: &(dyn DeploymentBackend + Send + Sync),
        username: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        let receipt = backend
            .login(username, password)
            .await
            .map_err(|e| match e {
                BackendError::Validation(message) | BackendError::Rejected { message, .. } => {
                    SessionError::InvalidCredentials(message)
                }
                BackendError::Unauthorized => {
                    SessionError::InvalidCredentials("Invalid credentials".to_string())
                }
                other => SessionError::Backend(other),
            })?;
        let username = receipt.username.unwrap_or_else(|| username.to_string());
        info!("Logged in as {}", username);
        self.set(Some(SessionState {
            credential: Credential::new(receipt.token),
            username: Some(username),
        }));
        Ok(())
    }

    /// Checks the credential against the backend. Any non-2xx answer clears it;
    /// a transport failure keeps it and is returned as an error.
    pub async fn verify(&self, backend: &(dyn DeploymentBackend + Send + Sync)) -> Result<bool, SessionError> {
        let credential = self.credential().ok_or(SessionError::NotAuthenticated)?;
        match backend.list_apps(&credential).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_status() => {
                warn!("Stored credential rejected ({}), clearing session", e);
                self.invalidate();
                Ok(false)
            }
            Err(e) => Err(SessionError::Backend(e)),
        }
    }

    /// Best effort server-side logout, then clears the credential.
    pub async fn logout(&self, backend: &(dyn DeploymentBackend + Send + Sync)) {
        if let Some(credential) = self.credential() {
            if let Err(e) = backend.logout(&credential).await {
                warn!("Logout request failed: {}", e);
            }
        }
        self.invalidate();
        info!("Logged out");
    }

    pub fn invalidate(&self) {
        self.set(None);
    }

    pub fn credential(&self) -> Option<Credential> {
        self.read(|state| state.credential.clone())
    }

    pub fn username(&self) -> Option<String> {
        self.read(|state| state.username.clone()).flatten()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential().is_some()
    }

    fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> Option<R> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(f)
    }

    fn set(&self, state: Option<SessionState>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}
