use async_trait::async_trait;

use super::model::{
    AppId, Application, DeployConfig, DeployReceipt, LoginReceipt, NewApplication, PrepareReceipt,
};
use crate::errors::BackendError;

/// Credential attached to every authenticated backend request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Request/response contract of the deployment backend. Cloning, image builds and
/// reverse-proxy configuration all happen behind this port.
#[async_trait]
pub trait DeploymentBackend {
    async fn login(&self, username: &str, password: &str) -> Result<LoginReceipt, BackendError>;

    async fn logout(&self, credential: &Credential) -> Result<(), BackendError>;

    async fn list_apps(&self, credential: &Credential) -> Result<Vec<Application>, BackendError>;

    async fn import_app(
        &self,
        credential: &Credential,
        request: &NewApplication,
    ) -> Result<Application, BackendError>;

    async fn prepare(&self, credential: &Credential, id: &AppId) -> Result<PrepareReceipt, BackendError>;

    async fn update_config(
        &self,
        credential: &Credential,
        id: &AppId,
        config: &DeployConfig,
    ) -> Result<(), BackendError>;

    async fn deploy(&self, credential: &Credential, id: &AppId) -> Result<DeployReceipt, BackendError>;

    async fn stop(&self, credential: &Credential, id: &AppId) -> Result<(), BackendError>;

    async fn logs(&self, credential: &Credential, id: &AppId) -> Result<String, BackendError>;

    async fn delete(&self, credential: &Credential, id: &AppId) -> Result<(), BackendError>;
}

pub type SharedBackend = std::sync::Arc<dyn DeploymentBackend + Send + Sync + 'static>;
