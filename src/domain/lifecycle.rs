//! Lifecycle Controller: runs prepare / deploy / stop / delete against one
//! application at a time.
//!
//! An operation first claims the registry entry (at most one claim per
//! application) and may apply an optimistic status. Once its requests finish
//! it writes the outcome back and releases the claim in one step. Backend
//! failures of an existing application end up on the application itself;
//! refusals to start are returned as errors.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use log::{info, warn};
use serde::Serialize;
use uuid::Uuid;

use super::{
    model::{Action, AppId, AppStatus, Application, DeployConfig, NewApplication, Operation},
    notice::{NoticeSource, Notices},
    port::{Credential, SharedBackend},
    registry::SharedRegistry,
};
use crate::{
    errors::{BackendError, LifecycleError},
    session::Session,
};

pub const NO_LOGS: &str = "No logs available";
pub const SESSION_EXPIRED: &str = "Session expired, please log in again";

/// First half of the two-step delete protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeleteConfirmation {
    pub token: Uuid,
    pub app_id: AppId,
    pub prompt: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum DeleteOutcome {
    Deleted,
    Declined,
    Failed { message: String },
}

/// Claim on a registry entry for the duration of one operation. Dropping it
/// without `finish` or `remove` releases the claim.
struct InFlight {
    registry: SharedRegistry,
    id: Option<AppId>,
}

impl InFlight {
    fn finish(mut self, app: Application) -> Application {
        if let Some(id) = self.id.take() {
            self.registry.with(|registry| {
                if registry.update(app.clone()) {
                    registry.release(&id);
                }
            });
        }
        app
    }

    fn remove(mut self) {
        if let Some(id) = self.id.take() {
            self.registry.with(|registry| registry.remove(&id));
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.registry.with(|registry| registry.release(&id));
        }
    }
}

pub struct LifecycleController {
    registry: SharedRegistry,
    session: Session,
    backend: SharedBackend,
    notices: Notices,
    confirmations: Mutex<HashMap<Uuid, AppId>>,
}

impl LifecycleController {
    pub fn new(registry: SharedRegistry, session: Session, backend: SharedBackend, notices: Notices) -> Self {
        Self {
            registry,
            session,
            backend,
            notices,
            confirmations: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    pub(crate) fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    pub(crate) fn notices(&self) -> &Notices {
        &self.notices
    }

    /// Creates the application on the backend and puts it at the front of the registry.
    pub async fn import(&self, request: NewApplication) -> Result<Application, LifecycleError> {
        let request = request.normalized()?;
        let credential = self.credential()?;
        let ticket = self.registry.with(|registry| registry.ticket());
        info!("Importing {} from {} ({})", request.name, request.git_url, request.branch);
        match self.backend.import_app(&credential, &request).await {
            Ok(app) => {
                let kept = self.registry.with(|registry| {
                    if registry.cleared_since(ticket) {
                        return false;
                    }
                    registry.upsert(app.clone());
                    true
                });
                if !kept {
                    return Err(LifecycleError::NotAuthenticated);
                }
                info!("Application {} imported as {}", app.name, app.id);
                Ok(app)
            }
            Err(BackendError::Validation(message)) => Err(LifecycleError::Validation(message)),
            Err(e) => {
                self.note_unauthorized(&e);
                Err(if e.is_unauthorized() {
                    LifecycleError::NotAuthenticated
                } else {
                    LifecycleError::Backend(e)
                })
            }
        }
    }

    pub async fn prepare(&self, id: &AppId) -> Result<Application, LifecycleError> {
        let (flight, mut app, credential) =
            self.begin(id, Action::Prepare, Operation::Prepare, |app| {
                app.status = AppStatus::Preparing;
            })?;
        info!("Preparing {} ({})", app.name, id);
        match self.backend.prepare(&credential, id).await {
            Ok(receipt) => {
                // A prepared application always carries its routing rule.
                let Some(rule) = receipt.traefik_rule.filter(|rule| !rule.is_empty()) else {
                    let missing = BackendError::Decode("prepare returned no routing rule".to_string());
                    return Ok(self.record_failure(flight, app, Operation::Prepare, missing));
                };
                app.status = AppStatus::Prepared;
                app.traefik_rule = Some(rule);
                if let Some(message) = receipt.message {
                    info!("{}", message);
                }
                Ok(flight.finish(app))
            }
            Err(e) => Ok(self.record_failure(flight, app, Operation::Prepare, e)),
        }
    }

    /// Deploys from `prepared`, `stopped` or a failed deploy.
    pub async fn deploy(&self, id: &AppId, config: DeployConfig) -> Result<Application, LifecycleError> {
        self.run_deploy(id, Action::Deploy, config).await
    }

    /// Deploys again with fresh settings while the application is running.
    pub async fn redeploy(&self, id: &AppId, config: DeployConfig) -> Result<Application, LifecycleError> {
        self.run_deploy(id, Action::Redeploy, config).await
    }

    async fn run_deploy(
        &self,
        id: &AppId,
        action: Action,
        config: DeployConfig,
    ) -> Result<Application, LifecycleError> {
        if config.container_port == 0 {
            return Err(LifecycleError::Validation(
                "Container port must be between 1 and 65535".to_string(),
            ));
        }
        let (flight, mut app, credential) = self.begin(id, action, Operation::Deploy, |app| {
            app.status = AppStatus::Deploying;
        })?;

        // Settings go first; a rejected update aborts the deploy trigger.
        info!("Saving configuration of {} (port {})", app.name, config.container_port);
        if let Err(e) = self.backend.update_config(&credential, id, &config).await {
            return Ok(self.record_failure(flight, app, Operation::Deploy, e));
        }
        app.container_port = config.container_port;
        app.env_vars = config.env_vars;

        info!("Deploying {} ({})", app.name, id);
        match self.backend.deploy(&credential, id).await {
            Ok(receipt) => {
                app.status = AppStatus::Running;
                if let Some(message) = receipt.message {
                    info!("{}", message);
                }
                Ok(flight.finish(app))
            }
            Err(e) => Ok(self.record_failure(flight, app, Operation::Deploy, e)),
        }
    }

    /// A failed stop keeps the application `running`: the container was not
    /// confirmed stopped. Only the error message is recorded.
    pub async fn stop(&self, id: &AppId) -> Result<Application, LifecycleError> {
        let (flight, mut app, credential) = self.begin(id, Action::Stop, Operation::Stop, |_| {})?;
        info!("Stopping {} ({})", app.name, id);
        match self.backend.stop(&credential, id).await {
            Ok(()) => {
                app.status = AppStatus::Stopped;
                Ok(flight.finish(app))
            }
            Err(e) => {
                warn!("Stop of {} failed: {}", id, e);
                self.note_unauthorized(&e);
                app.error_message = Some(e.to_string());
                Ok(flight.finish(app))
            }
        }
    }

    /// Container logs as display text. Errors are rendered in place of the logs.
    pub async fn fetch_logs(&self, id: &AppId) -> Result<String, LifecycleError> {
        let credential = self.credential()?;
        if self.registry.get(id).is_none() {
            return Err(LifecycleError::NotFound(id.clone()));
        }
        Ok(match self.backend.logs(&credential, id).await {
            Ok(logs) if logs.is_empty() => NO_LOGS.to_string(),
            Ok(logs) => logs,
            Err(e) => {
                self.note_unauthorized(&e);
                format!("Error: {e}")
            }
        })
    }

    /// Registers a pending delete. Nothing is sent until it is confirmed.
    pub fn request_delete(&self, id: &AppId) -> Result<DeleteConfirmation, LifecycleError> {
        let entry = self
            .registry
            .get(id)
            .ok_or_else(|| LifecycleError::NotFound(id.clone()))?;
        if let Some(operation) = entry.ownership.pending() {
            return Err(LifecycleError::Busy {
                id: id.clone(),
                operation,
            });
        }
        let token = Uuid::new_v4();
        let mut confirmations = self.confirmations();
        confirmations.retain(|_, pending| pending != id);
        confirmations.insert(token, id.clone());
        drop(confirmations);
        Ok(DeleteConfirmation {
            token,
            app_id: id.clone(),
            prompt: format!(
                "Are you sure you want to delete \"{}\"? This cannot be undone.",
                entry.app.name
            ),
        })
    }

    /// Second half of the delete protocol. Declining discards the token and
    /// changes nothing.
    pub async fn confirm_delete(&self, token: Uuid, accept: bool) -> Result<DeleteOutcome, LifecycleError> {
        let id = self
            .confirmations()
            .remove(&token)
            .ok_or(LifecycleError::UnknownConfirmation)?;
        if !accept {
            info!("Delete of {} declined", id);
            return Ok(DeleteOutcome::Declined);
        }

        let (flight, app, credential) = self.begin(&id, Action::Delete, Operation::Delete, |_| {})?;
        info!("Deleting {} ({})", app.name, id);
        match self.backend.delete(&credential, &id).await {
            Ok(()) => {
                flight.remove();
                self.confirmations().retain(|_, pending| pending != &id);
                info!("Application {} deleted", app.name);
                Ok(DeleteOutcome::Deleted)
            }
            Err(e) => {
                warn!("Delete of {} failed: {}", id, e);
                let message = format!("Delete failed: {e}");
                if !self.note_unauthorized(&e) {
                    self.notices.push(NoticeSource::Delete, message.clone());
                }
                Ok(DeleteOutcome::Failed { message })
            }
        }
    }

    /// Delete behind a blocking yes/no prompt.
    pub async fn delete_with(
        &self,
        id: &AppId,
        confirm: impl FnOnce(&str) -> bool,
    ) -> Result<DeleteOutcome, LifecycleError> {
        let confirmation = self.request_delete(id)?;
        let accept = confirm(&confirmation.prompt);
        self.confirm_delete(confirmation.token, accept).await
    }

    /// Checks state and claims the entry in one registry transaction, applying
    /// `stage` as the optimistic view. Any previous error is cleared.
    fn begin(
        &self,
        id: &AppId,
        action: Action,
        operation: Operation,
        stage: impl FnOnce(&mut Application),
    ) -> Result<(InFlight, Application, Credential), LifecycleError> {
        let credential = self.credential()?;
        let app = self.registry.with(|registry| {
            let entry = registry
                .get(id)
                .ok_or_else(|| LifecycleError::NotFound(id.clone()))?;
            if let Some(current) = entry.ownership.pending() {
                return Err(LifecycleError::Busy {
                    id: id.clone(),
                    operation: current,
                });
            }
            if !entry.app.allows(action) {
                return Err(LifecycleError::InvalidTransition {
                    action,
                    status: entry.app.status,
                });
            }
            let mut app = registry.claim(id, operation)?;
            app.error_message = None;
            stage(&mut app);
            registry.upsert(app.clone());
            Ok(app)
        })?;
        let flight = InFlight {
            registry: self.registry.clone(),
            id: Some(id.clone()),
        };
        Ok((flight, app, credential))
    }

    fn record_failure(
        &self,
        flight: InFlight,
        mut app: Application,
        operation: Operation,
        error: BackendError,
    ) -> Application {
        warn!("{} of {} failed: {}", operation, app.id, error);
        self.note_unauthorized(&error);
        app.status = AppStatus::Failed;
        app.error_message = Some(error.to_string());
        flight.finish(app)
    }

    /// Drops pending delete tokens for applications that no longer exist.
    pub fn forget_deletes(&self, ids: &[AppId]) {
        if !ids.is_empty() {
            self.confirmations().retain(|_, pending| !ids.contains(pending));
        }
    }

    /// Clears the credential and everything shown under it. `reason` is left
    /// behind as the only notice.
    pub fn end_session(&self, reason: Option<&str>) {
        self.session.invalidate();
        self.discard_state();
        if let Some(reason) = reason {
            self.notices.push(NoticeSource::Session, reason);
        }
    }

    /// Empties the registry and drops notices and pending delete tokens.
    /// Requests already in flight can no longer write into the registry.
    pub fn discard_state(&self) {
        self.registry.with(|registry| registry.clear());
        self.confirmations().clear();
        self.notices.reset();
    }

    /// Ends the session on a 401. Returns true if `error` was one.
    fn note_unauthorized(&self, error: &BackendError) -> bool {
        if !error.is_unauthorized() {
            return false;
        }
        if self.session.is_authenticated() {
            warn!("Credential rejected, ending session");
            self.end_session(Some(SESSION_EXPIRED));
        }
        true
    }

    fn credential(&self) -> Result<Credential, LifecycleError> {
        self.session.credential().ok_or(LifecycleError::NotAuthenticated)
    }

    fn confirmations(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, AppId>> {
        self.confirmations.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
