use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use log::info;
use serde::Serialize;

use lifecycle::LifecycleController;
use model::{Action, AppId, Application, Operation};
use notice::Notices;
use poll::{PollHandle, PollSynchronizer};
use port::SharedBackend;
use registry::{Entry, SharedRegistry};

use crate::{errors::SessionError, session::Session};

pub mod lifecycle;
pub mod model;
pub mod notice;
pub mod poll;
pub mod port;
pub mod registry;

/// Render model of one registry entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AppView {
    #[serde(flatten)]
    pub app: Application,
    pub step: u8,
    pub pending: Option<Operation>,
    /// Empty while an operation is pending.
    pub actions: Vec<Action>,
}

impl From<Entry> for AppView {
    fn from(entry: Entry) -> Self {
        let pending = entry.ownership.pending();
        let actions = match pending {
            Some(_) => vec![],
            None => entry.app.available_actions(),
        };
        AppView {
            step: entry.app.step().number(),
            app: entry.app,
            pending,
            actions,
        }
    }
}

/// Everything one authenticated dashboard needs: the registry, the session,
/// the lifecycle controller and the polling task it owns while mounted.
pub struct Dashboard {
    pub registry: SharedRegistry,
    pub session: Session,
    pub notices: Notices,
    pub controller: Arc<LifecycleController>,
    backend: SharedBackend,
    poll_interval: Duration,
    poller: Mutex<Option<PollHandle>>,
}

impl Dashboard {
    pub fn new(backend: SharedBackend, session: Session, poll_interval: Duration) -> Self {
        let registry = SharedRegistry::new();
        let notices = Notices::new();
        let controller = Arc::new(LifecycleController::new(
            registry.clone(),
            session.clone(),
            backend.clone(),
            notices.clone(),
        ));
        Self {
            registry,
            session,
            notices,
            controller,
            backend,
            poll_interval,
            poller: Mutex::new(None),
        }
    }

    pub fn synchronizer(&self) -> PollSynchronizer {
        PollSynchronizer::new(self.controller.clone())
    }

    /// Starts polling unless a live polling task already exists.
    pub fn mount(&self) {
        let mut poller = self.poller();
        if poller.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        info!("Polling applications every {:?}", self.poll_interval);
        *poller = Some(self.synchronizer().spawn(self.poll_interval));
    }

    pub fn is_mounted(&self) -> bool {
        self.poller()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub async fn unmount(&self) {
        let handle = self.poller().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }

    /// Starts a new session and mounts the dashboard for it.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), SessionError> {
        self.session.login(&*self.backend, username, password).await?;
        self.unmount().await;
        self.controller.discard_state();
        self.mount();
        Ok(())
    }

    /// Stops polling, ends the session on the backend and drops everything
    /// that was shown under it.
    pub async fn logout(&self) {
        self.unmount().await;
        self.session.logout(&*self.backend).await;
        self.controller.end_session(None);
    }

    pub fn view(&self) -> Vec<AppView> {
        self.registry
            .entries()
            .into_iter()
            .map(AppView::from)
            .collect()
    }

    pub fn view_app(&self, id: &AppId) -> Option<AppView> {
        self.registry.get(id).map(AppView::from)
    }

    fn poller(&self) -> std::sync::MutexGuard<'_, Option<PollHandle>> {
        self.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
