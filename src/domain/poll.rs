use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};

use super::{
    lifecycle::{LifecycleController, SESSION_EXPIRED},
    notice::{NoticeSource, Notices},
    port::SharedBackend,
    registry::{MergeReport, SharedRegistry},
};
use crate::{errors::BackendError, session::Session};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Merged(MergeReport),
    Failed(BackendError),
    SessionEnded,
}

/// Periodically fetches the full application list and merges it into the registry.
#[derive(Clone)]
pub struct PollSynchronizer {
    controller: Arc<LifecycleController>,
    registry: SharedRegistry,
    session: Session,
    backend: SharedBackend,
    notices: Notices,
}

impl PollSynchronizer {
    /// Polls with the controller's registry, session and backend. Session
    /// teardown and delete-token cleanup go through the controller.
    pub fn new(controller: Arc<LifecycleController>) -> Self {
        Self {
            registry: controller.registry().clone(),
            session: controller.session().clone(),
            backend: controller.backend().clone(),
            notices: controller.notices().clone(),
            controller,
        }
    }

    /// One poll cycle. A failed fetch leaves the registry untouched.
    pub async fn sync_once(&self) -> PollOutcome {
        let Some(credential) = self.session.credential() else {
            return PollOutcome::SessionEnded;
        };
        let ticket = self.registry.with(|registry| registry.ticket());
        match self.backend.list_apps(&credential).await {
            Ok(snapshot) => {
                let report = self
                    .registry
                    .with(|registry| registry.merge_snapshot(ticket, snapshot));
                self.controller.forget_deletes(&report.removed);
                self.notices.clear(NoticeSource::Poll);
                if !report.is_noop() || !report.skipped.is_empty() {
                    debug!(
                        "Poll merged: {} inserted, {} updated, {} removed, {} kept local",
                        report.inserted.len(),
                        report.updated.len(),
                        report.removed.len(),
                        report.skipped.len()
                    );
                }
                PollOutcome::Merged(report)
            }
            Err(BackendError::Unauthorized) => {
                warn!("Poll rejected credential, ending session");
                self.controller.end_session(Some(SESSION_EXPIRED));
                PollOutcome::SessionEnded
            }
            Err(e) => {
                warn!("Poll failed: {}", e);
                self.notices.replace(NoticeSource::Poll, e.to_string());
                PollOutcome::Failed(e)
            }
        }
    }

    /// Starts polling every `period`, the first cycle immediately. Polling
    /// stops when the session ends or the handle is dropped.
    pub fn spawn(self, period: Duration) -> PollHandle {
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if self.sync_once().await == PollOutcome::SessionEnded {
                    info!("Session ended, polling stopped");
                    break;
                }
            }
        });
        PollHandle { task }
    }
}

/// Owner of the polling task; tearing it down aborts the timer.
#[derive(Debug)]
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn shutdown(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
