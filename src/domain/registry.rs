//! Application Registry: the in-memory collection every view renders from.
//!
//! Each entry carries an ownership flag. While a lifecycle operation owns an
//! entry, poll snapshots leave it alone. Every mutation also advances a logical
//! clock so a snapshot fetched before a local write can never overwrite it.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use itertools::Itertools;

use super::model::{AppId, Application, Operation};
use crate::errors::LifecycleError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Ownership {
    #[default]
    Idle,
    Pending(Operation),
}

impl Ownership {
    pub fn pending(&self) -> Option<Operation> {
        match self {
            Ownership::Idle => None,
            Ownership::Pending(operation) => Some(*operation),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub app: Application,
    pub ownership: Ownership,
    revision: u64,
}

/// Registry clock value captured before a backend fetch starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SyncTicket(u64);

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub inserted: Vec<AppId>,
    pub updated: Vec<AppId>,
    pub removed: Vec<AppId>,
    pub skipped: Vec<AppId>,
}

impl MergeReport {
    pub fn is_noop(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Entry>,
    removed: HashMap<AppId, u64>,
    clock: u64,
    cleared_at: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently imported first.
    pub fn list(&self) -> impl Iterator<Item = &Application> {
        self.entries.iter().map(|entry| &entry.app)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, id: &AppId) -> Option<&Entry> {
        self.entries.iter().find(|entry| &entry.app.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces the entry with the same id, or inserts at the front.
    /// The ownership flag of an existing entry is kept.
    pub fn upsert(&mut self, app: Application) {
        let revision = self.tick();
        self.removed.remove(&app.id);
        match self.position(&app.id) {
            Some(index) => {
                let entry = &mut self.entries[index];
                entry.app = app;
                entry.revision = revision;
            }
            None => self.entries.insert(
                0,
                Entry {
                    app,
                    ownership: Ownership::Idle,
                    revision,
                },
            ),
        }
    }

    /// Replaces an existing entry only. Returns false when the entry is gone,
    /// for instance because the session ended while an operation ran.
    pub fn update(&mut self, app: Application) -> bool {
        if self.position(&app.id).is_none() {
            return false;
        }
        self.upsert(app);
        true
    }

    pub fn remove(&mut self, id: &AppId) -> Option<Application> {
        let index = self.position(id)?;
        let revision = self.tick();
        self.removed.insert(id.clone(), revision);
        Some(self.entries.remove(index).app)
    }

    /// Marks `id` as owned by `operation`. Fails if another operation owns it.
    pub fn claim(&mut self, id: &AppId, operation: Operation) -> Result<Application, LifecycleError> {
        let index = self
            .position(id)
            .ok_or_else(|| LifecycleError::NotFound(id.clone()))?;
        if let Ownership::Pending(current) = self.entries[index].ownership {
            return Err(LifecycleError::Busy {
                id: id.clone(),
                operation: current,
            });
        }
        let revision = self.tick();
        let entry = &mut self.entries[index];
        entry.ownership = Ownership::Pending(operation);
        entry.revision = revision;
        Ok(entry.app.clone())
    }

    pub fn release(&mut self, id: &AppId) {
        if let Some(index) = self.position(id) {
            let revision = self.tick();
            let entry = &mut self.entries[index];
            entry.ownership = Ownership::Idle;
            entry.revision = revision;
        }
    }

    /// Drops every entry and tombstone. Results of requests started before
    /// the clear are refused afterwards.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.removed.clear();
        self.cleared_at = self.tick();
    }

    pub fn cleared_since(&self, ticket: SyncTicket) -> bool {
        self.cleared_at > ticket.0
    }

    pub fn ticket(&self) -> SyncTicket {
        SyncTicket(self.clock)
    }

    /// Reconciles a full server snapshot fetched after `ticket` was taken.
    ///
    /// Entries that are owned by an in-flight operation, or that were written
    /// locally after the ticket, keep their local view. Idle entries missing
    /// from the snapshot are removed.
    pub fn merge_snapshot(&mut self, ticket: SyncTicket, snapshot: Vec<Application>) -> MergeReport {
        let snapshot: Vec<Application> = snapshot
            .into_iter()
            .unique_by(|app| app.id.clone())
            .collect();
        let mut report = MergeReport::default();
        if self.cleared_since(ticket) {
            report.skipped = snapshot.into_iter().map(|app| app.id).collect();
            return report;
        }

        let gone: Vec<AppId> = self
            .entries
            .iter()
            .filter(|entry| !self.is_protected(entry, ticket))
            .filter(|entry| !snapshot.iter().any(|app| app.id == entry.app.id))
            .map(|entry| entry.app.id.clone())
            .collect();
        for id in gone {
            self.remove(&id);
            report.removed.push(id);
        }

        // Reversed so new ids end up at the front in snapshot order.
        for app in snapshot.into_iter().rev() {
            let existing = self
                .get(&app.id)
                .map(|entry| (self.is_protected(entry, ticket), entry.app == app));
            match existing {
                Some((true, _)) => report.skipped.push(app.id),
                Some((false, true)) => {}
                Some((false, false)) => {
                    report.updated.push(app.id.clone());
                    self.upsert(app);
                }
                None if self.removed_after(&app.id, ticket) => report.skipped.push(app.id),
                None => {
                    report.inserted.push(app.id.clone());
                    self.upsert(app);
                }
            }
        }

        self.removed.retain(|_, revision| *revision > ticket.0);
        report
    }

    fn is_protected(&self, entry: &Entry, ticket: SyncTicket) -> bool {
        entry.ownership != Ownership::Idle || entry.revision > ticket.0
    }

    fn removed_after(&self, id: &AppId, ticket: SyncTicket) -> bool {
        self.removed
            .get(id)
            .is_some_and(|revision| *revision > ticket.0)
    }

    fn position(&self, id: &AppId) -> Option<usize> {
        self.entries.iter().position(|entry| &entry.app.id == id)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// The registry shared by the controller, the poller and the views. Locks are
/// never held across a request.
#[derive(Clone, Debug, Default)]
pub struct SharedRegistry(Arc<Mutex<Registry>>);

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> R {
        let mut registry = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut registry)
    }

    pub fn list(&self) -> Vec<Application> {
        self.with(|registry| registry.list().cloned().collect())
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.with(|registry| registry.entries().to_vec())
    }

    pub fn get(&self, id: &AppId) -> Option<Entry> {
        self.with(|registry| registry.get(id).cloned())
    }
}
