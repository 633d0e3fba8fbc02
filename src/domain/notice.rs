use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeSource {
    Poll,
    Delete,
    Session,
}

/// A dismissible, non-blocking message for the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub id: u64,
    pub source: NoticeSource,
    pub message: String,
}

#[derive(Debug, Default)]
struct NoticeBoard {
    notices: Vec<Notice>,
    next_id: u64,
}

#[derive(Clone, Debug, Default)]
pub struct Notices(Arc<Mutex<NoticeBoard>>);

impl Notices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, source: NoticeSource, message: impl Into<String>) -> u64 {
        self.with(|board| {
            board.next_id += 1;
            let id = board.next_id;
            board.notices.push(Notice {
                id,
                source,
                message: message.into(),
            });
            id
        })
    }

    /// Replaces any notice from the same source. Used for the poll error slot.
    pub fn replace(&self, source: NoticeSource, message: impl Into<String>) -> u64 {
        self.clear(source);
        self.push(source, message)
    }

    pub fn clear(&self, source: NoticeSource) {
        self.with(|board| board.notices.retain(|notice| notice.source != source));
    }

    pub fn reset(&self) {
        self.with(|board| board.notices.clear());
    }

    pub fn dismiss(&self, id: u64) -> bool {
        self.with(|board| {
            let before = board.notices.len();
            board.notices.retain(|notice| notice.id != id);
            board.notices.len() != before
        })
    }

    pub fn list(&self) -> Vec<Notice> {
        self.with(|board| board.notices.clone())
    }

    fn with<R>(&self, f: impl FnOnce(&mut NoticeBoard) -> R) -> R {
        let mut board = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut board)
    }
}
