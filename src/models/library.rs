use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Book;

/// Reading status of a book in a user's library
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "reading_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReadingStatus {
    #[default]
    Want,
    Reading,
    Finished,
}

/// One book in one user's library, unique per (user_id, book_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserBook {
    pub id: Uuid,
    pub user_id: Uuid,
    pub book_id: Uuid,
    pub status: ReadingStatus,
    pub current_page: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserBook {
    /// Create a fresh library entry with the timestamps of its initial status
    pub fn new(user_id: Uuid, book_id: Uuid, status: ReadingStatus, now: DateTime<Utc>) -> Self {
        let mut entry = Self {
            id: Uuid::new_v4(),
            user_id,
            book_id,
            status: ReadingStatus::Want,
            current_page: None,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        };
        entry.transition(status, now);
        entry
    }

    /// Move the entry to `status`.
    ///
    /// `started_at` and `finished_at` are stamped the first time the entry
    /// enters `Reading` and `Finished` respectively and are never cleared,
    /// so re-reads keep the original dates. Returns whether anything changed.
    pub fn transition(&mut self, status: ReadingStatus, now: DateTime<Utc>) -> bool {
        let mut changed = self.status != status;
        self.status = status;

        match status {
            ReadingStatus::Want => {}
            ReadingStatus::Reading => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                    changed = true;
                }
            }
            ReadingStatus::Finished => {
                if self.finished_at.is_none() {
                    self.finished_at = Some(now);
                    changed = true;
                }
            }
        }

        if changed {
            self.updated_at = now;
        }
        changed
    }
}

/// Library entry joined with its book
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEntry {
    #[serde(flatten)]
    pub entry: UserBook,
    pub book: Book,
}
