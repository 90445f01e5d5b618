use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserSummary;
use crate::constants::{MAX_RATING, MAX_REVIEW_LENGTH, MIN_RATING};

/// Rating and optional text, unique per (user_id, book_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Uuid,
    pub user_id: Uuid,
    pub book_id: Uuid,
    pub rating: i16,
    pub content: Option<String>,
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Review {
    pub fn validate_rating(rating: i16) -> bool {
        (MIN_RATING..=MAX_RATING).contains(&rating)
    }

    pub fn validate_content(content: &str) -> bool {
        content.chars().count() <= MAX_REVIEW_LENGTH
    }

    /// Private reviews are only visible to their author
    pub fn visible_to(&self, viewer: Option<Uuid>) -> bool {
        !self.is_private || viewer == Some(self.user_id)
    }
}

/// Input of a review upsert
#[derive(Debug, Clone)]
pub struct ReviewDraft {
    pub user_id: Uuid,
    pub book_id: Uuid,
    pub rating: i16,
    pub content: Option<String>,
    pub is_private: bool,
}

/// Review with its author, as listed on a book page
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewWithAuthor {
    #[serde(flatten)]
    pub review: Review,
    pub author: UserSummary,
}

/// Feed item: a public review by a followed user
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    #[serde(flatten)]
    pub review: Review,
    pub author: UserSummary,
    pub book_title: String,
    pub book_author: String,
    pub book_cover_url: Option<String>,
}
