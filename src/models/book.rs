use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog entry, shared by every user's library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: Uuid,
    /// Open Library work key (e.g. `/works/OL45804W`) for seeded books
    pub open_library_key: Option<String>,
    pub title: String,
    pub author: String,
    pub isbn: Option<String>,
    pub cover_url: Option<String>,
    pub description: Option<String>,
    pub published_year: Option<i32>,
    pub page_count: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl Book {
    /// Case-insensitive match against title, author or ISBN
    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        self.title.to_lowercase().contains(&needle)
            || self.author.to_lowercase().contains(&needle)
            || self
                .isbn
                .as_deref()
                .is_some_and(|isbn| isbn.eq_ignore_ascii_case(query.trim()))
    }
}

/// Book metadata as returned by the external catalog, before it is seeded
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewBook {
    pub open_library_key: Option<String>,
    pub title: String,
    pub author: String,
    pub isbn: Option<String>,
    pub cover_url: Option<String>,
    pub description: Option<String>,
    pub published_year: Option<i32>,
    pub page_count: Option<i32>,
}

/// Aggregated public rating of a book
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RatingSummary {
    pub average_rating: Option<f64>,
    pub review_count: i64,
}
