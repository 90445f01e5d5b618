use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::validation::Pagination;
use crate::auth::MaybeAuthUser;
use crate::constants::{
    DEFAULT_SEARCH_LIMIT, LOCAL_RESULTS_THRESHOLD, MAX_SEARCH_LIMIT, MAX_SEARCH_QUERY_LEN,
    MIN_SEARCH_QUERY_LEN,
};
use crate::error::{AppError, Result};
use crate::extract::{AppPath, AppQuery};
use crate::models::{Book, RatingSummary, ReviewWithAuthor, UserBook};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub books: Vec<Book>,
    /// Number of catalog rows created or refreshed from Open Library
    pub seeded: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookDetails {
    #[serde(flatten)]
    pub book: Book,
    #[serde(flatten)]
    pub rating: RatingSummary,
    /// The caller's library entry, when signed in and present
    pub library_entry: Option<UserBook>,
}

/// Hybrid search
///
/// Searches the local catalog first and falls back to Open Library when the
/// local results are thin. Remote hits are upserted so the next search for
/// the same title is served locally.
///
/// GET /api/v1/books/search?q=&limit=
pub async fn search_books(
    State(state): State<AppState>,
    AppQuery(params): AppQuery<SearchParams>,
) -> Result<Json<SearchResponse>> {
    let query = params.q.trim();
    let query_len = query.chars().count();
    if !(MIN_SEARCH_QUERY_LEN..=MAX_SEARCH_QUERY_LEN).contains(&query_len) {
        return Err(AppError::InvalidInput(format!(
            "Search query must be between {} and {} characters",
            MIN_SEARCH_QUERY_LEN, MAX_SEARCH_QUERY_LEN
        )));
    }

    let limit = params
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);

    let mut books = state.store.search_books(query, limit as i64).await?;
    let mut seeded = 0;

    if books.len() < LOCAL_RESULTS_THRESHOLD {
        match state.catalog.search(query, limit).await {
            Ok(remote) => {
                for new_book in remote {
                    let book = state.store.upsert_book(new_book).await?;
                    seeded += 1;
                    if !books.iter().any(|b| b.id == book.id) {
                        books.push(book);
                    }
                }
            }
            Err(e) => {
                // Local results are still useful on their own
                tracing::warn!("Open Library search failed for '{}': {}", query, e);
            }
        }
    }

    books.truncate(limit);

    tracing::debug!("Search '{}': {} results, {} seeded", query, books.len(), seeded);

    Ok(Json(SearchResponse { books, seeded }))
}

/// GET /api/v1/books/:id
pub async fn get_book(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    AppPath(book_id): AppPath<Uuid>,
) -> Result<Json<BookDetails>> {
    let book = state
        .store
        .find_book(book_id)
        .await?
        .ok_or(AppError::NotFound("Book"))?;

    let rating = state.store.rating_summary(book_id).await?;

    let library_entry = match &viewer {
        Some(user) => state.store.find_library_entry(user.id, book_id).await?,
        None => None,
    };

    Ok(Json(BookDetails {
        book,
        rating,
        library_entry,
    }))
}

/// Reviews of a book: public ones plus the caller's own private review
///
/// GET /api/v1/books/:id/reviews?limit=&offset=
pub async fn book_reviews(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    AppPath(book_id): AppPath<Uuid>,
    AppQuery(pagination): AppQuery<Pagination>,
) -> Result<Json<Vec<ReviewWithAuthor>>> {
    if state.store.find_book(book_id).await?.is_none() {
        return Err(AppError::NotFound("Book"));
    }

    let reviews = state
        .store
        .list_book_reviews(book_id, viewer.map(|u| u.id), pagination.page())
        .await?;

    Ok(Json(reviews))
}
