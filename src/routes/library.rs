use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::subscription::effective_plan;
use super::SuccessResponse;
use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::models::{LibraryEntry, ReadingStatus, UsagePeriod, UserBook};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LibraryQuery {
    pub status: Option<ReadingStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToLibraryRequest {
    pub book_id: Uuid,
    #[serde(default)]
    pub status: ReadingStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLibraryRequest {
    pub status: Option<ReadingStatus>,
    pub current_page: Option<i32>,
}

/// GET /api/v1/library?status=
pub async fn list_library(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppQuery(query): AppQuery<LibraryQuery>,
) -> Result<Json<Vec<LibraryEntry>>> {
    let entries = state.store.list_library(user.id, query.status).await?;
    Ok(Json(entries))
}

/// Add a book to the caller's library
///
/// Counts against the plan's yearly allowance. The store checks the limit,
/// inserts the entry and bumps usage as one unit.
///
/// POST /api/v1/library
pub async fn add_to_library(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppJson(payload): AppJson<AddToLibraryRequest>,
) -> Result<(StatusCode, Json<UserBook>)> {
    if state.store.find_book(payload.book_id).await?.is_none() {
        return Err(AppError::NotFound("Book"));
    }

    let now = Utc::now();
    let plan = effective_plan(&state, &user).await?;
    let period = UsagePeriod::containing(user.usage_anchor(), now);
    let entry = UserBook::new(user.id, payload.book_id, payload.status, now);

    let saved = match state
        .store
        .add_to_library(entry, period, plan.features.max_books_per_year)
        .await
    {
        Err(AppError::UsageLimitReached { books_added, limit }) => {
            tracing::info!(
                "User {} reached the {} plan limit ({}/{})",
                user.id,
                plan.id,
                books_added,
                limit
            );
            return Err(AppError::UsageLimitReached { books_added, limit });
        }
        other => other?,
    };

    tracing::info!("User {} added book {} as {:?}", user.id, saved.book_id, saved.status);

    Ok((StatusCode::CREATED, Json(saved)))
}

/// Change reading status and/or progress
///
/// PATCH /api/v1/library/:bookId
pub async fn update_library_entry(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppPath(book_id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateLibraryRequest>,
) -> Result<Json<UserBook>> {
    let mut entry = state
        .store
        .find_library_entry(user.id, book_id)
        .await?
        .ok_or(AppError::NotFound("Library entry"))?;

    let now = Utc::now();

    if let Some(page) = payload.current_page {
        if page < 0 {
            return Err(AppError::InvalidInput(
                "currentPage cannot be negative".to_string(),
            ));
        }
        let page_count = state
            .store
            .find_book(book_id)
            .await?
            .and_then(|b| b.page_count);
        if let Some(page_count) = page_count {
            if page > page_count {
                return Err(AppError::InvalidInput(format!(
                    "currentPage cannot exceed the book's {page_count} pages"
                )));
            }
        }
        if entry.current_page != Some(page) {
            entry.current_page = Some(page);
            entry.updated_at = now;
        }
    }

    if let Some(status) = payload.status {
        entry.transition(status, now);
    }

    let saved = state.store.save_library_entry(&entry).await?;
    Ok(Json(saved))
}

/// Remove a book from the library; it is also dropped from the caller's collections
///
/// DELETE /api/v1/library/:bookId
pub async fn remove_from_library(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppPath(book_id): AppPath<Uuid>,
) -> Result<Json<SuccessResponse>> {
    if !state.store.remove_from_library(user.id, book_id).await? {
        return Err(AppError::NotFound("Library entry"));
    }

    tracing::info!("User {} removed book {}", user.id, book_id);
    Ok(Json(SuccessResponse::ok()))
}
