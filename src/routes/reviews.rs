use axum::{extract::State, Json};
use serde::Deserialize;
use uuid::Uuid;

use super::validation::Pagination;
use super::SuccessResponse;
use crate::auth::AuthUser;
use crate::constants::{ERR_BOOK_NOT_IN_LIBRARY, MAX_RATING, MAX_REVIEW_LENGTH, MIN_RATING};
use crate::error::{AppError, Result};
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::models::{FeedItem, Review, ReviewDraft};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertReviewRequest {
    pub book_id: Uuid,
    pub rating: i16,
    pub content: Option<String>,
    #[serde(default)]
    pub is_private: bool,
}

/// Create or replace the caller's review of a book
///
/// PUT /api/v1/reviews
pub async fn upsert_review(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppJson(payload): AppJson<UpsertReviewRequest>,
) -> Result<Json<Review>> {
    if !Review::validate_rating(payload.rating) {
        return Err(AppError::InvalidInput(format!(
            "Rating must be between {MIN_RATING} and {MAX_RATING}"
        )));
    }

    let content = payload
        .content
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    if let Some(content) = &content {
        if !Review::validate_content(content) {
            return Err(AppError::InvalidInput(format!(
                "Review must be at most {MAX_REVIEW_LENGTH} characters"
            )));
        }
    }

    if state
        .store
        .find_library_entry(user.id, payload.book_id)
        .await?
        .is_none()
    {
        return Err(AppError::InvalidInput(ERR_BOOK_NOT_IN_LIBRARY.to_string()));
    }

    let review = state
        .store
        .upsert_review(ReviewDraft {
            user_id: user.id,
            book_id: payload.book_id,
            rating: payload.rating,
            content,
            is_private: payload.is_private,
        })
        .await?;

    tracing::info!("User {} reviewed book {} ({}/5)", user.id, review.book_id, review.rating);

    Ok(Json(review))
}

/// DELETE /api/v1/reviews/:bookId
pub async fn delete_review(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppPath(book_id): AppPath<Uuid>,
) -> Result<Json<SuccessResponse>> {
    if !state.store.delete_review(user.id, book_id).await? {
        return Err(AppError::NotFound("Review"));
    }
    Ok(Json(SuccessResponse::ok()))
}

/// The caller's own reviews, private ones included
///
/// GET /api/v1/reviews
pub async fn list_my_reviews(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Review>>> {
    Ok(Json(state.store.list_user_reviews(user.id).await?))
}

/// Public reviews from followed users, newest first
///
/// GET /api/v1/feed?limit=&offset=
pub async fn feed(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppQuery(pagination): AppQuery<Pagination>,
) -> Result<Json<Vec<FeedItem>>> {
    let items = state.store.feed(user.id, pagination.page()).await?;
    Ok(Json(items))
}
