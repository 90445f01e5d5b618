use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::social::FollowResponse;
use super::validation::require_collections;
use super::SuccessResponse;
use crate::auth::{AuthUser, MaybeAuthUser};
use crate::constants::{
    ERR_BOOK_NOT_IN_LIBRARY, MAX_COLLECTION_DESCRIPTION_LEN, MAX_COLLECTION_NAME_LEN,
};
use crate::error::{AppError, Result};
use crate::extract::{AppJson, AppPath};
use crate::models::{Collection, CollectionDetails, User};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCollectionRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCollectionRequest {
    pub name: Option<String>,
    /// Empty string clears the description
    pub description: Option<String>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCollectionBookRequest {
    pub book_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCollectionBookResponse {
    pub success: bool,
    /// False when the book was already in the collection
    pub added: bool,
}

fn validated_name(name: &str) -> Result<String> {
    if !Collection::validate_name(name) {
        return Err(AppError::InvalidInput(format!(
            "Collection name must be 1-{MAX_COLLECTION_NAME_LEN} characters"
        )));
    }
    Ok(name.trim().to_string())
}

fn validated_description(description: Option<String>) -> Result<Option<String>> {
    let description = description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    if let Some(d) = &description {
        if !Collection::validate_description(d) {
            return Err(AppError::InvalidInput(format!(
                "Collection description must be at most {MAX_COLLECTION_DESCRIPTION_LEN} characters"
            )));
        }
    }
    Ok(description)
}

/// Load a collection the caller owns. Other users' private collections are
/// reported as missing.
async fn load_owned(state: &AppState, user: &User, collection_id: Uuid) -> Result<Collection> {
    let collection = state
        .store
        .find_collection(collection_id)
        .await?
        .filter(|c| c.visible_to(Some(user.id)))
        .ok_or(AppError::NotFound("Collection"))?;

    if !collection.is_owned_by(user.id) {
        return Err(AppError::Forbidden(
            "Only the owner can modify this collection".to_string(),
        ));
    }

    Ok(collection)
}

/// POST /api/v1/collections (premium)
pub async fn create_collection(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppJson(payload): AppJson<CreateCollectionRequest>,
) -> Result<(StatusCode, Json<Collection>)> {
    require_collections(&state, &user).await?;

    let now = Utc::now();
    let collection = Collection {
        id: Uuid::new_v4(),
        user_id: user.id,
        name: validated_name(&payload.name)?,
        description: validated_description(payload.description)?,
        is_public: payload.is_public,
        created_at: now,
        updated_at: now,
    };

    let created = state.store.create_collection(collection).await?;
    tracing::info!("User {} created collection {}", user.id, created.id);

    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/collections
pub async fn list_collections(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Collection>>> {
    Ok(Json(state.store.list_collections(user.id, false).await?))
}

/// GET /api/v1/collections/:id
pub async fn get_collection(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    AppPath(collection_id): AppPath<Uuid>,
) -> Result<Json<CollectionDetails>> {
    let viewer_id = viewer.map(|v| v.id);
    let collection = state
        .store
        .find_collection(collection_id)
        .await?
        .filter(|c| c.visible_to(viewer_id))
        .ok_or(AppError::NotFound("Collection"))?;

    let books = state.store.list_collection_books(collection_id).await?;
    let follower_count = state.store.collection_follower_count(collection_id).await?;
    let is_following = match viewer_id {
        Some(id) => state.store.is_following_collection(id, collection_id).await?,
        None => false,
    };

    Ok(Json(CollectionDetails {
        collection,
        books,
        follower_count,
        is_following,
    }))
}

/// PATCH /api/v1/collections/:id
pub async fn update_collection(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppPath(collection_id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateCollectionRequest>,
) -> Result<Json<Collection>> {
    let mut collection = load_owned(&state, &user, collection_id).await?;

    if let Some(name) = payload.name {
        collection.name = validated_name(&name)?;
    }
    if payload.description.is_some() {
        collection.description = validated_description(payload.description)?;
    }
    if let Some(is_public) = payload.is_public {
        collection.is_public = is_public;
    }
    collection.updated_at = Utc::now();

    Ok(Json(state.store.save_collection(&collection).await?))
}

/// DELETE /api/v1/collections/:id
pub async fn delete_collection(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppPath(collection_id): AppPath<Uuid>,
) -> Result<Json<SuccessResponse>> {
    load_owned(&state, &user, collection_id).await?;
    state.store.delete_collection(collection_id).await?;

    tracing::info!("User {} deleted collection {}", user.id, collection_id);
    Ok(Json(SuccessResponse::ok()))
}

/// Attach a book from the owner's library
///
/// POST /api/v1/collections/:id/books (premium)
pub async fn add_collection_book(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppPath(collection_id): AppPath<Uuid>,
    AppJson(payload): AppJson<AddCollectionBookRequest>,
) -> Result<Json<AddCollectionBookResponse>> {
    let collection = load_owned(&state, &user, collection_id).await?;
    require_collections(&state, &user).await?;

    if state
        .store
        .find_library_entry(collection.user_id, payload.book_id)
        .await?
        .is_none()
    {
        return Err(AppError::InvalidInput(ERR_BOOK_NOT_IN_LIBRARY.to_string()));
    }

    let added = state
        .store
        .add_collection_book(collection_id, payload.book_id)
        .await?;

    Ok(Json(AddCollectionBookResponse {
        success: true,
        added,
    }))
}

/// DELETE /api/v1/collections/:id/books/:bookId
pub async fn remove_collection_book(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppPath((collection_id, book_id)): AppPath<(Uuid, Uuid)>,
) -> Result<Json<SuccessResponse>> {
    load_owned(&state, &user, collection_id).await?;

    if !state
        .store
        .remove_collection_book(collection_id, book_id)
        .await?
    {
        return Err(AppError::NotFound("Collection book"));
    }

    Ok(Json(SuccessResponse::ok()))
}

/// Follow another user's public collection
///
/// POST /api/v1/collections/:id/follow
pub async fn follow_collection(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppPath(collection_id): AppPath<Uuid>,
) -> Result<Json<FollowResponse>> {
    let collection = state
        .store
        .find_collection(collection_id)
        .await?
        .filter(|c| c.is_public)
        .ok_or(AppError::NotFound("Collection"))?;

    if collection.is_owned_by(user.id) {
        return Err(AppError::InvalidInput(
            "You cannot follow your own collection".to_string(),
        ));
    }

    state.store.follow_collection(user.id, collection_id).await?;
    Ok(Json(FollowResponse { following: true }))
}

/// DELETE /api/v1/collections/:id/follow
pub async fn unfollow_collection(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppPath(collection_id): AppPath<Uuid>,
) -> Result<Json<FollowResponse>> {
    state
        .store
        .unfollow_collection(user.id, collection_id)
        .await?;
    Ok(Json(FollowResponse { following: false }))
}
