use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::validation::Pagination;
use crate::auth::{AuthUser, MaybeAuthUser};
use crate::constants::ERR_CANNOT_FOLLOW_SELF;
use crate::error::{AppError, Result};
use crate::extract::{AppPath, AppQuery};
use crate::models::{Collection, Review, User, UserSummary};
use crate::store::ProfileCounts;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowResponse {
    pub following: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    #[serde(flatten)]
    pub user: UserSummary,
    pub bio: Option<String>,
    pub is_premium: bool,
    pub joined_at: DateTime<Utc>,
    #[serde(flatten)]
    pub counts: ProfileCounts,
    pub is_following: bool,
    pub reviews: Vec<Review>,
}

/// POST /api/v1/social/follow/:userId
pub async fn follow_user(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppPath(target_id): AppPath<Uuid>,
) -> Result<Json<FollowResponse>> {
    if target_id == user.id {
        return Err(AppError::InvalidInput(ERR_CANNOT_FOLLOW_SELF.to_string()));
    }

    if state.store.find_user(target_id).await?.is_none() {
        return Err(AppError::NotFound("User"));
    }

    if state.store.follow(user.id, target_id).await? {
        tracing::info!("User {} followed {}", user.id, target_id);
    }

    Ok(Json(FollowResponse { following: true }))
}

/// DELETE /api/v1/social/follow/:userId
pub async fn unfollow_user(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppPath(target_id): AppPath<Uuid>,
) -> Result<Json<FollowResponse>> {
    state.store.unfollow(user.id, target_id).await?;
    Ok(Json(FollowResponse { following: false }))
}

/// GET /api/v1/social/followers
pub async fn list_followers(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppQuery(pagination): AppQuery<Pagination>,
) -> Result<Json<Vec<UserSummary>>> {
    Ok(Json(
        state.store.list_followers(user.id, pagination.page()).await?,
    ))
}

/// GET /api/v1/social/following
pub async fn list_following(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppQuery(pagination): AppQuery<Pagination>,
) -> Result<Json<Vec<UserSummary>>> {
    Ok(Json(
        state.store.list_following(user.id, pagination.page()).await?,
    ))
}

async fn find_by_username(state: &AppState, username: &str) -> Result<User> {
    state
        .store
        .find_user_by_username(&username.to_lowercase())
        .await?
        .ok_or(AppError::NotFound("User"))
}

/// Public profile: counts, follow state for the caller, and visible reviews
///
/// GET /api/v1/users/:username
pub async fn public_profile(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    AppPath(username): AppPath<String>,
) -> Result<Json<PublicProfile>> {
    let profile_user = find_by_username(&state, &username).await?;
    let viewer_id = viewer.map(|v| v.id);

    let counts = state.store.profile_counts(profile_user.id).await?;

    let is_following = match viewer_id {
        Some(id) if id != profile_user.id => state.store.is_following(id, profile_user.id).await?,
        _ => false,
    };

    let reviews = state
        .store
        .list_user_reviews(profile_user.id)
        .await?
        .into_iter()
        .filter(|r| r.visible_to(viewer_id))
        .collect();

    Ok(Json(PublicProfile {
        user: profile_user.summary(),
        bio: profile_user.bio,
        is_premium: profile_user.is_premium,
        joined_at: profile_user.created_at,
        counts,
        is_following,
        reviews,
    }))
}

/// Collections on a profile; the owner also sees their private ones
///
/// GET /api/v1/users/:username/collections
pub async fn public_collections(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    AppPath(username): AppPath<String>,
) -> Result<Json<Vec<Collection>>> {
    let profile_user = find_by_username(&state, &username).await?;
    let is_owner = viewer.is_some_and(|v| v.id == profile_user.id);

    let collections = state
        .store
        .list_collections(profile_user.id, !is_owner)
        .await?;

    Ok(Json(collections))
}
