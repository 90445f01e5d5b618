use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{header, HeaderMap},
    Json,
};

use super::validation::optional_text;
use super::SuccessResponse;
use crate::auth::AuthUser;
use crate::constants::{MAX_AVATAR_BYTES, MAX_BIO_LENGTH, MAX_DISPLAY_NAME_LEN};
use crate::error::{AppError, Result};
use crate::extract::AppJson;
use crate::models::{ProfileUpdate, User};
use crate::security::sha256_hex;
use crate::AppState;

/// GET /api/v1/profile
pub async fn get_profile(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

/// PATCH /api/v1/profile
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppJson(payload): AppJson<ProfileUpdate>,
) -> Result<Json<User>> {
    let username = match payload.username {
        Some(raw) => {
            let username = raw.trim().to_lowercase();
            if !User::validate_username(&username) {
                return Err(AppError::InvalidInput(
                    "Username must be 3-30 characters of lowercase letters, digits or underscores"
                        .to_string(),
                ));
            }
            Some(username)
        }
        None => None,
    };

    let update = ProfileUpdate {
        username,
        display_name: optional_text(payload.display_name, MAX_DISPLAY_NAME_LEN, "displayName")?,
        bio: optional_text(payload.bio, MAX_BIO_LENGTH, "bio")?,
    };

    let updated = state.store.update_profile(user.id, update).await?;
    tracing::info!("User {} updated their profile", user.id);

    Ok(Json(updated))
}

fn avatar_extension(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

/// Upload a new avatar image (raw body)
///
/// Stored content-addressed at `avatars/<userId>/<sha256>.<ext>` so a CDN can
/// cache it forever.
///
/// POST /api/v1/profile/avatar
pub async fn upload_avatar(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Json<User>> {
    let body = body?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let extension = avatar_extension(content_type).ok_or_else(|| {
        AppError::InvalidInput("Avatar must be a PNG, JPEG, WebP or GIF image".to_string())
    })?;

    if body.is_empty() {
        return Err(AppError::InvalidInput("Avatar image is empty".to_string()));
    }
    if body.len() > MAX_AVATAR_BYTES {
        tracing::warn!("Avatar upload too large: {} bytes", body.len());
        return Err(AppError::PayloadTooLarge);
    }

    let key = format!("avatars/{}/{}.{}", user.id, sha256_hex(&body), extension);
    let url = state
        .storage
        .put_object(&key, body.to_vec(), content_type)
        .await?;

    let updated = state.store.set_avatar_url(user.id, &url).await?;
    tracing::info!("User {} uploaded a new avatar", user.id);

    Ok(Json(updated))
}

/// Delete the caller's account and everything that cascades from it
///
/// DELETE /api/v1/profile
pub async fn delete_account(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<SuccessResponse>> {
    if !state.store.delete_user(user.id).await? {
        return Err(AppError::NotFound("User"));
    }

    tracing::info!("User {} deleted their account", user.id);
    Ok(Json(SuccessResponse::ok()))
}
