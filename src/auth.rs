//! Session authentication extractors.
//!
//! The session token comes from `Authorization: Bearer` or the `__session`
//! cookie. A verified subject seen for the first time gets a local user row.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use tower_cookies::Cookies;

use crate::constants::SESSION_COOKIE;
use crate::error::{AppError, Result};
use crate::integrations::email::{send_in_background, welcome_email};
use crate::models::User;
use crate::AppState;

/// Authenticated caller; rejects with 401
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

/// Caller on public endpoints; `None` when anonymous or the token is invalid
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<User>);

/// Authenticated admin; rejects with 403 for other roles
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

/// Extract the session token: `Authorization: Bearer` first, then the
/// session cookie parsed by the cookie layer
pub fn session_token(parts: &Parts) -> Option<String> {
    let bearer = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    bearer.or_else(|| {
        parts
            .extensions
            .get::<Cookies>()?
            .get(SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .filter(|value| !value.is_empty())
    })
}

/// Verify the token and load (or provision) the matching user
async fn resolve_user(state: &AppState, token: &str) -> Result<User> {
    let claims = state.identity.verify_session(token).await?;

    if let Some(user) = state.store.find_user_by_clerk_id(&claims.sub).await? {
        return Ok(user);
    }

    let mut profile = state.identity.fetch_profile(&claims.sub).await?;
    profile.clerk_id = claims.sub.clone();

    if let Some(username) = &profile.username {
        if state.store.find_user_by_username(username).await?.is_some() {
            tracing::info!("Username {} already taken, provisioning without one", username);
            profile.username = None;
        }
    }

    let (user, created) = match state.store.create_user(profile.clone()).await {
        Err(AppError::Conflict(_)) => {
            profile.username = None;
            state.store.create_user(profile).await?
        }
        other => other?,
    };

    if created {
        tracing::info!("Provisioned user {} for {}", user.id, claims.sub);
        send_in_background(
            state.mailer.clone(),
            welcome_email(&user, &state.config.app_url),
        );
    }

    Ok(user)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = session_token(parts).ok_or(AppError::Unauthorized)?;
        resolve_user(state, &token).await.map(AuthUser)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let Some(token) = session_token(parts) else {
            return Ok(MaybeAuthUser(None));
        };

        match resolve_user(state, &token).await {
            Ok(user) => Ok(MaybeAuthUser(Some(user))),
            Err(AppError::Unauthorized) => Ok(MaybeAuthUser(None)),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;

        if !user.is_admin() {
            tracing::warn!("Non-admin {} attempted an admin operation", user.id);
            return Err(AppError::Forbidden("Admin access required".to_string()));
        }

        Ok(AdminUser(user))
    }
}
