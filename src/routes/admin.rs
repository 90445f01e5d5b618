use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::validation::Pagination;
use super::SuccessResponse;
use crate::auth::AdminUser;
use crate::error::{AppError, Result};
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::models::{AuditAction, AuditLog, Role, User};
use crate::store::StoreStats;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RoleChangeRequest {
    pub role: Role,
}

/// GET /api/v1/admin/users?limit=&offset=
pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    AppQuery(pagination): AppQuery<Pagination>,
) -> Result<Json<Vec<User>>> {
    Ok(Json(state.store.list_users(pagination.page()).await?))
}

/// Change a user's role and record it in the audit log
///
/// PATCH /api/v1/admin/users/:id/role
pub async fn change_role(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    AppPath(target_id): AppPath<Uuid>,
    AppJson(payload): AppJson<RoleChangeRequest>,
) -> Result<Json<User>> {
    if target_id == admin.id {
        return Err(AppError::Forbidden(
            "You cannot change your own role".to_string(),
        ));
    }

    let target = state
        .store
        .find_user(target_id)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    if target.role == payload.role {
        return Ok(Json(target));
    }

    let updated = state.store.set_role(target_id, payload.role).await?;
    state
        .store
        .append_audit_log(AuditLog::new(
            admin.id,
            AuditAction::RoleChanged,
            Some(target_id),
            json!({
                "from": target.role.as_str(),
                "to": payload.role.as_str(),
            }),
        ))
        .await?;

    tracing::info!(
        "Admin {} changed role of {} from {} to {}",
        admin.id,
        target_id,
        target.role.as_str(),
        payload.role.as_str()
    );

    Ok(Json(updated))
}

/// Delete a user account
///
/// The audit entry is written first; deleting the user nulls its target
/// reference, so the details keep enough to identify who was removed.
///
/// DELETE /api/v1/admin/users/:id
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    AppPath(target_id): AppPath<Uuid>,
) -> Result<Json<SuccessResponse>> {
    if target_id == admin.id {
        return Err(AppError::Forbidden(
            "You cannot delete your own account from the admin panel".to_string(),
        ));
    }

    let target = state
        .store
        .find_user(target_id)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    state
        .store
        .append_audit_log(AuditLog::new(
            admin.id,
            AuditAction::UserDeleted,
            Some(target_id),
            json!({
                "userId": target.id,
                "clerkId": target.clerk_id,
                "username": target.username,
                "email": target.email,
            }),
        ))
        .await?;

    state.store.delete_user(target_id).await?;

    tracing::info!("Admin {} deleted user {}", admin.id, target_id);
    Ok(Json(SuccessResponse::ok()))
}

/// GET /api/v1/admin/audit-logs?limit=&offset=
pub async fn list_audit_logs(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    AppQuery(pagination): AppQuery<Pagination>,
) -> Result<Json<Vec<AuditLog>>> {
    Ok(Json(state.store.list_audit_logs(pagination.page()).await?))
}

/// Row counts for monitoring
///
/// GET /api/v1/admin/stats
pub async fn admin_stats(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
) -> Result<Json<StoreStats>> {
    let stats = state.store.stats().await?;

    tracing::info!(
        "Admin stats requested by {}: {} users, {} books",
        admin.id,
        stats.user_count,
        stats.book_count
    );

    Ok(Json(stats))
}
