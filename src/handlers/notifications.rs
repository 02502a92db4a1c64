//! Notification feed handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::AuthenticatedUser;
use crate::models::{ApiResponse, Meta, PaginationParams};
use crate::notifications::Notification;
use crate::state::AppState;

/// GET /api/notifications - The caller's feed, newest first
pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<Json<ApiResponse<Vec<Notification>>>> {
    let (page, limit, _) = pagination.normalize();

    let (notifications, total) = state
        .notification_service
        .list(user.account_id, pagination)
        .await?;

    Ok(Json(ApiResponse::paginated(
        "Notifications",
        notifications,
        Meta::new(page, limit, total),
    )))
}

/// GET /api/notifications/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<ApiResponse<serde_json::Value>>> {
    let count = state
        .notification_service
        .unread_count(user.account_id)
        .await?;

    Ok(Json(ApiResponse::ok(
        "Unread count",
        serde_json::json!({"unread": count}),
    )))
}

/// PATCH /api/notifications/:id/read
pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Notification>>> {
    let notification = state
        .notification_service
        .mark_read(user.account_id, id)
        .await?;

    Ok(Json(ApiResponse::ok("Notification marked read", notification)))
}

/// PATCH /api/notifications/read-all
pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<ApiResponse<serde_json::Value>>> {
    let marked = state
        .notification_service
        .mark_all_read(user.account_id)
        .await?;

    Ok(Json(ApiResponse::ok(
        "All notifications marked read",
        serde_json::json!({"marked": marked}),
    )))
}
