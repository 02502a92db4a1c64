//! Notification route definitions

use axum::{
    routing::{get, patch},
    Router,
};

use crate::handlers::notifications::*;
use crate::state::AppState;

pub fn notification_routes() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/:id/read", patch(mark_read))
        .route("/api/notifications/read-all", patch(mark_all_read))
}
