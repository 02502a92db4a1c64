//! Notification hub
//!
//! Persists every notification before pushing it to live subscribers, so a
//! subscriber that arrives later can retrieve the full history. Operator
//! fan-out resolves all active operator accounts at send time.

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::PaginationParams;
use crate::websocket::{ServerEvent, WsState};

use super::model::Notification;

/// Notification persistence and delivery
#[derive(Clone)]
pub struct NotificationService {
    db_pool: PgPool,
    ws_state: WsState,
}

impl NotificationService {
    pub fn new(db_pool: PgPool, ws_state: WsState) -> Self {
        Self { db_pool, ws_state }
    }

    /// Persist a notification, then push it to any live subscription
    pub async fn notify(
        &self,
        account_id: Uuid,
        notification_type: &str,
        title: &str,
        body: &str,
        data: Value,
    ) -> ApiResult<Notification> {
        let notification = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (id, account_id, notification_type, title, body, data, status, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'sent', NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(notification_type)
        .bind(title)
        .bind(body)
        .bind(&data)
        .fetch_one(&self.db_pool)
        .await?;

        // Durable first, live second: a lost push is recovered from history
        self.ws_state
            .push(account_id, ServerEvent::Notification(notification.clone()));

        Ok(notification)
    }

    /// Deliver the same notification to every active operator
    pub async fn notify_operators(
        &self,
        notification_type: &str,
        title: &str,
        body: &str,
        data: Value,
    ) -> ApiResult<()> {
        let operators: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM accounts WHERE role = 'operator' AND active = TRUE",
        )
        .fetch_all(&self.db_pool)
        .await?;

        for (operator_id,) in operators {
            self.notify(operator_id, notification_type, title, body, data.clone())
                .await?;
        }

        Ok(())
    }

    /// An account's notification feed, newest first
    pub async fn list(
        &self,
        account_id: Uuid,
        pagination: PaginationParams,
    ) -> ApiResult<(Vec<Notification>, i64)> {
        let (_, limit, offset) = pagination.normalize();

        let notifications = sqlx::query_as::<_, Notification>(
            r#"
            SELECT * FROM notifications
            WHERE account_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db_pool)
        .await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE account_id = $1")
                .bind(account_id)
                .fetch_one(&self.db_pool)
                .await?;

        Ok((notifications, total))
    }

    /// Count of unread notifications
    pub async fn unread_count(&self, account_id: Uuid) -> ApiResult<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE account_id = $1 AND read_at IS NULL",
        )
        .bind(account_id)
        .fetch_one(&self.db_pool)
        .await?)
    }

    /// Mark one owned notification as read
    pub async fn mark_read(&self, account_id: Uuid, id: Uuid) -> ApiResult<Notification> {
        let notification = sqlx::query_as::<_, Notification>(
            r#"
            UPDATE notifications
            SET read_at = COALESCE(read_at, NOW())
            WHERE id = $1 AND account_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(account_id)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Notification {} not found", id)))?;

        self.ws_state
            .push(account_id, ServerEvent::NotificationRead { id });

        Ok(notification)
    }

    /// Mark all of an account's notifications as read
    pub async fn mark_all_read(&self, account_id: Uuid) -> ApiResult<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET read_at = NOW() WHERE account_id = $1 AND read_at IS NULL",
        )
        .bind(account_id)
        .execute(&self.db_pool)
        .await?;

        self.ws_state.push(account_id, ServerEvent::AllRead);

        Ok(result.rows_affected())
    }

    /// Whether the account has a live subscription right now
    pub async fn is_online(&self, account_id: Uuid) -> bool {
        self.ws_state.is_online(account_id).await
    }
}
