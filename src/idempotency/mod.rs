//! Transport-level idempotency cache
//!
//! Stores the response of each mutating request keyed by the client-supplied
//! `Idempotency-Key`, and replays it verbatim until expiry. Domain-level
//! idempotency (the payment key) nests inside this cache.

use axum::http::StatusCode;
use serde_json::Value;
use sqlx::PgPool;
use std::future::Future;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Default record lifetime: 24 hours
const DEFAULT_TTL_HOURS: i64 = 24;

/// A stored response ready to be replayed
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredResponse {
    pub status_code: i32,
    pub response_body: Value,
}

/// Idempotency record cache backed by the store
#[derive(Clone)]
pub struct IdempotencyService {
    db_pool: PgPool,
}

impl IdempotencyService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Look up a non-expired record for this key
    pub async fn replay(&self, key: &str) -> ApiResult<Option<StoredResponse>> {
        let stored = sqlx::query_as::<_, StoredResponse>(
            r#"
            SELECT status_code, response_body
            FROM idempotency_records
            WHERE key = $1 AND expires_at > NOW()
            "#,
        )
        .bind(key)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(stored)
    }

    /// Store a response for replay. First writer wins; a concurrent duplicate
    /// insert is ignored so the stored response stays stable.
    pub async fn store(
        &self,
        key: &str,
        endpoint: &str,
        method: &str,
        status_code: StatusCode,
        body: &Value,
        account_id: Option<Uuid>,
    ) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_records
                (key, endpoint, method, status_code, response_body, account_id, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW() + make_interval(hours => $7))
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(endpoint)
        .bind(method)
        .bind(status_code.as_u16() as i32)
        .bind(body)
        .bind(account_id)
        .bind(DEFAULT_TTL_HOURS as i32)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    /// Run a mutating operation under the cache: replay a stored response if
    /// one exists, otherwise execute and store the outcome.
    ///
    /// Concurrency conflicts (409) and server-side failures are not cached so
    /// the caller can retry with the same key; everything else replays
    /// verbatim until expiry.
    pub async fn execute<F, Fut>(
        &self,
        key: &str,
        endpoint: &str,
        method: &str,
        account_id: Option<Uuid>,
        operation: F,
    ) -> ApiResult<(StatusCode, Value)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<(StatusCode, Value)>>,
    {
        if let Some(stored) = self.replay(key).await? {
            tracing::debug!(key, endpoint, "Replaying idempotent response");
            let status = StatusCode::from_u16(stored.status_code as u16)
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            return Ok((status, stored.response_body));
        }

        match operation().await {
            Ok((status, body)) => {
                if cacheable(status) {
                    self.store(key, endpoint, method, status, &body, account_id)
                        .await?;
                }
                Ok((status, body))
            }
            Err(err) => {
                let status = err.status_code();
                if cacheable(status) {
                    let body = serde_json::to_value(crate::models::ApiResponse::<()>::failure(
                        err.to_string(),
                        None,
                    ))?;
                    self.store(key, endpoint, method, status, &body, account_id)
                        .await?;
                }
                Err(err)
            }
        }
    }

    /// Drop expired records. Called from a background sweep.
    pub async fn purge_expired(&self) -> ApiResult<u64> {
        let result = sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= NOW()")
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Retryable outcomes must not be pinned to the key
fn cacheable(status: StatusCode) -> bool {
    !status.is_server_error() && status != StatusCode::CONFLICT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cacheable_statuses() {
        assert!(cacheable(StatusCode::OK));
        assert!(cacheable(StatusCode::CREATED));
        assert!(cacheable(StatusCode::BAD_REQUEST));
        assert!(cacheable(StatusCode::NOT_FOUND));
        // Conflicts and server errors stay retryable with the same key
        assert!(!cacheable(StatusCode::CONFLICT));
        assert!(!cacheable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!cacheable(StatusCode::BAD_GATEWAY));
    }
}
