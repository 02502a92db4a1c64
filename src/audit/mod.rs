//! Append-only audit trail
//!
//! Every state-changing action records one entry with before/after snapshots.
//! Entries are never edited or deleted.

use serde::Serialize;
use serde_json::Value;
use sqlx::types::chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// A single audit entry
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub actor: Uuid,
    pub previous_state: Option<Value>,
    pub new_state: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Audit trail writer and reader
#[derive(Clone)]
pub struct AuditService {
    db_pool: PgPool,
}

impl AuditService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Append one entry. Snapshots are serialized by the caller so the audit
    /// trail captures exactly what the protocol observed.
    pub async fn record(
        &self,
        entity_type: &str,
        entity_id: impl ToString,
        action: &str,
        actor: Uuid,
        previous_state: Option<Value>,
        new_state: Option<Value>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, entity_type, entity_id, action, actor, previous_state, new_state)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entity_type)
        .bind(entity_id.to_string())
        .bind(action)
        .bind(actor)
        .bind(previous_state)
        .bind(new_state)
        .execute(&self.db_pool)
        .await?;

        tracing::debug!(entity_type, action, "Audit entry recorded");

        Ok(())
    }

    /// Entries for one entity, oldest first
    pub async fn entries_for(
        &self,
        entity_type: &str,
        entity_id: impl ToString,
    ) -> Result<Vec<AuditEntry>, sqlx::Error> {
        sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT * FROM audit_log
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(entity_type)
        .bind(entity_id.to_string())
        .fetch_all(&self.db_pool)
        .await
    }
}

/// Serialize a snapshot for the audit trail, swallowing serialization
/// failures into a marker object rather than failing the protocol.
pub fn snapshot<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value)
        .unwrap_or_else(|e| serde_json::json!({"snapshot_error": e.to_string()}))
}
