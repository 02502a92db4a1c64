//! Notification models

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// Notification delivery status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "notification_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

/// Notification record. Persisted before any live push so that offline
/// subscribers can read the history on reconnect.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub account_id: Uuid,
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub data: Value,
    pub status: NotificationStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Notification type names used across the engine
pub mod kinds {
    pub const LOAN_SUBMITTED: &str = "LOAN_SUBMITTED";
    pub const LOAN_UNDER_REVIEW: &str = "LOAN_UNDER_REVIEW";
    pub const LOAN_APPROVED: &str = "LOAN_APPROVED";
    pub const LOAN_REJECTED: &str = "LOAN_REJECTED";
    pub const LOAN_DISBURSED: &str = "LOAN_DISBURSED";
    pub const LOAN_COMPLETED: &str = "LOAN_COMPLETED";
    pub const LOAN_DEFAULTED: &str = "LOAN_DEFAULTED";
    pub const PAYMENT_RECEIVED: &str = "PAYMENT_RECEIVED";
    pub const PAYMENT_PROOF_SUBMITTED: &str = "PAYMENT_PROOF_SUBMITTED";
    pub const PAYMENT_REJECTED: &str = "PAYMENT_REJECTED";
    pub const REFUND_PROCESSED: &str = "REFUND_PROCESSED";
}
