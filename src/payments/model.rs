//! Payment models

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::loans::Loan;

/// Payment type
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    Repayment,
    Refund,
    Reversal,
}

/// Payment status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

/// Payment record. A `success` payment is immutable except for the
/// overpayment-refund flag and reconciliation fields.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Payment {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub account_id: Uuid,
    pub idempotency_key: String,
    pub reference: String,
    pub payment_type: PaymentType,
    pub amount: i64,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub provider_reference: Option<String>,
    pub reconciled: bool,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub allocated_principal: Option<i64>,
    pub allocated_interest: Option<i64>,
    pub allocated_overpayment: Option<i64>,
    // Manual-proof bundle
    pub sender_bank: Option<String>,
    pub sender_name: Option<String>,
    pub transfer_date: Option<DateTime<Utc>>,
    pub external_reference: Option<String>,
    pub evidence_url: Option<String>,
    pub verified_by: Option<Uuid>,
    pub verified_at: Option<DateTime<Utc>>,
    pub overpayment_refunded: bool,
    pub refund_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Overpayment recorded on this payment, zero when none
    pub fn overpayment(&self) -> i64 {
        self.allocated_overpayment.unwrap_or(0)
    }
}

/// Direct repayment request
#[derive(Debug, Deserialize, Validate)]
pub struct RepayRequest {
    #[validate(range(min = 1, message = "must be greater than zero"))]
    pub amount: i64,
}

/// Manual bank-transfer proof submission
#[derive(Debug, Deserialize, Validate)]
pub struct ManualRepaymentRequest {
    pub loan_id: Uuid,
    #[validate(range(min = 1, message = "must be greater than zero"))]
    pub amount: i64,
    #[validate(length(min = 2, max = 100, message = "must be 2-100 characters"))]
    pub sender_bank: String,
    #[validate(length(min = 2, max = 100, message = "must be 2-100 characters"))]
    pub sender_name: String,
    pub transfer_date: DateTime<Utc>,
    #[validate(length(min = 2, max = 100, message = "must be 2-100 characters"))]
    pub external_reference: String,
    /// Present on the with-receipt variant; upload storage is external
    #[validate(url(message = "must be a valid URL"))]
    pub evidence_url: Option<String>,
}

/// Operator verdict on a manual proof
#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub approve: bool,
    pub reason: Option<String>,
}

/// Overpayment refund request; amount defaults to the recorded overpayment
#[derive(Debug, Deserialize, Validate)]
pub struct RefundOverpaymentRequest {
    #[validate(range(min = 1, message = "must be greater than zero"))]
    pub amount: Option<i64>,
}

/// Per-installment application produced by a repayment
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct AllocationStep {
    pub installment_number: i32,
    pub amount_applied: i64,
}

/// Result of a settled repayment
#[derive(Debug, Serialize)]
pub struct RepaymentOutcome {
    pub payment: Payment,
    pub loan: Loan,
    pub allocations: Vec<AllocationStep>,
    pub overpayment: i64,
    pub completed: bool,
}
