//! Loan and installment models

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

/// Loan status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "loan_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
    Disbursed,
    Active,
    Completed,
    Defaulted,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::UnderReview => "under_review",
            LoanStatus::Approved => "approved",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Disbursed => "disbursed",
            LoanStatus::Active => "active",
            LoanStatus::Completed => "completed",
            LoanStatus::Defaulted => "defaulted",
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loan model. Amounts are in minor units; the interest rate is annual, in
/// basis points. `version` is the compare-and-set key for every
/// balance-affecting update.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Loan {
    pub id: Uuid,
    pub application_number: String,
    pub borrower_id: Uuid,
    pub purpose: String,
    pub interest_rate_bps: i32,
    pub requested_amount: i64,
    pub tenor_months: i32,
    pub status: LoanStatus,
    pub principal: i64,
    pub total_interest: i64,
    pub total_repayable: i64,
    pub monthly_payment: i64,
    pub total_repaid: i64,
    pub outstanding_balance: i64,
    pub version: i64,
    pub bank_account: String,
    pub bank_code: String,
    pub approved_by: Option<Uuid>,
    pub approved_amount: Option<i64>,
    pub approval_conditions: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub disbursement_reference: Option<String>,
    pub provider_reference: Option<String>,
    pub disbursed_by: Option<Uuid>,
    pub disbursed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry in a loan's append-only status history
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub from_status: LoanStatus,
    pub to_status: LoanStatus,
    pub reason: Option<String>,
    pub performed_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Installment status, derived from paid_amount and due_date
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "installment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InstallmentStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
}

/// One scheduled repayment slice of a loan
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Installment {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub installment_number: i32,
    pub due_date: DateTime<Utc>,
    pub principal_share: i64,
    pub interest_share: i64,
    pub total_due: i64,
    pub paid_amount: i64,
    pub status: InstallmentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Installment {
    /// Amount still owed on this installment
    pub fn remaining(&self) -> i64 {
        self.total_due - self.paid_amount
    }

    /// Effective status given the wall clock: an unpaid installment past its
    /// due date reads as overdue even if the stored status has not been swept.
    pub fn effective_status(&self, now: DateTime<Utc>) -> InstallmentStatus {
        if self.status == InstallmentStatus::Paid {
            InstallmentStatus::Paid
        } else if now > self.due_date {
            InstallmentStatus::Overdue
        } else {
            self.status
        }
    }
}

/// Request to submit a loan application
#[derive(Debug, Deserialize, Validate)]
pub struct CreateLoanRequest {
    #[validate(length(min = 3, max = 500, message = "must be 3-500 characters"))]
    pub purpose: String,
    #[validate(range(min = 1, message = "must be greater than zero"))]
    pub requested_amount: i64,
    #[validate(range(min = 1, max = 60, message = "must be between 1 and 60 months"))]
    pub tenor_months: i32,
    #[validate(range(min = 1, max = 10000, message = "must be between 1 and 10000 basis points"))]
    pub interest_rate_bps: i32,
    #[validate(length(min = 6, max = 32, message = "must be 6-32 characters"))]
    pub bank_account: String,
    #[validate(length(min = 2, max = 16, message = "must be 2-16 characters"))]
    pub bank_code: String,
}

/// Operator approval. A reduced amount re-derives the monetary figures.
#[derive(Debug, Deserialize, Validate)]
pub struct ApproveLoanRequest {
    #[validate(range(min = 1, message = "must be greater than zero"))]
    pub amount: Option<i64>,
    pub conditions: Option<String>,
}

/// Operator rejection with a mandatory reason
#[derive(Debug, Deserialize, Validate)]
pub struct RejectLoanRequest {
    #[validate(length(min = 3, max = 500, message = "must be 3-500 characters"))]
    pub reason: String,
}

/// Operator-invoked default with a mandatory reason
#[derive(Debug, Deserialize, Validate)]
pub struct DefaultLoanRequest {
    #[validate(length(min = 3, max = 500, message = "must be 3-500 characters"))]
    pub reason: String,
}

/// Query for listing loans
#[derive(Debug, Deserialize)]
pub struct ListLoansQuery {
    pub status: Option<LoanStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Disbursement details exposed to the borrower
#[derive(Debug, Serialize)]
pub struct DisbursementView {
    pub reference: String,
    pub provider_reference: Option<String>,
    pub bank_account: String,
    pub bank_code: String,
    pub disbursed_by: Option<Uuid>,
    pub disbursed_at: Option<DateTime<Utc>>,
}

impl DisbursementView {
    /// Present only when a reservation or settlement has happened
    pub fn from_loan(loan: &Loan) -> Option<Self> {
        loan.disbursement_reference
            .as_ref()
            .map(|reference| DisbursementView {
                reference: reference.clone(),
                provider_reference: loan.provider_reference.clone(),
                bank_account: loan.bank_account.clone(),
                bank_code: loan.bank_code.clone(),
                disbursed_by: loan.disbursed_by,
                disbursed_at: loan.disbursed_at,
            })
    }
}
