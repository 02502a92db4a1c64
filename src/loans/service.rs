//! Loan lifecycle service
//!
//! Application intake and the operator-driven review/approve/reject/default
//! transitions. Every transition goes through the version CAS, appends to the
//! status history, and lands one audit entry.

use chrono::Datelike;
use rand::Rng;
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{snapshot, AuditService};
use crate::error::{ApiError, ApiResult};
use crate::models::PaginationParams;
use crate::notifications::{kinds, NotificationService};
use crate::payments::model::Payment;

use super::math::derive_figures;
use super::model::{
    ApproveLoanRequest, CreateLoanRequest, Installment, Loan, LoanStatus, StatusHistoryEntry,
};
use super::state_machine::ensure_transition;

/// Loan lifecycle service
#[derive(Clone)]
pub struct LoanService {
    db_pool: PgPool,
    audit: AuditService,
    notifications: NotificationService,
}

impl LoanService {
    pub fn new(db_pool: PgPool, audit: AuditService, notifications: NotificationService) -> Self {
        Self {
            db_pool,
            audit,
            notifications,
        }
    }

    /// Submit a loan application.
    ///
    /// Enforces the single-active-loan rule: a borrower may hold at most one
    /// loan that is pending, under review, approved, disbursed, or active.
    pub async fn create_loan(&self, borrower_id: Uuid, req: CreateLoanRequest) -> ApiResult<Loan> {
        let open: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM loans
            WHERE borrower_id = $1
              AND status IN ('pending', 'under_review', 'approved', 'disbursed', 'active')
            "#,
        )
        .bind(borrower_id)
        .fetch_one(&self.db_pool)
        .await?;

        if open > 0 {
            return Err(ApiError::Conflict(
                "An active loan already exists for this account".to_string(),
            ));
        }

        let figures = derive_figures(req.requested_amount, req.interest_rate_bps, req.tenor_months);

        // The partial unique index on open loans backstops the pre-check
        // against a concurrent second application.
        let mut attempts = 0;
        let loan = loop {
            let application_number = generate_application_number();
            let result = sqlx::query_as::<_, Loan>(
                r#"
                INSERT INTO loans (
                    id, application_number, borrower_id, purpose, interest_rate_bps,
                    requested_amount, tenor_months, status, principal, total_interest,
                    total_repayable, monthly_payment, total_repaid, outstanding_balance,
                    version, bank_account, bank_code
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $10, $11, 0, $12, 0, $13, $14)
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&application_number)
            .bind(borrower_id)
            .bind(&req.purpose)
            .bind(req.interest_rate_bps)
            .bind(req.requested_amount)
            .bind(req.tenor_months)
            .bind(figures.principal)
            .bind(figures.total_interest)
            .bind(figures.total_repayable)
            .bind(figures.monthly_payment)
            .bind(figures.total_repayable)
            .bind(&req.bank_account)
            .bind(&req.bank_code)
            .fetch_one(&self.db_pool)
            .await;

            match result {
                Ok(loan) => break loan,
                Err(sqlx::Error::Database(db_err))
                    if db_err.is_unique_violation()
                        && db_err.constraint() == Some("loans_application_number_key")
                        && attempts < 3 =>
                {
                    attempts += 1;
                    continue;
                }
                Err(sqlx::Error::Database(db_err))
                    if db_err.is_unique_violation()
                        && db_err.constraint() == Some("idx_loans_single_open") =>
                {
                    return Err(ApiError::Conflict(
                        "An active loan already exists for this account".to_string(),
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.audit
            .record(
                "loan",
                loan.id,
                "LOAN_CREATED",
                borrower_id,
                None,
                Some(snapshot(&loan)),
            )
            .await?;

        self.notifications
            .notify_operators(
                kinds::LOAN_SUBMITTED,
                "New loan application",
                &format!(
                    "Application {} for {} minor units awaits review",
                    loan.application_number, loan.requested_amount
                ),
                serde_json::json!({"loan_id": loan.id, "application_number": loan.application_number}),
            )
            .await?;

        tracing::info!(loan_id = %loan.id, application_number = %loan.application_number, "Loan created");

        Ok(loan)
    }

    /// Move a pending application into review
    pub async fn review_loan(&self, loan_id: Uuid, operator_id: Uuid) -> ApiResult<Loan> {
        let loan = self.fetch_required(loan_id).await?;
        ensure_transition(loan.status, LoanStatus::UnderReview)?;

        let updated = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans
            SET status = 'under_review', version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(loan_id)
        .bind(loan.version)
        .fetch_optional(&self.db_pool)
        .await?;

        let updated = match updated {
            Some(l) => l,
            None => return Err(self.diagnose_cas_failure(loan_id, LoanStatus::Pending).await),
        };

        self.record_transition(&loan, &updated, None, operator_id, "LOAN_REVIEWED")
            .await?;

        self.notifications
            .notify(
                loan.borrower_id,
                kinds::LOAN_UNDER_REVIEW,
                "Application under review",
                &format!("Application {} is now under review", loan.application_number),
                serde_json::json!({"loan_id": loan.id}),
            )
            .await?;

        Ok(updated)
    }

    /// Approve an application, optionally at a reduced amount.
    ///
    /// A reduced amount becomes the new principal and re-derives interest,
    /// repayable, monthly payment, and outstanding balance inside the same
    /// versioned update.
    pub async fn approve_loan(
        &self,
        loan_id: Uuid,
        operator_id: Uuid,
        req: ApproveLoanRequest,
    ) -> ApiResult<Loan> {
        let loan = self.fetch_required(loan_id).await?;
        ensure_transition(loan.status, LoanStatus::Approved)?;

        let approved_amount = req.amount.unwrap_or(loan.requested_amount);
        if approved_amount <= 0 {
            return Err(ApiError::Validation(
                "Approved amount must be greater than zero".to_string(),
            ));
        }
        if approved_amount > loan.requested_amount {
            return Err(ApiError::Validation(format!(
                "Approved amount {} exceeds requested amount {}",
                approved_amount, loan.requested_amount
            )));
        }

        let figures = derive_figures(approved_amount, loan.interest_rate_bps, loan.tenor_months);

        let updated = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans
            SET status = 'approved',
                principal = $3,
                total_interest = $4,
                total_repayable = $5,
                monthly_payment = $6,
                outstanding_balance = $5,
                approved_by = $7,
                approved_amount = $3,
                approval_conditions = $8,
                approved_at = NOW(),
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2 AND status = 'under_review'
            RETURNING *
            "#,
        )
        .bind(loan_id)
        .bind(loan.version)
        .bind(approved_amount)
        .bind(figures.total_interest)
        .bind(figures.total_repayable)
        .bind(figures.monthly_payment)
        .bind(operator_id)
        .bind(&req.conditions)
        .fetch_optional(&self.db_pool)
        .await?;

        let updated = match updated {
            Some(l) => l,
            None => {
                return Err(self
                    .diagnose_cas_failure(loan_id, LoanStatus::UnderReview)
                    .await)
            }
        };

        self.record_transition(&loan, &updated, req.conditions.clone(), operator_id, "LOAN_APPROVED")
            .await?;

        self.notifications
            .notify(
                loan.borrower_id,
                kinds::LOAN_APPROVED,
                "Application approved",
                &format!(
                    "Application {} approved for {} minor units",
                    loan.application_number, approved_amount
                ),
                serde_json::json!({"loan_id": loan.id, "approved_amount": approved_amount}),
            )
            .await?;

        Ok(updated)
    }

    /// Reject an application with a reason
    pub async fn reject_loan(
        &self,
        loan_id: Uuid,
        operator_id: Uuid,
        reason: String,
    ) -> ApiResult<Loan> {
        let loan = self.fetch_required(loan_id).await?;
        ensure_transition(loan.status, LoanStatus::Rejected)?;

        let updated = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans
            SET status = 'rejected',
                rejected_by = $3,
                rejection_reason = $4,
                rejected_at = NOW(),
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2 AND status = 'under_review'
            RETURNING *
            "#,
        )
        .bind(loan_id)
        .bind(loan.version)
        .bind(operator_id)
        .bind(&reason)
        .fetch_optional(&self.db_pool)
        .await?;

        let updated = match updated {
            Some(l) => l,
            None => {
                return Err(self
                    .diagnose_cas_failure(loan_id, LoanStatus::UnderReview)
                    .await)
            }
        };

        self.record_transition(&loan, &updated, Some(reason.clone()), operator_id, "LOAN_REJECTED")
            .await?;

        self.notifications
            .notify(
                loan.borrower_id,
                kinds::LOAN_REJECTED,
                "Application rejected",
                &format!(
                    "Application {} was rejected: {}",
                    loan.application_number, reason
                ),
                serde_json::json!({"loan_id": loan.id, "reason": reason}),
            )
            .await?;

        Ok(updated)
    }

    /// Mark an active loan defaulted. Operator-invoked; there is no
    /// background overdue sweep.
    pub async fn default_loan(
        &self,
        loan_id: Uuid,
        operator_id: Uuid,
        reason: String,
    ) -> ApiResult<Loan> {
        let loan = self.fetch_required(loan_id).await?;
        ensure_transition(loan.status, LoanStatus::Defaulted)?;

        let updated = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans
            SET status = 'defaulted', version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(loan_id)
        .bind(loan.version)
        .fetch_optional(&self.db_pool)
        .await?;

        let updated = match updated {
            Some(l) => l,
            None => return Err(self.diagnose_cas_failure(loan_id, LoanStatus::Active).await),
        };

        self.record_transition(&loan, &updated, Some(reason.clone()), operator_id, "LOAN_DEFAULTED")
            .await?;

        self.notifications
            .notify(
                loan.borrower_id,
                kinds::LOAN_DEFAULTED,
                "Loan defaulted",
                &format!("Loan {} was marked defaulted: {}", loan.application_number, reason),
                serde_json::json!({"loan_id": loan.id, "reason": reason}),
            )
            .await?;

        Ok(updated)
    }

    // ===== Queries =====

    /// Fetch a loan or fail with NotFound
    pub async fn fetch_required(&self, loan_id: Uuid) -> ApiResult<Loan> {
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(loan_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Loan {} not found", loan_id)))
    }

    /// Fetch a loan scoped to its borrower
    pub async fn fetch_for_borrower(&self, loan_id: Uuid, borrower_id: Uuid) -> ApiResult<Loan> {
        let loan = self.fetch_required(loan_id).await?;
        if loan.borrower_id != borrower_id {
            // Scoped reads do not reveal other borrowers' loans
            return Err(ApiError::NotFound(format!("Loan {} not found", loan_id)));
        }
        Ok(loan)
    }

    /// List a borrower's loans, newest first
    pub async fn list_for_borrower(
        &self,
        borrower_id: Uuid,
        status: Option<LoanStatus>,
        pagination: PaginationParams,
    ) -> ApiResult<(Vec<Loan>, i64)> {
        let (_, limit, offset) = pagination.normalize();

        let loans = sqlx::query_as::<_, Loan>(
            r#"
            SELECT * FROM loans
            WHERE borrower_id = $1 AND ($2::loan_status IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(borrower_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db_pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE borrower_id = $1 AND ($2::loan_status IS NULL OR status = $2)",
        )
        .bind(borrower_id)
        .bind(status)
        .fetch_one(&self.db_pool)
        .await?;

        Ok((loans, total))
    }

    /// Status history for a loan, oldest first
    pub async fn history(&self, loan_id: Uuid) -> ApiResult<Vec<StatusHistoryEntry>> {
        Ok(sqlx::query_as::<_, StatusHistoryEntry>(
            "SELECT * FROM loan_status_history WHERE loan_id = $1 ORDER BY created_at ASC",
        )
        .bind(loan_id)
        .fetch_all(&self.db_pool)
        .await?)
    }

    /// Repayment schedule for a loan, by installment number
    pub async fn schedule(&self, loan_id: Uuid) -> ApiResult<Vec<Installment>> {
        Ok(sqlx::query_as::<_, Installment>(
            "SELECT * FROM installments WHERE loan_id = $1 ORDER BY installment_number ASC",
        )
        .bind(loan_id)
        .fetch_all(&self.db_pool)
        .await?)
    }

    /// Payments recorded against a loan, newest first
    pub async fn payments_for_loan(&self, loan_id: Uuid) -> ApiResult<Vec<Payment>> {
        Ok(sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE loan_id = $1 ORDER BY created_at DESC",
        )
        .bind(loan_id)
        .fetch_all(&self.db_pool)
        .await?)
    }

    // ===== Internals =====

    /// Append a history row and one audit entry for a completed transition
    async fn record_transition(
        &self,
        before: &Loan,
        after: &Loan,
        reason: Option<String>,
        performed_by: Uuid,
        action: &str,
    ) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO loan_status_history (id, loan_id, from_status, to_status, reason, performed_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(after.id)
        .bind(before.status)
        .bind(after.status)
        .bind(&reason)
        .bind(performed_by)
        .execute(&self.db_pool)
        .await?;

        self.audit
            .record(
                "loan",
                after.id,
                action,
                performed_by,
                Some(snapshot(before)),
                Some(snapshot(after)),
            )
            .await?;

        Ok(())
    }

    /// Explain why a versioned update matched no rows
    pub(crate) async fn diagnose_cas_failure(
        &self,
        loan_id: Uuid,
        expected: LoanStatus,
    ) -> ApiError {
        match self.fetch_required(loan_id).await {
            Err(e) => e,
            Ok(current) if current.status != expected => ApiError::InvalidTransition(format!(
                "loan is {} but the operation requires {}",
                current.status, expected
            )),
            Ok(_) => ApiError::Concurrency(
                "loan was modified concurrently; retry the operation".to_string(),
            ),
        }
    }
}

/// Opaque, unique, human-readable application number
fn generate_application_number() -> String {
    let year = chrono::Utc::now().year();
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("LL-{}-{:06}", year, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_number_format() {
        let number = generate_application_number();
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "LL");
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit()));
    }
}
