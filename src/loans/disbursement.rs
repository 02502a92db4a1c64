//! Disbursement protocol
//!
//! Two-phase: reserve the loan locally, transfer through the provider, then
//! commit or compensate. The disbursement reference is generated fresh per
//! attempt and is idempotent at the provider boundary, so a crashed attempt
//! cannot settle twice.

use chrono::Months;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{snapshot, AuditService};
use crate::error::{ApiError, ApiResult};
use crate::notifications::{kinds, NotificationService};
use crate::provider::{new_reference, PaymentProvider, TransferRequest};

use super::math::split_schedule;
use super::model::{Loan, LoanStatus};
use super::state_machine::ensure_transition;

/// Disbursement protocol driver
#[derive(Clone)]
pub struct DisbursementService {
    db_pool: PgPool,
    provider: Arc<dyn PaymentProvider>,
    audit: AuditService,
    notifications: NotificationService,
}

impl DisbursementService {
    pub fn new(
        db_pool: PgPool,
        provider: Arc<dyn PaymentProvider>,
        audit: AuditService,
        notifications: NotificationService,
    ) -> Self {
        Self {
            db_pool,
            provider,
            audit,
            notifications,
        }
    }

    /// Disburse an approved loan.
    ///
    /// On provider success the loan becomes `active` and its repayment
    /// schedule is generated atomically. On provider failure the reservation
    /// is compensated: the loan returns to `approved` with the reference
    /// cleared, and stays eligible for a retry with a fresh reference.
    pub async fn disburse(&self, loan_id: Uuid, operator_id: Uuid) -> ApiResult<Loan> {
        let loan = self.fetch(loan_id).await?;

        if loan.disbursement_reference.is_some() {
            return Err(ApiError::Conflict(format!(
                "Loan {} has already been disbursed",
                loan.application_number
            )));
        }
        ensure_transition(loan.status, LoanStatus::Disbursed)?;
        if loan.bank_account.is_empty() || loan.bank_code.is_empty() {
            return Err(ApiError::Validation(
                "Loan has no bank destination for disbursement".to_string(),
            ));
        }

        // Phase 1: reserve
        let reference = new_reference("DSB");
        let reserved = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans
            SET status = 'disbursed',
                disbursement_reference = $3,
                disbursed_by = $4,
                disbursed_at = NOW(),
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
              AND status = 'approved'
              AND disbursement_reference IS NULL
            RETURNING *
            "#,
        )
        .bind(loan_id)
        .bind(loan.version)
        .bind(&reference)
        .bind(operator_id)
        .fetch_optional(&self.db_pool)
        .await?;

        let reserved = match reserved {
            Some(l) => l,
            None => return Err(self.diagnose_reserve_failure(loan_id).await),
        };

        self.push_history(
            &reserved,
            LoanStatus::Approved,
            LoanStatus::Disbursed,
            None,
            operator_id,
        )
        .await?;
        self.audit
            .record(
                "loan",
                reserved.id,
                "DISBURSEMENT_RESERVED",
                operator_id,
                Some(snapshot(&loan)),
                Some(snapshot(&reserved)),
            )
            .await?;

        // Phase 2: external transfer
        let transfer = self
            .provider
            .transfer(TransferRequest {
                amount: reserved.principal,
                bank_account: reserved.bank_account.clone(),
                bank_code: reserved.bank_code.clone(),
                narration: format!("Loan disbursement {}", reserved.application_number),
                reference: reference.clone(),
            })
            .await;

        match transfer {
            Ok(receipt) => {
                self.commit(&reserved, &receipt.provider_reference, operator_id)
                    .await
            }
            Err(provider_err) => {
                self.compensate(&reserved, &provider_err.to_string(), operator_id)
                    .await?;
                Err(ApiError::ProviderFailure(provider_err.to_string()))
            }
        }
    }

    /// Phase 3: settle locally and emit the repayment schedule
    async fn commit(
        &self,
        reserved: &Loan,
        provider_reference: &str,
        operator_id: Uuid,
    ) -> ApiResult<Loan> {
        let disbursed_at = reserved
            .disbursed_at
            .unwrap_or_else(chrono::Utc::now);
        let lines = split_schedule(
            reserved.principal,
            reserved.total_interest,
            reserved.tenor_months,
        );

        let mut tx = self.db_pool.begin().await?;

        let active = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans
            SET status = 'active',
                provider_reference = $3,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2 AND status = 'disbursed'
            RETURNING *
            "#,
        )
        .bind(reserved.id)
        .bind(reserved.version)
        .bind(provider_reference)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            ApiError::Concurrency("loan changed while settling disbursement".to_string())
        })?;

        for line in &lines {
            let due_date = disbursed_at + Months::new(line.number as u32);
            sqlx::query(
                r#"
                INSERT INTO installments (
                    id, loan_id, installment_number, due_date,
                    principal_share, interest_share, total_due, paid_amount, status
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, 0, 'pending')
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(reserved.id)
            .bind(line.number)
            .bind(due_date)
            .bind(line.principal_share)
            .bind(line.interest_share)
            .bind(line.total_due)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.push_history(
            &active,
            LoanStatus::Disbursed,
            LoanStatus::Active,
            None,
            operator_id,
        )
        .await?;
        self.audit
            .record(
                "loan",
                active.id,
                "LOAN_DISBURSED",
                operator_id,
                Some(snapshot(reserved)),
                Some(snapshot(&active)),
            )
            .await?;

        self.notifications
            .notify(
                active.borrower_id,
                kinds::LOAN_DISBURSED,
                "Loan disbursed",
                &format!(
                    "Loan {} was disbursed; {} installments scheduled",
                    active.application_number, active.tenor_months
                ),
                serde_json::json!({
                    "loan_id": active.id,
                    "reference": active.disbursement_reference,
                    "monthly_payment": active.monthly_payment,
                }),
            )
            .await?;

        tracing::info!(loan_id = %active.id, "Loan disbursed and schedule generated");

        Ok(active)
    }

    /// Phase 4: compensate a failed transfer by reverting the reservation
    async fn compensate(
        &self,
        reserved: &Loan,
        provider_message: &str,
        operator_id: Uuid,
    ) -> ApiResult<()> {
        let reverted = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans
            SET status = 'approved',
                disbursement_reference = NULL,
                provider_reference = NULL,
                disbursed_by = NULL,
                disbursed_at = NULL,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2 AND status = 'disbursed'
            RETURNING *
            "#,
        )
        .bind(reserved.id)
        .bind(reserved.version)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| {
            ApiError::Concurrency("loan changed while compensating disbursement".to_string())
        })?;

        self.push_history(
            &reverted,
            LoanStatus::Disbursed,
            LoanStatus::Approved,
            Some(format!("provider transfer failed: {}", provider_message)),
            operator_id,
        )
        .await?;
        self.audit
            .record(
                "loan",
                reverted.id,
                "DISBURSEMENT_FAILED",
                operator_id,
                Some(snapshot(reserved)),
                Some(snapshot(&reverted)),
            )
            .await?;

        tracing::warn!(
            loan_id = %reserved.id,
            provider_message,
            "Disbursement compensated after provider failure"
        );

        Ok(())
    }

    async fn fetch(&self, loan_id: Uuid) -> ApiResult<Loan> {
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(loan_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Loan {} not found", loan_id)))
    }

    async fn diagnose_reserve_failure(&self, loan_id: Uuid) -> ApiError {
        match self.fetch(loan_id).await {
            Err(e) => e,
            Ok(current) if current.disbursement_reference.is_some() => ApiError::Conflict(format!(
                "Loan {} has already been disbursed",
                current.application_number
            )),
            Ok(current) if current.status != LoanStatus::Approved => {
                ApiError::InvalidTransition(format!(
                    "loan is {} but disbursement requires approved",
                    current.status
                ))
            }
            Ok(_) => ApiError::Concurrency(
                "loan was modified concurrently; retry the disbursement".to_string(),
            ),
        }
    }

    async fn push_history(
        &self,
        loan: &Loan,
        from: LoanStatus,
        to: LoanStatus,
        reason: Option<String>,
        performed_by: Uuid,
    ) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO loan_status_history (id, loan_id, from_status, to_status, reason, performed_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(loan.id)
        .bind(from)
        .bind(to)
        .bind(&reason)
        .bind(performed_by)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }
}
