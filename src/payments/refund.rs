//! Refund protocol
//!
//! Two flavors. A full refund reverses a successful repayment through the
//! provider and restores the debt on the loan; installments are not
//! reallocated, so the drift between the schedule's paid amounts and the
//! loan's total repaid equals the refunded debt. An overpayment refund
//! returns only the recorded excess and never touches loan balances, because
//! overpaid funds were never applied to the debt.
//!
//! Exclusivity is claimed before any provider call: the refund intent insert
//! is gated by a partial unique index admitting one live refund row per
//! source payment, and overpayment refunds additionally claim the source's
//! refunded flag with a conditional write.

use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{snapshot, AuditService};
use crate::error::{ApiError, ApiResult};
use crate::loans::model::{Loan, LoanStatus};
use crate::notifications::{kinds, NotificationService};
use crate::provider::{new_reference, PaymentProvider, TransferRequest};

use super::model::{Payment, PaymentStatus, PaymentType};

const CAS_RETRY_LIMIT: usize = 3;

/// Refund protocol driver
#[derive(Clone)]
pub struct RefundService {
    db_pool: PgPool,
    provider: Arc<dyn PaymentProvider>,
    audit: AuditService,
    notifications: NotificationService,
}

impl RefundService {
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

    /// Refund a successful repayment in full, restoring the debt.
    ///
    /// Only the applied portion of the source payment is put back on the
    /// loan; a recorded overpayment was never part of the debt. The loan must
    /// still be active, because terminal states admit no balance restoration.
    pub async fn refund_payment(
        &self,
        payment_id: Uuid,
        operator_id: Uuid,
        idempotency_key: &str,
    ) -> ApiResult<Payment> {
        if let Some(existing) = self.existing_refund(idempotency_key).await? {
            return existing;
        }

        let source = self.fetch_source(payment_id).await?;

        let loan = self.fetch_loan(source.loan_id).await?;
        if loan.status != LoanStatus::Active {
            return Err(ApiError::InvalidTransition(format!(
                "loan is {} but a full refund requires an active loan",
                loan.status
            )));
        }

        // The intent insert is the exclusivity claim: the partial unique
        // index on refund_of admits one live refund per source payment, so a
        // concurrent request under a different key loses here, before any
        // provider call or balance change.
        let refund = self
            .create_refund_intent(&source, source.amount, idempotency_key)
            .await?;

        let transfer = self
            .provider
            .transfer(TransferRequest {
                amount: refund.amount,
                bank_account: loan.bank_account.clone(),
                bank_code: loan.bank_code.clone(),
                narration: format!("Refund of payment {}", source.reference),
                reference: refund.reference.clone(),
            })
            .await;

        let receipt = match transfer {
            Ok(receipt) => receipt,
            Err(provider_err) => {
                self.mark_failed(refund.id, &provider_err.to_string()).await?;
                return Err(ApiError::ProviderFailure(provider_err.to_string()));
            }
        };

        // Restore the debt: only the applied portion ever reduced it
        let restored_debt = source.amount - source.overpayment();
        self.restore_loan_balance(&loan, restored_debt).await?;

        let finalized = self
            .finalize(refund.id, &receipt.provider_reference)
            .await?;

        self.audit
            .record(
                "payment",
                finalized.id,
                "PAYMENT_REFUNDED",
                operator_id,
                Some(snapshot(&source)),
                Some(snapshot(&finalized)),
            )
            .await?;

        self.notifications
            .notify(
                source.account_id,
                kinds::REFUND_PROCESSED,
                "Payment refunded",
                &format!(
                    "Payment {} was refunded in full; the amount is owed again",
                    source.reference
                ),
                serde_json::json!({"payment_id": source.id, "refund_id": finalized.id}),
            )
            .await?;

        Ok(finalized)
    }

    /// Refund the overpayment recorded on a successful repayment.
    ///
    /// Loan balances stay untouched. The source payment's flag makes a second
    /// refund fail with `AlreadyRefunded`.
    pub async fn refund_overpayment(
        &self,
        payment_id: Uuid,
        operator_id: Uuid,
        requested_amount: Option<i64>,
        idempotency_key: &str,
    ) -> ApiResult<Payment> {
        if let Some(existing) = self.existing_refund(idempotency_key).await? {
            return existing;
        }

        let source = self.fetch_source(payment_id).await?;

        let overpayment = source.overpayment();
        if overpayment <= 0 {
            return Err(ApiError::Validation(format!(
                "Payment {} has no recorded overpayment",
                source.reference
            )));
        }
        if source.overpayment_refunded {
            return Err(ApiError::AlreadyRefunded);
        }

        let amount = requested_amount.unwrap_or(overpayment);
        if amount <= 0 || amount > overpayment {
            return Err(ApiError::Validation(format!(
                "Refund amount must be between 1 and the recorded overpayment of {}",
                overpayment
            )));
        }

        let refund = self
            .create_refund_intent(&source, amount, idempotency_key)
            .await?;

        // Claim the flag before moving money so two operators cannot both win
        let claimed = sqlx::query(
            r#"
            UPDATE payments
            SET overpayment_refunded = TRUE, updated_at = NOW()
            WHERE id = $1 AND overpayment_refunded = FALSE
            "#,
        )
        .bind(source.id)
        .execute(&self.db_pool)
        .await?;

        if claimed.rows_affected() == 0 {
            self.mark_failed(refund.id, "overpayment already refunded")
                .await?;
            return Err(ApiError::AlreadyRefunded);
        }

        let loan = self.fetch_loan(source.loan_id).await?;
        let transfer = self
            .provider
            .transfer(TransferRequest {
                amount,
                bank_account: loan.bank_account.clone(),
                bank_code: loan.bank_code.clone(),
                narration: format!("Overpayment refund for {}", source.reference),
                reference: refund.reference.clone(),
            })
            .await;

        let receipt = match transfer {
            Ok(receipt) => receipt,
            Err(provider_err) => {
                // Release the flag so the refund can be attempted again
                sqlx::query(
                    "UPDATE payments SET overpayment_refunded = FALSE, updated_at = NOW() WHERE id = $1",
                )
                .bind(source.id)
                .execute(&self.db_pool)
                .await?;
                self.mark_failed(refund.id, &provider_err.to_string()).await?;
                return Err(ApiError::ProviderFailure(provider_err.to_string()));
            }
        };

        let finalized = self
            .finalize(refund.id, &receipt.provider_reference)
            .await?;

        self.audit
            .record(
                "payment",
                finalized.id,
                "OVERPAYMENT_REFUNDED",
                operator_id,
                Some(snapshot(&source)),
                Some(snapshot(&finalized)),
            )
            .await?;

        self.notifications
            .notify(
                source.account_id,
                kinds::REFUND_PROCESSED,
                "Overpayment refunded",
                &format!(
                    "The overpayment of {} minor units on payment {} was refunded",
                    amount, source.reference
                ),
                serde_json::json!({"payment_id": source.id, "refund_id": finalized.id, "amount": amount}),
            )
            .await?;

        Ok(finalized)
    }

    // ===== Internals =====

    /// Resolve a repeated idempotency key against existing refund payments
    async fn existing_refund(
        &self,
        idempotency_key: &str,
    ) -> ApiResult<Option<ApiResult<Payment>>> {
        let existing =
            sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE idempotency_key = $1")
                .bind(idempotency_key)
                .fetch_optional(&self.db_pool)
                .await?;

        Ok(existing.map(|payment| match payment.status {
            PaymentStatus::Success => Ok(payment),
            PaymentStatus::Pending | PaymentStatus::Processing => {
                Err(ApiError::IdempotencyInFlight)
            }
            PaymentStatus::Failed => Err(ApiError::Conflict(
                "The previous refund attempt failed; retry with a fresh key".to_string(),
            )),
        }))
    }

    async fn fetch_source(&self, payment_id: Uuid) -> ApiResult<Payment> {
        let payment =
            sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
                .bind(payment_id)
                .fetch_optional(&self.db_pool)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("Payment {} not found", payment_id)))?;

        if payment.payment_type != PaymentType::Repayment {
            return Err(ApiError::Validation(
                "Only repayments can be refunded".to_string(),
            ));
        }
        if payment.status != PaymentStatus::Success {
            return Err(ApiError::Validation(format!(
                "Payment {} is {:?} and cannot be refunded",
                payment.reference, payment.status
            )));
        }

        Ok(payment)
    }

    async fn fetch_loan(&self, loan_id: Uuid) -> ApiResult<Loan> {
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(loan_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Loan {} not found", loan_id)))
    }

    async fn create_refund_intent(
        &self,
        source: &Payment,
        amount: i64,
        idempotency_key: &str,
    ) -> ApiResult<Payment> {
        let result = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (
                id, loan_id, account_id, idempotency_key, reference,
                payment_type, amount, status, refund_of
            )
            VALUES ($1, $2, $3, $4, $5, 'refund', $6, 'processing', $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(source.loan_id)
        .bind(source.account_id)
        .bind(idempotency_key)
        .bind(new_reference("REF"))
        .bind(amount)
        .bind(source.id)
        .fetch_one(&self.db_pool)
        .await;

        match result {
            Ok(payment) => Ok(payment),
            Err(sqlx::Error::Database(db_err))
                if db_err.is_unique_violation()
                    && db_err.constraint() == Some("payments_idempotency_key_key") =>
            {
                Err(ApiError::IdempotencyInFlight)
            }
            Err(sqlx::Error::Database(db_err))
                if db_err.is_unique_violation()
                    && db_err.constraint() == Some("idx_payments_active_refund") =>
            {
                Err(ApiError::AlreadyRefunded)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Put the refunded debt back on the loan under the version CAS
    async fn restore_loan_balance(&self, loan: &Loan, amount: i64) -> ApiResult<Loan> {
        let mut current = loan.clone();

        for _ in 0..CAS_RETRY_LIMIT {
            let updated = sqlx::query_as::<_, Loan>(
                r#"
                UPDATE loans
                SET total_repaid = total_repaid - $3,
                    outstanding_balance = outstanding_balance + $3,
                    version = version + 1,
                    updated_at = NOW()
                WHERE id = $1 AND version = $2
                RETURNING *
                "#,
            )
            .bind(current.id)
            .bind(current.version)
            .bind(amount)
            .fetch_optional(&self.db_pool)
            .await?;

            match updated {
                Some(l) => return Ok(l),
                None => {
                    current = self.fetch_loan(loan.id).await?;
                    continue;
                }
            }
        }

        Err(ApiError::Concurrency(
            "loan kept changing while restoring the refunded balance".to_string(),
        ))
    }

    async fn finalize(&self, refund_id: Uuid, provider_reference: &str) -> ApiResult<Payment> {
        sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = 'success',
                provider_reference = $2,
                reconciled = TRUE,
                reconciled_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(refund_id)
        .bind(provider_reference)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| ApiError::Concurrency("refund was finalized concurrently".to_string()))
    }

    async fn mark_failed(&self, refund_id: Uuid, reason: &str) -> ApiResult<()> {
        sqlx::query(
            r#"
            UPDATE payments
            SET status = 'failed', failure_reason = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(refund_id)
        .bind(reason)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }
}
