//! Repayment engine
//!
//! Allocates repayments across the installment schedule in FIFO order under
//! the loan's version CAS. Direct repayments debit the borrower through the
//! payment provider first; manual proofs settle the same way once an operator
//! verifies them. No in-memory lock is held across store or provider calls;
//! all coordination is the store's conditional writes plus the uniqueness of
//! idempotency keys and references.

use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{snapshot, AuditService};
use crate::error::{ApiError, ApiResult};
use crate::loans::model::{Loan, LoanStatus};
use crate::loans::state_machine::ensure_transition;
use crate::notifications::{kinds, NotificationService};
use crate::provider::{new_reference, DebitRequest, PaymentProvider};

use super::allocation::{plan_allocation, AllocationPlan, InstallmentSnapshot};
use super::model::{
    AllocationStep, ManualRepaymentRequest, Payment, PaymentStatus, PaymentType, RepaymentOutcome,
};

/// Bounded retries for the balance CAS; the caller retries beyond this with
/// the same idempotency key.
const CAS_RETRY_LIMIT: usize = 3;

/// Repayment engine
#[derive(Clone)]
pub struct RepaymentEngine {
    db_pool: PgPool,
    provider: Arc<dyn PaymentProvider>,
    audit: AuditService,
    notifications: NotificationService,
}

impl RepaymentEngine {
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

    /// Process a direct, provider-backed repayment.
    pub async fn process_repayment(
        &self,
        loan_id: Uuid,
        account_id: Uuid,
        amount: i64,
        idempotency_key: &str,
    ) -> ApiResult<RepaymentOutcome> {
        if amount <= 0 {
            return Err(ApiError::Validation(
                "Repayment amount must be greater than zero".to_string(),
            ));
        }

        // Idempotency short-circuit on the domain key
        if let Some(outcome) = self.short_circuit(idempotency_key).await? {
            return Ok(outcome);
        }

        let loan = self.validate_repayable_loan(loan_id, account_id).await?;

        let payment = self
            .create_intent(
                &loan,
                account_id,
                amount,
                idempotency_key,
                PaymentStatus::Processing,
                None,
            )
            .await?;

        // Pull the funds before touching the ledger
        let debit = self
            .provider
            .debit(DebitRequest {
                amount,
                account_id,
                narration: format!("Loan repayment {}", loan.application_number),
                reference: payment.reference.clone(),
            })
            .await;

        let receipt = match debit {
            Ok(receipt) => receipt,
            Err(provider_err) => {
                self.mark_failed(payment.id, &provider_err.to_string()).await;
                return Err(ApiError::ProviderFailure(provider_err.to_string()));
            }
        };

        sqlx::query("UPDATE payments SET provider_reference = $2, updated_at = NOW() WHERE id = $1")
            .bind(payment.id)
            .bind(&receipt.provider_reference)
            .execute(&self.db_pool)
            .await?;

        match self.settle(&payment, account_id).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                // Installment and balance updates already committed stay; the
                // payment is parked failed so a keyed retry can resolve it.
                self.mark_failed(payment.id, &err.to_string()).await;
                Err(err)
            }
        }
    }

    /// Record a manual bank-transfer proof. No installment or balance is
    /// touched until an operator verifies it.
    pub async fn submit_manual(
        &self,
        account_id: Uuid,
        req: ManualRepaymentRequest,
        idempotency_key: &str,
    ) -> ApiResult<Payment> {
        let existing = self.find_by_key(idempotency_key).await?;
        if let Some(payment) = existing {
            return match payment.status {
                PaymentStatus::Pending | PaymentStatus::Success => Ok(payment),
                PaymentStatus::Processing => Err(ApiError::IdempotencyInFlight),
                PaymentStatus::Failed => Err(ApiError::Conflict(
                    "This submission was rejected; submit a new proof with a fresh key"
                        .to_string(),
                )),
            };
        }

        let loan = self.validate_repayable_loan(req.loan_id, account_id).await?;

        let payment = self
            .create_intent(
                &loan,
                account_id,
                req.amount,
                idempotency_key,
                PaymentStatus::Pending,
                Some(&req),
            )
            .await?;

        self.audit
            .record(
                "payment",
                payment.id,
                "MANUAL_PAYMENT_SUBMITTED",
                account_id,
                None,
                Some(snapshot(&payment)),
            )
            .await?;

        self.notifications
            .notify_operators(
                kinds::PAYMENT_PROOF_SUBMITTED,
                "Manual payment proof submitted",
                &format!(
                    "Proof for {} minor units on loan {} awaits verification",
                    payment.amount, loan.application_number
                ),
                serde_json::json!({"payment_id": payment.id, "loan_id": loan.id}),
            )
            .await?;

        Ok(payment)
    }

    /// Operator verdict on a pending manual proof. Approval settles the
    /// existing payment through the same allocation path as a direct
    /// repayment; rejection parks it failed with the operator's reason.
    pub async fn verify(
        &self,
        payment_id: Uuid,
        operator_id: Uuid,
        approve: bool,
        reason: Option<String>,
    ) -> ApiResult<RepaymentOutcome> {
        let payment = self.fetch_payment(payment_id).await?;

        if payment.payment_type != PaymentType::Repayment {
            return Err(ApiError::Validation(
                "Only repayments can be verified".to_string(),
            ));
        }
        if payment.status != PaymentStatus::Pending {
            return Err(ApiError::Conflict(format!(
                "Payment {} is not awaiting verification",
                payment.reference
            )));
        }

        if !approve {
            let reason =
                reason.unwrap_or_else(|| "rejected by operator".to_string());
            let rejected = sqlx::query_as::<_, Payment>(
                r#"
                UPDATE payments
                SET status = 'failed', failure_reason = $2,
                    verified_by = $3, verified_at = NOW(), updated_at = NOW()
                WHERE id = $1 AND status = 'pending'
                RETURNING *
                "#,
            )
            .bind(payment_id)
            .bind(&reason)
            .bind(operator_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| {
                ApiError::Conflict("Payment was verified concurrently".to_string())
            })?;

            self.audit
                .record(
                    "payment",
                    rejected.id,
                    "PAYMENT_VERIFICATION_REJECTED",
                    operator_id,
                    Some(snapshot(&payment)),
                    Some(snapshot(&rejected)),
                )
                .await?;

            self.notifications
                .notify(
                    rejected.account_id,
                    kinds::PAYMENT_REJECTED,
                    "Payment proof rejected",
                    &format!("Payment {} was rejected: {}", rejected.reference, reason),
                    serde_json::json!({"payment_id": rejected.id, "reason": reason}),
                )
                .await?;

            let loan = self.fetch_loan(rejected.loan_id).await?;
            return Ok(RepaymentOutcome {
                payment: rejected,
                loan,
                allocations: Vec::new(),
                overpayment: 0,
                completed: false,
            });
        }

        // Re-validate loan state before settling against the proof
        self.validate_repayable_loan(payment.loan_id, payment.account_id)
            .await?;

        let claimed = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = 'processing', verified_by = $2, verified_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(payment_id)
        .bind(operator_id)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| ApiError::Conflict("Payment was verified concurrently".to_string()))?;

        match self.settle(&claimed, operator_id).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.mark_failed(claimed.id, &err.to_string()).await;
                Err(err)
            }
        }
    }

    // ===== Settlement core (steps shared by both paths) =====

    /// Allocate across open installments and move the loan balance under the
    /// version CAS, retrying on lost races with a fresh snapshot.
    async fn settle(&self, payment: &Payment, actor: Uuid) -> ApiResult<RepaymentOutcome> {
        for attempt in 0..CAS_RETRY_LIMIT {
            let loan = self.fetch_loan(payment.loan_id).await?;

            // A concurrent repayment may have completed the loan; anything
            // beyond the schedule settles as pure overpayment.
            if loan.status != LoanStatus::Active && loan.status != LoanStatus::Completed {
                return Err(ApiError::InvalidTransition(format!(
                    "loan is {} and can no longer accept repayments",
                    loan.status
                )));
            }

            let open = self.open_installments(payment.loan_id).await?;
            let snapshots: Vec<InstallmentSnapshot> = open
                .iter()
                .map(|row| InstallmentSnapshot {
                    id: row.0,
                    number: row.1,
                    total_due: row.2,
                    paid_amount: row.3,
                })
                .collect();

            let plan = plan_allocation(&snapshots, payment.amount);

            match self.apply_plan(&loan, payment, &plan, actor).await? {
                Some(outcome) => {
                    self.finish(&loan, &outcome, actor).await?;
                    return Ok(outcome);
                }
                None => {
                    tracing::debug!(
                        payment_id = %payment.id,
                        attempt,
                        "Repayment lost a concurrency race; replanning"
                    );
                    continue;
                }
            }
        }

        Err(ApiError::Concurrency(
            "repayment kept losing to concurrent updates; retry with the same idempotency key"
                .to_string(),
        ))
    }

    /// Persist one allocation plan transactionally. Returns None when a
    /// conditional write missed, meaning the snapshot went stale.
    async fn apply_plan(
        &self,
        loan: &Loan,
        payment: &Payment,
        plan: &AllocationPlan,
        actor: Uuid,
    ) -> ApiResult<Option<RepaymentOutcome>> {
        let mut tx = self.db_pool.begin().await?;

        for app in &plan.applications {
            let result = sqlx::query(
                r#"
                UPDATE installments
                SET paid_amount = $2,
                    status = CASE WHEN $3 THEN 'paid'::installment_status
                                  ELSE 'partial'::installment_status END,
                    paid_at = CASE WHEN $3 THEN NOW() ELSE paid_at END,
                    updated_at = NOW()
                WHERE id = $1 AND paid_amount = $4
                "#,
            )
            .bind(app.installment_id)
            .bind(app.new_paid)
            .bind(app.fully_paid)
            .bind(app.previous_paid)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(None);
            }
        }

        let new_total_repaid = loan.total_repaid + plan.applied;
        let new_outstanding = loan.total_repayable - new_total_repaid;
        let completing = new_outstanding <= 0 && loan.status == LoanStatus::Active;
        if completing {
            ensure_transition(loan.status, LoanStatus::Completed)?;
        }

        let updated_loan = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans
            SET total_repaid = $3,
                outstanding_balance = $4,
                status = CASE WHEN $5 THEN 'completed'::loan_status ELSE status END,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(loan.id)
        .bind(loan.version)
        .bind(new_total_repaid)
        .bind(new_outstanding)
        .bind(completing)
        .fetch_optional(&mut *tx)
        .await?;

        let updated_loan = match updated_loan {
            Some(l) => l,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        let finalized = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = 'success',
                reconciled = TRUE,
                reconciled_at = NOW(),
                allocated_principal = $2,
                allocated_interest = 0,
                allocated_overpayment = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(payment.id)
        .bind(plan.applied)
        .bind(plan.overpayment)
        .fetch_optional(&mut *tx)
        .await?;

        let finalized = match finalized {
            Some(p) => p,
            None => {
                tx.rollback().await?;
                return Err(ApiError::Concurrency(
                    "payment was finalized concurrently".to_string(),
                ));
            }
        };

        if completing {
            sqlx::query(
                r#"
                INSERT INTO loan_status_history (id, loan_id, from_status, to_status, reason, performed_by)
                VALUES ($1, $2, 'active', 'completed', 'loan fully repaid', $3)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(loan.id)
            .bind(actor)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Some(RepaymentOutcome {
            allocations: plan
                .applications
                .iter()
                .map(|app| AllocationStep {
                    installment_number: app.number,
                    amount_applied: app.amount,
                })
                .collect(),
            overpayment: plan.overpayment,
            completed: completing,
            payment: finalized,
            loan: updated_loan,
        }))
    }

    /// Post-commit audit and notification fan-out
    async fn finish(&self, before: &Loan, outcome: &RepaymentOutcome, actor: Uuid) -> ApiResult<()> {
        self.audit
            .record(
                "loan",
                outcome.loan.id,
                "REPAYMENT_PROCESSED",
                actor,
                Some(snapshot(before)),
                Some(snapshot(&outcome.loan)),
            )
            .await?;

        let body = format!(
            "Payment {} of {} minor units applied to loan {}",
            outcome.payment.reference, outcome.payment.amount, outcome.loan.application_number
        );
        let data = serde_json::json!({
            "payment_id": outcome.payment.id,
            "loan_id": outcome.loan.id,
            "amount": outcome.payment.amount,
            "overpayment": outcome.overpayment,
        });

        self.notifications
            .notify(
                outcome.loan.borrower_id,
                kinds::PAYMENT_RECEIVED,
                "Payment received",
                &body,
                data.clone(),
            )
            .await?;
        self.notifications
            .notify_operators(kinds::PAYMENT_RECEIVED, "Payment received", &body, data)
            .await?;

        if outcome.completed {
            self.notifications
                .notify(
                    outcome.loan.borrower_id,
                    kinds::LOAN_COMPLETED,
                    "Loan completed",
                    &format!(
                        "Loan {} has been fully repaid",
                        outcome.loan.application_number
                    ),
                    serde_json::json!({"loan_id": outcome.loan.id}),
                )
                .await?;
        }

        Ok(())
    }

    // ===== Intent management =====

    /// Resolve a repeated idempotency key per the engine contract
    async fn short_circuit(&self, idempotency_key: &str) -> ApiResult<Option<RepaymentOutcome>> {
        let existing = self.find_by_key(idempotency_key).await?;
        let payment = match existing {
            None => return Ok(None),
            Some(p) => p,
        };

        match payment.status {
            PaymentStatus::Success => {
                let loan = self.fetch_loan(payment.loan_id).await?;
                let overpayment = payment.overpayment();
                let completed = loan.status == LoanStatus::Completed;
                Ok(Some(RepaymentOutcome {
                    payment,
                    loan,
                    allocations: Vec::new(),
                    overpayment,
                    completed,
                }))
            }
            PaymentStatus::Pending | PaymentStatus::Processing => {
                Err(ApiError::IdempotencyInFlight)
            }
            // A failed direct attempt is retryable under the same key:
            // reclaim it. Rejected manual proofs stay failed; a new
            // submission needs a fresh key.
            PaymentStatus::Failed => {
                if payment.sender_bank.is_some() {
                    return Err(ApiError::Conflict(
                        "This proof was rejected; submit a new one with a fresh key".to_string(),
                    ));
                }

                let reclaimed = sqlx::query_as::<_, Payment>(
                    r#"
                    UPDATE payments
                    SET status = 'processing', failure_reason = NULL, updated_at = NOW()
                    WHERE id = $1 AND status = 'failed'
                    RETURNING *
                    "#,
                )
                .bind(payment.id)
                .fetch_optional(&self.db_pool)
                .await?
                .ok_or(ApiError::IdempotencyInFlight)?;

                // Funds were never pulled if the earlier debit failed; the
                // reference makes the retry idempotent at the provider.
                if reclaimed.provider_reference.is_none() {
                    let debit = self
                        .provider
                        .debit(DebitRequest {
                            amount: reclaimed.amount,
                            account_id: reclaimed.account_id,
                            narration: "Loan repayment retry".to_string(),
                            reference: reclaimed.reference.clone(),
                        })
                        .await;

                    match debit {
                        Ok(receipt) => {
                            sqlx::query(
                                "UPDATE payments SET provider_reference = $2, updated_at = NOW() WHERE id = $1",
                            )
                            .bind(reclaimed.id)
                            .bind(&receipt.provider_reference)
                            .execute(&self.db_pool)
                            .await?;
                        }
                        Err(provider_err) => {
                            self.mark_failed(reclaimed.id, &provider_err.to_string()).await;
                            return Err(ApiError::ProviderFailure(provider_err.to_string()));
                        }
                    }
                }

                match self.settle(&reclaimed, reclaimed.account_id).await {
                    Ok(outcome) => Ok(Some(outcome)),
                    Err(err) => {
                        self.mark_failed(reclaimed.id, &err.to_string()).await;
                        Err(err)
                    }
                }
            }
        }
    }

    async fn create_intent(
        &self,
        loan: &Loan,
        account_id: Uuid,
        amount: i64,
        idempotency_key: &str,
        status: PaymentStatus,
        proof: Option<&ManualRepaymentRequest>,
    ) -> ApiResult<Payment> {
        // Reference collisions retry with a fresh reference; a key collision
        // means another request won the insert race.
        for _ in 0..3 {
            let reference = new_reference("PAY");
            let result = sqlx::query_as::<_, Payment>(
                r#"
                INSERT INTO payments (
                    id, loan_id, account_id, idempotency_key, reference,
                    payment_type, amount, status,
                    sender_bank, sender_name, transfer_date, external_reference, evidence_url
                )
                VALUES ($1, $2, $3, $4, $5, 'repayment', $6, $7, $8, $9, $10, $11, $12)
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(loan.id)
            .bind(account_id)
            .bind(idempotency_key)
            .bind(&reference)
            .bind(amount)
            .bind(status)
            .bind(proof.map(|p| p.sender_bank.clone()))
            .bind(proof.map(|p| p.sender_name.clone()))
            .bind(proof.map(|p| p.transfer_date))
            .bind(proof.map(|p| p.external_reference.clone()))
            .bind(proof.and_then(|p| p.evidence_url.clone()))
            .fetch_one(&self.db_pool)
            .await;

            match result {
                Ok(payment) => return Ok(payment),
                Err(sqlx::Error::Database(db_err))
                    if db_err.is_unique_violation()
                        && db_err.constraint() == Some("payments_reference_key") =>
                {
                    continue;
                }
                Err(sqlx::Error::Database(db_err))
                    if db_err.is_unique_violation()
                        && db_err.constraint() == Some("payments_idempotency_key_key") =>
                {
                    return Err(ApiError::IdempotencyInFlight);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ApiError::Internal(
            "could not allocate a unique payment reference".to_string(),
        ))
    }

    // ===== Validation and lookups =====

    async fn validate_repayable_loan(&self, loan_id: Uuid, account_id: Uuid) -> ApiResult<Loan> {
        let loan = self.fetch_loan(loan_id).await?;

        if loan.borrower_id != account_id {
            return Err(ApiError::Authorization(
                "This loan belongs to another account".to_string(),
            ));
        }
        if loan.status != LoanStatus::Active {
            return Err(ApiError::InvalidTransition(format!(
                "loan is {} but repayments require an active loan",
                loan.status
            )));
        }

        Ok(loan)
    }

    async fn fetch_loan(&self, loan_id: Uuid) -> ApiResult<Loan> {
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(loan_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Loan {} not found", loan_id)))
    }

    async fn fetch_payment(&self, payment_id: Uuid) -> ApiResult<Payment> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
            .bind(payment_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Payment {} not found", payment_id)))
    }

    pub(crate) async fn find_by_key(&self, idempotency_key: &str) -> ApiResult<Option<Payment>> {
        Ok(
            sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE idempotency_key = $1")
                .bind(idempotency_key)
                .fetch_optional(&self.db_pool)
                .await?,
        )
    }

    /// Open installments as (id, number, total_due, paid_amount), FIFO order
    async fn open_installments(&self, loan_id: Uuid) -> ApiResult<Vec<(Uuid, i32, i64, i64)>> {
        Ok(sqlx::query_as(
            r#"
            SELECT id, installment_number, total_due, paid_amount
            FROM installments
            WHERE loan_id = $1 AND status <> 'paid'
            ORDER BY installment_number ASC
            "#,
        )
        .bind(loan_id)
        .fetch_all(&self.db_pool)
        .await?)
    }

    /// Best-effort failure parking; the original error wins over any error here
    async fn mark_failed(&self, payment_id: Uuid, reason: &str) {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'failed', failure_reason = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(payment_id)
        .bind(reason)
        .execute(&self.db_pool)
        .await;

        if let Err(e) = result {
            tracing::error!(payment_id = %payment_id, error = %e, "Failed to park payment as failed");
        }
    }

    /// List an account's payments, newest first
    pub async fn list_for_account(
        &self,
        account_id: Uuid,
        pagination: crate::models::PaginationParams,
    ) -> ApiResult<(Vec<Payment>, i64)> {
        let (_, limit, offset) = pagination.normalize();

        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT * FROM payments
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

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE account_id = $1")
            .bind(account_id)
            .fetch_one(&self.db_pool)
            .await?;

        Ok((payments, total))
    }
}
