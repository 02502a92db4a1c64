//! End-to-end lifecycle scenarios against a live database.
//!
//! These exercise the full engine: application, review, approval,
//! disbursement (including the compensation branch), repayment, manual
//! proofs, and refunds.

#[cfg(test)]
mod tests {
    use sqlx::PgPool;
    use std::sync::Arc;
    use uuid::Uuid;

    use lendledger_server::audit::AuditService;
    use lendledger_server::loans::model::{ApproveLoanRequest, CreateLoanRequest};
    use lendledger_server::loans::{DisbursementService, LoanService, LoanStatus};
    use lendledger_server::notifications::NotificationService;
    use lendledger_server::payments::model::ManualRepaymentRequest;
    use lendledger_server::payments::{
        PaymentStatus, RefundService, RepaymentEngine,
    };
    use lendledger_server::provider::{PaymentProvider, SimulatedOutcome, SimulatedProvider};
    use lendledger_server::websocket::WsState;

    struct Harness {
        pool: PgPool,
        loans: LoanService,
        disbursement: DisbursementService,
        engine: RepaymentEngine,
        refunds: RefundService,
        borrower_id: Uuid,
        operator_id: Uuid,
    }

    async fn setup(provider: Arc<dyn PaymentProvider>) -> Harness {
        let database_url = std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/lendledger_test".to_string());

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&database_url)
            .await
            .expect("Failed to connect to test database");

        let ws_state = WsState::new("test-secret".to_string());
        let audit = AuditService::new(pool.clone());
        let notifications = NotificationService::new(pool.clone(), ws_state);

        let loans = LoanService::new(pool.clone(), audit.clone(), notifications.clone());
        let disbursement = DisbursementService::new(
            pool.clone(),
            provider.clone(),
            audit.clone(),
            notifications.clone(),
        );
        let engine = RepaymentEngine::new(
            pool.clone(),
            provider.clone(),
            audit.clone(),
            notifications.clone(),
        );
        let refunds = RefundService::new(pool.clone(), provider, audit, notifications);

        let borrower_id = create_account(&pool, "borrower").await;
        let operator_id = create_account(&pool, "operator").await;

        Harness {
            pool,
            loans,
            disbursement,
            engine,
            refunds,
            borrower_id,
            operator_id,
        }
    }

    async fn create_account(pool: &PgPool, role: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO accounts (id, email, password_hash, role) VALUES ($1, $2, 'v1$x$y', $3::account_role)",
        )
        .bind(id)
        .bind(format!("{}+{}@example.com", role, id.simple()))
        .bind(role)
        .execute(pool)
        .await
        .expect("account insert");
        id
    }

    fn loan_request(amount: i64) -> CreateLoanRequest {
        CreateLoanRequest {
            purpose: "working capital".to_string(),
            requested_amount: amount,
            tenor_months: 10,
            interest_rate_bps: 1500,
            bank_account: "0123456789".to_string(),
            bank_code: "044".to_string(),
        }
    }

    async fn active_loan(h: &Harness, amount: i64) -> Uuid {
        let loan = h
            .loans
            .create_loan(h.borrower_id, loan_request(amount))
            .await
            .expect("create");
        h.loans
            .review_loan(loan.id, h.operator_id)
            .await
            .expect("review");
        h.loans
            .approve_loan(
                loan.id,
                h.operator_id,
                ApproveLoanRequest {
                    amount: None,
                    conditions: None,
                },
            )
            .await
            .expect("approve");
        h.disbursement
            .disburse(loan.id, h.operator_id)
            .await
            .expect("disburse");
        loan.id
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_happy_path_to_completion() {
        let h = setup(Arc::new(SimulatedProvider::new())).await;
        let loan_id = active_loan(&h, 10_000_000).await;

        let loan = h.loans.fetch_required(loan_id).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.total_repayable, 11_250_000);
        assert_eq!(loan.monthly_payment, 1_125_000);

        for month in 1..=10 {
            let key = format!("repay-{}-{}", loan_id, month);
            let outcome = h
                .engine
                .process_repayment(loan_id, h.borrower_id, 1_125_000, &key)
                .await
                .expect("repayment");
            assert_eq!(outcome.overpayment, 0);
        }

        let loan = h.loans.fetch_required(loan_id).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Completed);
        assert_eq!(loan.outstanding_balance, 0);
        assert_eq!(loan.total_repaid, 11_250_000);

        // Schedule reconciles with the loan balance
        let schedule = h.loans.schedule(loan_id).await.unwrap();
        let paid: i64 = schedule.iter().map(|i| i.paid_amount).sum();
        assert_eq!(paid, loan.total_repaid);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_idempotent_repayment_retry() {
        let h = setup(Arc::new(SimulatedProvider::new())).await;
        let loan_id = active_loan(&h, 10_000_000).await;

        let key = format!("retry-{}", Uuid::new_v4().simple());
        let first = h
            .engine
            .process_repayment(loan_id, h.borrower_id, 1_125_000, &key)
            .await
            .expect("first");
        let second = h
            .engine
            .process_repayment(loan_id, h.borrower_id, 1_125_000, &key)
            .await
            .expect("second");

        // Same payment row, single allocation
        assert_eq!(first.payment.id, second.payment.id);
        assert!(second.allocations.is_empty());

        let loan = h.loans.fetch_required(loan_id).await.unwrap();
        assert_eq!(loan.total_repaid, 1_125_000);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_disbursement_failure_compensates_and_retries() {
        let failing: Arc<dyn PaymentProvider> = Arc::new(SimulatedProvider::with_outcome(
            SimulatedOutcome::Decline("insufficient float".to_string()),
        ));
        let h = setup(failing).await;

        let loan = h
            .loans
            .create_loan(h.borrower_id, loan_request(10_000_000))
            .await
            .unwrap();
        h.loans.review_loan(loan.id, h.operator_id).await.unwrap();
        h.loans
            .approve_loan(
                loan.id,
                h.operator_id,
                ApproveLoanRequest {
                    amount: None,
                    conditions: None,
                },
            )
            .await
            .unwrap();

        let err = h.disbursement.disburse(loan.id, h.operator_id).await;
        assert!(err.is_err(), "declined transfer must surface as failure");

        let reverted = h.loans.fetch_required(loan.id).await.unwrap();
        assert_eq!(reverted.status, LoanStatus::Approved);
        assert!(reverted.disbursement_reference.is_none());

        // approved -> disbursed -> approved leaves two history entries
        let history = h.loans.history(loan.id).await.unwrap();
        let compensation_entries = history
            .iter()
            .filter(|e| {
                e.from_status == LoanStatus::Disbursed || e.to_status == LoanStatus::Disbursed
            })
            .count();
        assert_eq!(compensation_entries, 2);

        // No schedule was generated
        assert!(h.loans.schedule(loan.id).await.unwrap().is_empty());

        // A second attempt with a working provider succeeds
        let working = DisbursementService::new(
            h.pool.clone(),
            Arc::new(SimulatedProvider::new()),
            AuditService::new(h.pool.clone()),
            NotificationService::new(h.pool.clone(), WsState::new("test-secret".to_string())),
        );
        let active = working.disburse(loan.id, h.operator_id).await.unwrap();
        assert_eq!(active.status, LoanStatus::Active);
        assert_eq!(h.loans.schedule(loan.id).await.unwrap().len(), 10);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_reduced_approval_rederives_balances() {
        let h = setup(Arc::new(SimulatedProvider::new())).await;

        let loan = h
            .loans
            .create_loan(h.borrower_id, loan_request(10_000_000))
            .await
            .unwrap();
        h.loans.review_loan(loan.id, h.operator_id).await.unwrap();
        let approved = h
            .loans
            .approve_loan(
                loan.id,
                h.operator_id,
                ApproveLoanRequest {
                    amount: Some(6_000_000),
                    conditions: Some("reduced exposure".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(approved.principal, 6_000_000);
        assert_eq!(approved.total_interest, 750_000);
        assert_eq!(approved.total_repayable, 6_750_000);
        assert_eq!(approved.monthly_payment, 675_000);
        assert_eq!(approved.outstanding_balance, 6_750_000);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_manual_proof_rejection_leaves_loan_untouched() {
        let h = setup(Arc::new(SimulatedProvider::new())).await;
        let loan_id = active_loan(&h, 10_000_000).await;

        let key = format!("manual-{}", Uuid::new_v4().simple());
        let submitted = h
            .engine
            .submit_manual(
                h.borrower_id,
                ManualRepaymentRequest {
                    loan_id,
                    amount: 1_125_000,
                    sender_bank: "First Bank".to_string(),
                    sender_name: "Ada Borrower".to_string(),
                    transfer_date: chrono::Utc::now(),
                    external_reference: "TRF/0001".to_string(),
                    evidence_url: None,
                },
                &key,
            )
            .await
            .unwrap();
        assert_eq!(submitted.status, PaymentStatus::Pending);

        // Pending proof has no effect on the loan
        let loan = h.loans.fetch_required(loan_id).await.unwrap();
        assert_eq!(loan.total_repaid, 0);

        let outcome = h
            .engine
            .verify(
                submitted.id,
                h.operator_id,
                false,
                Some("wrong reference".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(outcome.payment.status, PaymentStatus::Failed);
        assert_eq!(
            outcome.payment.failure_reason.as_deref(),
            Some("wrong reference")
        );

        let loan = h.loans.fetch_required(loan_id).await.unwrap();
        assert_eq!(loan.total_repaid, 0);
        assert_eq!(loan.outstanding_balance, loan.total_repayable);

        // A fresh submission under a new key starts a new pending payment
        let fresh = h
            .engine
            .submit_manual(
                h.borrower_id,
                ManualRepaymentRequest {
                    loan_id,
                    amount: 1_125_000,
                    sender_bank: "First Bank".to_string(),
                    sender_name: "Ada Borrower".to_string(),
                    transfer_date: chrono::Utc::now(),
                    external_reference: "TRF/0002".to_string(),
                    evidence_url: None,
                },
                &format!("manual-{}", Uuid::new_v4().simple()),
            )
            .await
            .unwrap();
        assert_eq!(fresh.status, PaymentStatus::Pending);
        assert_ne!(fresh.id, submitted.id);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_verified_proof_settles_like_direct_repayment() {
        let h = setup(Arc::new(SimulatedProvider::new())).await;
        let loan_id = active_loan(&h, 10_000_000).await;

        let submitted = h
            .engine
            .submit_manual(
                h.borrower_id,
                ManualRepaymentRequest {
                    loan_id,
                    amount: 1_125_000,
                    sender_bank: "First Bank".to_string(),
                    sender_name: "Ada Borrower".to_string(),
                    transfer_date: chrono::Utc::now(),
                    external_reference: "TRF/0003".to_string(),
                    evidence_url: None,
                },
                &format!("manual-{}", Uuid::new_v4().simple()),
            )
            .await
            .unwrap();

        let outcome = h
            .engine
            .verify(submitted.id, h.operator_id, true, None)
            .await
            .unwrap();

        assert_eq!(outcome.payment.status, PaymentStatus::Success);
        assert_eq!(outcome.allocations.len(), 1);
        assert_eq!(outcome.allocations[0].amount_applied, 1_125_000);
        assert_eq!(outcome.loan.total_repaid, 1_125_000);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_overpayment_and_single_overpayment_refund() {
        let h = setup(Arc::new(SimulatedProvider::new())).await;
        let loan_id = active_loan(&h, 10_000_000).await;

        // Clear nine months, then overpay the last installment by 1_000.00
        for month in 1..=9 {
            h.engine
                .process_repayment(
                    loan_id,
                    h.borrower_id,
                    1_125_000,
                    &format!("m-{}-{}", loan_id, month),
                )
                .await
                .unwrap();
        }
        let outcome = h
            .engine
            .process_repayment(
                loan_id,
                h.borrower_id,
                1_225_000,
                &format!("m-{}-final", loan_id),
            )
            .await
            .unwrap();

        assert_eq!(outcome.overpayment, 100_000);
        assert!(outcome.completed);
        assert_eq!(outcome.loan.outstanding_balance, 0);
        assert_eq!(outcome.loan.status, LoanStatus::Completed);

        let refund_key = format!("refund-{}", Uuid::new_v4().simple());
        let refund = h
            .refunds
            .refund_overpayment(outcome.payment.id, h.operator_id, None, &refund_key)
            .await
            .unwrap();
        assert_eq!(refund.amount, 100_000);
        assert_eq!(refund.status, PaymentStatus::Success);

        // Same key replays the same refund payment
        let replay = h
            .refunds
            .refund_overpayment(outcome.payment.id, h.operator_id, None, &refund_key)
            .await
            .unwrap();
        assert_eq!(replay.id, refund.id);

        // A different key still cannot refund the same source twice
        let err = h
            .refunds
            .refund_overpayment(
                outcome.payment.id,
                h.operator_id,
                None,
                &format!("refund-{}", Uuid::new_v4().simple()),
            )
            .await;
        assert!(err.is_err());

        // Loan balances are untouched by overpayment refunds
        let loan = h.loans.fetch_required(loan_id).await.unwrap();
        assert_eq!(loan.outstanding_balance, 0);
        assert_eq!(loan.total_repaid, 11_250_000);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_full_refund_restores_debt() {
        let h = setup(Arc::new(SimulatedProvider::new())).await;
        let loan_id = active_loan(&h, 10_000_000).await;

        let outcome = h
            .engine
            .process_repayment(
                loan_id,
                h.borrower_id,
                1_125_000,
                &format!("r-{}", Uuid::new_v4().simple()),
            )
            .await
            .unwrap();

        let refund = h
            .refunds
            .refund_payment(
                outcome.payment.id,
                h.operator_id,
                &format!("fr-{}", Uuid::new_v4().simple()),
            )
            .await
            .unwrap();
        assert_eq!(refund.amount, 1_125_000);

        let loan = h.loans.fetch_required(loan_id).await.unwrap();
        assert_eq!(loan.total_repaid, 0);
        assert_eq!(loan.outstanding_balance, loan.total_repayable);

        // Installments are intentionally not reallocated: the schedule drift
        // from the loan balance equals the refunded debt.
        let schedule = h.loans.schedule(loan_id).await.unwrap();
        let paid: i64 = schedule.iter().map(|i| i.paid_amount).sum();
        assert_eq!(paid - loan.total_repaid, refund.amount);

        // Refunding the same payment again is rejected
        let err = h
            .refunds
            .refund_payment(
                outcome.payment.id,
                h.operator_id,
                &format!("fr-{}", Uuid::new_v4().simple()),
            )
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_second_application_blocked_while_open() {
        let h = setup(Arc::new(SimulatedProvider::new())).await;
        h.loans
            .create_loan(h.borrower_id, loan_request(1_000_000))
            .await
            .unwrap();

        let err = h
            .loans
            .create_loan(h.borrower_id, loan_request(2_000_000))
            .await;
        assert!(err.is_err(), "single active loan rule must hold");
    }
}
