//! Engine invariants checked without a database: monetary derivations,
//! schedule splitting, and FIFO allocation composed end to end.

use uuid::Uuid;

use lendledger_server::loans::math::{derive_figures, round_div, split_schedule};
use lendledger_server::payments::allocation::{plan_allocation, InstallmentSnapshot};

/// In-memory mirror of a loan's schedule for invariant checks
struct ScheduleState {
    installments: Vec<InstallmentSnapshot>,
    total_repaid: i64,
    total_repayable: i64,
}

impl ScheduleState {
    fn new(principal: i64, rate_bps: i32, tenor: i32) -> Self {
        let figures = derive_figures(principal, rate_bps, tenor);
        let installments = split_schedule(figures.principal, figures.total_interest, tenor)
            .into_iter()
            .map(|line| InstallmentSnapshot {
                id: Uuid::new_v4(),
                number: line.number,
                total_due: line.total_due,
                paid_amount: 0,
            })
            .collect();

        Self {
            installments,
            total_repaid: 0,
            total_repayable: figures.total_repayable,
        }
    }

    /// Apply one repayment the way the engine does, returning the overpayment
    fn repay(&mut self, amount: i64) -> i64 {
        let open: Vec<InstallmentSnapshot> = self
            .installments
            .iter()
            .filter(|i| i.paid_amount < i.total_due)
            .copied()
            .collect();

        let plan = plan_allocation(&open, amount);
        for app in &plan.applications {
            let installment = self
                .installments
                .iter_mut()
                .find(|i| i.id == app.installment_id)
                .expect("plan references a known installment");
            assert_eq!(installment.paid_amount, app.previous_paid);
            installment.paid_amount = app.new_paid;
        }

        self.total_repaid += plan.applied;
        plan.overpayment
    }

    fn outstanding(&self) -> i64 {
        self.total_repayable - self.total_repaid
    }

    fn paid_sum(&self) -> i64 {
        self.installments.iter().map(|i| i.paid_amount).sum()
    }
}

#[test]
fn test_happy_path_ten_equal_repayments() {
    // 100_000.00 at 15% over 10 months -> 12_500.00 interest,
    // 112_500.00 repayable, 11_250.00 monthly
    let figures = derive_figures(10_000_000, 1500, 10);
    assert_eq!(figures.total_interest, 1_250_000);
    assert_eq!(figures.total_repayable, 11_250_000);
    assert_eq!(figures.monthly_payment, 1_125_000);

    let mut state = ScheduleState::new(10_000_000, 1500, 10);
    for month in 1..=10 {
        let overpayment = state.repay(figures.monthly_payment);
        assert_eq!(overpayment, 0, "month {} should not overpay", month);
        // Paid amounts and the running balance stay reconciled
        assert_eq!(state.paid_sum(), state.total_repaid);
    }

    assert_eq!(state.outstanding(), 0);
    assert!(state
        .installments
        .iter()
        .all(|i| i.paid_amount == i.total_due));
}

#[test]
fn test_reduced_approval_rederives_figures() {
    // Requested 100_000.00, approved at 60_000.00
    let figures = derive_figures(6_000_000, 1500, 10);
    assert_eq!(figures.total_interest, 750_000);
    assert_eq!(figures.total_repayable, 6_750_000);
    assert_eq!(figures.monthly_payment, 675_000);

    let state = ScheduleState::new(6_000_000, 1500, 10);
    assert_eq!(state.outstanding(), 6_750_000);
}

#[test]
fn test_overpayment_closes_loan_and_records_excess() {
    let mut state = ScheduleState::new(10_000_000, 1500, 10);

    // Clear nine installments, leaving 11_250.00 outstanding, then pay
    // 12_250.00: the loan closes and 1_000.00 is excess.
    for _ in 1..=9 {
        state.repay(1_125_000);
    }
    assert_eq!(state.outstanding(), 1_125_000);

    let overpayment = state.repay(1_225_000);
    assert_eq!(overpayment, 100_000);
    assert_eq!(state.outstanding(), 0);
    assert_eq!(state.paid_sum(), state.total_repayable);
}

#[test]
fn test_irregular_amounts_never_break_reconciliation() {
    let mut state = ScheduleState::new(7_777_777, 1234, 7);
    let payments = [123_456, 1_000_000, 55, 2_500_000, 999_999];

    for amount in payments {
        state.repay(amount);
        assert_eq!(state.paid_sum(), state.total_repaid);
        assert!(state.outstanding() >= 0);
        for installment in &state.installments {
            assert!(installment.paid_amount >= 0);
            assert!(installment.paid_amount <= installment.total_due);
        }
    }
}

#[test]
fn test_last_installment_rounding_stays_tight() {
    for principal in [10_000_000i64, 9_999_999, 1_234_567, 100] {
        for tenor in [1, 3, 7, 12, 60] {
            let figures = derive_figures(principal, 1500, tenor);
            let lines = split_schedule(figures.principal, figures.total_interest, tenor);

            let total_due_sum: i64 = lines.iter().map(|l| l.total_due).sum();
            assert_eq!(total_due_sum, figures.total_repayable);

            // The even shares differ from the last line only by the rounding
            // residue accumulated over tenor-1 lines
            let even = round_div(principal as i128, tenor as i128);
            let last = lines.last().unwrap();
            assert!((last.principal_share - even).abs() < tenor as i64);
        }
    }
}

#[test]
fn test_full_allocation_is_order_insensitive_in_total() {
    // Same total repaid through different payment cadences lands on the same
    // schedule state.
    let mut monthly = ScheduleState::new(5_000_000, 1000, 5);
    for _ in 0..5 {
        monthly.repay(monthly.total_repayable / 5);
    }

    let mut lump = ScheduleState::new(5_000_000, 1000, 5);
    lump.repay(lump.total_repayable);

    assert_eq!(monthly.total_repaid, lump.total_repaid);
    assert_eq!(monthly.outstanding(), 0);
    assert_eq!(lump.outstanding(), 0);
    for (a, b) in monthly.installments.iter().zip(lump.installments.iter()) {
        assert_eq!(a.paid_amount, b.paid_amount);
    }
}
