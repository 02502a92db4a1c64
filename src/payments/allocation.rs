//! FIFO installment allocation
//!
//! Pure planning step of the repayment engine: given a snapshot of open
//! installments ordered by installment number, decide how a payment amount is
//! applied. Persistence happens elsewhere, conditioned on the snapshot still
//! being current.

use uuid::Uuid;

/// Snapshot of one open installment at planning time
#[derive(Debug, Clone, Copy)]
pub struct InstallmentSnapshot {
    pub id: Uuid,
    pub number: i32,
    pub total_due: i64,
    pub paid_amount: i64,
}

impl InstallmentSnapshot {
    fn remaining(&self) -> i64 {
        self.total_due - self.paid_amount
    }
}

/// One planned application against an installment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedApplication {
    pub installment_id: Uuid,
    pub number: i32,
    /// paid_amount observed at planning time; the write is conditional on it
    pub previous_paid: i64,
    pub amount: i64,
    pub new_paid: i64,
    pub fully_paid: bool,
}

/// Complete allocation plan for one payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPlan {
    pub applications: Vec<PlannedApplication>,
    /// Portion applied to the schedule
    pub applied: i64,
    /// Portion exceeding all open installments
    pub overpayment: i64,
}

/// Walk open installments in ascending number order, applying
/// `min(remaining, installment remainder)` to each. Whatever survives the
/// last installment is the overpayment.
pub fn plan_allocation(open: &[InstallmentSnapshot], amount: i64) -> AllocationPlan {
    debug_assert!(amount > 0, "allocation requires a positive amount");
    debug_assert!(
        open.windows(2).all(|w| w[0].number < w[1].number),
        "installments must be ordered by number"
    );

    let mut remaining = amount;
    let mut applications = Vec::new();

    for installment in open {
        if remaining == 0 {
            break;
        }
        let due = installment.remaining();
        if due <= 0 {
            continue;
        }

        let applied = remaining.min(due);
        let new_paid = installment.paid_amount + applied;

        applications.push(PlannedApplication {
            installment_id: installment.id,
            number: installment.number,
            previous_paid: installment.paid_amount,
            amount: applied,
            new_paid,
            fully_paid: new_paid == installment.total_due,
        });

        remaining -= applied;
    }

    AllocationPlan {
        applied: amount - remaining,
        overpayment: remaining,
        applications,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(number: i32, total_due: i64, paid: i64) -> InstallmentSnapshot {
        InstallmentSnapshot {
            id: Uuid::new_v4(),
            number,
            total_due,
            paid_amount: paid,
        }
    }

    #[test]
    fn test_exact_single_installment() {
        let open = [snapshot(1, 1_125_000, 0)];
        let plan = plan_allocation(&open, 1_125_000);

        assert_eq!(plan.applied, 1_125_000);
        assert_eq!(plan.overpayment, 0);
        assert_eq!(plan.applications.len(), 1);
        assert!(plan.applications[0].fully_paid);
    }

    #[test]
    fn test_partial_payment() {
        let open = [snapshot(1, 1_125_000, 0)];
        let plan = plan_allocation(&open, 500_000);

        assert_eq!(plan.applied, 500_000);
        assert_eq!(plan.overpayment, 0);
        assert_eq!(plan.applications[0].new_paid, 500_000);
        assert!(!plan.applications[0].fully_paid);
    }

    #[test]
    fn test_fifo_order_spans_installments() {
        let open = [
            snapshot(1, 1_000, 400),
            snapshot(2, 1_000, 0),
            snapshot(3, 1_000, 0),
        ];
        let plan = plan_allocation(&open, 1_700);

        assert_eq!(plan.applied, 1_700);
        assert_eq!(plan.overpayment, 0);
        assert_eq!(plan.applications.len(), 3);

        // 600 tops up #1, 1000 clears #2, 100 lands on #3
        assert_eq!(plan.applications[0].amount, 600);
        assert!(plan.applications[0].fully_paid);
        assert_eq!(plan.applications[1].amount, 1_000);
        assert!(plan.applications[1].fully_paid);
        assert_eq!(plan.applications[2].amount, 100);
        assert!(!plan.applications[2].fully_paid);
    }

    #[test]
    fn test_overpayment_past_last_installment() {
        let open = [snapshot(10, 5_000, 0)];
        let plan = plan_allocation(&open, 6_000);

        assert_eq!(plan.applied, 5_000);
        assert_eq!(plan.overpayment, 1_000);
        assert!(plan.applications[0].fully_paid);
    }

    #[test]
    fn test_no_open_installments_is_all_overpayment() {
        let plan = plan_allocation(&[], 2_500);
        assert_eq!(plan.applied, 0);
        assert_eq!(plan.overpayment, 2_500);
        assert!(plan.applications.is_empty());
    }

    #[test]
    fn test_already_covered_installments_are_skipped() {
        let open = [snapshot(1, 1_000, 1_000), snapshot(2, 1_000, 0)];
        let plan = plan_allocation(&open, 500);

        assert_eq!(plan.applications.len(), 1);
        assert_eq!(plan.applications[0].number, 2);
        assert_eq!(plan.applied, 500);
    }

    #[test]
    fn test_plan_records_previous_paid_for_conditional_writes() {
        let open = [snapshot(1, 1_000, 250)];
        let plan = plan_allocation(&open, 100);

        assert_eq!(plan.applications[0].previous_paid, 250);
        assert_eq!(plan.applications[0].new_paid, 350);
    }

    #[test]
    fn test_deterministic_given_same_snapshot() {
        let open = [snapshot(1, 1_000, 100), snapshot(2, 2_000, 0)];
        let a = plan_allocation(&open, 1_500);
        let b = plan_allocation(&open, 1_500);
        assert_eq!(a, b);
    }
}
