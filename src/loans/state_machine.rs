//! Loan state machine
//!
//! Legal transitions:
//!
//! ```text
//! pending      -> under_review
//! under_review -> approved | rejected
//! approved     -> disbursed
//! disbursed    -> active
//! active       -> completed | defaulted
//! rejected, completed, defaulted : terminal
//! ```

use crate::error::ApiError;

use super::model::LoanStatus;

/// Statuses that count against the single-active-loan rule. `disbursed` is
/// transient (it collapses to `active` when the provider settles) but still
/// blocks a second application.
pub const OPEN_STATUSES: [LoanStatus; 5] = [
    LoanStatus::Pending,
    LoanStatus::UnderReview,
    LoanStatus::Approved,
    LoanStatus::Disbursed,
    LoanStatus::Active,
];

/// Whether `from -> to` is a legal edge
pub fn can_transition(from: LoanStatus, to: LoanStatus) -> bool {
    use LoanStatus::*;
    matches!(
        (from, to),
        (Pending, UnderReview)
            | (UnderReview, Approved)
            | (UnderReview, Rejected)
            | (Approved, Disbursed)
            | (Disbursed, Active)
            | (Active, Completed)
            | (Active, Defaulted)
    )
}

/// Whether a status admits no further transitions
pub fn is_terminal(status: LoanStatus) -> bool {
    matches!(
        status,
        LoanStatus::Rejected | LoanStatus::Completed | LoanStatus::Defaulted
    )
}

/// Validate a transition, producing the engine's `InvalidTransition` error
pub fn ensure_transition(from: LoanStatus, to: LoanStatus) -> Result<(), ApiError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(ApiError::InvalidTransition(format!(
            "cannot move loan from {} to {}",
            from, to
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LoanStatus::*;

    const ALL: [LoanStatus; 8] = [
        Pending,
        UnderReview,
        Approved,
        Rejected,
        Disbursed,
        Active,
        Completed,
        Defaulted,
    ];

    #[test]
    fn test_legal_edges() {
        assert!(can_transition(Pending, UnderReview));
        assert!(can_transition(UnderReview, Approved));
        assert!(can_transition(UnderReview, Rejected));
        assert!(can_transition(Approved, Disbursed));
        assert!(can_transition(Disbursed, Active));
        assert!(can_transition(Active, Completed));
        assert!(can_transition(Active, Defaulted));
    }

    #[test]
    fn test_exactly_seven_edges_exist() {
        let mut legal = 0;
        for from in ALL {
            for to in ALL {
                if can_transition(from, to) {
                    legal += 1;
                }
            }
        }
        assert_eq!(legal, 7);
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for terminal in [Rejected, Completed, Defaulted] {
            assert!(is_terminal(terminal));
            for to in ALL {
                assert!(!can_transition(terminal, to));
            }
        }
    }

    #[test]
    fn test_no_shortcuts() {
        assert!(!can_transition(Pending, Approved));
        assert!(!can_transition(Pending, Active));
        assert!(!can_transition(Approved, Active));
        assert!(!can_transition(UnderReview, Disbursed));
        assert!(!can_transition(Disbursed, Completed));
    }

    #[test]
    fn test_no_self_loops_or_reversals() {
        for status in ALL {
            assert!(!can_transition(status, status));
        }
        assert!(!can_transition(UnderReview, Pending));
        assert!(!can_transition(Approved, UnderReview));
        assert!(!can_transition(Active, Approved));
    }

    #[test]
    fn test_open_statuses_block_a_second_loan() {
        for status in OPEN_STATUSES {
            assert!(!is_terminal(status));
        }
        for terminal in [Rejected, Completed, Defaulted] {
            assert!(!OPEN_STATUSES.contains(&terminal));
        }
    }

    #[test]
    fn test_ensure_transition_error_kind() {
        let err = ensure_transition(Rejected, Active).unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition(_)));
        assert!(ensure_transition(Pending, UnderReview).is_ok());
    }
}
