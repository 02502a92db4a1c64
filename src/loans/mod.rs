//! Loan domain: models, monetary derivations, state machine, lifecycle
//! services, and the disbursement protocol.

pub mod disbursement;
pub mod math;
pub mod model;
pub mod service;
pub mod state_machine;

pub use disbursement::DisbursementService;
pub use model::{
    ApproveLoanRequest, CreateLoanRequest, Installment, InstallmentStatus, Loan, LoanStatus,
    RejectLoanRequest, StatusHistoryEntry,
};
pub use service::LoanService;
