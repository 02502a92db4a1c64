//! Payment domain: repayment engine, FIFO allocation, manual-proof
//! verification, and refunds.

pub mod allocation;
pub mod engine;
pub mod model;
pub mod refund;

pub use engine::RepaymentEngine;
pub use model::{Payment, PaymentStatus, PaymentType};
pub use refund::RefundService;
