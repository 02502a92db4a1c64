//! LendLedger backend library
//!
//! Loan lifecycle and repayment engine: application intake, operator review,
//! provider-coupled disbursement with compensation, FIFO repayment
//! allocation under versioned compare-and-set, manual-proof verification,
//! refunds, and durable notifications with live delivery.

pub mod audit;
pub mod auth;
pub mod config;
pub mod credit;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod idempotency;
pub mod loans;
pub mod middleware;
pub mod models;
pub mod notifications;
pub mod payments;
pub mod provider;
pub mod routes;
pub mod state;
pub mod websocket;
