//! Loan route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::loans::*;
use crate::state::AppState;

pub fn loan_routes() -> Router<AppState> {
    Router::new()
        .route("/api/loans", post(create_loan).get(list_loans))
        .route("/api/loans/:id", get(get_loan))
        .route("/api/loans/:id/history", get(loan_history))
        .route("/api/loans/:id/schedule", get(loan_schedule))
        .route("/api/loans/:id/payments", get(loan_payments))
        .route("/api/loans/:id/disbursement", get(loan_disbursement))
        .route("/api/loans/:id/repay", post(repay))
}
