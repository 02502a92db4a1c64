//! Payment route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::payments::*;
use crate::state::AppState;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/payments", get(list_payments))
        .route("/api/payments/manual", post(submit_manual))
        .route(
            "/api/payments/manual-with-receipt",
            post(submit_manual_with_receipt),
        )
}
