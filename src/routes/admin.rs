//! Operator route definitions

use axum::{routing::post, Router};

use crate::handlers::admin::*;
use crate::state::AppState;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/loans/:id/review", post(review_loan))
        .route("/api/admin/loans/:id/approve", post(approve_loan))
        .route("/api/admin/loans/:id/reject", post(reject_loan))
        .route("/api/admin/loans/:id/disburse", post(disburse_loan))
        .route("/api/admin/loans/:id/default", post(default_loan))
        .route("/api/admin/payments/:id/verify", post(verify_payment))
        .route("/api/admin/payments/:id/refund", post(refund_payment))
        .route(
            "/api/admin/payments/:id/refund-overpayment",
            post(refund_overpayment),
        )
}
