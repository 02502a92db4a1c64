//! Credit route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::credit::*;
use crate::state::AppState;

pub fn credit_routes() -> Router<AppState> {
    Router::new()
        .route("/api/credit/report", get(credit_report))
        .route("/api/credit/check", post(credit_check))
}
