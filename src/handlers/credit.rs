//! Advisory credit handlers

use axum::{extract::State, Json};

use crate::credit::CreditReport;
use crate::error::ApiResult;
use crate::middleware::AuthenticatedUser;
use crate::models::ApiResponse;
use crate::state::AppState;

/// GET /api/credit/report - Current advisory report
pub async fn credit_report(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<ApiResponse<CreditReport>>> {
    let report = state.credit_service.report(user.account_id).await?;
    Ok(Json(ApiResponse::ok("Credit report", report)))
}

/// POST /api/credit/check - Run a fresh advisory check
pub async fn credit_check(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<ApiResponse<CreditReport>>> {
    let report = state.credit_service.check(user.account_id).await?;
    Ok(Json(ApiResponse::ok("Credit check completed", report)))
}
