//! Borrower-facing loan handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::loans::model::{CreateLoanRequest, DisbursementView, ListLoansQuery};
use crate::middleware::{AuthenticatedUser, IdempotencyKey};
use crate::models::{ApiResponse, Meta, PaginationParams};
use crate::payments::model::RepayRequest;
use crate::state::AppState;

/// POST /api/loans - Submit a loan application (idempotent)
pub async fn create_loan(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    IdempotencyKey(key): IdempotencyKey,
    Json(req): Json<CreateLoanRequest>,
) -> ApiResult<Response> {
    req.validate()?;

    if user.role != crate::models::AccountRole::Borrower {
        return Err(ApiError::Authorization(
            "Only borrowers can submit loan applications".to_string(),
        ));
    }

    let account_id = user.account_id;
    let loan_service = state.loan_service.clone();

    let (status, body) = state
        .idempotency
        .execute(&key, "/api/loans", "POST", Some(account_id), || async move {
            let loan = loan_service.create_loan(account_id, req).await?;
            let body = serde_json::to_value(ApiResponse::ok("Loan application submitted", loan))?;
            Ok((StatusCode::CREATED, body))
        })
        .await?;

    Ok((status, Json(body)).into_response())
}

/// GET /api/loans - List the caller's loans
pub async fn list_loans(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListLoansQuery>,
) -> ApiResult<Json<ApiResponse<Vec<crate::loans::Loan>>>> {
    let pagination = PaginationParams {
        page: query.page,
        limit: query.limit,
    };
    let (page, limit, _) = pagination.normalize();

    let (loans, total) = state
        .loan_service
        .list_for_borrower(user.account_id, query.status, pagination)
        .await?;

    Ok(Json(ApiResponse::paginated(
        "Loans",
        loans,
        Meta::new(page, limit, total),
    )))
}

/// GET /api/loans/:id - One loan, borrower-scoped
pub async fn get_loan(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<crate::loans::Loan>>> {
    let loan = state
        .loan_service
        .fetch_for_borrower(id, user.account_id)
        .await?;

    Ok(Json(ApiResponse::ok("Loan", loan)))
}

/// GET /api/loans/:id/history - Status history
pub async fn loan_history(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Vec<crate::loans::StatusHistoryEntry>>>> {
    state
        .loan_service
        .fetch_for_borrower(id, user.account_id)
        .await?;
    let history = state.loan_service.history(id).await?;

    Ok(Json(ApiResponse::ok("Status history", history)))
}

/// GET /api/loans/:id/schedule - Repayment schedule
pub async fn loan_schedule(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Vec<crate::loans::Installment>>>> {
    state
        .loan_service
        .fetch_for_borrower(id, user.account_id)
        .await?;
    let schedule = state.loan_service.schedule(id).await?;

    Ok(Json(ApiResponse::ok("Repayment schedule", schedule)))
}

/// GET /api/loans/:id/payments - Payments against the loan
pub async fn loan_payments(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Vec<crate::payments::Payment>>>> {
    state
        .loan_service
        .fetch_for_borrower(id, user.account_id)
        .await?;
    let payments = state.loan_service.payments_for_loan(id).await?;

    Ok(Json(ApiResponse::ok("Payments", payments)))
}

/// GET /api/loans/:id/disbursement - Disbursement details
pub async fn loan_disbursement(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<DisbursementView>>> {
    let loan = state
        .loan_service
        .fetch_for_borrower(id, user.account_id)
        .await?;

    let view = DisbursementView::from_loan(&loan)
        .ok_or_else(|| ApiError::NotFound("Loan has not been disbursed".to_string()))?;

    Ok(Json(ApiResponse::ok("Disbursement", view)))
}

/// POST /api/loans/:id/repay - Direct repayment (idempotent)
pub async fn repay(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    IdempotencyKey(key): IdempotencyKey,
    Json(req): Json<RepayRequest>,
) -> ApiResult<Response> {
    req.validate()?;

    let account_id = user.account_id;
    let engine = state.repayment_engine.clone();
    let domain_key = key.clone();

    let (status, body) = state
        .idempotency
        .execute(
            &key,
            "/api/loans/:id/repay",
            "POST",
            Some(account_id),
            || async move {
                let outcome = engine
                    .process_repayment(id, account_id, req.amount, &domain_key)
                    .await?;
                let body = serde_json::to_value(ApiResponse::ok("Repayment processed", outcome))?;
                Ok((StatusCode::OK, body))
            },
        )
        .await?;

    Ok((status, Json(body)).into_response())
}
