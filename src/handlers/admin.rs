//! Operator handlers: loan transitions, proof verification, refunds

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiResult;
use crate::loans::model::{ApproveLoanRequest, DefaultLoanRequest, RejectLoanRequest};
use crate::middleware::{IdempotencyKey, OperatorUser};
use crate::models::ApiResponse;
use crate::payments::model::{RefundOverpaymentRequest, VerifyPaymentRequest};
use crate::state::AppState;

/// POST /api/admin/loans/:id/review - Take a pending application into review
pub async fn review_loan(
    State(state): State<AppState>,
    OperatorUser(operator): OperatorUser,
    Path(id): Path<Uuid>,
    IdempotencyKey(key): IdempotencyKey,
) -> ApiResult<Response> {
    let operator_id = operator.account_id;
    let loan_service = state.loan_service.clone();

    let (status, body) = state
        .idempotency
        .execute(
            &key,
            "/api/admin/loans/:id/review",
            "POST",
            Some(operator_id),
            || async move {
                let loan = loan_service.review_loan(id, operator_id).await?;
                let body = serde_json::to_value(ApiResponse::ok("Loan moved to review", loan))?;
                Ok((StatusCode::OK, body))
            },
        )
        .await?;

    Ok((status, Json(body)).into_response())
}

/// POST /api/admin/loans/:id/approve - Approve, optionally at a reduced amount
pub async fn approve_loan(
    State(state): State<AppState>,
    OperatorUser(operator): OperatorUser,
    Path(id): Path<Uuid>,
    IdempotencyKey(key): IdempotencyKey,
    Json(req): Json<ApproveLoanRequest>,
) -> ApiResult<Response> {
    req.validate()?;

    let operator_id = operator.account_id;
    let loan_service = state.loan_service.clone();

    let (status, body) = state
        .idempotency
        .execute(
            &key,
            "/api/admin/loans/:id/approve",
            "POST",
            Some(operator_id),
            || async move {
                let loan = loan_service.approve_loan(id, operator_id, req).await?;
                let body = serde_json::to_value(ApiResponse::ok("Loan approved", loan))?;
                Ok((StatusCode::OK, body))
            },
        )
        .await?;

    Ok((status, Json(body)).into_response())
}

/// POST /api/admin/loans/:id/reject - Reject with a reason
pub async fn reject_loan(
    State(state): State<AppState>,
    OperatorUser(operator): OperatorUser,
    Path(id): Path<Uuid>,
    IdempotencyKey(key): IdempotencyKey,
    Json(req): Json<RejectLoanRequest>,
) -> ApiResult<Response> {
    req.validate()?;

    let operator_id = operator.account_id;
    let loan_service = state.loan_service.clone();

    let (status, body) = state
        .idempotency
        .execute(
            &key,
            "/api/admin/loans/:id/reject",
            "POST",
            Some(operator_id),
            || async move {
                let loan = loan_service.reject_loan(id, operator_id, req.reason).await?;
                let body = serde_json::to_value(ApiResponse::ok("Loan rejected", loan))?;
                Ok((StatusCode::OK, body))
            },
        )
        .await?;

    Ok((status, Json(body)).into_response())
}

/// POST /api/admin/loans/:id/disburse - Run the disbursement protocol
pub async fn disburse_loan(
    State(state): State<AppState>,
    OperatorUser(operator): OperatorUser,
    Path(id): Path<Uuid>,
    IdempotencyKey(key): IdempotencyKey,
) -> ApiResult<Response> {
    let operator_id = operator.account_id;
    let disbursement = state.disbursement_service.clone();

    let (status, body) = state
        .idempotency
        .execute(
            &key,
            "/api/admin/loans/:id/disburse",
            "POST",
            Some(operator_id),
            || async move {
                let loan = disbursement.disburse(id, operator_id).await?;
                let body = serde_json::to_value(ApiResponse::ok("Loan disbursed", loan))?;
                Ok((StatusCode::OK, body))
            },
        )
        .await?;

    Ok((status, Json(body)).into_response())
}

/// POST /api/admin/loans/:id/default - Mark an active loan defaulted
pub async fn default_loan(
    State(state): State<AppState>,
    OperatorUser(operator): OperatorUser,
    Path(id): Path<Uuid>,
    IdempotencyKey(key): IdempotencyKey,
    Json(req): Json<DefaultLoanRequest>,
) -> ApiResult<Response> {
    req.validate()?;

    let operator_id = operator.account_id;
    let loan_service = state.loan_service.clone();

    let (status, body) = state
        .idempotency
        .execute(
            &key,
            "/api/admin/loans/:id/default",
            "POST",
            Some(operator_id),
            || async move {
                let loan = loan_service.default_loan(id, operator_id, req.reason).await?;
                let body = serde_json::to_value(ApiResponse::ok("Loan marked defaulted", loan))?;
                Ok((StatusCode::OK, body))
            },
        )
        .await?;

    Ok((status, Json(body)).into_response())
}

/// POST /api/admin/payments/:id/verify - Approve or reject a manual proof
pub async fn verify_payment(
    State(state): State<AppState>,
    OperatorUser(operator): OperatorUser,
    Path(id): Path<Uuid>,
    IdempotencyKey(key): IdempotencyKey,
    Json(req): Json<VerifyPaymentRequest>,
) -> ApiResult<Response> {
    let operator_id = operator.account_id;
    let engine = state.repayment_engine.clone();

    let (status, body) = state
        .idempotency
        .execute(
            &key,
            "/api/admin/payments/:id/verify",
            "POST",
            Some(operator_id),
            || async move {
                let outcome = engine
                    .verify(id, operator_id, req.approve, req.reason)
                    .await?;
                let message = if req.approve {
                    "Payment verified and settled"
                } else {
                    "Payment proof rejected"
                };
                let body = serde_json::to_value(ApiResponse::ok(message, outcome))?;
                Ok((StatusCode::OK, body))
            },
        )
        .await?;

    Ok((status, Json(body)).into_response())
}

/// POST /api/admin/payments/:id/refund - Full refund of a successful repayment
pub async fn refund_payment(
    State(state): State<AppState>,
    OperatorUser(operator): OperatorUser,
    Path(id): Path<Uuid>,
    IdempotencyKey(key): IdempotencyKey,
) -> ApiResult<Response> {
    let operator_id = operator.account_id;
    let refunds = state.refund_service.clone();
    let domain_key = key.clone();

    let (status, body) = state
        .idempotency
        .execute(
            &key,
            "/api/admin/payments/:id/refund",
            "POST",
            Some(operator_id),
            || async move {
                let refund = refunds
                    .refund_payment(id, operator_id, &domain_key)
                    .await?;
                let body = serde_json::to_value(ApiResponse::ok("Payment refunded", refund))?;
                Ok((StatusCode::OK, body))
            },
        )
        .await?;

    Ok((status, Json(body)).into_response())
}

/// POST /api/admin/payments/:id/refund-overpayment - Refund recorded excess
pub async fn refund_overpayment(
    State(state): State<AppState>,
    OperatorUser(operator): OperatorUser,
    Path(id): Path<Uuid>,
    IdempotencyKey(key): IdempotencyKey,
    Json(req): Json<RefundOverpaymentRequest>,
) -> ApiResult<Response> {
    req.validate()?;

    let operator_id = operator.account_id;
    let refunds = state.refund_service.clone();
    let domain_key = key.clone();

    let (status, body) = state
        .idempotency
        .execute(
            &key,
            "/api/admin/payments/:id/refund-overpayment",
            "POST",
            Some(operator_id),
            || async move {
                let refund = refunds
                    .refund_overpayment(id, operator_id, req.amount, &domain_key)
                    .await?;
                let body = serde_json::to_value(ApiResponse::ok("Overpayment refunded", refund))?;
                Ok((StatusCode::OK, body))
            },
        )
        .await?;

    Ok((status, Json(body)).into_response())
}
