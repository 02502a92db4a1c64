//! Borrower-facing payment handlers: manual proofs and payment listing

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{AuthenticatedUser, IdempotencyKey};
use crate::models::{ApiResponse, Meta, PaginationParams};
use crate::payments::model::ManualRepaymentRequest;
use crate::state::AppState;

/// POST /api/payments/manual - Submit proof of an out-of-band transfer
pub async fn submit_manual(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    IdempotencyKey(key): IdempotencyKey,
    Json(req): Json<ManualRepaymentRequest>,
) -> ApiResult<Response> {
    req.validate()?;
    submit_proof(state, user, key, req, "/api/payments/manual").await
}

/// POST /api/payments/manual-with-receipt - Same flow, with evidence attached.
/// Image storage is external; only the URL travels through the engine.
pub async fn submit_manual_with_receipt(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    IdempotencyKey(key): IdempotencyKey,
    Json(req): Json<ManualRepaymentRequest>,
) -> ApiResult<Response> {
    req.validate()?;
    if req.evidence_url.is_none() {
        return Err(ApiError::Validation(
            "evidence_url is required for a receipt submission".to_string(),
        ));
    }
    submit_proof(state, user, key, req, "/api/payments/manual-with-receipt").await
}

async fn submit_proof(
    state: AppState,
    user: AuthenticatedUser,
    key: String,
    req: ManualRepaymentRequest,
    endpoint: &str,
) -> ApiResult<Response> {
    let account_id = user.account_id;
    let engine = state.repayment_engine.clone();
    let domain_key = key.clone();

    let (status, body) = state
        .idempotency
        .execute(
            &key,
            endpoint,
            "POST",
            Some(account_id),
            || async move {
                let payment = engine.submit_manual(account_id, req, &domain_key).await?;
                let body = serde_json::to_value(ApiResponse::ok(
                    "Payment proof submitted for verification",
                    payment,
                ))?;
                Ok((StatusCode::CREATED, body))
            },
        )
        .await?;

    Ok((status, Json(body)).into_response())
}

/// GET /api/payments - The caller's payment history
pub async fn list_payments(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<Json<ApiResponse<Vec<crate::payments::Payment>>>> {
    let (page, limit, _) = pagination.normalize();

    let (payments, total) = state
        .repayment_engine
        .list_for_account(user.account_id, pagination)
        .await?;

    Ok(Json(ApiResponse::paginated(
        "Payments",
        payments,
        Meta::new(page, limit, total),
    )))
}
