//! Authentication HTTP handlers

use axum::{extract::State, http::StatusCode, Json};
use validator::Validate;

use crate::auth::service::{LoginRequest, RegisterRequest, TokensResponse};
use crate::auth::AuthError;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthenticatedUser;
use crate::models::{AccountResponse, ApiResponse};
use crate::state::AppState;

/// Request body for operator registration; the shared secret travels in the
/// body rather than a header so the operation is self-describing.
#[derive(Debug, serde::Deserialize)]
pub struct RegisterOperatorRequest {
    pub operator_secret: String,
    #[serde(flatten)]
    pub account: RegisterRequest,
}

/// POST /api/auth/register - Register a borrower account
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<AccountResponse>>)> {
    req.validate()?;

    let account = state
        .auth_service
        .register(req)
        .await
        .map_err(map_auth_error)?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("Account registered", account)),
    ))
}

/// POST /api/auth/register-operator - Register an operator account
pub async fn register_operator(
    State(state): State<AppState>,
    Json(req): Json<RegisterOperatorRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<AccountResponse>>)> {
    req.account.validate()?;

    let account = state
        .auth_service
        .register_operator(&req.operator_secret, req.account)
        .await
        .map_err(map_auth_error)?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("Operator registered", account)),
    ))
}

/// POST /api/auth/login - Verify credentials and issue tokens
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<ApiResponse<TokensResponse>>> {
    let tokens = state
        .auth_service
        .login(req)
        .await
        .map_err(map_auth_error)?;

    Ok(Json(ApiResponse::ok("Login successful", tokens)))
}

/// POST /api/auth/logout - Revoke the current session
pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<ApiResponse<()>>> {
    state
        .auth_service
        .revoke_session(&user.jti)
        .await
        .map_err(map_auth_error)?;

    Ok(Json(ApiResponse::ok("Logged out", ())))
}

/// GET /api/auth/me - Current account
pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<ApiResponse<AccountResponse>>> {
    let account = state
        .auth_service
        .get_account(user.account_id)
        .await
        .map_err(map_auth_error)?;

    Ok(Json(ApiResponse::ok("Account", account.into())))
}

fn map_auth_error(err: AuthError) -> ApiError {
    match err {
        AuthError::EmailTaken => ApiError::Conflict(err.to_string()),
        AuthError::InvalidCredentials | AuthError::AccountInactive => {
            ApiError::Authentication(err.to_string())
        }
        AuthError::InvalidOperatorSecret => ApiError::Authorization(err.to_string()),
        AuthError::AccountNotFound => ApiError::NotFound(err.to_string()),
        AuthError::SessionNotFound => ApiError::Authentication(err.to_string()),
        _ => ApiError::Internal(err.to_string()),
    }
}
