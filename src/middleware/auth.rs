//! Authentication extractors
//!
//! JWT verification and idempotency-key extraction for protected routes.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{verify_token, AuthService};
use crate::error::ApiError;
use crate::models::AccountRole;

/// Authenticated account extracted from a JWT bearer token
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub account_id: Uuid,
    pub email: String,
    pub role: AccountRole,
    pub jti: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    ApiError::Authentication(
                        "Authorization header with Bearer token required".to_string(),
                    )
                    .into_response()
                })?;

        let auth_service = Arc::<AuthService>::from_ref(state);

        let claims = verify_token(bearer.token(), auth_service.jwt_secret()).map_err(|e| {
            let message = if e.to_string().contains("expired") {
                "Token has expired"
            } else {
                "Invalid token"
            };
            ApiError::Authentication(message.to_string()).into_response()
        })?;

        if claims.token_type != "access" {
            return Err(
                ApiError::Authentication("Expected access token".to_string()).into_response(),
            );
        }

        let account_id = Uuid::parse_str(&claims.sub).map_err(|_| {
            ApiError::Authentication("Invalid account ID in token".to_string()).into_response()
        })?;

        let role = match claims.role.as_str() {
            "borrower" => AccountRole::Borrower,
            "operator" => AccountRole::Operator,
            _ => {
                return Err(
                    ApiError::Authentication("Invalid role in token".to_string()).into_response(),
                )
            }
        };

        // Reject revoked sessions
        auth_service.verify_session(&claims.jti).await.map_err(|_| {
            ApiError::Authentication("Session has been revoked".to_string()).into_response()
        })?;

        Ok(AuthenticatedUser {
            account_id,
            email: claims.email,
            role,
            jti: claims.jti,
        })
    }
}

/// Extractor that additionally requires the operator role
#[derive(Debug, Clone)]
pub struct OperatorUser(pub AuthenticatedUser);

#[async_trait]
impl<S> FromRequestParts<S> for OperatorUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;

        if !matches!(user.role, AccountRole::Operator) {
            return Err(
                ApiError::Authorization("Operator access required".to_string()).into_response(),
            );
        }

        Ok(OperatorUser(user))
    }
}

/// Extractor for the `Idempotency-Key` header, required on mutating routes
#[derive(Debug, Clone)]
pub struct IdempotencyKey(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get("Idempotency-Key")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ApiError::Validation("Idempotency-Key header is required".to_string())
                    .into_response()
            })?;

        if key.len() > 255 {
            return Err(ApiError::Validation(
                "Idempotency-Key must be at most 255 characters".to_string(),
            )
            .into_response());
        }

        Ok(IdempotencyKey(key.to_string()))
    }
}
