//! Authentication service
//!
//! Registration, login, and session management for borrowers and operators.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::crypto::{hash_password, verify_password, CryptoError, FieldCipher};
use crate::models::{Account, AccountResponse, AccountRole};

use super::jwt::{generate_access_token, generate_refresh_token, JwtError};

/// Auth service errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Email already registered")]
    EmailTaken,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is deactivated")]
    AccountInactive,

    #[error("Invalid operator secret")]
    InvalidOperatorSecret,

    #[error("Account not found")]
    AccountNotFound,

    #[error("Session not found or revoked")]
    SessionNotFound,

    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => AuthError::EmailTaken,
            _ => AuthError::DatabaseError(e.to_string()),
        }
    }
}

impl From<CryptoError> for AuthError {
    fn from(e: CryptoError) -> Self {
        AuthError::EncryptionError(e.to_string())
    }
}

impl From<JwtError> for AuthError {
    fn from(e: JwtError) -> Self {
        AuthError::TokenError(e.to_string())
    }
}

/// Registration request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 8, message = "must be at least 8 characters"))]
    pub password: String,
    /// Optional national identifier, encrypted at rest
    pub national_id: Option<String>,
}

/// Login request
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Issued token pair
#[derive(Debug, Serialize)]
pub struct TokensResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub account: AccountResponse,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    db_pool: PgPool,
    jwt_secret: String,
    operator_secret: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_days: i64,
    cipher: FieldCipher,
}

impl AuthService {
    pub fn new(
        db_pool: PgPool,
        jwt_secret: String,
        operator_secret: String,
        access_token_ttl_seconds: i64,
        refresh_token_ttl_days: i64,
        cipher: FieldCipher,
    ) -> Self {
        Self {
            db_pool,
            jwt_secret,
            operator_secret,
            access_token_ttl_seconds,
            refresh_token_ttl_days,
            cipher,
        }
    }

    /// JWT signing secret, shared with the websocket handshake
    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }

    /// Register a borrower account
    pub async fn register(&self, req: RegisterRequest) -> Result<AccountResponse, AuthError> {
        self.insert_account(req, AccountRole::Borrower).await
    }

    /// Register an operator account, gated by the shared secret
    pub async fn register_operator(
        &self,
        provided_secret: &str,
        req: RegisterRequest,
    ) -> Result<AccountResponse, AuthError> {
        if provided_secret != self.operator_secret {
            return Err(AuthError::InvalidOperatorSecret);
        }
        self.insert_account(req, AccountRole::Operator).await
    }

    async fn insert_account(
        &self,
        req: RegisterRequest,
        role: AccountRole,
    ) -> Result<AccountResponse, AuthError> {
        let national_id_enc = match &req.national_id {
            Some(id) => Some(self.cipher.encrypt(id)?),
            None => None,
        };

        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (id, email, password_hash, role, active, national_id_enc)
            VALUES ($1, $2, $3, $4, TRUE, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(req.email.to_lowercase())
        .bind(hash_password(&req.password))
        .bind(role)
        .bind(national_id_enc)
        .fetch_one(&self.db_pool)
        .await?;

        tracing::info!(account_id = %account.id, role = %role.as_str(), "Account registered");

        Ok(account.into())
    }

    /// Verify credentials and issue a token pair
    pub async fn login(&self, req: LoginRequest) -> Result<TokensResponse, AuthError> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE email = $1")
            .bind(req.email.to_lowercase())
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(&req.password, &account.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }
        if !account.active {
            return Err(AuthError::AccountInactive);
        }

        let jti = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + Duration::days(self.refresh_token_ttl_days);

        sqlx::query(
            r#"
            INSERT INTO auth_sessions (jti, account_id, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&jti)
        .bind(account.id)
        .bind(expires_at)
        .execute(&self.db_pool)
        .await?;

        let access_token = generate_access_token(
            &account,
            &jti,
            &self.jwt_secret,
            self.access_token_ttl_seconds,
        )?;
        let refresh_token = generate_refresh_token(
            &account,
            &jti,
            &self.jwt_secret,
            self.refresh_token_ttl_days,
        )?;

        Ok(TokensResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_ttl_seconds,
            account: account.into(),
        })
    }

    /// Check that a session is still valid (not revoked, not expired)
    pub async fn verify_session(&self, jti: &str) -> Result<(), AuthError> {
        let row: Option<(bool,)> = sqlx::query_as(
            "SELECT revoked FROM auth_sessions WHERE jti = $1 AND expires_at > NOW()",
        )
        .bind(jti)
        .fetch_optional(&self.db_pool)
        .await?;

        match row {
            Some((false,)) => Ok(()),
            _ => Err(AuthError::SessionNotFound),
        }
    }

    /// Revoke a single session
    pub async fn revoke_session(&self, jti: &str) -> Result<(), AuthError> {
        sqlx::query("UPDATE auth_sessions SET revoked = TRUE WHERE jti = $1")
            .bind(jti)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    /// Fetch an account by ID
    pub async fn get_account(&self, id: Uuid) -> Result<Account, AuthError> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or(AuthError::AccountNotFound)
    }

    /// Decrypt the stored national identifier, if present
    pub async fn national_id(&self, account: &Account) -> Result<Option<String>, AuthError> {
        match &account.national_id_enc {
            Some(enc) => Ok(Some(self.cipher.decrypt(enc)?)),
            None => Ok(None),
        }
    }
}
