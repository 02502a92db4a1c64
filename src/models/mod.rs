//! Shared data models for the LendLedger backend

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// Account model (borrower or operator)
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: AccountRole,
    pub active: bool,
    /// Encrypted national identifier; opaque to the engine
    #[serde(skip_serializing)]
    pub national_id_enc: Option<String>,
    pub credit_score: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Account roles
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "account_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    Borrower,
    Operator,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Borrower => "borrower",
            AccountRole::Operator => "operator",
        }
    }
}

/// Public view of an account
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub email: String,
    pub role: AccountRole,
    pub active: bool,
    pub credit_score: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            email: account.email,
            role: account.role,
            active: account.active,
            credit_score: account.credit_score,
            created_at: account.created_at,
        }
    }
}

/// Field-level validation error detail
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Pagination metadata attached to list responses
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Meta {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Meta {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if limit > 0 {
            (total + limit - 1) / limit
        } else {
            0
        };
        Self {
            page,
            limit,
            total,
            total_pages,
        }
    }
}

/// API response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

impl<T> ApiResponse<T> {
    /// Successful response with payload
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            meta: None,
            errors: None,
        }
    }

    /// Successful paginated response
    pub fn paginated(message: impl Into<String>, data: T, meta: Meta) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            meta: Some(meta),
            errors: None,
        }
    }

    /// Failed response
    pub fn failure(message: impl Into<String>, errors: Option<Vec<FieldError>>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            meta: None,
            errors,
        }
    }
}

/// Pagination query parameters
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PaginationParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PaginationParams {
    /// Clamp to sane bounds; defaults to page 1, 20 per page
    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * limit;
        (page, limit, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_total_pages() {
        assert_eq!(Meta::new(1, 20, 0).total_pages, 0);
        assert_eq!(Meta::new(1, 20, 20).total_pages, 1);
        assert_eq!(Meta::new(1, 20, 21).total_pages, 2);
        assert_eq!(Meta::new(1, 20, 100).total_pages, 5);
    }

    #[test]
    fn test_pagination_normalize() {
        let params = PaginationParams {
            page: None,
            limit: None,
        };
        assert_eq!(params.normalize(), (1, 20, 0));

        let params = PaginationParams {
            page: Some(3),
            limit: Some(50),
        };
        assert_eq!(params.normalize(), (3, 50, 100));

        let params = PaginationParams {
            page: Some(0),
            limit: Some(1000),
        };
        assert_eq!(params.normalize(), (1, 100, 0));
    }

    #[test]
    fn test_envelope_shape() {
        let body = ApiResponse::ok("Loan created", serde_json::json!({"id": 1}));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "Loan created");
        assert!(json.get("errors").is_none());

        let body: ApiResponse<()> = ApiResponse::failure("Validation failed", None);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("data").is_none());
    }
}
