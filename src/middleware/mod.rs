//! HTTP middleware and request extractors

pub mod auth;
pub mod security;
pub mod tracing;

pub use auth::{AuthenticatedUser, IdempotencyKey, OperatorUser};
pub use security::security_headers;
pub use tracing::request_tracing;
