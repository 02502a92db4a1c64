//! Route definitions for the LendLedger API

mod admin;
mod auth;
mod credit;
mod loans;
mod notifications;
mod payments;

pub use admin::admin_routes;
pub use auth::auth_routes;
pub use credit::credit_routes;
pub use loans::loan_routes;
pub use notifications::notification_routes;
pub use payments::payment_routes;
