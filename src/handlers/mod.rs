//! API handlers

pub mod admin;
pub mod auth;
pub mod credit;
pub mod loans;
pub mod notifications;
pub mod payments;
