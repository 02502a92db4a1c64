//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::audit::AuditService;
use crate::auth::AuthService;
use crate::credit::CreditService;
use crate::idempotency::IdempotencyService;
use crate::loans::{DisbursementService, LoanService};
use crate::notifications::NotificationService;
use crate::payments::{RefundService, RepaymentEngine};
use crate::websocket::WsState;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub auth_service: Arc<AuthService>,
    pub loan_service: Arc<LoanService>,
    pub disbursement_service: Arc<DisbursementService>,
    pub repayment_engine: Arc<RepaymentEngine>,
    pub refund_service: Arc<RefundService>,
    pub notification_service: Arc<NotificationService>,
    pub credit_service: Arc<CreditService>,
    pub audit_service: Arc<AuditService>,
    pub idempotency: Arc<IdempotencyService>,
    pub ws_state: WsState,
}

impl FromRef<AppState> for WsState {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.ws_state.clone()
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_service.clone()
    }
}
