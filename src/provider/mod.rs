//! Payment provider boundary
//!
//! Out-of-process transfer and debit primitives. Disbursement and refunds
//! push money out through `transfer`; direct repayments pull money in through
//! `debit`. References are idempotent at the provider boundary by convention,
//! so a retried call with the same reference settles at most once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Provider call errors. All variants surface as `ProviderFailure` and are
/// never retried silently.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider declined: {0}")]
    Declined(String),

    #[error("Provider call timed out")]
    Timeout,

    #[error("Provider transport error: {0}")]
    Transport(String),
}

/// Outbound transfer to a bank destination
#[derive(Debug, Clone, Serialize)]
pub struct TransferRequest {
    pub amount: i64,
    pub bank_account: String,
    pub bank_code: String,
    pub narration: String,
    pub reference: String,
}

/// Debit of a borrower's funding source
#[derive(Debug, Clone, Serialize)]
pub struct DebitRequest {
    pub amount: i64,
    pub account_id: Uuid,
    pub narration: String,
    pub reference: String,
}

/// Successful provider settlement
#[derive(Debug, Clone)]
pub struct ProviderReceipt {
    pub provider_reference: String,
}

/// The provider contract the engine depends on
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn transfer(&self, req: TransferRequest) -> Result<ProviderReceipt, ProviderError>;
    async fn debit(&self, req: DebitRequest) -> Result<ProviderReceipt, ProviderError>;
}

/// Wire response shared by the provider's endpoints
#[derive(Debug, Deserialize)]
struct ProviderResponse {
    status: String,
    provider_reference: Option<String>,
    message: Option<String>,
}

/// HTTP-backed provider client with a bounded call timeout
pub struct HttpPaymentProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPaymentProvider {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    async fn post<T: Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<ProviderReceipt, ProviderError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Transport(e.to_string())
                }
            })?;

        let parsed: ProviderResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if parsed.status == "success" {
            Ok(ProviderReceipt {
                provider_reference: parsed
                    .provider_reference
                    .ok_or_else(|| ProviderError::Transport("missing provider_reference".into()))?,
            })
        } else {
            Err(ProviderError::Declined(
                parsed.message.unwrap_or_else(|| parsed.status.clone()),
            ))
        }
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn transfer(&self, req: TransferRequest) -> Result<ProviderReceipt, ProviderError> {
        tracing::info!(reference = %req.reference, amount = req.amount, "Provider transfer");
        self.post("/transfers", &req).await
    }

    async fn debit(&self, req: DebitRequest) -> Result<ProviderReceipt, ProviderError> {
        tracing::info!(reference = %req.reference, amount = req.amount, "Provider debit");
        self.post("/debits", &req).await
    }
}

/// Simulated provider outcome
#[derive(Debug, Clone)]
pub enum SimulatedOutcome {
    Succeed,
    Decline(String),
}

/// In-process provider used when no PROVIDER_URL is configured, and by tests
/// that exercise the compensation branches.
pub struct SimulatedProvider {
    outcome: SimulatedOutcome,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self {
            outcome: SimulatedOutcome::Succeed,
        }
    }

    pub fn with_outcome(outcome: SimulatedOutcome) -> Self {
        Self { outcome }
    }

    fn settle(&self, reference: &str) -> Result<ProviderReceipt, ProviderError> {
        match &self.outcome {
            SimulatedOutcome::Succeed => Ok(ProviderReceipt {
                provider_reference: format!("sim_{}", reference),
            }),
            SimulatedOutcome::Decline(reason) => Err(ProviderError::Declined(reason.clone())),
        }
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentProvider for SimulatedProvider {
    async fn transfer(&self, req: TransferRequest) -> Result<ProviderReceipt, ProviderError> {
        tracing::debug!(reference = %req.reference, "Simulated transfer");
        self.settle(&req.reference)
    }

    async fn debit(&self, req: DebitRequest) -> Result<ProviderReceipt, ProviderError> {
        tracing::debug!(reference = %req.reference, "Simulated debit");
        self.settle(&req.reference)
    }
}

/// Generate an opaque transaction reference with the given prefix
pub fn new_reference(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_provider_succeeds() {
        let provider = SimulatedProvider::new();
        let receipt = provider
            .transfer(TransferRequest {
                amount: 1000,
                bank_account: "0123456789".to_string(),
                bank_code: "044".to_string(),
                narration: "disbursement".to_string(),
                reference: "DSB-abc".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(receipt.provider_reference, "sim_DSB-abc");
    }

    #[tokio::test]
    async fn test_simulated_provider_declines() {
        let provider =
            SimulatedProvider::with_outcome(SimulatedOutcome::Decline("no funds".to_string()));
        let err = provider
            .debit(DebitRequest {
                amount: 1000,
                account_id: Uuid::new_v4(),
                narration: "repayment".to_string(),
                reference: "PAY-abc".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Declined(_)));
    }

    #[test]
    fn test_new_reference_is_unique_and_prefixed() {
        let a = new_reference("PAY");
        let b = new_reference("PAY");
        assert!(a.starts_with("PAY-"));
        assert_ne!(a, b);
    }
}
