//! Advisory credit scoring
//!
//! Computes advisory decisions only; nothing in the lifecycle engine gates on
//! the score. The scorer is a trait so tests can inject a fixed one, and the
//! default implementation is deterministic per account.

use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::Account;

/// Score bounds
pub const MIN_SCORE: i32 = 300;
pub const MAX_SCORE: i32 = 850;

/// Advisory decision bands
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CreditDecision {
    Favorable,
    Neutral,
    Unfavorable,
}

/// Advisory assessment for one account
#[derive(Debug, Serialize, Clone)]
pub struct CreditAssessment {
    pub score: i32,
    pub decision: CreditDecision,
    pub factors: Vec<String>,
}

/// Scoring seam; implementations must be deterministic for reproducible tests
pub trait CreditScorer: Send + Sync {
    fn score(&self, account: &Account) -> CreditAssessment;
}

/// Default scorer: a base score adjusted by identifier verification, with a
/// per-account component derived from a hash of the account id.
pub struct HeuristicScorer;

impl CreditScorer for HeuristicScorer {
    fn score(&self, account: &Account) -> CreditAssessment {
        let mut score = 550i32;
        let mut factors = Vec::new();

        if account.national_id_enc.is_some() {
            score += 100;
            factors.push("identifier verified".to_string());
        } else {
            factors.push("identifier not provided".to_string());
        }

        if account.active {
            score += 25;
        } else {
            score -= 150;
            factors.push("account inactive".to_string());
        }

        // Stable per-account spread in [0, 100)
        let digest = Sha256::digest(account.id.as_bytes());
        let spread = (u16::from_be_bytes([digest[0], digest[1]]) % 100) as i32;
        score += spread;
        factors.push(format!("behavioral component {}", spread));

        let score = score.clamp(MIN_SCORE, MAX_SCORE);
        let decision = if score >= 700 {
            CreditDecision::Favorable
        } else if score >= 550 {
            CreditDecision::Neutral
        } else {
            CreditDecision::Unfavorable
        };

        CreditAssessment {
            score,
            decision,
            factors,
        }
    }
}

/// Stored report plus a fresh assessment
#[derive(Debug, Serialize)]
pub struct CreditReport {
    pub account_id: Uuid,
    pub stored_score: Option<i32>,
    pub assessment: CreditAssessment,
}

/// Advisory credit service
#[derive(Clone)]
pub struct CreditService {
    db_pool: PgPool,
    scorer: Arc<dyn CreditScorer>,
}

impl CreditService {
    pub fn new(db_pool: PgPool, scorer: Arc<dyn CreditScorer>) -> Self {
        Self { db_pool, scorer }
    }

    /// Current report without re-scoring
    pub async fn report(&self, account_id: Uuid) -> ApiResult<CreditReport> {
        let account = self.fetch_account(account_id).await?;
        let assessment = self.scorer.score(&account);

        Ok(CreditReport {
            account_id,
            stored_score: account.credit_score,
            assessment,
        })
    }

    /// Run a fresh check and persist the score on the account
    pub async fn check(&self, account_id: Uuid) -> ApiResult<CreditReport> {
        let account = self.fetch_account(account_id).await?;
        let assessment = self.scorer.score(&account);

        sqlx::query("UPDATE accounts SET credit_score = $2, updated_at = NOW() WHERE id = $1")
            .bind(account_id)
            .bind(assessment.score)
            .execute(&self.db_pool)
            .await?;

        Ok(CreditReport {
            account_id,
            stored_score: Some(assessment.score),
            assessment,
        })
    }

    async fn fetch_account(&self, account_id: Uuid) -> ApiResult<Account> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Account {} not found", account_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::AccountRole;

    fn account(national_id: Option<&str>, active: bool) -> Account {
        Account {
            id: Uuid::new_v4(),
            email: "b@example.com".to_string(),
            password_hash: "v1$x$y".to_string(),
            role: AccountRole::Borrower,
            active,
            national_id_enc: national_id.map(String::from),
            credit_score: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_score_is_deterministic_per_account() {
        let scorer = HeuristicScorer;
        let acct = account(Some("enc"), true);
        let a = scorer.score(&acct);
        let b = scorer.score(&acct);
        assert_eq!(a.score, b.score);
        assert_eq!(a.decision, b.decision);
    }

    #[test]
    fn test_score_stays_in_bounds() {
        let scorer = HeuristicScorer;
        for _ in 0..50 {
            let score = scorer.score(&account(None, true)).score;
            assert!((MIN_SCORE..=MAX_SCORE).contains(&score));

            let score = scorer.score(&account(Some("enc"), false)).score;
            assert!((MIN_SCORE..=MAX_SCORE).contains(&score));
        }
    }

    #[test]
    fn test_identifier_verification_raises_score() {
        let scorer = HeuristicScorer;
        let mut with_id = account(Some("enc"), true);
        let mut without_id = account(None, true);
        // Same id so the behavioral component cancels out
        without_id.id = with_id.id;
        with_id.national_id_enc = Some("enc".to_string());

        assert!(scorer.score(&with_id).score > scorer.score(&without_id).score);
    }
}
