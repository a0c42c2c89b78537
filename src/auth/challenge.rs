//! Adaptive proof-of-work challenge escalation.
//!
//! Repeated authentication failures for a client identifier raise the cost
//! of the next attempt: below the low threshold no challenge is issued,
//! between the thresholds a cheap puzzle, at the high threshold an expensive
//! one. Verification is pure recomputation, so the only state involved is
//! the nonce the client echoes back. The failure-count lookup fails open: an
//! audit-log outage must not become a login outage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::db::Db;
use crate::error::AppError;

/// A puzzle: find `solution` such that the hex digest of `nonce + solution`
/// starts with `difficulty` zero digits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub nonce: String,
    pub difficulty: u32,
}

#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    pub lookback: Duration,
    pub low_threshold: u64,
    pub high_threshold: u64,
    pub low_difficulty: u32,
    pub high_difficulty: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            lookback: Duration::from_secs(900),
            low_threshold: 3,
            high_threshold: 10,
            low_difficulty: 3,
            high_difficulty: 5,
        }
    }
}

/// Source of recent failure counts, normally the security event log.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FailureLookup: Send + Sync {
    async fn count_recent_failures(
        &self,
        identifier: &str,
        window: Duration,
    ) -> Result<u64, AppError>;
}

#[async_trait]
impl FailureLookup for Db {
    async fn count_recent_failures(
        &self,
        identifier: &str,
        window: Duration,
    ) -> Result<u64, AppError> {
        Db::count_recent_failures(self, identifier, window).await
    }
}

pub struct ChallengeService {
    source: Arc<dyn FailureLookup>,
    policy: EscalationPolicy,
}

impl ChallengeService {
    pub fn new(source: Arc<dyn FailureLookup>, policy: EscalationPolicy) -> Self {
        Self { source, policy }
    }

    /// Decide whether `identifier` owes a challenge for its next attempt.
    pub async fn assess(&self, identifier: &str) -> Option<Challenge> {
        let failures = match self
            .source
            .count_recent_failures(identifier, self.policy.lookback)
            .await
        {
            Ok(count) => count,
            Err(err) => {
                warn!("failure lookup unavailable, skipping challenge: {}", err);
                return None;
            }
        };

        if failures < self.policy.low_threshold {
            None
        } else if failures < self.policy.high_threshold {
            Some(Self::issue(self.policy.low_difficulty))
        } else {
            Some(Self::issue(self.policy.high_difficulty))
        }
    }

    fn issue(difficulty: u32) -> Challenge {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce: String = nonce.iter().map(|b| format!("{b:02x}")).collect();

        Challenge { nonce, difficulty }
    }

    /// Pure verification: recompute the digest and count leading zero hex
    /// digits.
    pub fn verify(nonce: &str, solution: &str, difficulty: u32) -> bool {
        let digest = Sha256::digest(format!("{nonce}{solution}").as_bytes());
        let hex = format!("{digest:x}");
        hex.chars().take_while(|c| *c == '0').count() >= difficulty as usize
    }
}
