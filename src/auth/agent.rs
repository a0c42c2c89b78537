//! Bearer-key authorization for operations agents.
//!
//! Agent keys are machine-generated with high entropy, so a fast unsalted
//! digest is sufficient for storage; the stretched KDF is reserved for
//! user-memorized passwords. Lookup is by digest, never by raw key.

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::db::models::{AgentCredential, SecurityEvent, TrustLevel};
use crate::db::Db;
use crate::error::AppError;
use crate::events::{EventQueue, EVENT_AGENT_AUTH_FAILED};

const AGENT_KEY_LEN: usize = 40;

/// SHA-256 hex digest of a bearer key, the stored lookup form.
pub fn hash_agent_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{digest:x}")
}

/// Generate a fresh agent bearer key. Returned to the operator exactly once
/// at provisioning; only the digest survives.
pub fn generate_agent_key() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(AGENT_KEY_LEN)
        .map(char::from)
        .collect();
    format!("ak_{suffix}")
}

pub struct AgentAuth {
    db: Db,
    events: EventQueue,
}

impl AgentAuth {
    pub fn new(db: Db, events: EventQueue) -> Self {
        Self { db, events }
    }

    /// Resolve a bearer key to a live credential carrying at least
    /// `required` trust. Misses and revoked credentials are audited and
    /// rejected with 401; a live credential below the required trust is 403.
    pub async fn authorize(
        &self,
        bearer_key: &str,
        required: TrustLevel,
    ) -> Result<AgentCredential, AppError> {
        let key_hash = hash_agent_key(bearer_key);

        let Some(credential) = self.db.find_agent_by_key_hash(&key_hash).await? else {
            self.events.emit(SecurityEvent::new(
                EVENT_AGENT_AUTH_FAILED,
                format!("key:{}", &key_hash[..12]),
                None,
                "unknown agent key",
            ));
            return Err(AppError::Unauthorized);
        };

        if credential.is_revoked() {
            self.events.emit(SecurityEvent::new(
                EVENT_AGENT_AUTH_FAILED,
                credential.name.clone(),
                None,
                "revoked agent key",
            ));
            return Err(AppError::Unauthorized);
        }

        if !credential.trust.permits(required) {
            return Err(AppError::Forbidden);
        }

        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_hash_is_stable_and_hex() {
        let a = hash_agent_key("ak_test");
        let b = hash_agent_key("ak_test");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        assert_ne!(hash_agent_key("ak_other"), a);
    }

    #[test]
    fn test_generated_keys_unique_and_opaque() {
        let a = generate_agent_key();
        let b = generate_agent_key();
        assert_ne!(a, b);
        assert!(a.starts_with("ak_"));
        assert_eq!(a.len(), 3 + AGENT_KEY_LEN);
    }
}
