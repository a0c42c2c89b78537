use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: i64,
    pub email: String,
    /// Opaque formatted password record, see `auth::password`.
    pub password_record: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionRow {
    pub id: String,
    pub user_id: i64,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SessionRow {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Coarse authorization tier for agent credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Read,
    Write,
}

impl TrustLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            TrustLevel::Read => "read",
            TrustLevel::Write => "write",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "read" => Some(TrustLevel::Read),
            "write" => Some(TrustLevel::Write),
            _ => None,
        }
    }

    /// Write trust subsumes read.
    pub fn permits(self, required: TrustLevel) -> bool {
        match required {
            TrustLevel::Read => true,
            TrustLevel::Write => self == TrustLevel::Write,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCredential {
    pub id: Uuid,
    pub name: String,
    pub key_hash: String,
    pub trust: TrustLevel,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AgentCredential {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: String,
    pub actor: String,
    pub ip_address: Option<String>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(
        event_type: impl Into<String>,
        actor: impl Into<String>,
        ip_address: Option<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            actor: actor.into(),
            ip_address,
            detail: detail.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_level_roundtrip() {
        assert_eq!(TrustLevel::parse("read"), Some(TrustLevel::Read));
        assert_eq!(TrustLevel::parse("write"), Some(TrustLevel::Write));
        assert_eq!(TrustLevel::parse("admin"), None);
        assert_eq!(TrustLevel::Write.as_str(), "write");
    }

    #[test]
    fn test_trust_level_permits() {
        assert!(TrustLevel::Read.permits(TrustLevel::Read));
        assert!(!TrustLevel::Read.permits(TrustLevel::Write));
        assert!(TrustLevel::Write.permits(TrustLevel::Read));
        assert!(TrustLevel::Write.permits(TrustLevel::Write));
    }

    #[test]
    fn test_session_row_expiry() {
        let now = Utc::now();
        let live = SessionRow {
            id: "s".into(),
            user_id: 1,
            user_agent: None,
            ip_address: None,
            expires_at: now + chrono::Duration::hours(1),
            created_at: now,
        };
        assert!(!live.is_expired());

        let dead = SessionRow {
            expires_at: now - chrono::Duration::seconds(1),
            ..live
        };
        assert!(dead.is_expired());
    }
}
