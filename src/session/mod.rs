//! Session lifecycle behind one contract with interchangeable backends.
//!
//! The backend is chosen by configuration at startup (`postgres`, `redis`
//! or `mirrored`) and injected as a trait object; nothing downstream
//! inspects which variant it got.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub mod cache;
pub mod mirrored;
pub mod postgres;

pub use cache::CacheSessionStore;
pub use mirrored::MirroredSessionStore;
pub use postgres::PgSessionStore;

const SESSION_ID_LEN: usize = 24;

/// Client metadata captured when a session is created.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub id: String,
    pub user_id: i64,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session and return its id, enforcing the per-user cap by
    /// evicting the oldest sessions past it.
    async fn create_session(&self, user_id: i64, meta: RequestMeta) -> Result<String, AppError>;

    /// Look up a live session. A successful read extends the session's
    /// lifetime (sliding expiration); an expired or unknown id yields `None`
    /// and never resurrects anything.
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionState>, AppError>;

    async fn end_session(&self, session_id: &str) -> Result<(), AppError>;

    async fn end_all_sessions(&self, user_id: i64) -> Result<(), AppError>;
}

/// Opaque URL-safe session id with at least 21 characters of entropy.
pub fn generate_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_shape() {
        let id = generate_session_id();
        assert!(id.len() >= 21);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_session_ids_unique() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_ne!(a, b);
    }
}
