//! Durable session backend over the relational store.

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::db::models::SessionRow;
use crate::db::Db;
use crate::error::AppError;
use crate::session::{generate_session_id, RequestMeta, SessionState, SessionStore};

pub struct PgSessionStore {
    db: Db,
    ttl: Duration,
    max_sessions: usize,
}

impl PgSessionStore {
    pub fn new(db: Db, ttl: Duration, max_sessions: usize) -> Self {
        Self { db, ttl, max_sessions }
    }
}

impl From<SessionRow> for SessionState {
    fn from(row: SessionRow) -> Self {
        SessionState {
            id: row.id,
            user_id: row.user_id,
            user_agent: row.user_agent,
            ip_address: row.ip_address,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_session(&self, user_id: i64, meta: RequestMeta) -> Result<String, AppError> {
        // Housekeeping first: drop globally expired rows, then make room
        // under the cap so the row inserted below is the newest survivor.
        // Not atomic across concurrent logins; the overshoot is bounded by
        // the number of racing requests and corrected on the next login.
        self.db.purge_expired_sessions().await?;
        self.db
            .prune_sessions_over_cap(user_id, self.max_sessions.saturating_sub(1))
            .await?;

        let now = Utc::now();
        let row = SessionRow {
            id: generate_session_id(),
            user_id,
            user_agent: meta.user_agent,
            ip_address: meta.ip_address,
            expires_at: now + self.ttl,
            created_at: now,
        };
        self.db.insert_session(&row).await?;

        Ok(row.id)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionState>, AppError> {
        // The conditional update only matches rows that are still live, so
        // an expired session cannot be extended back to life here.
        let row = self
            .db
            .touch_session(session_id, Utc::now() + self.ttl)
            .await?;

        Ok(row.map(SessionState::from))
    }

    async fn end_session(&self, session_id: &str) -> Result<(), AppError> {
        self.db.expire_session(session_id).await
    }

    async fn end_all_sessions(&self, user_id: i64) -> Result<(), AppError> {
        self.db.expire_all_sessions(user_id).await?;
        Ok(())
    }
}
