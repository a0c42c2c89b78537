//! Cache-primary session store with a best-effort durable audit mirror.
//!
//! Mutations land in the cache first and the call returns on that result
//! alone; the same mutation is then replayed into the relational store on a
//! spawned task. A mirror failure is logged and otherwise invisible to the
//! caller, so an audit-store outage never breaks login or logout.

use async_trait::async_trait;
use tracing::warn;

use crate::db::models::SessionRow;
use crate::db::Db;
use crate::error::AppError;
use crate::session::{CacheSessionStore, RequestMeta, SessionState, SessionStore};

pub struct MirroredSessionStore {
    primary: CacheSessionStore,
    mirror: Db,
}

impl MirroredSessionStore {
    pub fn new(primary: CacheSessionStore, mirror: Db) -> Self {
        Self { primary, mirror }
    }
}

fn row_from_state(state: &SessionState) -> SessionRow {
    SessionRow {
        id: state.id.clone(),
        user_id: state.user_id,
        user_agent: state.user_agent.clone(),
        ip_address: state.ip_address.clone(),
        expires_at: state.expires_at,
        created_at: state.created_at,
    }
}

#[async_trait]
impl SessionStore for MirroredSessionStore {
    async fn create_session(&self, user_id: i64, meta: RequestMeta) -> Result<String, AppError> {
        let state = self.primary.create_state(user_id, meta).await?;

        let mirror = self.mirror.clone();
        let row = row_from_state(&state);
        tokio::spawn(async move {
            if let Err(err) = mirror.insert_session(&row).await {
                warn!("session mirror insert failed for {}: {}", row.id, err);
            }
        });

        Ok(state.id)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionState>, AppError> {
        // Reads are served by the primary alone; the mirror is audit-only.
        self.primary.get_session(session_id).await
    }

    async fn end_session(&self, session_id: &str) -> Result<(), AppError> {
        self.primary.end_session(session_id).await?;

        let mirror = self.mirror.clone();
        let id = session_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = mirror.expire_session(&id).await {
                warn!("session mirror expire failed for {}: {}", id, err);
            }
        });

        Ok(())
    }

    async fn end_all_sessions(&self, user_id: i64) -> Result<(), AppError> {
        self.primary.end_all_sessions(user_id).await?;

        let mirror = self.mirror.clone();
        tokio::spawn(async move {
            if let Err(err) = mirror.expire_all_sessions(user_id).await {
                warn!("session mirror bulk expire failed for user {}: {}", user_id, err);
            }
        });

        Ok(())
    }
}
