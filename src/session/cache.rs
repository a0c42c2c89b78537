//! Cache-backed session store.
//!
//! Each session lives as a JSON record under `session:{id}` with a TTL equal
//! to the session duration; `user_sessions:{uid}` is a set enumerating the
//! user's live session ids. Sliding expiration works by rewriting the record
//! with a fresh TTL on every successful read.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::warn;

use crate::cache::Cache;
use crate::error::AppError;
use crate::session::{generate_session_id, RequestMeta, SessionState, SessionStore};

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

fn user_key(user_id: i64) -> String {
    format!("user_sessions:{user_id}")
}

pub struct CacheSessionStore {
    cache: Arc<dyn Cache>,
    ttl: Duration,
    max_sessions: usize,
}

impl CacheSessionStore {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration, max_sessions: usize) -> Self {
        Self { cache, ttl, max_sessions }
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.num_seconds().max(0) as u64
    }

    /// Create the session and return its full state; the mirrored store
    /// needs the state to replicate it into the durable store.
    pub(crate) async fn create_state(
        &self,
        user_id: i64,
        meta: RequestMeta,
    ) -> Result<SessionState, AppError> {
        let now = Utc::now();
        let state = SessionState {
            id: generate_session_id(),
            user_id,
            user_agent: meta.user_agent,
            ip_address: meta.ip_address,
            created_at: now,
            expires_at: now + self.ttl,
        };

        let record = serde_json::to_string(&state)
            .map_err(|e| AppError::InternalError(e.to_string()))?;
        self.cache
            .set_ex(&session_key(&state.id), &record, self.ttl_secs())
            .await?;

        let ukey = user_key(user_id);
        self.cache.sadd(&ukey, &state.id).await?;
        // The set must not outlive its newest member.
        self.cache.expire(&ukey, self.ttl_secs() as i64).await?;

        self.enforce_cap(user_id).await?;

        Ok(state)
    }

    /// Load every member's record, dropping set members whose record already
    /// lapsed, then evict the oldest survivors beyond the cap.
    async fn enforce_cap(&self, user_id: i64) -> Result<(), AppError> {
        let ukey = user_key(user_id);
        let members = self.cache.smembers(&ukey).await?;

        let mut live: Vec<SessionState> = Vec::with_capacity(members.len());
        for member in members {
            match self.cache.get(&session_key(&member)).await? {
                Some(record) => match serde_json::from_str::<SessionState>(&record) {
                    Ok(state) => live.push(state),
                    Err(err) => {
                        warn!("dropping undecodable session record {}: {}", member, err);
                        self.cache.del(&session_key(&member)).await?;
                        self.cache.srem(&ukey, &member).await?;
                    }
                },
                // Record expired out from under the set; prune the member.
                None => self.cache.srem(&ukey, &member).await?,
            }
        }

        if live.len() <= self.max_sessions {
            return Ok(());
        }

        live.sort_by_key(|state| state.created_at);
        let excess = live.len() - self.max_sessions;
        for state in live.into_iter().take(excess) {
            self.cache.del(&session_key(&state.id)).await?;
            self.cache.srem(&ukey, &state.id).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl SessionStore for CacheSessionStore {
    async fn create_session(&self, user_id: i64, meta: RequestMeta) -> Result<String, AppError> {
        Ok(self.create_state(user_id, meta).await?.id)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionState>, AppError> {
        let key = session_key(session_id);
        let Some(record) = self.cache.get(&key).await? else {
            return Ok(None);
        };

        let mut state: SessionState = serde_json::from_str(&record)
            .map_err(|e| AppError::CacheError(format!("undecodable session record: {e}")))?;

        // Sliding expiration by rewrite.
        state.expires_at = Utc::now() + self.ttl;
        let refreshed = serde_json::to_string(&state)
            .map_err(|e| AppError::InternalError(e.to_string()))?;
        self.cache.set_ex(&key, &refreshed, self.ttl_secs()).await?;

        Ok(Some(state))
    }

    async fn end_session(&self, session_id: &str) -> Result<(), AppError> {
        let key = session_key(session_id);
        let Some(record) = self.cache.get(&key).await? else {
            return Ok(());
        };

        self.cache.del(&key).await?;
        if let Ok(state) = serde_json::from_str::<SessionState>(&record) {
            self.cache.srem(&user_key(state.user_id), session_id).await?;
        }

        Ok(())
    }

    async fn end_all_sessions(&self, user_id: i64) -> Result<(), AppError> {
        let ukey = user_key(user_id);
        for member in self.cache.smembers(&ukey).await? {
            self.cache.del(&session_key(&member)).await?;
        }
        self.cache.del(&ukey).await?;

        Ok(())
    }
}
