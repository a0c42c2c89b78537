//! End-to-end exercises of the authentication core against an in-memory
//! session backend: login token pairs, automatic refresh, revocation and
//! the per-user session cap.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use keystone_server::auth::{AuthFlow, PasswordHasher, TokenKind, TokenService};
use keystone_server::session::{
    generate_session_id, RequestMeta, SessionState, SessionStore,
};
use keystone_server::AppError;
use std::sync::Arc;

struct InMemStore {
    ttl: Duration,
    cap: usize,
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl InMemStore {
    fn new(ttl: Duration, cap: usize) -> Self {
        Self { ttl, cap, sessions: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl SessionStore for InMemStore {
    async fn create_session(&self, user_id: i64, meta: RequestMeta) -> Result<String, AppError> {
        let now = Utc::now();
        let state = SessionState {
            id: generate_session_id(),
            user_id,
            user_agent: meta.user_agent,
            ip_address: meta.ip_address,
            created_at: now,
            expires_at: now + self.ttl,
        };
        let id = state.id.clone();

        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(id.clone(), state);

        let mut for_user: Vec<(String, chrono::DateTime<Utc>)> = sessions
            .values()
            .filter(|s| s.user_id == user_id && s.expires_at > now)
            .map(|s| (s.id.clone(), s.created_at))
            .collect();
        for_user.sort_by_key(|(_, created)| *created);
        while for_user.len() > self.cap {
            let (oldest, _) = for_user.remove(0);
            sessions.remove(&oldest);
        }

        Ok(id)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionState>, AppError> {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(state) = sessions.get_mut(session_id) else {
            return Ok(None);
        };
        if state.expires_at <= Utc::now() {
            return Ok(None);
        }
        state.expires_at = Utc::now() + self.ttl;
        Ok(Some(state.clone()))
    }

    async fn end_session(&self, session_id: &str) -> Result<(), AppError> {
        self.sessions.lock().unwrap().remove(session_id);
        Ok(())
    }

    async fn end_all_sessions(&self, user_id: i64) -> Result<(), AppError> {
        self.sessions.lock().unwrap().retain(|_, s| s.user_id != user_id);
        Ok(())
    }
}

fn token_service() -> Arc<TokenService> {
    Arc::new(TokenService::new(
        "access_secret".to_string(),
        "refresh_secret".to_string(),
        Duration::minutes(15),
        Duration::days(7),
    ))
}

/// Same secrets, but every access token it issues is already expired.
fn stale_access_service() -> TokenService {
    TokenService::new(
        "access_secret".to_string(),
        "refresh_secret".to_string(),
        Duration::seconds(-10),
        Duration::days(7),
    )
}

#[tokio::test]
async fn test_login_and_protected_access() {
    let store = Arc::new(InMemStore::new(Duration::hours(1), 3));
    let tokens = token_service();
    let flow = AuthFlow::new(tokens.clone(), store.clone());

    let sid = store.create_session(1, RequestMeta::default()).await.unwrap();
    let pair = tokens.issue(1, &sid).unwrap();

    let outcome = flow.authenticate(Some(&pair.access), None).await.unwrap();
    assert_eq!(outcome.payload.uid, 1);
    assert_eq!(outcome.payload.sid, sid);
    assert!(outcome.refreshed_access.is_none());
}

#[tokio::test]
async fn test_expired_access_recovers_via_refresh() {
    let store = Arc::new(InMemStore::new(Duration::hours(1), 3));
    let tokens = token_service();
    let flow = AuthFlow::new(tokens.clone(), store.clone());

    let sid = store.create_session(1, RequestMeta::default()).await.unwrap();
    let pair = stale_access_service().issue(1, &sid).unwrap();

    let outcome = flow
        .authenticate(Some(&pair.access), Some(&pair.refresh))
        .await
        .unwrap();

    let refreshed = outcome.refreshed_access.expect("replacement access token");
    let payload = tokens.verify(&refreshed, TokenKind::Access).unwrap();
    assert_eq!(payload.sid, sid);
}

#[tokio::test]
async fn test_logout_kills_both_tokens() {
    let store = Arc::new(InMemStore::new(Duration::hours(1), 3));
    let tokens = token_service();
    let flow = AuthFlow::new(tokens.clone(), store.clone());

    let sid = store.create_session(1, RequestMeta::default()).await.unwrap();
    let pair = tokens.issue(1, &sid).unwrap();

    store.end_session(&sid).await.unwrap();

    let err = flow
        .authenticate(Some(&pair.access), Some(&pair.refresh))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SessionRevoked));
}

#[tokio::test]
async fn test_full_revocation_rejects_unexpired_cookies() {
    // Password-change semantics: ending every session must invalidate an
    // outstanding cookie pair even though its access token is still within
    // its expiry window.
    let store = Arc::new(InMemStore::new(Duration::hours(1), 3));
    let tokens = token_service();
    let flow = AuthFlow::new(tokens.clone(), store.clone());

    let sid_a = store.create_session(1, RequestMeta::default()).await.unwrap();
    let sid_b = store.create_session(1, RequestMeta::default()).await.unwrap();
    let pair_a = tokens.issue(1, &sid_a).unwrap();
    let pair_b = tokens.issue(1, &sid_b).unwrap();

    store.end_all_sessions(1).await.unwrap();

    for pair in [pair_a, pair_b] {
        let err = flow
            .authenticate(Some(&pair.access), Some(&pair.refresh))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionRevoked));
    }
}

#[tokio::test]
async fn test_session_cap_keeps_newest() {
    let store = Arc::new(InMemStore::new(Duration::hours(1), 3));

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(store.create_session(7, RequestMeta::default()).await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    assert!(store.get_session(&ids[0]).await.unwrap().is_none());
    for id in &ids[1..] {
        assert!(store.get_session(id).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_expired_session_stays_dead() {
    let store = Arc::new(InMemStore::new(Duration::seconds(-1), 3));

    let sid = store.create_session(1, RequestMeta::default()).await.unwrap();
    assert!(store.get_session(&sid).await.unwrap().is_none());
    // A second read must not have resurrected it.
    assert!(store.get_session(&sid).await.unwrap().is_none());
}

#[test]
fn test_password_service_production_parameters() {
    // One pass under the real iteration count; the cheap-parameter cases
    // live in the unit tests.
    let hasher = PasswordHasher::new();
    let record = hasher.hash("ValidPass123!");

    assert!(hasher.verify("ValidPass123!", &record));
    assert!(!hasher.verify("WrongPass123!", &record));
    assert!(!hasher.reject_with_constant_time("ValidPass123!"));
}
