use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::info;

use crate::auth::agent::{generate_agent_key, hash_agent_key};
use crate::db::models::{SecurityEvent, TrustLevel};
use crate::error::AppError;
use crate::events::EVENT_SESSIONS_REVOKED;
use crate::AppState;

const PROVISIONING_HEADER: &str = "X-Provisioning-Secret";
const MAX_EVENT_PAGE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ProvisionAgentRequest {
    pub name: String,
    pub trust: TrustLevel,
}

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    pub limit: Option<i64>,
}

fn bearer_key(req: &HttpRequest) -> Result<&str, AppError> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)
}

/// GET /ops/users/{user_id}/sessions, requires read trust.
pub async fn list_sessions(
    req: HttpRequest,
    path: web::Path<i64>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.agents.authorize(bearer_key(&req)?, TrustLevel::Read).await?;

    let sessions = state.db.live_sessions_for_user(*path).await?;
    Ok(HttpResponse::Ok().json(sessions))
}

/// DELETE /ops/sessions/{session_id}, requires write trust.
pub async fn revoke_session(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let agent = state.agents.authorize(bearer_key(&req)?, TrustLevel::Write).await?;

    state.sessions.end_session(&path).await?;
    info!("session {} revoked by agent {}", *path, agent.name);

    Ok(HttpResponse::NoContent().finish())
}

/// DELETE /ops/users/{user_id}/sessions, bulk revocation behind write trust.
pub async fn revoke_user_sessions(
    req: HttpRequest,
    path: web::Path<i64>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let agent = state.agents.authorize(bearer_key(&req)?, TrustLevel::Write).await?;

    let user_id = *path;
    state.sessions.end_all_sessions(user_id).await?;
    state.events.emit(SecurityEvent::new(
        EVENT_SESSIONS_REVOKED,
        agent.name.clone(),
        None,
        format!("all sessions revoked for user {user_id}"),
    ));
    info!("all sessions for user {} revoked by agent {}", user_id, agent.name);

    Ok(HttpResponse::NoContent().finish())
}

/// POST /ops/agents is gated by the provisioning secret, not an agent key,
/// so the first agent can be created. The raw key appears in this response
/// and nowhere else.
pub async fn provision_agent(
    req: HttpRequest,
    body: web::Json<ProvisionAgentRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let provided = req
        .headers()
        .get(PROVISIONING_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let expected = state.config.auth.provisioning_secret.as_bytes();
    let matches: bool = expected.ct_eq(provided.as_bytes()).into();
    if !matches {
        return Err(AppError::Unauthorized);
    }

    if body.name.trim().is_empty() {
        return Err(AppError::ValidationError("agent name must not be empty".into()));
    }

    let key = generate_agent_key();
    let credential = state
        .db
        .create_agent_credential(&body.name, &hash_agent_key(&key), body.trust)
        .await?;

    info!("agent credential provisioned: {}", credential.name);
    Ok(HttpResponse::Created().json(json!({
        "name": credential.name,
        "trust": credential.trust,
        "key": key
    })))
}

/// DELETE /ops/agents/{name}, requires write trust. Revocation is soft and
/// idempotent.
pub async fn revoke_agent(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let agent = state.agents.authorize(bearer_key(&req)?, TrustLevel::Write).await?;

    state.db.revoke_agent_credential(&path).await?;
    info!("agent credential {} revoked by {}", *path, agent.name);

    Ok(HttpResponse::NoContent().finish())
}

/// GET /ops/events, requires read trust.
pub async fn recent_events(
    req: HttpRequest,
    query: web::Query<EventQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.agents.authorize(bearer_key(&req)?, TrustLevel::Read).await?;

    let limit = query.limit.unwrap_or(50).clamp(1, MAX_EVENT_PAGE);
    let events = state.db.recent_security_events(limit).await?;

    Ok(HttpResponse::Ok().json(events))
}
