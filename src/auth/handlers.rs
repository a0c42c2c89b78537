use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::auth::challenge::ChallengeService;
use crate::auth::middleware::{
    auth_cookie, clear_auth_cookie, Authenticated, ACCESS_COOKIE, REFRESH_COOKIE,
};
use crate::error::AppError;
use crate::session::RequestMeta;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub challenge_nonce: Option<String>,
    pub challenge_solution: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: i64,
    pub email: String,
}

/// Client metadata for session records and audit events.
fn request_meta(req: &HttpRequest) -> RequestMeta {
    let user_agent = req
        .headers()
        .get("User-Agent")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    let ip_address = req
        .connection_info()
        .realip_remote_addr()
        .map(str::to_string);

    RequestMeta { user_agent, ip_address }
}

fn client_identifier(meta: &RequestMeta) -> &str {
    meta.ip_address.as_deref().unwrap_or("unknown")
}

pub async fn register(
    req: HttpRequest,
    body: web::Json<RegisterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let meta = request_meta(&req);
    state.register_limiter.check(client_identifier(&meta)).await?;

    info!("registration request for {}", body.email);
    let account = state.accounts.register(&body.email, &body.password, &meta).await?;

    Ok(HttpResponse::Created().json(AccountResponse {
        id: account.id,
        email: account.email,
    }))
}

pub async fn login(
    req: HttpRequest,
    body: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let meta = request_meta(&req);
    let identifier = client_identifier(&meta);
    state.login_limiter.check(identifier).await?;

    // Clients with a recent failure streak owe proof of work before the
    // credentials are even looked at.
    if let Some(challenge) = state.challenges.assess(identifier).await {
        let solved = match (&body.challenge_nonce, &body.challenge_solution) {
            (Some(nonce), Some(solution)) => {
                ChallengeService::verify(nonce, solution, challenge.difficulty)
            }
            _ => false,
        };
        if !solved {
            return Ok(HttpResponse::Unauthorized().json(json!({
                "error": {
                    "status": 401,
                    "code": "CHALLENGE_REQUIRED",
                    "message": "proof of work required"
                },
                "challenge": challenge
            })));
        }
    }

    match state.accounts.login(&body.email, &body.password, &meta).await {
        Ok(success) => {
            let access_max_age = state.config.auth.access_expiry_minutes * 60;
            let refresh_max_age = state.config.auth.refresh_expiry_days * 24 * 3600;

            Ok(HttpResponse::Ok()
                .cookie(auth_cookie(ACCESS_COOKIE, success.tokens.access, access_max_age))
                .cookie(auth_cookie(REFRESH_COOKIE, success.tokens.refresh, refresh_max_age))
                .json(AccountResponse {
                    id: success.account.id,
                    email: success.account.email,
                }))
        }
        Err(err) => {
            error!("login failed for {}: {}", body.email, err);
            Err(err)
        }
    }
}

pub async fn logout(
    auth: Authenticated,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.accounts.logout(&auth.sid).await?;

    Ok(HttpResponse::Ok()
        .cookie(clear_auth_cookie(ACCESS_COOKIE))
        .cookie(clear_auth_cookie(REFRESH_COOKIE))
        .json(json!({ "message": "logged out" })))
}

pub async fn me(
    auth: Authenticated,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let account = state
        .db
        .find_account_by_id(auth.uid)
        .await?
        .ok_or(AppError::Unauthorized)?;

    Ok(HttpResponse::Ok().json(AccountResponse {
        id: account.id,
        email: account.email,
    }))
}

pub async fn change_password(
    req: HttpRequest,
    auth: Authenticated,
    body: web::Json<ChangePasswordRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    // Post-login route: the quota key is the authenticated user, not the
    // network address.
    state.password_limiter.check(&auth.uid.to_string()).await?;

    let meta = request_meta(&req);
    state
        .accounts
        .change_password(auth.uid, &body.current_password, &body.new_password, &meta)
        .await?;

    // Every session is gone, including this one; clear the cookies so the
    // client re-authenticates instead of replaying dead tokens.
    Ok(HttpResponse::Ok()
        .cookie(clear_auth_cookie(ACCESS_COOKIE))
        .cookie(clear_auth_cookie(REFRESH_COOKIE))
        .json(json!({ "message": "password changed, all sessions revoked" })))
}
