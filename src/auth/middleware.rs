//! Authentication middleware.
//!
//! `AuthFlow` is the per-request state machine combining token verification
//! with session liveness, kept free of HTTP types so it can be exercised
//! directly. `RequireAuth` wraps it as actix middleware: it reads the token
//! cookies, runs the flow, attaches the verified payload to request
//! extensions and, when the flow minted a replacement access token, sets the
//! refreshed cookie on the response.

use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;

use actix_web::cookie::time::Duration as CookieDuration;
use actix_web::cookie::{Cookie, SameSite};
use actix_web::dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{FromRequest, HttpMessage, HttpRequest};
use futures::future::{ready, LocalBoxFuture, Ready};

use crate::auth::tokens::{TokenKind, TokenPayload, TokenService};
use crate::error::AppError;
use crate::session::SessionStore;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// HttpOnly + Secure + SameSite=Strict cookie carrying a token.
pub fn auth_cookie(name: &'static str, value: String, max_age_secs: i64) -> Cookie<'static> {
    Cookie::build(name, value)
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::seconds(max_age_secs))
        .finish()
}

pub fn clear_auth_cookie(name: &'static str) -> Cookie<'static> {
    auth_cookie(name, String::new(), 0)
}

#[derive(Debug)]
pub struct AuthOutcome {
    pub payload: TokenPayload,
    /// Present when the request was admitted via the refresh arm; the
    /// caller owes the client a replacement access cookie.
    pub refreshed_access: Option<String>,
}

pub struct AuthFlow {
    tokens: Arc<TokenService>,
    sessions: Arc<dyn SessionStore>,
}

impl AuthFlow {
    pub fn new(tokens: Arc<TokenService>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { tokens, sessions }
    }

    /// Evaluate the state machine for one request.
    ///
    /// Access arm: verify the access token and require a live session whose
    /// id equals the token's `sid`. Every failure in that arm falls through
    /// rather than rejecting, because a refresh token may still save the
    /// request. Refresh arm: a missing refresh token is `TOKEN_EXPIRED`, a
    /// dead or mismatched session is `SESSION_REVOKED`, and a verified
    /// refresh mints a new access token that is itself re-verified before
    /// the request is admitted.
    pub async fn authenticate(
        &self,
        access: Option<&str>,
        refresh: Option<&str>,
    ) -> Result<AuthOutcome, AppError> {
        if let Some(token) = access {
            if let Ok(payload) = self.tokens.verify(token, TokenKind::Access) {
                if let Ok(Some(state)) = self.sessions.get_session(&payload.sid).await {
                    if state.id == payload.sid {
                        return Ok(AuthOutcome { payload, refreshed_access: None });
                    }
                }
            }
        }

        let Some(token) = refresh else {
            return Err(AppError::TokenExpired);
        };
        let payload = self.tokens.verify(token, TokenKind::Refresh)?;

        // Fail closed: a store error here must not admit the request.
        let state = self
            .sessions
            .get_session(&payload.sid)
            .await
            .map_err(|_| AppError::UnknownError)?;
        match state {
            Some(state) if state.id == payload.sid => {}
            _ => return Err(AppError::SessionRevoked),
        }

        let refreshed = self.tokens.refresh_access(&payload)?;
        // Defensive self-check: never hand out a token this service would
        // not itself accept.
        let payload = self
            .tokens
            .verify(&refreshed, TokenKind::Access)
            .map_err(|_| AppError::UnknownError)?;

        Ok(AuthOutcome { payload, refreshed_access: Some(refreshed) })
    }
}

/// Verified token payload for the current request, inserted by
/// `RequireAuth` and extracted by handlers.
#[derive(Debug, Clone)]
pub struct Authenticated(pub TokenPayload);

impl Deref for Authenticated {
    type Target = TokenPayload;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromRequest for Authenticated {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<TokenPayload>()
                .cloned()
                .map(Authenticated)
                .ok_or(AppError::UnknownError),
        )
    }
}

/// Route guard: constructed once at startup with its dependencies and
/// applied per resource.
#[derive(Clone)]
pub struct RequireAuth {
    flow: Arc<AuthFlow>,
    access_cookie_max_age: i64,
}

impl RequireAuth {
    pub fn new(flow: Arc<AuthFlow>, access_cookie_max_age: i64) -> Self {
        Self { flow, access_cookie_max_age }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequireAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = RequireAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequireAuthMiddleware {
            service: Rc::new(service),
            flow: self.flow.clone(),
            access_cookie_max_age: self.access_cookie_max_age,
        }))
    }
}

pub struct RequireAuthMiddleware<S> {
    service: Rc<S>,
    flow: Arc<AuthFlow>,
    access_cookie_max_age: i64,
}

impl<S, B> Service<ServiceRequest> for RequireAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let flow = self.flow.clone();
        let max_age = self.access_cookie_max_age;

        Box::pin(async move {
            let access = req.cookie(ACCESS_COOKIE).map(|c| c.value().to_string());
            let refresh = req.cookie(REFRESH_COOKIE).map(|c| c.value().to_string());

            let outcome = flow
                .authenticate(access.as_deref(), refresh.as_deref())
                .await
                .map_err(collapse)?;

            req.extensions_mut().insert(outcome.payload.clone());

            let mut res = service.call(req).await?;

            if let Some(token) = outcome.refreshed_access {
                let _ = res
                    .response_mut()
                    .add_cookie(&auth_cookie(ACCESS_COOKIE, token, max_age));
            }

            Ok(res)
        })
    }
}

/// Keep the typed authentication failures; anything else collapses to a
/// generic 401 so internals never leak through this surface.
fn collapse(err: AppError) -> AppError {
    match err {
        AppError::TokenMalformed
        | AppError::TokenExpired
        | AppError::TokenTypeMismatch
        | AppError::SessionRevoked
        | AppError::Unauthorized
        | AppError::Forbidden => err,
        _ => AppError::UnknownError,
    }
}
