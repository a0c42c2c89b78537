use std::sync::Arc;

use tracing::info;

use crate::auth::password::PasswordHasher;
use crate::auth::tokens::{TokenPair, TokenService};
use crate::db::models::{Account, SecurityEvent};
use crate::db::Db;
use crate::error::AppError;
use crate::events::{
    EventQueue, EVENT_ACCOUNT_REGISTERED, EVENT_LOGIN_FAILED, EVENT_LOGIN_SUCCEEDED,
    EVENT_PASSWORD_CHANGED, EVENT_PASSWORD_CHANGE_FAILED,
};
use crate::session::{RequestMeta, SessionStore};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug)]
pub struct LoginSuccess {
    pub account: Account,
    pub session_id: String,
    pub tokens: TokenPair,
}

/// Account lifecycle: registration, credential login, logout and password
/// change. Failures toward the caller never distinguish a wrong password
/// from an unknown account.
pub struct AccountService {
    db: Db,
    sessions: Arc<dyn SessionStore>,
    tokens: Arc<TokenService>,
    hasher: PasswordHasher,
    events: EventQueue,
}

impl AccountService {
    pub fn new(
        db: Db,
        sessions: Arc<dyn SessionStore>,
        tokens: Arc<TokenService>,
        events: EventQueue,
    ) -> Self {
        Self {
            db,
            sessions,
            tokens,
            hasher: PasswordHasher::new(),
            events,
        }
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        meta: &RequestMeta,
    ) -> Result<Account, AppError> {
        validate_email(email)?;
        validate_password(password)?;

        if self.db.find_account_by_email(email).await?.is_some() {
            return Err(AppError::ValidationError("email already registered".into()));
        }

        let record = self.hasher.hash(password);
        let account = self.db.create_account(email, &record).await?;

        info!("account registered: {}", account.id);
        self.events.emit(SecurityEvent::new(
            EVENT_ACCOUNT_REGISTERED,
            email,
            meta.ip_address.clone(),
            "",
        ));

        Ok(account)
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        meta: &RequestMeta,
    ) -> Result<LoginSuccess, AppError> {
        let account = match self.db.find_account_by_email(email).await? {
            Some(account) => account,
            None => {
                // Burn the cost of a real verification so response timing
                // does not reveal whether the account exists.
                self.hasher.reject_with_constant_time(password);
                self.audit_login_failure(email, meta, "unknown account");
                return Err(AppError::Unauthorized);
            }
        };

        if !self.hasher.verify(password, &account.password_record) {
            self.audit_login_failure(email, meta, "bad password");
            return Err(AppError::Unauthorized);
        }

        let session_id = self.sessions.create_session(account.id, meta.clone()).await?;
        let tokens = self.tokens.issue(account.id, &session_id)?;

        info!("login succeeded for account {}", account.id);
        self.events.emit(SecurityEvent::new(
            EVENT_LOGIN_SUCCEEDED,
            email,
            meta.ip_address.clone(),
            "",
        ));

        Ok(LoginSuccess { account, session_id, tokens })
    }

    pub async fn logout(&self, session_id: &str) -> Result<(), AppError> {
        self.sessions.end_session(session_id).await
    }

    /// Rotate the password record and revoke every session for the user.
    /// Outstanding cookies die with the sessions even if their access
    /// tokens have not expired yet.
    pub async fn change_password(
        &self,
        user_id: i64,
        current_password: &str,
        new_password: &str,
        meta: &RequestMeta,
    ) -> Result<(), AppError> {
        validate_password(new_password)?;

        let account = self
            .db
            .find_account_by_id(user_id)
            .await?
            .ok_or(AppError::Unauthorized)?;

        if !self.hasher.verify(current_password, &account.password_record) {
            self.events.emit(SecurityEvent::new(
                EVENT_PASSWORD_CHANGE_FAILED,
                account.email.clone(),
                meta.ip_address.clone(),
                "current password mismatch",
            ));
            return Err(AppError::Unauthorized);
        }

        let record = self.hasher.hash(new_password);
        self.db.update_password_record(user_id, &record).await?;
        self.sessions.end_all_sessions(user_id).await?;

        info!("password changed for account {}", user_id);
        self.events.emit(SecurityEvent::new(
            EVENT_PASSWORD_CHANGED,
            account.email,
            meta.ip_address.clone(),
            "all sessions revoked",
        ));

        Ok(())
    }

    fn audit_login_failure(&self, email: &str, meta: &RequestMeta, detail: &str) {
        self.events.emit(SecurityEvent::new(
            EVENT_LOGIN_FAILED,
            email,
            meta.ip_address.clone(),
            detail,
        ));
        if let Some(ip) = &meta.ip_address {
            // Failures are also attributed to the network address so the
            // challenge escalator can track per-client abuse.
            self.events.emit(SecurityEvent::new(
                EVENT_LOGIN_FAILED,
                ip.clone(),
                meta.ip_address.clone(),
                detail,
            ));
        }
    }
}

fn validate_email(email: &str) -> Result<(), AppError> {
    let well_formed = email.contains('@') && email.len() >= 3 && !email.starts_with('@');
    if !well_formed {
        return Err(AppError::ValidationError("invalid email address".into()));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::ValidationError(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(validate_email("a@example.com").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@nouser").is_err());
        assert!(validate_email("").is_err());
    }

    #[test]
    fn test_password_validation() {
        assert!(validate_password("ValidPass123!").is_ok());
        assert!(validate_password("short").is_err());
    }
}
