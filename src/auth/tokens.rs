use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPayload {
    pub uid: i64,
    pub sid: String,
    pub typ: TokenKind,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Issues and verifies the two token types. Each type is signed under its
/// own secret, so compromising one secret cannot forge the other type.
pub struct TokenService {
    access_secret: String,
    refresh_secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(
        access_secret: String,
        refresh_secret: String,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            access_secret,
            refresh_secret,
            access_ttl,
            refresh_ttl,
        }
    }

    fn secret_for(&self, kind: TokenKind) -> &str {
        match kind {
            TokenKind::Access => &self.access_secret,
            TokenKind::Refresh => &self.refresh_secret,
        }
    }

    fn sign(&self, kind: TokenKind, uid: i64, sid: &str) -> Result<String, AppError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let payload = TokenPayload {
            uid,
            sid: sid.to_string(),
            typ: kind,
            exp: (Utc::now() + ttl).timestamp(),
        };

        let token = encode(
            &Header::default(),
            &payload,
            &EncodingKey::from_secret(self.secret_for(kind).as_bytes()),
        )?;

        Ok(token)
    }

    /// Issue the access/refresh pair for a fresh login.
    pub fn issue(&self, uid: i64, sid: &str) -> Result<TokenPair, AppError> {
        Ok(TokenPair {
            access: self.sign(TokenKind::Access, uid, sid)?,
            refresh: self.sign(TokenKind::Refresh, uid, sid)?,
        })
    }

    /// Mint a new access token from a verified refresh payload, preserving
    /// uid and sid.
    pub fn refresh_access(&self, payload: &TokenPayload) -> Result<String, AppError> {
        self.sign(TokenKind::Access, payload.uid, &payload.sid)
    }

    /// Verify structure, signature, expiry and the `typ` claim. The type
    /// check is independent of which secret verified the signature: it is
    /// what blocks cross-use of access tokens as refresh tokens even if the
    /// secrets were ever configured identically.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<TokenPayload, AppError> {
        let mut segments = token.split('.');
        let well_formed = segments.clone().count() == 3 && segments.all(|s| !s.is_empty());
        if !well_formed {
            return Err(AppError::TokenMalformed);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<TokenPayload>(
            token,
            &DecodingKey::from_secret(self.secret_for(expected).as_bytes()),
            &validation,
        )?;

        if data.claims.typ != expected {
            return Err(AppError::TokenTypeMismatch);
        }

        Ok(data.claims)
    }
}
