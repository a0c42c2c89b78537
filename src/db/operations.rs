use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::db::models::{Account, AgentCredential, SecurityEvent, SessionRow, TrustLevel};
use crate::error::AppError;

/// Pooled Postgres access for accounts, sessions, agent credentials and the
/// security event log. Statements use the runtime API so the crate builds
/// without a live database.
#[derive(Clone)]
pub struct Db {
    pool: Arc<PgPool>,
}

impl Db {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;

        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn pool(&self) -> &PgPool {
        self.pool.as_ref()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Idempotent schema setup, run once at startup. Replaces any notion of
    /// a lazily-checked "already initialized" flag: every statement is a
    /// no-op when the object already exists.
    pub async fn init_schema(&self) -> Result<(), AppError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id BIGSERIAL PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_record TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id BIGINT NOT NULL,
                user_agent TEXT,
                ip_address TEXT,
                expires_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS sessions_user_id_idx ON sessions (user_id)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS agent_credential (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                key_hash TEXT NOT NULL,
                trust TEXT NOT NULL,
                revoked_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS agent_credential_key_hash_idx ON agent_credential (key_hash)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS security_event (
                id BIGSERIAL PRIMARY KEY,
                event_type TEXT NOT NULL,
                actor TEXT NOT NULL,
                ip_address TEXT,
                detail TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS security_event_actor_idx ON security_event (actor, created_at)
            "#,
        ];

        for statement in statements {
            sqlx::query(statement).execute(self.pool()).await?;
        }
        Ok(())
    }

    // ---- accounts ----

    pub async fn create_account(&self, email: &str, password_record: &str) -> Result<Account, AppError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (email, password_record)
            VALUES ($1, $2)
            RETURNING id, email, password_record, created_at, updated_at
            "#,
        )
        .bind(email)
        .bind(password_record)
        .fetch_one(self.pool())
        .await?;

        Ok(account)
    }

    pub async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, email, password_record, created_at, updated_at FROM accounts WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(self.pool())
        .await?;

        Ok(account)
    }

    pub async fn find_account_by_id(&self, id: i64) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, email, password_record, created_at, updated_at FROM accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(account)
    }

    pub async fn update_password_record(&self, user_id: i64, password_record: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE accounts SET password_record = $2, updated_at = now() WHERE id = $1")
            .bind(user_id)
            .bind(password_record)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    // ---- sessions ----

    pub async fn insert_session(&self, session: &SessionRow) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, user_agent, ip_address, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&session.id)
        .bind(session.user_id)
        .bind(&session.user_agent)
        .bind(&session.ip_address)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn purge_expired_sessions(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= now()")
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete the user's live sessions ranked beyond the cap, oldest first to
    /// go. Ranking is by creation time descending so the newest `cap` rows
    /// survive.
    pub async fn prune_sessions_over_cap(&self, user_id: i64, cap: usize) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM sessions WHERE user_id = $1 AND id IN (
                SELECT id FROM sessions
                WHERE user_id = $1 AND expires_at > now()
                ORDER BY created_at DESC
                OFFSET $2
            )
            "#,
        )
        .bind(user_id)
        .bind(cap as i64)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Extend a live session's expiry. The guard on `expires_at > now()`
    /// makes the sliding extension conditional: an already-expired row is
    /// never resurrected, the update simply matches nothing.
    pub async fn touch_session(
        &self,
        session_id: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<Option<SessionRow>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            UPDATE sessions SET expires_at = $2
            WHERE id = $1 AND expires_at > now()
            RETURNING id, user_id, user_agent, ip_address, expires_at, created_at
            "#,
        )
        .bind(session_id)
        .bind(new_expiry)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    /// Soft delete: the row is kept for audit, only its expiry is collapsed.
    pub async fn expire_session(&self, session_id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE sessions SET expires_at = now() WHERE id = $1")
            .bind(session_id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    pub async fn expire_all_sessions(&self, user_id: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE sessions SET expires_at = now() WHERE user_id = $1 AND expires_at > now()",
        )
        .bind(user_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn live_sessions_for_user(&self, user_id: i64) -> Result<Vec<SessionRow>, AppError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, user_agent, ip_address, expires_at, created_at
            FROM sessions
            WHERE user_id = $1 AND expires_at > now()
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    // ---- agent credentials ----

    pub async fn create_agent_credential(
        &self,
        name: &str,
        key_hash: &str,
        trust: TrustLevel,
    ) -> Result<AgentCredential, AppError> {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            r#"
            INSERT INTO agent_credential (id, name, key_hash, trust)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, key_hash, trust, revoked_at, created_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(key_hash)
        .bind(trust.as_str())
        .fetch_one(self.pool())
        .await?;

        Self::agent_from_row(&row)
    }

    pub async fn find_agent_by_key_hash(&self, key_hash: &str) -> Result<Option<AgentCredential>, AppError> {
        let row = sqlx::query(
            "SELECT id, name, key_hash, trust, revoked_at, created_at FROM agent_credential WHERE key_hash = $1",
        )
        .bind(key_hash)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(Self::agent_from_row).transpose()
    }

    /// Soft revocation; the credential row survives for audit.
    pub async fn revoke_agent_credential(&self, name: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE agent_credential SET revoked_at = now() WHERE name = $1 AND revoked_at IS NULL",
        )
        .bind(name)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    fn agent_from_row(row: &sqlx::postgres::PgRow) -> Result<AgentCredential, AppError> {
        let trust: String = row.get("trust");
        let trust = TrustLevel::parse(&trust)
            .ok_or_else(|| AppError::DatabaseError(format!("unknown trust level: {trust}")))?;

        Ok(AgentCredential {
            id: row.get("id"),
            name: row.get("name"),
            key_hash: row.get("key_hash"),
            trust,
            revoked_at: row.get("revoked_at"),
            created_at: row.get("created_at"),
        })
    }

    // ---- security events ----

    pub async fn insert_security_event(&self, event: &SecurityEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO security_event (event_type, actor, ip_address, detail, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&event.event_type)
        .bind(&event.actor)
        .bind(&event.ip_address)
        .bind(&event.detail)
        .bind(event.created_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Failure events for one actor inside the lookback window. Feeds the
    /// adaptive challenge escalator.
    pub async fn count_recent_failures(&self, actor: &str, window: Duration) -> Result<u64, AppError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS failures FROM security_event
            WHERE actor = $1
              AND event_type LIKE '%_failed'
              AND created_at > now() - ($2 * INTERVAL '1 second')
            "#,
        )
        .bind(actor)
        .bind(window.as_secs() as i64)
        .fetch_one(self.pool())
        .await?;

        let count: i64 = row.get("failures");
        Ok(count as u64)
    }

    pub async fn recent_security_events(&self, limit: i64) -> Result<Vec<SecurityEvent>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT event_type, actor, ip_address, detail, created_at
            FROM security_event
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SecurityEvent {
                event_type: row.get("event_type"),
                actor: row.get("actor"),
                ip_address: row.get("ip_address"),
                detail: row.get("detail"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}
