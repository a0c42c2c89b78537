//! Key-value-plus-set cache protocol.
//!
//! The `Cache` trait covers exactly the command set the rest of the crate
//! consumes. Advisory components (rate limiting) treat cache failures as
//! soft errors; the cache session store treats them as hard errors.

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use crate::error::AppError;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), AppError>;
    async fn del(&self, key: &str) -> Result<(), AppError>;
    async fn incr(&self, key: &str) -> Result<i64, AppError>;
    async fn expire(&self, key: &str, ttl_secs: i64) -> Result<bool, AppError>;
    async fn sadd(&self, key: &str, member: &str) -> Result<(), AppError>;
    async fn srem(&self, key: &str, member: &str) -> Result<(), AppError>;
    async fn scard(&self, key: &str) -> Result<u64, AppError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, AppError>;
}

/// Redis-backed implementation of the cache protocol.
#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    /// Connect and verify the server is responsive before accepting traffic.
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(url)?;

        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!("cache connection established");

        Ok(Self { client })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, AppError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.conn().await?;
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        Ok(conn.set_ex(key, value, ttl_secs).await?)
    }

    async fn del(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        Ok(conn.del(key).await?)
    }

    async fn incr(&self, key: &str) -> Result<i64, AppError> {
        let mut conn = self.conn().await?;
        Ok(conn.incr(key, 1).await?)
    }

    async fn expire(&self, key: &str, ttl_secs: i64) -> Result<bool, AppError> {
        let mut conn = self.conn().await?;
        Ok(conn.expire(key, ttl_secs).await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        Ok(conn.sadd(key, member).await?)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        Ok(conn.srem(key, member).await?)
    }

    async fn scard(&self, key: &str) -> Result<u64, AppError> {
        let mut conn = self.conn().await?;
        Ok(conn.scard(key).await?)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, AppError> {
        let mut conn = self.conn().await?;
        Ok(conn.smembers(key).await?)
    }
}
