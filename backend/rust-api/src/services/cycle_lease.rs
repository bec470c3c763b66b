use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;

pub const DEFAULT_LEASE_KEY: &str = "make:quiz_sync:lease";

/// Cross-process guard held for the duration of one sync cycle.
#[async_trait]
pub trait CycleLock: Send + Sync {
    /// Returns the lease token when acquired, `None` when another process
    /// holds the lease.
    async fn try_acquire(&self) -> Result<Option<String>>;

    /// Extends the lease if it still carries `token`. `false` means the lease
    /// expired or was taken over.
    async fn renew(&self, token: &str) -> Result<bool>;

    /// Deletes the lease only if it still carries `token`.
    async fn release(&self, token: &str) -> Result<bool>;
}

/// Redis lease that keeps sync cycles from overlapping across processes.
#[derive(Clone)]
pub struct CycleLease {
    redis: ConnectionManager,
    key: String,
    ttl: Duration,
}

impl CycleLease {
    pub fn new(redis: ConnectionManager, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            redis,
            key: key.into(),
            ttl,
        }
    }

    fn ttl_ms(&self) -> u64 {
        u64::try_from(self.ttl.as_millis())
            .unwrap_or(u64::MAX)
            .max(1)
    }
}

#[async_trait]
impl CycleLock for CycleLease {
    async fn try_acquire(&self) -> Result<Option<String>> {
        let mut conn = self.redis.clone();
        let token = uuid::Uuid::new_v4().to_string();

        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl_ms())
            .query_async(&mut conn)
            .await
            .context("Failed to acquire sync lease")?;

        Ok(reply.map(|_| token))
    }

    async fn renew(&self, token: &str) -> Result<bool> {
        let mut conn = self.redis.clone();

        let lua_script = r#"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('PEXPIRE', KEYS[1], ARGV[2])
            end
            return 0
        "#;

        let renewed: u32 = redis::Script::new(lua_script)
            .key(&self.key)
            .arg(token)
            .arg(self.ttl_ms())
            .invoke_async(&mut conn)
            .await
            .context("Failed to renew sync lease")?;

        Ok(renewed == 1)
    }

    async fn release(&self, token: &str) -> Result<bool> {
        let mut conn = self.redis.clone();

        let lua_script = r#"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            end
            return 0
        "#;

        let deleted: u32 = redis::Script::new(lua_script)
            .key(&self.key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .context("Failed to release sync lease")?;

        Ok(deleted == 1)
    }
}
