//! External dependencies the health endpoint checks.

use std::time::Duration;

use anyhow::Context;
use apikit_db::Database;
use async_trait::async_trait;
use runtime::CacheConfig;

/// Something `/status` can ping.
#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &str;

    async fn ping(&self, timeout: Duration) -> anyhow::Result<()>;
}

pub struct DatabaseProbe {
    db: Database,
}

impl DatabaseProbe {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Probe for DatabaseProbe {
    fn name(&self) -> &str {
        "database"
    }

    async fn ping(&self, timeout: Duration) -> anyhow::Result<()> {
        self.db.ping(timeout).await?;
        Ok(())
    }
}

/// Redis connectivity. Only used for startup and health checks.
#[derive(Clone)]
pub struct Cache {
    client: redis::Client,
}

impl Cache {
    pub fn open(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("invalid cache URL")?;
        Ok(Self { client })
    }

    /// Open and ping within `timeout`.
    pub async fn connect(cfg: &CacheConfig, timeout: Duration) -> anyhow::Result<Self> {
        let cache = Self::open(&cfg.address)?;
        cache.ping(timeout).await?;
        tracing::info!("connected to cache");
        Ok(cache)
    }

    pub async fn ping(&self, timeout: Duration) -> anyhow::Result<()> {
        let ping = async {
            let mut conn = self
                .client
                .get_multiplexed_async_connection()
                .await
                .context("cache connection failed")?;
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .context("cache PING failed")?;
            anyhow::Ok(())
        };
        tokio::time::timeout(timeout, ping)
            .await
            .map_err(|_| anyhow::anyhow!("cache did not answer within {timeout:?}"))?
    }
}

#[async_trait]
impl Probe for Cache {
    fn name(&self) -> &str {
        "cache"
    }

    async fn ping(&self, timeout: Duration) -> anyhow::Result<()> {
        Cache::ping(self, timeout).await
    }
}

/// Stands in for an optional dependency that was down at startup.
pub struct Unavailable {
    name: String,
    reason: String,
}

impl Unavailable {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Probe for Unavailable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self, _timeout: Duration) -> anyhow::Result<()> {
        anyhow::bail!("{} not connected: {}", self.name, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_cache_url() {
        assert!(Cache::open("not a url").is_err());
    }

    #[tokio::test]
    async fn unreachable_cache_fails_ping() {
        let cache = Cache::open("redis://127.0.0.1:1").unwrap();
        assert!(cache.ping(Duration::from_millis(500)).await.is_err());
    }

    #[tokio::test]
    async fn unavailable_always_fails() {
        let probe = Unavailable::new("database", "connection refused");
        assert_eq!(probe.name(), "database");
        let err = probe.ping(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.to_string(), "database not connected: connection refused");
    }
}
