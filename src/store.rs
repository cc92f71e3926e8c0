use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;

/// Store URL used when `REDIS_URL` is not set.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";

/// Persistence for the open-port set captured by the previous scan cycle.
///
/// Keys are `<ip>/<protocol>`. `replace` must be observable as
/// wipe-then-fill: a later `read` sees either the old set or the new one,
/// never a mixture that outlives the call.
#[async_trait]
pub trait PriorStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<HashSet<String>>;
    async fn replace(&self, key: &str, ports: &[String]) -> Result<()>;
}

/// Redis-backed store. Connections are established per operation, so a
/// Redis outage costs one error per scan cycle instead of wedging scans.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn open(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).with_context(|| format!("invalid redis URL {url:?}"))?;
        Ok(Self { client })
    }

    /// Build a store from `REDIS_URL`, falling back to the local default.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());
        Self::open(&url)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .context("unable to connect to redis")
    }
}

#[async_trait]
impl PriorStore for RedisStore {
    async fn read(&self, key: &str) -> Result<HashSet<String>> {
        let mut conn = self.connection().await?;
        let members: Vec<String> = conn
            .smembers(key)
            .await
            .with_context(|| format!("unable to read set {key:?}"))?;
        Ok(members.into_iter().collect())
    }

    async fn replace(&self, key: &str, ports: &[String]) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .del(key)
            .await
            .with_context(|| format!("unable to wipe set {key:?}"))?;
        if !ports.is_empty() {
            let _: () = conn
                .sadd(key, ports)
                .await
                .with_context(|| format!("unable to fill set {key:?}"))?;
        }
        Ok(())
    }
}

/// In-memory store used by tests and available when no Redis is around.
#[derive(Default)]
pub struct MemoryStore {
    sets: Mutex<HashMap<String, HashSet<String>>>,
}

#[async_trait]
impl PriorStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<HashSet<String>> {
        let sets = self.sets.lock().unwrap();
        Ok(sets.get(key).cloned().unwrap_or_default())
    }

    async fn replace(&self, key: &str, ports: &[String]) -> Result<()> {
        let mut sets = self.sets.lock().unwrap();
        sets.insert(key.to_string(), ports.iter().cloned().collect());
        Ok(())
    }
}
