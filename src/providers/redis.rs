//! Remote key/value cache backend on Redis (feature `redis-backend`).
//!
//! Every record is a plain key holding the encoded payload, written with
//! `SET .. EX max_lifetime`. Several `;`-separated addresses select a
//! cluster pool. Expiry is enforced by the server, so [`gc`] is a
//! no-op and [`count`] always reports `0`: enumerating keys would require a
//! full keyspace scan.
//!
//! [`gc`]: SessionProvider::gc
//! [`count`]: SessionProvider::count

use async_trait::async_trait;
use deadpool_redis::redis::{self, FromRedisValue};
use deadpool_redis::{cluster, Config, Pool, PoolConfig, Runtime, Timeouts};
use std::future::Future;
use std::sync::Arc;

use super::config::RemoteCacheConfig;
use super::traits::{GcPolicy, SessionProvider, SessionStore};
use crate::session::error::{Result, SessionError};
use crate::session::id::{redact, validate_session_id};
use crate::session::state::SessionValues;

fn backend_err(err: impl std::fmt::Display) -> SessionError {
    SessionError::backend("redis", err)
}

/// A single node, or a cluster when several addresses are configured.
#[derive(Clone)]
enum RedisPool {
    Single(Pool),
    Cluster(cluster::Pool),
}

async fn checkout<C, E, F, Fut>(max_retries: u32, mut get: F) -> Result<C>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<C, E>>,
{
    let mut attempt = 0;
    loop {
        match get().await {
            Ok(conn) => return Ok(conn),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                tracing::debug!(provider = "redis", attempt, "Retrying connection: {e}");
            }
            Err(e) => return Err(backend_err(e)),
        }
    }
}

#[derive(Clone)]
struct RedisHandle {
    pool: RedisPool,
    ttl_secs: u64,
    max_retries: u32,
}

impl RedisHandle {
    fn is_cluster(&self) -> bool {
        matches!(self.pool, RedisPool::Cluster(_))
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        match &self.pool {
            RedisPool::Single(pool) => {
                let mut conn = checkout(self.max_retries, || pool.get()).await?;
                cmd.query_async(&mut conn).await.map_err(backend_err)
            }
            RedisPool::Cluster(pool) => {
                let mut conn = checkout(self.max_retries, || pool.get()).await?;
                cmd.query_async(&mut conn).await.map_err(backend_err)
            }
        }
    }

    async fn write(&self, sid: &str, data: &[u8]) -> Result<()> {
        self.query(redis::cmd("SET").arg(sid).arg(data).arg("EX").arg(self.ttl_secs))
            .await
    }

    async fn refresh(&self, sid: &str) -> Result<()> {
        self.query(redis::cmd("EXPIRE").arg(sid).arg(self.ttl_secs))
            .await
    }
}

fn build_pool(config: &RemoteCacheConfig) -> Result<RedisPool> {
    let mut pool_config = if config.pool_size == 0 {
        PoolConfig::default()
    } else {
        PoolConfig::new(config.pool_size)
    };
    pool_config.timeouts = Timeouts {
        recycle: config.idle_timeout,
        ..Timeouts::default()
    };

    if config.urls()?.len() == 1 {
        let mut cfg = Config::from_url(config.url()?);
        cfg.pool = Some(pool_config);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| SessionError::config(format!("redis pool: {e}")))?;
        return Ok(RedisPool::Single(pool));
    }

    if config.db_num != 0 {
        return Err(SessionError::config(
            "redis cluster only supports database 0",
        ));
    }
    let mut cfg = cluster::Config::from_urls(config.cluster_urls());
    cfg.pool = Some(pool_config);
    let pool = cfg
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| SessionError::config(format!("redis cluster pool: {e}")))?;
    Ok(RedisPool::Cluster(pool))
}

pub struct RedisProvider {
    handle: Option<RedisHandle>,
}

impl RedisProvider {
    pub fn new() -> Self {
        Self { handle: None }
    }

    fn handle(&self) -> Result<&RedisHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| SessionError::config("redis provider used before init"))
    }

    fn store(&self, sid: &str, data: &[u8]) -> Result<Arc<dyn SessionStore>> {
        Ok(Arc::new(RedisStore {
            values: SessionValues::decode(sid, data)?,
            handle: self.handle()?.clone(),
        }))
    }
}

impl Default for RedisProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionProvider for RedisProvider {
    async fn init(&mut self, max_lifetime: u64, config: &str) -> Result<()> {
        let config = RemoteCacheConfig::parse(config)?;
        if config.idle_check_frequency.is_some() {
            tracing::debug!(
                provider = "redis",
                "idle_check_frequency has no pool equivalent and is ignored"
            );
        }

        let pool = build_pool(&config)?;
        let nodes = config.addresses().len();
        self.handle = Some(RedisHandle {
            pool,
            ttl_secs: max_lifetime.max(1),
            max_retries: config.max_retries,
        });
        tracing::debug!(
            provider = "redis",
            pool_size = config.pool_size,
            nodes,
            "Redis pool ready"
        );
        Ok(())
    }

    async fn exists(&self, sid: &str) -> Result<bool> {
        validate_session_id(sid)?;
        self.handle()?.query(redis::cmd("EXISTS").arg(sid)).await
    }

    async fn read(&self, sid: &str) -> Result<Arc<dyn SessionStore>> {
        validate_session_id(sid)?;
        let handle = self.handle()?;
        let data: Option<Vec<u8>> = handle.query(redis::cmd("GET").arg(sid)).await?;

        let data = match data {
            Some(data) => {
                handle.refresh(sid).await?;
                data
            }
            None => {
                handle.write(sid, &[]).await?;
                Vec::new()
            }
        };
        self.store(sid, &data)
    }

    async fn regenerate(&self, old_sid: &str, sid: &str) -> Result<Arc<dyn SessionStore>> {
        validate_session_id(old_sid)?;
        validate_session_id(sid)?;
        let handle = self.handle()?;

        let data = if handle.is_cluster() {
            // The two keys may hash to different slots, where RENAME is refused.
            let old: Option<Vec<u8>> = handle.query(redis::cmd("GET").arg(old_sid)).await?;
            let data = old.unwrap_or_default();
            handle.write(sid, &data).await?;
            handle.query::<()>(redis::cmd("DEL").arg(old_sid)).await?;
            data
        } else {
            let old_exists: bool = handle.query(redis::cmd("EXISTS").arg(old_sid)).await?;
            if old_exists {
                handle
                    .query::<()>(redis::cmd("RENAME").arg(old_sid).arg(sid))
                    .await?;
                handle.refresh(sid).await?;
                handle
                    .query::<Option<Vec<u8>>>(redis::cmd("GET").arg(sid))
                    .await?
                    .unwrap_or_default()
            } else {
                handle.write(sid, &[]).await?;
                Vec::new()
            }
        };

        tracing::debug!(provider = "redis", old = %redact(old_sid), sid = %redact(sid), "Session regenerated");
        self.store(sid, &data)
    }

    async fn destroy(&self, sid: &str) -> Result<()> {
        validate_session_id(sid)?;
        self.handle()?.query(redis::cmd("DEL").arg(sid)).await
    }

    /// No-op: keys expire on the server.
    async fn gc(&self) -> Result<()> {
        Ok(())
    }

    /// Always `0`; counting would need a keyspace scan.
    async fn count(&self) -> Result<usize> {
        Ok(0)
    }

    fn gc_policy(&self) -> GcPolicy {
        GcPolicy::ServerTtl
    }

    fn name(&self) -> &str {
        "redis"
    }
}

struct RedisStore {
    values: SessionValues,
    handle: RedisHandle,
}

#[async_trait]
impl SessionStore for RedisStore {
    fn values(&self) -> &SessionValues {
        &self.values
    }

    async fn release(&self) -> Result<()> {
        let data = self.values.encode()?;
        self.handle.write(self.values.sid(), &data).await
    }
}
