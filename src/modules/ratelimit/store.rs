// Fast store adapter over Redis.
//
// One connection manager serves counters, the metadata cache, usage-delta
// buffers and the write DLQ. Every call is bounded by the configured
// read/write timeout; transport failures surface as AppError::FastStore
// and the caller decides fail-open vs fail-closed.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, IntoConnectionInfo, Script};

use crate::config::FastStoreConfig;
use crate::core::{AppError, Result};

#[derive(Clone)]
pub struct FastStore {
    conn: ConnectionManager,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl std::fmt::Debug for FastStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastStore").finish()
    }
}

impl FastStore {
    pub async fn connect(config: &FastStoreConfig) -> Result<Self> {
        let mut info = config
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| AppError::fast_store(format!("invalid Redis URL: {}", e)))?;
        if let Some(password) = &config.password {
            info.redis.password = Some(password.clone());
        }

        let client = redis::Client::open(info)
            .map_err(|e| AppError::fast_store(format!("invalid Redis URL: {}", e)))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::fast_store(format!("failed to connect: {}", e)))?;

        Ok(Self {
            conn,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        })
    }

    async fn bounded<T>(
        &self,
        timeout: Duration,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(AppError::FastStore(e.to_string())),
            Err(_) => Err(AppError::fast_store("operation timed out")),
        }
    }

    /// Evaluate a counter script. Scripts return `{allowed, remaining,
    /// reset_at}` as integers; the write timeout applies since every
    /// script mutates.
    pub async fn invoke_script(
        &self,
        script: &Script,
        key: &str,
        args: &[String],
    ) -> Result<Vec<i64>> {
        let mut conn = self.conn.clone();
        let mut invocation = script.key(key);
        for arg in args {
            invocation.arg(arg);
        }
        self.bounded(self.write_timeout, invocation.invoke_async::<Vec<i64>>(&mut conn))
            .await
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        self.bounded(
            self.read_timeout,
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await?;
        Ok(())
    }

    // -- opaque string values ------------------------------------------------

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        self.bounded(self.read_timeout, conn.get::<_, Option<String>>(key))
            .await
    }

    pub async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        self.bounded(self.read_timeout, conn.mget::<_, Vec<Option<String>>>(keys))
            .await
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        self.bounded(
            self.write_timeout,
            conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()),
        )
        .await
    }

    /// SET NX EX; returns true when the key was set. Used as the
    /// best-effort single-flight lock for cache refresh.
    pub async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let outcome: Option<String> = self
            .bounded(
                self.write_timeout,
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl.as_secs())
                    .query_async(&mut conn),
            )
            .await?;
        Ok(outcome.is_some())
    }

    pub async fn del(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        self.bounded(self.write_timeout, conn.del::<_, ()>(keys)).await
    }

    /// Atomic read-and-delete, used when draining usage-delta buffers.
    pub async fn get_del(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        self.bounded(
            self.write_timeout,
            redis::cmd("GETDEL").arg(key).query_async(&mut conn),
        )
        .await
    }

    // -- counters ------------------------------------------------------------

    /// Pipelined INCRBY + EXPIRE, used for cached aggregates such as the
    /// per-key usage-delta buffer and the violation counter.
    pub async fn incr_by_expire(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        let mut conn = self.conn.clone();
        let (count,): (i64,) = self
            .bounded(
                self.write_timeout,
                redis::pipe()
                    .atomic()
                    .incr(key, delta)
                    .expire(key, ttl.as_secs() as i64)
                    .ignore()
                    .query_async(&mut conn),
            )
            .await?;
        Ok(count)
    }

    // -- sorted sets / hashes (read-only peeks) ------------------------------

    pub async fn zremrangebyscore(&self, key: &str, max_score: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        self.bounded(
            self.write_timeout,
            conn.zrembyscore::<_, _, _, i64>(key, 0, max_score),
        )
        .await
    }

    pub async fn zcard(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        self.bounded(self.read_timeout, conn.zcard::<_, i64>(key)).await
    }

    /// Score of the oldest member, if any
    pub async fn zmin_score(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let entries: Vec<(String, i64)> = self
            .bounded(
                self.read_timeout,
                conn.zrange_withscores::<_, Vec<(String, i64)>>(key, 0, 0),
            )
            .await?;
        Ok(entries.first().map(|(_, score)| *score))
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        self.bounded(self.read_timeout, conn.hgetall::<_, HashMap<String, String>>(key))
            .await
    }

    pub async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        self.bounded(self.read_timeout, conn.get::<_, Option<i64>>(key))
            .await
    }

    // -- dead letters --------------------------------------------------------

    pub async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        self.bounded(self.write_timeout, conn.lpush::<_, _, ()>(key, value))
            .await
    }

    // -- key iteration -------------------------------------------------------

    /// Cursor-based SCAN. Pattern scans never use KEYS; this is only called
    /// from background tasks, never the decision path.
    pub async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut found = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .bounded(
                    self.read_timeout,
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(100)
                        .query_async(&mut conn),
                )
                .await?;

            found.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(found)
    }
}
