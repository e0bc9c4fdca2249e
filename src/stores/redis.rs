use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::future::Future;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::error::BackendError;
use crate::store::{Backend, ServerInfo};

/// Redis-backed [`Backend`].
///
/// Uses one multiplexed connection, cloned per command. The connection is
/// opened within the configured connect timeout and verified with `PING`;
/// every command after that is bounded by the read timeout.
pub struct RedisBackend {
    connection: MultiplexedConnection,
    read_timeout: Duration,
}

impl RedisBackend {
    /// Connect to the server described by `config`.
    ///
    /// Credentials and the database index travel in the connection info, so a
    /// failed `AUTH` or `SELECT` surfaces here as a connection error.
    ///
    /// # Example
    /// ```ignore
    /// let config = CacheConfig::load()?;
    /// let backend = RedisBackend::connect(&config).await?;
    /// ```
    pub async fn connect(config: &CacheConfig) -> Result<Self, BackendError> {
        let client = redis::Client::open(config.connection_info()).map_err(|e| {
            BackendError::Connection(format!("invalid connection parameters: {e}"))
        })?;

        let connect_timeout = config.connect_timeout();
        let connection =
            tokio::time::timeout(connect_timeout, client.get_multiplexed_async_connection())
                .await
                .map_err(|_| BackendError::Timeout {
                    op: "CONNECT",
                    after: connect_timeout,
                })?
                .map_err(|e| {
                    BackendError::Connection(format!("failed to connect to Redis: {e}"))
                })?;

        let backend = RedisBackend {
            connection,
            read_timeout: config.read_timeout(),
        };
        backend.ping().await?;

        tracing::info!(endpoint = %config.endpoint(), db = config.database, "connected to Redis");
        Ok(backend)
    }

    /// Await a command within the read timeout.
    async fn run<T, F>(&self, op: &'static str, command: F) -> Result<T, BackendError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.read_timeout, command).await {
            Ok(result) => result.map_err(|e| BackendError::redis(op, e)),
            Err(_) => Err(BackendError::Timeout {
                op,
                after: self.read_timeout,
            }),
        }
    }
}

#[async_trait]
impl Backend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let mut conn = self.connection.clone();
        let _: String = self
            .run("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut conn = self.connection.clone();
        self.run("GET", conn.get(key)).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, BackendError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection.clone();
        self.run("MGET", redis::cmd("MGET").arg(keys).query_async(&mut conn))
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl: u64) -> Result<(), BackendError> {
        let mut conn = self.connection.clone();
        if ttl > 0 {
            self.run("SETEX", conn.set_ex(key, value, ttl)).await
        } else {
            self.run("SET", conn.set(key, value)).await
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        self.run("DEL", conn.del(keys)).await
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let mut conn = self.connection.clone();
        self.run("EXISTS", conn.exists(key)).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, BackendError> {
        let mut conn = self.connection.clone();
        self.run("INCRBY", conn.incr(key, delta)).await
    }

    async fn decr_by(&self, key: &str, delta: i64) -> Result<i64, BackendError> {
        let mut conn = self.connection.clone();
        self.run("DECRBY", conn.decr(key, delta)).await
    }

    async fn hash_get(&self, hash_id: &str, field: &str) -> Result<Option<String>, BackendError> {
        let mut conn = self.connection.clone();
        self.run("HGET", conn.hget(hash_id, field)).await
    }

    async fn hash_get_many(
        &self,
        hash_id: &str,
        fields: &[String],
    ) -> Result<Vec<Option<String>>, BackendError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection.clone();
        self.run(
            "HMGET",
            redis::cmd("HMGET")
                .arg(hash_id)
                .arg(fields)
                .query_async(&mut conn),
        )
        .await
    }

    async fn hash_set(&self, hash_id: &str, field: &str, value: &str) -> Result<(), BackendError> {
        let mut conn = self.connection.clone();
        let _: i64 = self.run("HSET", conn.hset(hash_id, field, value)).await?;
        Ok(())
    }

    async fn hash_delete(&self, hash_id: &str, field: &str) -> Result<bool, BackendError> {
        let mut conn = self.connection.clone();
        let removed: u64 = self.run("HDEL", conn.hdel(hash_id, field)).await?;
        Ok(removed > 0)
    }

    async fn hash_exists(&self, hash_id: &str, field: &str) -> Result<bool, BackendError> {
        let mut conn = self.connection.clone();
        self.run("HEXISTS", conn.hexists(hash_id, field)).await
    }

    async fn hash_incr_by(
        &self,
        hash_id: &str,
        field: &str,
        delta: i64,
    ) -> Result<i64, BackendError> {
        let mut conn = self.connection.clone();
        self.run("HINCRBY", conn.hincr(hash_id, field, delta)).await
    }

    async fn ttl(&self, key: &str) -> Result<i64, BackendError> {
        let mut conn = self.connection.clone();
        self.run("TTL", conn.ttl(key)).await
    }

    async fn expire(&self, key: &str, ttl: u64) -> Result<bool, BackendError> {
        let mut conn = self.connection.clone();
        self.run(
            "EXPIRE",
            redis::cmd("EXPIRE").arg(key).arg(ttl).query_async(&mut conn),
        )
        .await
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), BackendError> {
        let mut conn = self.connection.clone();
        self.run(
            "SCAN",
            redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(count)
                .query_async(&mut conn),
        )
        .await
    }

    async fn flush_db(&self) -> Result<(), BackendError> {
        let mut conn = self.connection.clone();
        let _: String = self
            .run("FLUSHDB", redis::cmd("FLUSHDB").query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn info(&self) -> Result<ServerInfo, BackendError> {
        let mut conn = self.connection.clone();
        let text: String = self
            .run("INFO", redis::cmd("INFO").query_async(&mut conn))
            .await?;
        Ok(ServerInfo::parse(&text))
    }
}
