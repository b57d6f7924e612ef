//! Key-value storage backends for durable state.
//!
//! `RedisStore` is the production backend; `MemoryStore` backs tests and
//! local runs without Redis.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::core::error::AppResult;

/// Minimal string key-value contract the task store needs.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value under `key`, or `None` if it was never written.
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Overwrites the value under `key`.
    async fn set(&self, key: &str, value: &str) -> AppResult<()>;
}

/// Redis-backed store with a lazily opened multiplexed connection.
///
/// A failed command drops the cached connection so the next call reconnects.
pub struct RedisStore {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisStore {
    /// Validates the URL; no connection is opened until the first command.
    pub fn open(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
        })
    }

    async fn connection(&self) -> AppResult<MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        log::debug!("Redis connection established");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn invalidate(&self) {
        *self.connection.lock().await = None;
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<Option<String>> = redis::cmd("GET").arg(key).query_async(&mut conn).await;
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                self.invalidate().await;
                Err(e.into())
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<()> = redis::cmd("SET").arg(key).arg(value).query_async(&mut conn).await;
        if let Err(e) = result {
            self.invalidate().await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// In-process store.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.values.lock().await.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
