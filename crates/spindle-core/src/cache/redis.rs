//! Redis cache backend (feature `redis`).
//!
//! A thin adapter from the [`CacheBackend`] port to Redis commands over a
//! multiplexed connection. Policy (TTL selection, namespacing, fail-open)
//! stays above; this module just maps calls:
//! GET / SET [EX] / DEL / EXISTS / SCAN MATCH / INCRBY / PING.

use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::AsyncCommands;
use async_trait::async_trait;

use super::backend::{CacheBackend, StoreError};

/// Networked key-value backend over Redis.
///
/// The multiplexed connection is cheap to clone; each operation clones it,
/// so one `RedisBackend` serves the whole pool.
pub struct RedisBackend {
    conn: MultiplexedConnection,
}

impl RedisBackend {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(url)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }
}

fn store_err(e: ::redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(store_err)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                let _: () = conn.set_ex(key, value, secs).await.map_err(store_err)?;
            }
            None => {
                let _: () = conn.set(key, value).await.map_err(store_err)?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await.map_err(store_err)?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let found: bool = conn.exists(key).await.map_err(store_err)?;
        Ok(found)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    async fn incr_by(&self, key: &str, amount: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        // INCRBY is atomic server-side. A non-integer value comes back as a
        // type error; fold it into the port's variant.
        let value: i64 = conn.incr(key, amount).await.map_err(|e| {
            if e.to_string().contains("not an integer") {
                StoreError::NotAnInteger {
                    key: key.to_string(),
                }
            } else {
                store_err(e)
            }
        })?;
        Ok(value)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
