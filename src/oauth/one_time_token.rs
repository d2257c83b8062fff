//! Single-use, TTL-bound opaque tokens for handing an authenticated session
//! across a redirect boundary.
//!
//! Tokens are stored under their hash, so the cache never holds a usable
//! credential. Consumption is an atomic get-and-delete.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::errors::OneTimeTokenError;
use crate::oauth::types::{generate_token, hash_token};

pub type Result<T> = std::result::Result<T, OneTimeTokenError>;

#[async_trait]
pub trait OneTimeTokenBroker: Send + Sync {
    /// Store `payload` and return the opaque token that redeems it.
    async fn issue(&self, payload: &Value, ttl: Duration) -> Result<String>;

    /// Return the payload at most once; `None` once used or expired.
    async fn consume_once(&self, token: &str) -> Result<Option<Value>>;
}

/// Process-local broker for single instance deployments and tests
#[derive(Default)]
pub struct MemoryOneTimeTokenBroker {
    entries: Mutex<HashMap<String, (Value, Instant)>>,
}

impl MemoryOneTimeTokenBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error<E: std::fmt::Display>(e: E) -> OneTimeTokenError {
    OneTimeTokenError::CacheUnavailable(format!("Lock error: {}", e))
}

#[async_trait]
impl OneTimeTokenBroker for MemoryOneTimeTokenBroker {
    async fn issue(&self, payload: &Value, ttl: Duration) -> Result<String> {
        let token = generate_token();
        let now = Instant::now();
        let mut entries = self.entries.lock().map_err(lock_error)?;
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.insert(hash_token(&token), (payload.clone(), now + ttl));
        Ok(token)
    }

    async fn consume_once(&self, token: &str) -> Result<Option<Value>> {
        let mut entries = self.entries.lock().map_err(lock_error)?;
        Ok(entries
            .remove(&hash_token(token))
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(payload, _)| payload))
    }
}

#[cfg(feature = "redis")]
pub use redis_broker::RedisOneTimeTokenBroker;

#[cfg(feature = "redis")]
mod redis_broker {
    use super::*;
    use deadpool_redis::Pool;

    /// Redis-backed broker shared by every server instance
    pub struct RedisOneTimeTokenBroker {
        pool: Pool,
        prefix: String,
    }

    impl RedisOneTimeTokenBroker {
        pub fn new(pool: Pool) -> Self {
            Self {
                pool,
                prefix: "authd:ott:".to_string(),
            }
        }

        /// Connect a pool for `redis_url`.
        pub fn from_url(redis_url: &str) -> Result<Self> {
            let pool = deadpool_redis::Config::from_url(redis_url)
                .create_pool(Some(deadpool::Runtime::Tokio1))
                .map_err(|e| OneTimeTokenError::CacheUnavailable(e.to_string()))?;
            Ok(Self::new(pool))
        }

        fn key(&self, token: &str) -> String {
            format!("{}{}", self.prefix, hash_token(token))
        }
    }

    #[async_trait]
    impl OneTimeTokenBroker for RedisOneTimeTokenBroker {
        async fn issue(&self, payload: &Value, ttl: Duration) -> Result<String> {
            let token = generate_token();
            let value = serde_json::to_string(payload)
                .map_err(|e| OneTimeTokenError::SerializationFailed(e.to_string()))?;

            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| OneTimeTokenError::CacheUnavailable(e.to_string()))?;

            let _: () = redis::cmd("SET")
                .arg(self.key(&token))
                .arg(value)
                .arg("EX")
                .arg(ttl.as_secs().max(1))
                .query_async(&mut conn)
                .await
                .map_err(|e| OneTimeTokenError::CacheUnavailable(e.to_string()))?;

            Ok(token)
        }

        async fn consume_once(&self, token: &str) -> Result<Option<Value>> {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| OneTimeTokenError::CacheUnavailable(e.to_string()))?;

            let value: Option<String> = redis::cmd("GETDEL")
                .arg(self.key(token))
                .query_async(&mut conn)
                .await
                .map_err(|e| OneTimeTokenError::CacheUnavailable(e.to_string()))?;

            value
                .map(|value| {
                    serde_json::from_str(&value)
                        .map_err(|e| OneTimeTokenError::SerializationFailed(e.to_string()))
                })
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_consume_once() {
        let broker = MemoryOneTimeTokenBroker::new();
        let payload = json!({"user_id": "user-1"});
        let token = broker.issue(&payload, Duration::from_secs(60)).await.unwrap();

        assert_eq!(broker.consume_once(&token).await.unwrap(), Some(payload));
        assert_eq!(broker.consume_once(&token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let broker = MemoryOneTimeTokenBroker::new();
        assert_eq!(broker.consume_once("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_token() {
        let broker = MemoryOneTimeTokenBroker::new();
        let token = broker
            .issue(&json!({"user_id": "user-1"}), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(broker.consume_once(&token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_consume_single_winner() {
        let broker = Arc::new(MemoryOneTimeTokenBroker::new());
        let token = broker
            .issue(&json!({"user_id": "user-1"}), Duration::from_secs(60))
            .await
            .unwrap();

        let attempts = (0..8).map(|_| {
            let broker = broker.clone();
            let token = token.clone();
            tokio::spawn(async move { broker.consume_once(&token).await })
        });
        let results = futures::future::join_all(attempts).await;
        let winners = results
            .into_iter()
            .filter(|result| matches!(result, Ok(Ok(Some(_)))))
            .count();
        assert_eq!(winners, 1);
    }
}
