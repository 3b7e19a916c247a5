//! # Redis Client for the Ephemeral Store
//!
//! High-level Redis client for everything short-lived the IdP tracks:
//!
//! | Use Case | Keys | Operations |
//! |----------|------|------------|
//! | **Rate limiting & lockout** | `rl:*`, `failed_login:*` | atomic INCR + EXPIRE |
//! | **Token blacklist** | `blacklist:token:*` | SETEX / EXISTS |
//! | **OAuth state nonces** | `oauth:state:*` | SET NX + TTL |
//! | **Device-grant status** | `device:*` | SETEX / GET |
//! | **Login-alert fingerprints** | `fingerprints:*` | SADD / EXPIRE |
//! | **SAML replay cache** | `saml:assertion:*` | SET NX + TTL |
//! | **Permission cache** | `perm:*` | SETEX / GET / DEL |
//!
//! ## Connection Management
//!
//! We use a `ConnectionManager` which automatically reconnects on failure.
//! This is more resilient than a simple connection for long-running services.
//!
//! ## TTL Discipline
//!
//! Every key written by this client carries a TTL: the ephemeral store is
//! allowed to lose data, and nothing here is a source of truth. Counters
//! get their window TTL on first increment; single-shot markers live for
//! exactly the lifetime of the artefact they guard.
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use shared::redis_client::RedisClient;
//! use std::time::Duration;
//!
//! let redis = RedisClient::new(&config.redis).await?;
//!
//! // Sliding-window counter (rate limiting)
//! let n = redis.incr_window("rl:otp:u@x.com", Duration::from_secs(3600)).await?;
//!
//! // Single-shot claim (state nonce, replay cache)
//! let fresh = redis.set_nx("oauth:state:abc", &true, Duration::from_secs(300)).await?;
//! ```

use crate::config::RedisConfig;
use crate::errors::ApiError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

// =============================================================================
// Redis Client
// =============================================================================

/// Async Redis client with automatic reconnection.
///
/// This client wraps a `ConnectionManager` which handles connection
/// failures automatically. It's safe to clone and share across tasks.
#[derive(Clone)]
pub struct RedisClient {
    /// Connection manager for automatic reconnection
    conn: ConnectionManager,
}

impl RedisClient {
    /// Creates a new Redis client and establishes connection.
    ///
    /// ## Errors
    ///
    /// Returns `ApiError::RedisError` if the URL is invalid, the server is
    /// unreachable, or authentication fails.
    pub async fn new(config: &RedisConfig) -> Result<Self, ApiError> {
        info!(url = %config.url, "Connecting to Redis");

        let client = redis::Client::open(config.url.as_str()).map_err(ApiError::RedisError)?;

        // Connection manager handles reconnection automatically
        let conn = ConnectionManager::new(client)
            .await
            .map_err(ApiError::RedisError)?;

        info!("Redis connection established");

        Ok(Self { conn })
    }

    // =========================================================================
    // Basic Operations
    // =========================================================================

    /// Stores a value with optional TTL (Time To Live).
    ///
    /// The value is serialized to JSON before storage.
    pub async fn set<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), ApiError> {
        let serialized = serde_json::to_string(value).map_err(|e| ApiError::InternalError {
            message: e.to_string(),
        })?;

        let mut conn = self.conn.clone();

        match ttl {
            Some(duration) => {
                conn.set_ex::<_, _, ()>(key, &serialized, duration.as_secs())
                    .await
                    .map_err(ApiError::RedisError)?;
            }
            None => {
                conn.set::<_, _, ()>(key, &serialized)
                    .await
                    .map_err(ApiError::RedisError)?;
            }
        }

        Ok(())
    }

    /// Retrieves and deserializes a value.
    ///
    /// ## Returns
    ///
    /// - `Ok(Some(value))` - Key exists and was deserialized
    /// - `Ok(None)` - Key doesn't exist
    pub async fn get<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, ApiError> {
        let mut conn = self.conn.clone();

        let value: Option<String> = conn.get(key).await.map_err(ApiError::RedisError)?;

        match value {
            Some(s) => {
                let deserialized = serde_json::from_str(&s).map_err(|e| ApiError::InternalError {
                    message: e.to_string(),
                })?;
                Ok(Some(deserialized))
            }
            None => Ok(None),
        }
    }

    /// Deletes a key. Returns `true` if the key existed.
    pub async fn delete(&self, key: &str) -> Result<bool, ApiError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn.del(key).await.map_err(ApiError::RedisError)?;
        Ok(deleted > 0)
    }

    /// Checks if a key exists.
    pub async fn exists(&self, key: &str) -> Result<bool, ApiError> {
        let mut conn = self.conn.clone();
        conn.exists(key).await.map_err(ApiError::RedisError)
    }

    /// Sets TTL on an existing key. Returns `false` if the key doesn't exist.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, ApiError> {
        let mut conn = self.conn.clone();
        conn.expire(key, ttl.as_secs() as i64)
            .await
            .map_err(ApiError::RedisError)
    }

    /// Remaining TTL of a key in seconds. `None` when the key doesn't
    /// exist or has no expiry. Used for `Retry-After` hints.
    pub async fn ttl_seconds(&self, key: &str) -> Result<Option<u64>, ApiError> {
        let mut conn = self.conn.clone();
        let ttl: i64 = conn.ttl(key).await.map_err(ApiError::RedisError)?;
        if ttl > 0 {
            Ok(Some(ttl as u64))
        } else {
            Ok(None)
        }
    }

    /// Health check - verifies Redis is responding.
    pub async fn ping(&self) -> Result<(), ApiError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(ApiError::RedisError)?;
        Ok(())
    }

    // =========================================================================
    // Atomic Primitives
    // =========================================================================
    // Counter increments and single-shot consumption must be atomic
    // across all workers; these primitives are what the services lean on.

    /// Increments a counter (atomic). Creates the key with value 1 if it
    /// doesn't exist. Returns the new value.
    pub async fn incr(&self, key: &str) -> Result<i64, ApiError> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1).await.map_err(ApiError::RedisError)
    }

    /// Increments a sliding-window counter.
    ///
    /// The window TTL is attached on first increment, so the counter
    /// resets when the window expires. This is the building block for all
    /// rate limits and the failed-login lockout counter.
    pub async fn incr_window(&self, key: &str, window: Duration) -> Result<i64, ApiError> {
        let count = self.incr(key).await?;

        if count == 1 {
            self.expire(key, window).await?;
        }

        Ok(count)
    }

    /// Reads a counter without incrementing. Returns 0 for a missing key.
    pub async fn get_counter(&self, key: &str) -> Result<i64, ApiError> {
        let mut conn = self.conn.clone();
        let count: Option<i64> = conn.get(key).await.map_err(ApiError::RedisError)?;
        Ok(count.unwrap_or(0))
    }

    /// Atomically claims a key: `SET key value NX EX ttl`.
    ///
    /// Returns `true` if this caller created the key (won the claim),
    /// `false` if it already existed. Used for replay caches and one-shot
    /// markers where the loser must be rejected.
    pub async fn set_nx<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<bool, ApiError> {
        let serialized = serde_json::to_string(value).map_err(|e| ApiError::InternalError {
            message: e.to_string(),
        })?;

        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&serialized)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(ApiError::RedisError)?;

        // Redis replies OK when the key was set, nil when it existed
        Ok(result.is_some())
    }

    /// Adds a member to a set with a TTL, returning `true` when the
    /// member is new.
    ///
    /// Backs the per-user login-alert fingerprint set: the first sighting
    /// of a fingerprint is what triggers the `user.login_alert` webhook.
    pub async fn add_to_set(
        &self,
        key: &str,
        member: &str,
        ttl: Duration,
    ) -> Result<bool, ApiError> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(key, member).await.map_err(ApiError::RedisError)?;

        // Refresh the TTL on every touch so the set expires relative to
        // the most recent login, not the first
        conn.expire::<_, bool>(key, ttl.as_secs() as i64)
            .await
            .map_err(ApiError::RedisError)?;

        Ok(added > 0)
    }

    // =========================================================================
    // Token Blacklist
    // =========================================================================

    /// Adds an access token hash to the blacklist (for logout).
    ///
    /// ## Implementation Note
    ///
    /// We only need to blacklist until the token would have expired
    /// anyway; the TTL should match the token's remaining lifetime.
    pub async fn blacklist_token(&self, token_hash: &str, ttl: Duration) -> Result<(), ApiError> {
        let key = format!("blacklist:token:{}", token_hash);
        self.set(&key, &true, Some(ttl)).await
    }

    /// Checks if a token hash is blacklisted.
    pub async fn is_token_blacklisted(&self, token_hash: &str) -> Result<bool, ApiError> {
        let key = format!("blacklist:token:{}", token_hash);
        self.exists(&key).await
    }
}

// Hide internal state in Debug output
impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient").finish_non_exhaustive()
    }
}
