/// Redis wrapper with graceful degradation.
///
/// Counters and lists return `Option<T>` or `bool`: on any Redis error the operation logs a
/// warning and reports failure. Record reads and writes (`try_get`, `try_set_with_ttl`)
/// surface `CommonError` so callers can tell "missing" from "unreachable".
/// Diagnosis itself never depends on Redis.
use std::collections::HashMap;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::warn;

use crate::error::CommonError;

#[derive(Clone)]
pub struct RedisCache {
    client: Option<redis::Client>,
}

impl RedisCache {
    /// Build a client for `url`. If the URL is `None` or invalid, every operation is a no-op.
    pub fn new(url: Option<&str>) -> Self {
        let client = url.and_then(|u| {
            redis::Client::open(u)
                .inspect_err(|e| {
                    warn!(error = %e, url = u, "failed to create redis client, store disabled")
                })
                .ok()
        });
        Self { client }
    }

    /// A cache that never connects. Used when no `REDIS_URL` is configured.
    pub fn disabled() -> Self {
        Self { client: None }
    }

    async fn connection(&self) -> Option<MultiplexedConnection> {
        let client = self.client.as_ref()?;
        client
            .get_multiplexed_async_connection()
            .await
            .inspect_err(|e| warn!(error = %e, "redis connection failed"))
            .ok()
    }

    /// Sends a PING. Returns `true` if Redis is reachable.
    pub async fn is_available(&self) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        result.is_ok()
    }

    /// `Ok(None)` for a missing key; `Err` when the store is unconfigured or unreachable.
    pub async fn try_get(&self, key: &str) -> Result<Option<String>, CommonError> {
        let client = self.client.as_ref().ok_or(CommonError::RedisUnavailable)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        Ok(conn.get(key).await?)
    }

    pub async fn try_set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), CommonError> {
        let client = self.client.as_ref().ok_or(CommonError::RedisUnavailable)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    /// Pushes `value` to the head of the list at `key` and trims it to `max_len` entries.
    pub async fn push_capped(&self, key: &str, value: &str, max_len: usize) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        let stop = max_len.saturating_sub(1) as isize;
        let result: Result<(), _> = redis::pipe()
            .atomic()
            .lpush(key, value)
            .ignore()
            .ltrim(key, 0, stop)
            .ignore()
            .query_async(&mut conn)
            .await;
        result
            .inspect_err(|e| warn!(error = %e, key, "redis LPUSH/LTRIM failed"))
            .is_ok()
    }

    /// First `count` entries of the list at `key`, head first.
    pub async fn list_head(&self, key: &str, count: usize) -> Option<Vec<String>> {
        if count == 0 {
            return Some(Vec::new());
        }
        let mut conn = self.connection().await?;
        conn.lrange(key, 0, count as isize - 1)
            .await
            .inspect_err(|e| warn!(error = %e, key, "redis LRANGE failed"))
            .ok()
    }

    pub async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        conn.hincr::<_, _, _, i64>(key, field, delta)
            .await
            .inspect_err(|e| warn!(error = %e, key, field, "redis HINCRBY failed"))
            .is_ok()
    }

    pub async fn hgetall(&self, key: &str) -> Option<HashMap<String, String>> {
        let mut conn = self.connection().await?;
        conn.hgetall(key)
            .await
            .inspect_err(|e| warn!(error = %e, key, "redis HGETALL failed"))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_cache_degrades_to_noops() {
        let cache = RedisCache::disabled();
        assert!(!cache.is_available().await);
        assert!(matches!(cache.try_get("k").await, Err(CommonError::RedisUnavailable)));
        assert!(matches!(
            cache.try_set_with_ttl("k", "v", 10).await,
            Err(CommonError::RedisUnavailable)
        ));
        assert!(!cache.push_capped("l", "v", 10).await);
        assert!(cache.list_head("l", 10).await.is_none());
        assert!(!cache.hincr_by("h", "f", 1).await);
        assert!(cache.hgetall("h").await.is_none());
    }

    #[test]
    fn invalid_url_disables_client() {
        let cache = RedisCache::new(Some("not a url"));
        assert!(cache.client.is_none());
    }
}
