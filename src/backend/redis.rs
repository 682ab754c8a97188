use crate::backend::{WindowEntry, WindowStore};
use crate::error::StoreError;
use actix_web::rt::time::Instant;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::borrow::Cow;
use std::time::Duration;

const BITFIELD_ENCODING: &str = "u63";
const BITFIELD_OFFSET: u8 = 0;

/// A fixed window [WindowStore] that stores data in Redis.
///
/// Counts are shared by every process connected to the same Redis instance, and windows expire
/// through the native key TTL, so no sweeping is needed.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: Option<String>,
}

impl RedisStore {
    /// Create a RedisStore Builder.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use tripbrief_rate_limit::backend::redis::RedisStore;
    /// # use redis::aio::ConnectionManager;
    /// # async fn example() {
    /// let client = redis::Client::open("redis://127.0.0.1/").unwrap();
    /// let manager = ConnectionManager::new(client).await.unwrap();
    /// let store = RedisStore::builder(manager)
    ///     .key_prefix(Some("tripbrief:ratelimit:"))
    ///     .build();
    /// # };
    /// ```
    pub fn builder(connection: ConnectionManager) -> Builder {
        Builder {
            connection,
            key_prefix: None,
        }
    }

    /// Open a managed connection to `url`.
    pub async fn connect(url: &str) -> Result<Builder, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::builder(connection))
    }

    fn make_key<'t>(&self, key: &'t str) -> Cow<'t, str> {
        match &self.key_prefix {
            None => Cow::Borrowed(key),
            Some(prefix) => Cow::Owned(format!("{prefix}{key}")),
        }
    }
}

pub struct Builder {
    connection: ConnectionManager,
    key_prefix: Option<String>,
}

impl Builder {
    /// Apply an optional prefix to all rate limit keys given to this store.
    ///
    /// This may be useful when the Redis instance is being used for other purposes; the prefix is
    /// used as a 'namespace' to avoid collision with other caches or keys inside Redis.
    pub fn key_prefix(mut self, key_prefix: Option<&str>) -> Self {
        self.key_prefix = key_prefix.map(ToOwned::to_owned);
        self
    }

    pub fn build(self) -> RedisStore {
        RedisStore {
            connection: self.connection,
            key_prefix: self.key_prefix,
        }
    }
}

impl WindowStore for RedisStore {
    async fn increment(&self, key: &str, interval: Duration) -> Result<WindowEntry, StoreError> {
        let key = self.make_key(key);
        let millis = u64::try_from(interval.as_millis())
            .map_err(|_| StoreError::IntervalOverflow(interval))?
            .max(1);

        let mut pipe = redis::pipe();
        pipe.atomic()
            // Increment the window count
            .cmd("BITFIELD")
            .arg(key.as_ref())
            .arg("OVERFLOW")
            .arg("SAT")
            .arg("INCRBY")
            .arg(BITFIELD_ENCODING)
            .arg(BITFIELD_OFFSET)
            .arg(1)
            // Start the window (only if the key doesn't already have an expiry)
            .cmd("PEXPIRE")
            .arg(key.as_ref())
            .arg(millis)
            .arg("NX")
            .ignore()
            // Return time-to-live of the window
            .cmd("PTTL")
            .arg(key.as_ref());

        let mut con = self.connection.clone();
        let (counts, ttl): (Vec<u64>, i64) = pipe.query_async(&mut con).await?;
        if ttl < 0 {
            return Err(StoreError::NegativeTtl);
        }
        let count = counts
            .first()
            .copied()
            .ok_or_else(|| StoreError::Unavailable("BITFIELD returned no value".to_owned()))?;

        Ok(WindowEntry {
            count,
            reset: Instant::now() + Duration::from_millis(ttl as u64),
        })
    }

    async fn sweep_expired(&self, _now: Instant) -> Result<usize, StoreError> {
        // Keys expire through their TTL
        Ok(0)
    }

    /// Note that the key prefix (if set) is automatically included, you do not need to prepend
    /// it yourself.
    async fn remove_key(&self, key: &str) -> Result<(), StoreError> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        let () = con.del(key.as_ref()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RatePolicy, WindowLimiter};

    const MINUTE: Duration = Duration::from_secs(60);

    // Each test must use non-overlapping keys (because the tests may be run concurrently)
    // Each test should also reset its key on each run, so that it is in a clean state.
    async fn make_store(clear_test_key: &str) -> Builder {
        let host = option_env!("REDIS_HOST").unwrap_or("127.0.0.1");
        let port = option_env!("REDIS_PORT").unwrap_or("6379");
        let client = redis::Client::open(format!("redis://{host}:{port}")).unwrap();
        let mut manager = ConnectionManager::new(client).await.unwrap();
        manager.del::<_, ()>(clear_test_key).await.unwrap();
        RedisStore::builder(manager)
    }

    #[actix_web::test]
    async fn test_increment() {
        let store = make_store("test_increment").await.build();
        for i in 1..=3 {
            let entry = store.increment("test_increment", MINUTE).await.unwrap();
            assert_eq!(entry.count, i);
            let until_reset = entry.reset.saturating_duration_since(Instant::now());
            assert!(until_reset > Duration::ZERO && until_reset <= MINUTE);
        }
    }

    #[actix_web::test]
    async fn test_window_expires() {
        let store = make_store("test_window_expires").await.build();
        let interval = Duration::from_millis(1500);
        store.increment("test_window_expires", interval).await.unwrap();
        let entry = store.increment("test_window_expires", interval).await.unwrap();
        assert_eq!(entry.count, 2);
        // Sleep until reset, the key should be gone and a new window started
        tokio::time::sleep(entry.reset.saturating_duration_since(Instant::now())).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let entry = store.increment("test_window_expires", interval).await.unwrap();
        assert_eq!(entry.count, 1);
    }

    #[actix_web::test]
    async fn test_allow_deny() {
        let store = make_store("test_allow_deny:minute").await.build();
        let limiter = WindowLimiter::builder(store)
            .policy(RatePolicy::per_minute(2).unwrap())
            .build()
            .unwrap();
        assert_eq!(limiter.check("test_allow_deny").await.remaining, 1);
        assert_eq!(limiter.check("test_allow_deny").await.remaining, 0);
        let decision = limiter.check("test_allow_deny").await;
        assert!(decision.is_denied());
        assert!(decision.failure_reason.is_some());
    }

    #[actix_web::test]
    async fn test_remove_key() {
        let store = make_store("test_remove_key").await.build();
        store.increment("test_remove_key", MINUTE).await.unwrap();
        store.increment("test_remove_key", MINUTE).await.unwrap();
        store.remove_key("test_remove_key").await.unwrap();
        // Counter should have been reset
        let entry = store.increment("test_remove_key", MINUTE).await.unwrap();
        assert_eq!(entry.count, 1);
    }

    #[actix_web::test]
    async fn test_key_prefix() {
        let store = make_store("prefix:test_key_prefix")
            .await
            .key_prefix(Some("prefix:"))
            .build();
        let mut con = store.connection.clone();
        store.increment("test_key_prefix", MINUTE).await.unwrap();
        assert!(con
            .exists::<_, bool>("prefix:test_key_prefix")
            .await
            .unwrap());

        store.remove_key("test_key_prefix").await.unwrap();
        assert!(!con
            .exists::<_, bool>("prefix:test_key_prefix")
            .await
            .unwrap());
    }
}
