#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub mod redis;

mod memory;

pub use memory::InMemoryStore;

use crate::error::StoreError;
use actix_web::rt::time::Instant;
use std::future::Future;
use std::time::Duration;

/// The state of one rate limit window.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WindowEntry {
    /// Requests accepted (or denied) so far in this window.
    pub count: u64,
    /// Time at which the window expires and the count starts again from zero.
    pub reset: Instant,
}

/// Describes a store of fixed rate limit windows, keyed by an opaque string.
///
/// A store is required to implement [Clone], usually this means wrapping your data store within
/// an [Arc](std::sync::Arc), although many connection pools already do so internally; there is no
/// need to wrap it twice.
pub trait WindowStore: Clone {
    /// Count a request against `key`.
    ///
    /// If the key is absent, or its window has expired, it is replaced by a fresh window with a
    /// count of 1 expiring after `interval`. Otherwise the count is incremented. The read and the
    /// write must be atomic with respect to concurrent calls for the same key.
    fn increment(
        &self,
        key: &str,
        interval: Duration,
    ) -> impl Future<Output = Result<WindowEntry, StoreError>>;

    /// Evict windows that expired before `now`, returning how many were removed.
    ///
    /// Stores with a native expiry mechanism may do nothing here.
    fn sweep_expired(&self, now: Instant) -> impl Future<Output = Result<usize, StoreError>>;

    /// Removes the window for a given key.
    ///
    /// Intended to be used to reset a key before changing the interval.
    fn remove_key(&self, key: &str) -> impl Future<Output = Result<(), StoreError>>;
}

/// A [WindowStore] chosen at runtime, see
/// [RateLimitConfig::start()](crate::RateLimitConfig::start).
#[derive(Clone)]
pub enum Store {
    Memory(InMemoryStore),
    #[cfg(feature = "redis")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
    Redis(redis::RedisStore),
}

impl Store {
    /// Whether the store relies on [sweep_expired](WindowStore::sweep_expired) to bound its
    /// memory.
    pub fn needs_sweeping(&self) -> bool {
        match self {
            Store::Memory(_) => true,
            #[cfg(feature = "redis")]
            Store::Redis(_) => false,
        }
    }
}

impl WindowStore for Store {
    async fn increment(&self, key: &str, interval: Duration) -> Result<WindowEntry, StoreError> {
        match self {
            Store::Memory(store) => store.increment(key, interval).await,
            #[cfg(feature = "redis")]
            Store::Redis(store) => store.increment(key, interval).await,
        }
    }

    async fn sweep_expired(&self, now: Instant) -> Result<usize, StoreError> {
        match self {
            Store::Memory(store) => store.sweep_expired(now).await,
            #[cfg(feature = "redis")]
            Store::Redis(store) => store.sweep_expired(now).await,
        }
    }

    async fn remove_key(&self, key: &str) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.remove_key(key).await,
            #[cfg(feature = "redis")]
            Store::Redis(store) => store.remove_key(key).await,
        }
    }
}
