use crate::backend::WindowStore;
use crate::error::ConfigError;
use actix_web::rt::task::JoinHandle;
use actix_web::rt::time::Instant;
use std::time::Duration;

pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60 * 5;

/// Background task that periodically evicts expired windows from a [WindowStore].
///
/// The task runs until the `Sweeper` is dropped. Sweeping only bounds memory, a missed or late
/// pass never changes a rate limit decision.
pub struct Sweeper {
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn the sweep loop on the current actix runtime. The first pass runs immediately.
    pub fn spawn<S>(store: S, interval: Duration) -> Result<Self, ConfigError>
    where
        S: WindowStore + 'static,
    {
        if interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }
        let handle = actix_web::rt::spawn(async move {
            loop {
                let now = Instant::now();
                match store.sweep_expired(now).await {
                    Ok(0) => {}
                    Ok(removed) => log::debug!("Swept {removed} expired rate limit windows"),
                    Err(e) => log::warn!("Rate limit sweep failed: {e}"),
                }
                actix_web::rt::time::sleep_until(now + interval).await;
            }
        });
        Ok(Self { handle })
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
