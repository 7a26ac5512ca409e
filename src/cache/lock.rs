//! Advisory stampede lock serializing cache-miss fallbacks per key.
//!
//! `acquire` polls for the absence of the marker at `prefix + key`, bounded by
//! `max_wait` from the first check. When the wait runs out it writes its own
//! marker anyway: two callers can both observe absence and both proceed, so
//! at-most-one fallback per key is best effort only.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::runtime::Handle;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use super::store::{KeyValueStore, StoreError};

const METRIC_LOCK_TIMEOUT_TOTAL: &str = "modelcache_lock_timeout_total";
const METRIC_LOCK_WAIT_MS: &str = "modelcache_lock_wait_ms";

pub const DEFAULT_LOCK_PREFIX: &str = "setcachelock:";
pub const DEFAULT_LOCK_MAX_WAIT: Duration = Duration::from_secs(5);
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(60);

const LOCK_MARKER: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    pub prefix: String,
    pub max_wait: Duration,
    pub poll_interval: Duration,
    /// Expiry on the marker itself, so a holder that never releases cannot
    /// wedge the key forever.
    pub lease: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_LOCK_PREFIX.to_string(),
            max_wait: DEFAULT_LOCK_MAX_WAIT,
            poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
            lease: DEFAULT_LOCK_LEASE,
        }
    }
}

pub struct StampedeLock {
    store: Arc<dyn KeyValueStore>,
    config: LockConfig,
    entity: String,
}

impl StampedeLock {
    pub fn new(store: Arc<dyn KeyValueStore>, config: LockConfig, entity: impl Into<String>) -> Self {
        Self {
            store,
            config,
            entity: entity.into(),
        }
    }

    pub fn lock_key(&self, key: &str) -> String {
        format!("{}{key}", self.config.prefix)
    }

    /// Wait for the marker to clear, then write ours.
    ///
    /// Returns `false` when the wait timed out and the marker was written
    /// over a holder that may still be running.
    pub async fn acquire(&self, key: &str) -> Result<bool, StoreError> {
        let lock_key = self.lock_key(key);
        let started_at = Instant::now();

        let mut acquired = true;
        while self.store.exists(&lock_key).await? {
            if started_at.elapsed() >= self.config.max_wait {
                acquired = false;
                break;
            }
            sleep(self.config.poll_interval).await;
        }

        let waited = started_at.elapsed();
        histogram!(METRIC_LOCK_WAIT_MS, "entity" => self.entity.clone())
            .record(waited.as_secs_f64() * 1000.0);

        if !acquired {
            counter!(METRIC_LOCK_TIMEOUT_TOTAL, "entity" => self.entity.clone()).increment(1);
            warn!(
                entity = %self.entity,
                lock_key = %lock_key,
                waited_ms = waited.as_millis() as u64,
                "Stampede lock wait timed out; proceeding without exclusivity"
            );
        }

        self.store
            .set_scalar_with_expiry(&lock_key, self.config.lease, LOCK_MARKER)
            .await?;
        debug!(entity = %self.entity, lock_key = %lock_key, acquired, "Stampede lock marker set");
        Ok(acquired)
    }

    /// Remove the marker unconditionally.
    pub async fn release(&self, key: &str) -> Result<bool, StoreError> {
        self.store.delete(&self.lock_key(key)).await
    }

    /// Run `section` between `acquire` and `release`.
    ///
    /// The marker is released whether the section succeeds or fails; a failed
    /// release is logged and never replaces the section's own outcome. If the
    /// returned future is dropped mid-section, the release is spawned onto the
    /// current runtime instead.
    pub async fn with_lock<T, E, F>(&self, key: &str, section: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<StoreError>,
    {
        self.acquire(key).await?;
        let guard = MarkerGuard {
            store: self.store.clone(),
            lock_key: self.lock_key(key),
            entity: self.entity.clone(),
            armed: true,
        };
        let outcome = section.await;
        guard.release().await;
        outcome
    }
}

/// Releases a held marker, on completion or on drop.
struct MarkerGuard {
    store: Arc<dyn KeyValueStore>,
    lock_key: String,
    entity: String,
    armed: bool,
}

impl MarkerGuard {
    async fn release(mut self) {
        self.armed = false;
        if let Err(err) = self.store.delete(&self.lock_key).await {
            warn!(
                entity = %self.entity,
                lock_key = %self.lock_key,
                error = %err,
                "Failed to release stampede lock; marker will lapse with its lease"
            );
        }
    }
}

impl Drop for MarkerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!(
                entity = %self.entity,
                lock_key = %self.lock_key,
                "Lock section cancelled outside a runtime; marker will lapse with its lease"
            );
            return;
        };
        let store = self.store.clone();
        let lock_key = std::mem::take(&mut self.lock_key);
        let entity = std::mem::take(&mut self.entity);
        debug!(entity = %entity, lock_key = %lock_key, "Lock section cancelled; releasing marker");
        handle.spawn(async move {
            if let Err(err) = store.delete(&lock_key).await {
                warn!(
                    entity = %entity,
                    lock_key = %lock_key,
                    error = %err,
                    "Failed to release stampede lock; marker will lapse with its lease"
                );
            }
        });
    }
}
