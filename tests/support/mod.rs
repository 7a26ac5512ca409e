//! Shared fixtures: an in-memory entity store that records how it is queried.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use modelcache::application::repos::{EntityStore, RepoError};
use modelcache::domain::entities::Entity;
use modelcache::domain::types::{FieldMap, Scalar};

#[derive(Default)]
pub struct RecordingStore {
    rows: Mutex<Vec<FieldMap>>,
    delay: Option<Duration>,
    failing: AtomicBool,
    field_queries: AtomicUsize,
    primary_key_queries: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingStore {
    pub fn with_rows(rows: impl IntoIterator<Item = FieldMap>) -> Self {
        Self {
            rows: Mutex::new(rows.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Each field lookup sleeps for `delay` on the tokio clock.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn replace_rows(&self, rows: impl IntoIterator<Item = FieldMap>) {
        *self.rows.lock().expect("rows lock") = rows.into_iter().collect();
    }

    pub fn field_queries(&self) -> usize {
        self.field_queries.load(Ordering::SeqCst)
    }

    pub fn primary_key_queries(&self) -> usize {
        self.primary_key_queries.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn matching(&self, conditions: &FieldMap) -> Option<Entity> {
        self.rows
            .lock()
            .expect("rows lock")
            .iter()
            .find(|row| {
                conditions
                    .iter()
                    .all(|(name, value)| row.get(name) == Some(value))
            })
            .cloned()
            .map(Entity::from_fields)
    }
}

#[async_trait]
impl EntityStore for RecordingStore {
    fn primary_key(&self) -> &str {
        "id"
    }

    async fn find_by_primary_key(&self, value: &Scalar) -> Result<Option<Entity>, RepoError> {
        self.primary_key_queries.fetch_add(1, Ordering::SeqCst);
        let mut conditions = FieldMap::new();
        conditions.insert("id".to_string(), value.clone());
        Ok(self.matching(&conditions))
    }

    async fn find_by_fields(&self, conditions: &FieldMap) -> Result<Option<Entity>, RepoError> {
        self.field_queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepoError::Unavailable("connection refused".to_string()));
        }

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(self.matching(conditions))
    }
}
