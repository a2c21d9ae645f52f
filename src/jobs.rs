//! Job store: holds uploaded documents between the upload and stream phases.
//!
//! A job is created by [`JobStore::put`] and consumed exactly once by
//! [`JobStore::take`]. Both go through one mutex around a `HashMap`, and the
//! removal in `take` happens under that lock, so two concurrent `take` calls
//! for the same id can never both succeed. The lock is only held for the map
//! operation itself; rendering and analysis run long after it is released.
//!
//! Entries that are never streamed would otherwise live forever, so the store
//! also enforces a TTL and caps on entry count and total bytes.

use crate::config::JobStoreConfig;
use crate::error::PdfLayoutError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Opaque 128-bit job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    /// Mint a fresh random id.
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = PdfLayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(JobId)
            .map_err(|_| PdfLayoutError::JobNotFound {
                job_id: s.to_string(),
            })
    }
}

/// An uploaded document waiting to be streamed.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub filename: String,
    pub payload: Vec<u8>,
    pub created_at: Instant,
}

struct StoreInner {
    jobs: HashMap<JobId, Job>,
    total_bytes: usize,
}

impl StoreInner {
    fn remove(&mut self, id: &JobId) -> Option<Job> {
        let job = self.jobs.remove(id)?;
        self.total_bytes = self.total_bytes.saturating_sub(job.payload.len());
        Some(job)
    }

    fn evict_expired(&mut self, ttl: Duration, now: Instant) -> usize {
        let expired: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| now.duration_since(j.created_at) >= ttl)
            .map(|j| j.id)
            .collect();
        for id in &expired {
            self.remove(id);
        }
        expired.len()
    }
}

/// Single-consumption map from [`JobId`] to uploaded bytes.
pub struct JobStore {
    inner: Mutex<StoreInner>,
    config: JobStoreConfig,
}

impl JobStore {
    pub fn new(config: JobStoreConfig) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                jobs: HashMap::new(),
                total_bytes: 0,
            }),
            config,
        }
    }

    /// Register `payload` and return its freshly minted id.
    ///
    /// Expired entries are dropped first; if the store is still over one of
    /// its caps the upload is rejected with [`PdfLayoutError::StoreFull`].
    pub fn put(
        &self,
        payload: Vec<u8>,
        filename: impl Into<String>,
    ) -> Result<JobId, PdfLayoutError> {
        let size = payload.len();
        let mut inner = self.inner.lock();
        inner.evict_expired(self.config.ttl, Instant::now());

        if inner.jobs.len() >= self.config.max_jobs {
            return Err(PdfLayoutError::StoreFull {
                reason: format!("{} jobs already pending", inner.jobs.len()),
            });
        }
        if inner.total_bytes + size > self.config.max_total_bytes {
            return Err(PdfLayoutError::StoreFull {
                reason: format!(
                    "{} bytes pending, limit {}",
                    inner.total_bytes, self.config.max_total_bytes
                ),
            });
        }

        let mut id = JobId::new();
        while inner.jobs.contains_key(&id) {
            id = JobId::new();
        }

        inner.total_bytes += size;
        inner.jobs.insert(
            id,
            Job {
                id,
                filename: filename.into(),
                payload,
                created_at: Instant::now(),
            },
        );
        debug!(job_id = %id, bytes = size, "job registered");
        Ok(id)
    }

    /// Remove and return the job. `None` if unknown, consumed or expired.
    pub fn take(&self, id: &JobId) -> Option<Job> {
        let mut inner = self.inner.lock();
        let job = inner.remove(id)?;
        if job.created_at.elapsed() >= self.config.ttl {
            debug!(job_id = %id, "job expired before it was streamed");
            return None;
        }
        Some(job)
    }

    /// Check for a live entry without consuming it.
    pub fn contains(&self, id: &JobId) -> bool {
        self.inner
            .lock()
            .jobs
            .get(id)
            .is_some_and(|j| j.created_at.elapsed() < self.config.ttl)
    }

    /// Drop every entry older than the TTL. Returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        self.inner.lock().evict_expired(self.config.ttl, Instant::now())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().jobs.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    /// Periodically evict expired jobs until the returned task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = store.evict_expired();
                if evicted > 0 {
                    info!(evicted, "expired jobs evicted");
                }
            }
        })
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(JobStoreConfig::default())
    }
}
