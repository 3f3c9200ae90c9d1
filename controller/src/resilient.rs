use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

use regulator_common::TtlCache;

use crate::adapters::FetchError;

#[async_trait]
pub trait Upstream<T>: Send + Sync {
    async fn fetch(&self) -> Result<T, FetchError>;
}

#[async_trait]
pub trait SnapshotStore<T>: Send + Sync {
    async fn load(&self) -> anyhow::Result<Option<T>>;
    async fn save(&self, value: &T) -> anyhow::Result<()>;
}

pub struct CacheSource<T> {
    pub upstream: Arc<dyn Upstream<T>>,
    pub snapshot: Arc<dyn SnapshotStore<T>>,
}

impl<T> Clone for CacheSource<T> {
    fn clone(&self) -> Self {
        Self {
            upstream: Arc::clone(&self.upstream),
            snapshot: Arc::clone(&self.snapshot),
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{cache} unavailable and no durable snapshot: {source}")]
    Unavailable {
        cache: &'static str,
        source: FetchError,
    },
}

// Only a miss with a failing upstream and no snapshot is an error.
pub struct ResilientCache<T> {
    name: &'static str,
    entries: Arc<Mutex<TtlCache<T>>>,
    // Bumped under the `entries` lock whenever a value newer than a running
    // background refresh is known.
    generation: Arc<AtomicU64>,
    refresh: Mutex<Option<JoinHandle<()>>>,
}

impl<T> ResilientCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        let ttl_ms = ttl.as_millis().try_into().unwrap_or(u64::MAX);
        Self {
            name,
            entries: Arc::new(Mutex::new(TtlCache::new(ttl_ms))),
            generation: Arc::new(AtomicU64::new(0)),
            refresh: Mutex::new(None),
        }
    }

    pub async fn get(&self, key: &str, source: &CacheSource<T>) -> Result<T, CacheError> {
        let cached = { self.entries.lock().await.get(key, epoch_ms()) };

        match cached {
            Some(value) => {
                self.spawn_refresh(key, source).await;
                Ok(value)
            }
            None => self.fetch_through(key, source, None).await,
        }
    }

    // A rate-limited upstream is answered from the valid entry.
    pub async fn fetch_now(&self, key: &str, source: &CacheSource<T>) -> Result<T, CacheError> {
        let cached = { self.entries.lock().await.peek(key, epoch_ms()).cloned() };
        self.fetch_through(key, source, cached).await
    }

    pub async fn set(&self, key: &str, value: T) {
        let mut entries = self.entries.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.set(key, value, epoch_ms());
    }

    // Once this returns, a running background refresh no longer writes the snapshot.
    pub async fn supersede(&self) {
        let _entries = self.entries.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn refresh_in_flight(&self) -> bool {
        self.refresh
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub async fn settle(&self) {
        let handle = self.refresh.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(cache = self.name, "background refresh task aborted: {err}");
            }
        }
    }

    async fn fetch_through(
        &self,
        key: &str,
        source: &CacheSource<T>,
        cached: Option<T>,
    ) -> Result<T, CacheError> {
        let err = match source.upstream.fetch().await {
            Ok(value) => {
                self.store(key, &value, source.snapshot.as_ref()).await;
                return Ok(value);
            }
            Err(err) => err,
        };

        if let (FetchError::RateLimited(message), Some(value)) = (&err, cached) {
            info!(cache = self.name, "rate limited, serving cached value: {message}");
            return Ok(value);
        }

        match source.snapshot.load().await {
            Ok(Some(value)) => {
                warn!(
                    cache = self.name,
                    "upstream failed ({err}), serving durable snapshot"
                );
                self.entries
                    .lock()
                    .await
                    .set(key, value.clone(), epoch_ms());
                Ok(value)
            }
            Ok(None) => Err(CacheError::Unavailable {
                cache: self.name,
                source: err,
            }),
            Err(load_err) => {
                warn!(cache = self.name, "durable snapshot unreadable: {load_err:#}");
                Err(CacheError::Unavailable {
                    cache: self.name,
                    source: err,
                })
            }
        }
    }

    async fn store(&self, key: &str, value: &T, snapshot: &dyn SnapshotStore<T>) {
        {
            let mut entries = self.entries.lock().await;
            self.generation.fetch_add(1, Ordering::SeqCst);
            entries.set(key, value.clone(), epoch_ms());
        }
        if let Err(err) = snapshot.save(value).await {
            warn!(cache = self.name, "failed to write durable snapshot: {err:#}");
        }
    }

    async fn spawn_refresh(&self, key: &str, source: &CacheSource<T>) {
        let mut slot = self.refresh.lock().await;
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!(cache = self.name, "background refresh already running");
            return;
        }

        let entries = Arc::clone(&self.entries);
        let generation = Arc::clone(&self.generation);
        let seen = generation.load(Ordering::SeqCst);
        let source = source.clone();
        let key = key.to_string();
        let name = self.name;

        *slot = Some(tokio::spawn(async move {
            let value = match source.upstream.fetch().await {
                Ok(value) => value,
                Err(err) => {
                    debug!(cache = name, "background refresh failed: {err}");
                    return;
                }
            };

            // Held through the snapshot write so `supersede` cannot interleave.
            let mut guard = entries.lock().await;
            if generation.load(Ordering::SeqCst) != seen {
                debug!(cache = name, "entry superseded during refresh, result dropped");
                return;
            }
            guard.set(key, value.clone(), epoch_ms());
            if let Err(err) = source.snapshot.save(&value).await {
                warn!(cache = name, "failed to write durable snapshot: {err:#}");
            }
        }));
    }
}

pub fn epoch_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().try_into().unwrap_or(0)
}
