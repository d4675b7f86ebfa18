//! In-memory storage backend implementation.
//!
//! This module provides [`MemoryBackend`], an in-process implementation of
//! [`StorageBackend`] suitable for tests and single-instance deployments.
//!
//! # Features
//!
//! - **Thread-safe**: Uses [`parking_lot::RwLock`] for concurrent access
//! - **TTL support**: Expired entries read as absent immediately; a background task reclaims them
//!
//! # Limitations
//!
//! - Data is not persisted or shared between processes
//! - The cleanup task runs every second, so memory is reclaimed lazily even
//!   though reads observe expiry precisely

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::{select, sync::watch, time::sleep};

use crate::{backend::StorageBackend, error::StorageResult};

/// Interval between background sweeps of expired entries.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// A stored value with its optional absolute expiry.
#[derive(Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the cleanup task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// In-memory storage backend.
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data.
///
/// # Shutdown
///
/// The background cleanup task stops when all clones are dropped.
#[derive(Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<HashMap<Vec<u8>, Entry>>>,
    shutdown_guard: Arc<ShutdownGuard>,
}

impl MemoryBackend {
    /// Creates a new in-memory storage backend.
    ///
    /// Spawns a background task that periodically removes expired entries,
    /// so this must be called within a Tokio runtime.
    ///
    /// # Example
    ///
    /// ```
    /// use refcheck_storage::MemoryBackend;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let backend = MemoryBackend::new();
    ///     assert!(backend.is_empty());
    /// }
    /// ```
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let backend = Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }),
        };

        // The task holds only the data map so that dropping the last
        // user-facing clone drops the guard and stops the sweep.
        let data = Arc::clone(&backend.data);
        tokio::spawn(async move {
            cleanup_expired_entries(data, shutdown_rx).await;
        });

        backend
    }

    /// Returns the number of live (non-expired) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.read().values().filter(|entry| !entry.is_expired(now)).count()
    }

    /// Returns `true` if there are no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the remaining lifetime of a live entry, or `None` when the key
    /// is absent, expired, or stored without expiry.
    #[must_use]
    pub fn remaining_ttl(&self, key: &[u8]) -> Option<Duration> {
        let now = Instant::now();
        let data = self.data.read();
        let entry = data.get(key).filter(|entry| !entry.is_expired(now))?;
        entry.expires_at.map(|expiry| expiry.saturating_duration_since(now))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Sweeps expired entries every [`CLEANUP_INTERVAL`] until shutdown.
async fn cleanup_expired_entries(
    data: Arc<RwLock<HashMap<Vec<u8>, Entry>>>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    loop {
        select! {
            _ = sleep(CLEANUP_INTERVAL) => {}
            _ = shutdown_rx.changed() => {
                return;
            }
        }

        let now = Instant::now();
        data.write().retain(|_, entry| !entry.is_expired(now));
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let now = Instant::now();
        let data = self.data.read();
        Ok(data.get(key).filter(|entry| !entry.is_expired(now)).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.data.write().insert(key, Entry { value: Bytes::from(value), expires_at: None });
        Ok(())
    }

    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        let expires_at = Instant::now() + ttl;
        self.data
            .write()
            .insert(key, Entry { value: Bytes::from(value), expires_at: Some(expires_at) });
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.data.write().remove(key);
        Ok(())
    }
}
