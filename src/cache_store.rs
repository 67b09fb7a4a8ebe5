//! Generational cache store
//!
//! Entries live in named generations. Each entry is a complete response
//! snapshot keyed by its canonical URL; puts replace whole entries and
//! never expose a partially written body. Partial (206) responses are
//! refused so a later range request can never be served from a truncated
//! body.
//!
//! Reads take the map lock only for the lookup. Mutations are serialized
//! by an async write gate held across the disk write and the map update,
//! so disk and memory always agree and a deleted generation stays deleted.

use crate::error::{OfflineError, Result};
use crate::models::{CacheKey, Generation, HttpResponse};
use crate::persistence::DiskPersistence;
use http::StatusCode;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type Entries = HashMap<CacheKey, Arc<HttpResponse>>;

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub generations: usize,
    pub total_entries: usize,
    pub total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Store mapping (generation, canonical key) to full response snapshots
pub struct CacheStore {
    generations: RwLock<BTreeMap<Generation, Entries>>,
    persistence: Option<DiskPersistence>,
    writes: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStore {
    /// Create a memory-only store
    pub fn new() -> Self {
        CacheStore {
            generations: RwLock::new(BTreeMap::new()),
            persistence: None,
            writes: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create a store mirrored to `base_path`, loading what is already there
    pub async fn with_persistence(base_path: impl AsRef<Path>) -> Result<Self> {
        let persistence = DiskPersistence::open(base_path).await?;
        let loaded = persistence.load_all().await?;

        let mut generations = BTreeMap::new();
        for (generation, entries) in loaded {
            let entries: Entries = entries
                .into_iter()
                .map(|(key, response)| (key, Arc::new(response)))
                .collect();
            info!(
                "Restored generation {} with {} entries",
                generation,
                entries.len()
            );
            generations.insert(generation, entries);
        }

        Ok(CacheStore {
            generations: RwLock::new(generations),
            persistence: Some(persistence),
            writes: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Open a generation, creating it empty if it does not exist yet
    pub async fn open(&self, generation: &Generation) -> Result<()> {
        let _writes = self.writes.lock().await;
        if let Some(persistence) = &self.persistence {
            persistence.create_generation(generation).await?;
        }
        self.generations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(generation.clone())
            .or_default();
        Ok(())
    }

    /// Store or overwrite one entry
    ///
    /// The generation must have been opened; a write to a generation that
    /// was never opened or has since been deleted is refused. Partial
    /// content is rejected. With persistence enabled the entry is on disk
    /// before it becomes visible to readers.
    pub async fn put(
        &self,
        generation: &Generation,
        key: &CacheKey,
        response: HttpResponse,
    ) -> Result<()> {
        if response.status == StatusCode::PARTIAL_CONTENT {
            warn!("Refusing to store partial response for {}", key);
            return Err(OfflineError::StorageError(format!(
                "partial responses are never stored: {}",
                key
            )));
        }

        let _writes = self.writes.lock().await;
        if !self.has_generation(generation) {
            warn!("Dropping write of {} to unknown generation {}", key, generation);
            return Err(OfflineError::StorageError(format!(
                "generation {} is not open",
                generation
            )));
        }

        if let Some(persistence) = &self.persistence {
            persistence.write_entry(generation, key, &response).await?;
        }

        debug!(
            "Storing {} in {} (status={}, {} bytes)",
            key,
            generation,
            response.status,
            response.body.len()
        );

        let mut generations = self
            .generations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match generations.get_mut(generation) {
            Some(entries) => {
                entries.insert(key.clone(), Arc::new(response));
                Ok(())
            }
            None => Err(OfflineError::StorageError(format!(
                "generation {} is not open",
                generation
            ))),
        }
    }

    /// Look up one entry; `Ok(None)` is a miss
    pub async fn get(
        &self,
        generation: &Generation,
        key: &CacheKey,
    ) -> Result<Option<HttpResponse>> {
        let found = self
            .generations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(generation)
            .and_then(|entries| entries.get(key))
            .cloned();

        match found {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit: {} in {}", key, generation);
                Ok(Some(HttpResponse::clone(&entry)))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache miss: {} in {}", key, generation);
                Ok(None)
            }
        }
    }

    /// All keys stored under a generation, sorted
    pub async fn keys(&self, generation: &Generation) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .generations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(generation)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Delete one entry; returns whether it existed
    pub async fn delete(&self, generation: &Generation, key: &CacheKey) -> Result<bool> {
        let _writes = self.writes.lock().await;
        let removed = self
            .generations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(generation)
            .and_then(|entries| entries.remove(key))
            .is_some();

        if let Some(persistence) = &self.persistence {
            persistence.remove_entry(generation, key).await?;
        }
        Ok(removed)
    }

    /// Whether a generation exists
    pub fn has_generation(&self, generation: &Generation) -> bool {
        self.generations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(generation)
    }

    /// All known generation identifiers, sorted
    pub async fn list_generations(&self) -> Vec<Generation> {
        self.generations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Remove a generation and every entry under it; idempotent
    ///
    /// Returns whether the generation existed.
    pub async fn delete_generation(&self, generation: &Generation) -> Result<bool> {
        let _writes = self.writes.lock().await;
        let removed = self
            .generations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(generation);

        if let Some(persistence) = &self.persistence {
            persistence.remove_generation(generation).await?;
        }

        match removed {
            Some(entries) => {
                info!(
                    "Deleted generation {} ({} entries)",
                    generation,
                    entries.len()
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let generations = self
            .generations
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let total_entries = generations.values().map(|e| e.len()).sum();
        let total_bytes = generations
            .values()
            .flat_map(|e| e.values())
            .map(|r| r.body.len())
            .sum();

        CacheStats {
            generations: generations.len(),
            total_entries,
            total_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}
