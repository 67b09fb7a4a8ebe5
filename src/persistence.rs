//! On-disk mirror of cache generations
//!
//! Layout: one directory per generation under the base path, one file per
//! entry named by the xxh3 hash of its key. Each file is a bincode record
//! carrying the key, status, headers and body, plus a crc32 of the body.
//! Files are written to a temporary name and renamed into place, so a
//! reader sees either the complete entry or nothing.

use crate::error::{OfflineError, Result};
use crate::models::{CacheKey, Generation, HttpResponse};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const ENTRY_EXTENSION: &str = "entry";
const TEMP_EXTENSION: &str = "tmp";

/// Serialized form of one cache entry
#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    key: String,
    status: u16,
    headers: Vec<(String, Vec<u8>)>,
    body: Vec<u8>,
    checksum: u32,
}

impl PersistedEntry {
    fn from_response(key: &CacheKey, response: &HttpResponse) -> Self {
        PersistedEntry {
            key: key.as_str().to_string(),
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
                .collect(),
            body: response.body.to_vec(),
            checksum: body_checksum(&response.body),
        }
    }

    fn into_response(self) -> Result<(CacheKey, HttpResponse)> {
        if body_checksum(&self.body) != self.checksum {
            return Err(OfflineError::StorageError(format!(
                "checksum mismatch for {}",
                self.key
            )));
        }

        let status = StatusCode::from_u16(self.status)
            .map_err(|e| OfflineError::StorageError(format!("invalid status: {}", e)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| OfflineError::StorageError(format!("invalid header name: {}", e)))?;
            let value = HeaderValue::from_bytes(&value)
                .map_err(|e| OfflineError::StorageError(format!("invalid header value: {}", e)))?;
            headers.append(name, value);
        }

        let key = reqwest::Url::parse(&self.key)
            .map(|url| CacheKey::from_url(&url))
            .map_err(|e| OfflineError::StorageError(format!("invalid key {}: {}", self.key, e)))?;

        Ok((
            key,
            HttpResponse {
                status,
                headers,
                body: Bytes::from(self.body),
            },
        ))
    }
}

fn body_checksum(body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    hasher.finalize()
}

/// Entries of one generation as loaded from disk
pub type LoadedGeneration = (Generation, Vec<(CacheKey, HttpResponse)>);

/// Disk-backed mirror used by [`crate::CacheStore`]
#[derive(Debug, Clone)]
pub struct DiskPersistence {
    base_path: PathBuf,
}

impl DiskPersistence {
    /// Open (and create if needed) the persistence directory
    pub async fn open(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await.map_err(|e| {
            OfflineError::StorageError(format!(
                "Failed to create persistence directory {}: {}",
                base_path.display(),
                e
            ))
        })?;
        info!("Cache persistence enabled at {}", base_path.display());
        Ok(DiskPersistence { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn generation_dir(&self, generation: &Generation) -> PathBuf {
        self.base_path.join(generation.as_str())
    }

    fn entry_path(&self, generation: &Generation, key: &CacheKey) -> PathBuf {
        let hash = xxhash_rust::xxh3::xxh3_64(key.as_str().as_bytes());
        self.generation_dir(generation)
            .join(format!("{:016x}.{}", hash, ENTRY_EXTENSION))
    }

    /// Create the directory for a generation
    pub async fn create_generation(&self, generation: &Generation) -> Result<()> {
        fs::create_dir_all(self.generation_dir(generation))
            .await
            .map_err(|e| {
                OfflineError::StorageError(format!(
                    "Failed to create generation {}: {}",
                    generation, e
                ))
            })
    }

    /// Write one entry atomically (temp file, sync, rename)
    ///
    /// The generation directory must already exist.
    pub async fn write_entry(
        &self,
        generation: &Generation,
        key: &CacheKey,
        response: &HttpResponse,
    ) -> Result<()> {
        let path = self.entry_path(generation, key);
        let temp_path = path.with_extension(TEMP_EXTENSION);
        let record = bincode::serialize(&PersistedEntry::from_response(key, response))
            .map_err(|e| OfflineError::StorageError(format!("Failed to encode entry: {}", e)))?;

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            OfflineError::StorageError(format!("Failed to create cache file: {}", e))
        })?;
        file.write_all(&record)
            .await
            .map_err(|e| OfflineError::StorageError(format!("Failed to write entry: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| OfflineError::StorageError(format!("Failed to sync entry: {}", e)))?;
        drop(file);

        fs::rename(&temp_path, &path).await.map_err(|e| {
            OfflineError::StorageError(format!("Failed to publish entry: {}", e))
        })?;

        debug!(
            "Persisted {} in {} ({} bytes)",
            key,
            generation,
            response.body.len()
        );
        Ok(())
    }

    /// Remove one entry; a missing file is not an error
    pub async fn remove_entry(&self, generation: &Generation, key: &CacheKey) -> Result<()> {
        match fs::remove_file(self.entry_path(generation, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OfflineError::StorageError(format!(
                "Failed to remove entry {}: {}",
                key, e
            ))),
        }
    }

    /// Remove a whole generation directory; a missing directory is not an error
    pub async fn remove_generation(&self, generation: &Generation) -> Result<()> {
        match fs::remove_dir_all(self.generation_dir(generation)).await {
            Ok(()) => {
                debug!("Removed persisted generation {}", generation);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OfflineError::StorageError(format!(
                "Failed to remove generation {}: {}",
                generation, e
            ))),
        }
    }

    /// Load every generation and its valid entries
    ///
    /// Leftover temp files and entries that fail to decode or verify are
    /// deleted and skipped.
    pub async fn load_all(&self) -> Result<Vec<LoadedGeneration>> {
        let mut generations = Vec::new();
        let mut dirs = fs::read_dir(&self.base_path).await?;

        while let Some(dir) = dirs.next_entry().await? {
            if !dir.file_type().await?.is_dir() {
                continue;
            }
            let name = dir.file_name().to_string_lossy().into_owned();
            let generation = Generation::from(name.as_str());
            let entries = self.load_generation(&dir.path()).await?;
            debug!(
                "Loaded {} persisted entries for generation {}",
                entries.len(),
                generation
            );
            generations.push((generation, entries));
        }

        Ok(generations)
    }

    async fn load_generation(&self, dir: &Path) -> Result<Vec<(CacheKey, HttpResponse)>> {
        let mut entries = Vec::new();
        let mut files = fs::read_dir(dir).await?;

        while let Some(file) = files.next_entry().await? {
            let path = file.path();
            let extension = path.extension().and_then(|e| e.to_str());

            if extension == Some(TEMP_EXTENSION) {
                let _ = fs::remove_file(&path).await;
                continue;
            }
            if extension != Some(ENTRY_EXTENSION) {
                continue;
            }

            let decoded = fs::read(&path)
                .await
                .map_err(OfflineError::from)
                .and_then(|data| {
                    bincode::deserialize::<PersistedEntry>(&data).map_err(|e| {
                        OfflineError::StorageError(format!("Failed to decode entry: {}", e))
                    })
                })
                .and_then(PersistedEntry::into_response);

            match decoded {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!("Dropping unreadable cache file {}: {}", path.display(), e);
                    let _ = fs::remove_file(&path).await;
                }
            }
        }

        Ok(entries)
    }
}
