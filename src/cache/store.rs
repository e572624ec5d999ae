//! File-backed TTL cache store
//!
//! Provides a `CacheStore` that persists serializable API responses as JSON files
//! with an absolute expiry timestamp. Expired entries are never returned.

use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Extension used for entry files
const ENTRY_EXTENSION: &str = "json";

/// Extension used for in-flight writes
const TEMP_EXTENSION: &str = "tmp";

/// TTLs are capped at roughly a century
const MAX_TTL_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// Errors raised by the storage layer
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading, writing or removing a cache file failed
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The value could not be serialized into an entry
    #[error("failed to serialize cache entry for '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// An entry as it is stored on disk
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    /// The key this entry was written under
    key: String,
    /// The cached payload
    value: T,
    /// When the entry was written
    cached_at: DateTime<Utc>,
    /// First instant at which the entry is no longer valid
    expires_at: DateTime<Utc>,
}

/// Persistent key-value store with per-entry expiry
///
/// Each key maps to one JSON file in the cache directory, named by the SHA-256
/// digest of the key (`~/.cache/spotlists/` on Linux by default). Writes are
/// staged in a temporary file and renamed into place.
#[derive(Debug, Clone)]
pub struct CacheStore {
    /// Directory where entry files are stored
    cache_dir: PathBuf,
}

impl CacheStore {
    /// Creates a store rooted at `cache_dir`
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Platform cache directory for this application
    pub fn default_dir() -> Option<PathBuf> {
        let project_dirs = ProjectDirs::from("", "", "spotlists")?;
        Some(project_dirs.cache_dir().to_path_buf())
    }

    /// Directory holding the entry files
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.cache_dir
            .join(format!("{}.{}", hex::encode(digest), ENTRY_EXTENSION))
    }

    /// Returns the cached value for `key` if present and not yet expired
    ///
    /// # Arguments
    /// * `key` - The cache key to read (e.g., "tracks:<playlist id>:local=false:v1")
    ///
    /// # Returns
    /// * `Ok(Some(T))` if a fresh entry exists
    /// * `Ok(None)` on a miss, including expired and unreadable entries
    /// * `Err` if the entry file exists but cannot be read
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        self.get_at(key, Utc::now())
    }

    /// Same as [`CacheStore::get`] evaluated at `now`
    ///
    /// An entry is fresh only while `now < expires_at`. Missing files, entries
    /// that fail to parse and entries written under a different key are misses.
    ///
    /// # Arguments
    /// * `key` - The cache key to read
    /// * `now` - The instant freshness is checked against
    ///
    /// # Returns
    /// * `Ok(Some(T))` if the entry exists and `now` is before its expiry
    /// * `Ok(None)` otherwise
    pub fn get_at<T: DeserializeOwned>(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<T>, CacheError> {
        let path = self.entry_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        let entry: CacheEntry<T> = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "ignoring unreadable cache entry");
                return Ok(None);
            }
        };

        if entry.key != key {
            warn!(key, stored = %entry.key, "cache entry key mismatch");
            return Ok(None);
        }

        if now < entry.expires_at {
            debug!(key, "cache hit");
            Ok(Some(entry.value))
        } else {
            debug!(key, expired_at = %entry.expires_at, "cache entry expired");
            Ok(None)
        }
    }

    /// Stores `value` under `key`, valid for `ttl_seconds` from now
    ///
    /// # Arguments
    /// * `key` - Unique identifier for the entry (e.g., "playlists:<user>:owned=true:v1:ignore=")
    /// * `value` - The data to cache (must implement Serialize)
    /// * `ttl_seconds` - How long the entry is considered fresh; capped at about a century
    ///
    /// # Returns
    /// * `Ok(())` once the entry is in place
    /// * `Err` if directory creation, serialization or the write fails
    pub fn put<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) -> Result<(), CacheError> {
        self.put_at(key, value, ttl_seconds, Utc::now())
    }

    /// Same as [`CacheStore::put`] with `now` as the write time
    pub fn put_at<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        fs::create_dir_all(&self.cache_dir).map_err(|e| CacheError::io(&self.cache_dir, e))?;

        let ttl = Duration::seconds(ttl_seconds.min(MAX_TTL_SECONDS) as i64);
        let expires_at = now + ttl;

        let entry = CacheEntry {
            key: key.to_string(),
            value,
            cached_at: now,
            expires_at,
        };
        let json = serde_json::to_string_pretty(&entry).map_err(|source| CacheError::Serialize {
            key: key.to_string(),
            source,
        })?;

        let path = self.entry_path(key);
        let staged = path.with_extension(TEMP_EXTENSION);
        if let Err(e) = fs::write(&staged, json) {
            let _ = fs::remove_file(&staged);
            return Err(CacheError::io(&staged, e));
        }
        if let Err(e) = fs::rename(&staged, &path) {
            let _ = fs::remove_file(&staged);
            return Err(CacheError::io(&path, e));
        }

        debug!(key, %expires_at, "cache entry stored");
        Ok(())
    }

    /// Removes the entry stored under `key`
    ///
    /// # Returns
    /// * `Ok(true)` if an entry file was deleted
    /// * `Ok(false)` if there was nothing to delete
    pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(key, "cache entry removed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Removes every entry, returning how many files were deleted
    pub fn clear(&self) -> Result<usize, CacheError> {
        let dir = match fs::read_dir(&self.cache_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::io(&self.cache_dir, e)),
        };

        let mut removed = 0;
        for item in dir {
            let item = item.map_err(|e| CacheError::io(&self.cache_dir, e))?;
            let path = item.path();
            if !is_owned_file(&path) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(&path, e)),
            }
        }

        debug!(removed, dir = %self.cache_dir.display(), "cache cleared");
        Ok(removed)
    }
}

/// Entry and staging files are named `<64 hex chars>.json|tmp`
fn is_owned_file(path: &Path) -> bool {
    let ext_ok = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(ENTRY_EXTENSION) | Some(TEMP_EXTENSION)
    );
    let stem_ok = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false);
    ext_ok && stem_ok
}
