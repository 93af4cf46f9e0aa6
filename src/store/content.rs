//! Content-addressed artifact store.
//!
//! Files are named by their own SHA-256 digest and sharded by the first two
//! hex characters: `<root>/<hash[0:2]>/<hash>.<ext>`. The same layout is used
//! by the worker's store and by the orchestrator's local mirror.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::StoreError;

const READ_CHUNK: usize = 64 * 1024;

/// A directory of immutable artifacts keyed by content hash.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    extension: String,
}

impl ContentStore {
    /// Creates a store rooted at `root` whose files carry `extension`.
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Creates the root directory if it does not exist.
    pub fn ensure_root(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })
    }

    /// Path an artifact with `hash` lives at. The hash must already be normalized.
    pub fn path_for(&self, hash: &str) -> PathBuf {
        let shard = &hash[..2.min(hash.len())];
        self.root
            .join(shard)
            .join(format!("{}.{}", hash, self.extension))
    }

    /// Returns true if an artifact with `hash` is present.
    pub fn contains(&self, hash: &str) -> bool {
        self.path_for(hash).is_file()
    }

    /// Hashes `file` and moves it to its content address.
    ///
    /// If the address is already occupied the new copy is identical content
    /// and is discarded.
    pub async fn commit(&self, file: &Path) -> Result<String, StoreError> {
        let hash = sha256_file(file).await.map_err(|source| StoreError::Io {
            path: file.to_path_buf(),
            source,
        })?;
        let destination = self.path_for(&hash);

        if let Some(shard) = destination.parent() {
            tokio::fs::create_dir_all(shard)
                .await
                .map_err(|source| StoreError::Io {
                    path: shard.to_path_buf(),
                    source,
                })?;
        }

        if tokio::fs::try_exists(&destination).await.unwrap_or(false) {
            debug!(hash = %hash, "Artifact already stored, discarding duplicate");
            remove_file_if_exists(file).await;
            return Ok(hash);
        }

        if let Err(e) = tokio::fs::rename(file, &destination).await {
            // Scratch and storage may sit on different filesystems.
            debug!(error = %e, "Rename into store failed, falling back to copy");
            tokio::fs::copy(file, &destination)
                .await
                .map_err(|source| StoreError::Io {
                    path: destination.clone(),
                    source,
                })?;
            remove_file_if_exists(file).await;
        }

        info!(hash = %hash, path = ?destination, "Artifact committed");
        Ok(hash)
    }

    /// Deletes every artifact with the store's extension. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, StoreError> {
        if !self.root.exists() {
            return Ok(0);
        }

        let mut deleted = 0;
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            let matches = entry.file_type().is_file()
                && path
                    .extension()
                    .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(&self.extension))
                    .unwrap_or(false);
            if !matches {
                continue;
            }
            match std::fs::remove_file(path) {
                Ok(()) => deleted += 1,
                Err(e) => {
                    return Err(StoreError::Io {
                        path: path.to_path_buf(),
                        source: e,
                    })
                }
            }
        }

        info!(deleted, root = ?self.root, "Content store cleared");
        Ok(deleted)
    }
}

/// Normalizes a user supplied hash: drops any `.ext` suffix, lower-cases it,
/// and checks it is 64 hex characters.
pub fn normalize_hash(raw: &str) -> Option<String> {
    static HASH_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = HASH_RE.get_or_init(|| Regex::new(r"^[a-f0-9]{64}$").ok());

    let stem = raw.split('.').next().unwrap_or_default().to_ascii_lowercase();
    re.as_ref()
        .is_some_and(|re| re.is_match(&stem))
        .then_some(stem)
}

/// Computes the hex SHA-256 digest of a file without loading it into memory.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_CHUNK];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Computes the hex SHA-256 digest of the given content.
pub fn sha256_hex(content: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_ref());
    hex::encode(hasher.finalize())
}

pub(crate) async fn remove_file_if_exists(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = ?path, error = %e, "Failed to remove file");
        }
    }
}
