use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{Store, StoreError};
use crate::cache::entry::{self, Payload};
use crate::filesystem;
use crate::hashing::Hasher;

/// Stores each key in its own file named after the SHA-1 of the key.
///
/// Expired files are deleted the next time they are read.
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `directory`. The directory must already exist.
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    /// Returns the file path backing `key`.
    pub fn path(&self, key: &str) -> PathBuf {
        self.directory.join(Hasher::Sha1.hash(key))
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Payload>, StoreError> {
        let path = self.path(key);

        let Some(contents) = filesystem::read_file(&path).await? else {
            return Ok(None);
        };

        let payload = entry::decode(&contents)?;
        if entry::has_expired(payload.expires_at) {
            debug!(key, path = %path.display(), "removing expired cache file");
            filesystem::remove(&path).await?;
            return Ok(None);
        }

        Ok(Some(payload))
    }

    async fn add(
        &self,
        key: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        self.put(key, value, expires_at).await
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let path = self.path(key);
        filesystem::write_file(&path, &entry::encode(value, expires_at)).await?;
        Ok(true)
    }
}
