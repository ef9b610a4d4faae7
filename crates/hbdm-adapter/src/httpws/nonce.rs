//! File-backed counter for `client_order_id`
//!
//! The exchange rejects a repeated client order id, so the counter has to
//! survive restarts: every `next()` persists the new value before returning
//! it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::debug;

/// Default counter location, relative to the working directory
pub const DEFAULT_NONCE_PATH: &str = "data/nonce";

/// Value written to a new counter file; the first id handed out is one more
pub const INITIAL_NONCE: u64 = 1;

/// Persistent monotonically increasing counter
///
/// The file holds the last id issued as plain decimal text, so it can be
/// shared with other tools writing the same `data/nonce`.
#[derive(Debug)]
pub struct NonceStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl NonceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read, increment, persist and return the new value
    pub async fn next(&self) -> Result<u64> {
        let _guard = self.lock.lock().await;

        let current = self.read_or_create().await?;
        let next = current
            .checked_add(1)
            .with_context(|| format!("Nonce overflow in {}", self.path.display()))?;

        tokio::fs::write(&self.path, next.to_string())
            .await
            .with_context(|| format!("Failed to write nonce file {}", self.path.display()))?;

        debug!("Nonce advanced to {}", next);
        Ok(next)
    }

    /// Current value without advancing; creates the file when missing
    pub async fn current(&self) -> Result<u64> {
        let _guard = self.lock.lock().await;
        self.read_or_create().await
    }

    async fn read_or_create(&self) -> Result<u64> {
        let exists = tokio::fs::try_exists(&self.path)
            .await
            .with_context(|| format!("Failed to check nonce file {}", self.path.display()))?;
        if !exists {
            if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
            tokio::fs::write(&self.path, INITIAL_NONCE.to_string())
                .await
                .with_context(|| format!("Failed to create nonce file {}", self.path.display()))?;
            debug!("Created nonce file {}", self.path.display());
            return Ok(INITIAL_NONCE);
        }

        let data = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read nonce file {}", self.path.display()))?;

        data.trim()
            .parse()
            .with_context(|| format!("Nonce file {} holds '{}'", self.path.display(), data.trim()))
    }
}

impl Default for NonceStore {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("hbdm-nonce-{}-{}", name, uuid::Uuid::new_v4()))
            .join("nonce")
    }

    #[tokio::test]
    async fn test_creates_file_and_increments() {
        let path = temp_path("create");
        let store = NonceStore::new(&path);

        assert_eq!(store.next().await.unwrap(), 2);
        assert_eq!(store.next().await.unwrap(), 3);
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "3");

        // A fresh store picks up where the file left off
        let reopened = NonceStore::new(&path);
        assert_eq!(reopened.current().await.unwrap(), 3);
        assert_eq!(reopened.next().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_new_file_is_seeded() {
        let path = temp_path("seed");
        let store = NonceStore::new(&path);

        assert_eq!(store.current().await.unwrap(), INITIAL_NONCE);
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "1");
    }

    #[tokio::test]
    async fn test_unreadable_location_is_error() {
        // a regular file where the parent directory should be
        let blocker = temp_path("blocker");
        tokio::fs::create_dir_all(blocker.parent().unwrap()).await.unwrap();
        tokio::fs::write(&blocker, "x").await.unwrap();

        let err = NonceStore::new(blocker.join("nonce")).next().await.unwrap_err();
        assert!(err.to_string().contains("Failed to check nonce file"), "got {}", err);
    }

    #[tokio::test]
    async fn test_garbage_content_is_error() {
        let path = temp_path("garbage");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, "not a number").await.unwrap();

        assert!(NonceStore::new(&path).next().await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_next_never_repeats() {
        let store = Arc::new(NonceStore::new(temp_path("concurrent")));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.next().await.unwrap() })
            })
            .collect();

        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap());
        }
        values.sort_unstable();
        assert_eq!(values, (2..=17).collect::<Vec<u64>>());
    }
}
