// Copyright (C) 2025 aidan-es. Licensed under the GNU AGPLv3.
use indexmap::IndexMap;
use std::future::Future;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "text-contrast";
const STORE_FILE: &str = "settings.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("settings store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings store is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
    #[error("failed to find a config directory")]
    NoConfigDir,
}

/// Asynchronous string-valued settings storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>>;
    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<(), StoreError>>;
    /// All stored keys, in insertion order.
    fn list(&self) -> impl Future<Output = Result<Vec<String>, StoreError>>;
    /// Removes `key`, returning whether it was present.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>>;
}

/// Stores entries as one JSON object in a file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/text-contrast/settings.json`.
    pub fn default_location() -> Result<Self, StoreError> {
        let config_dir = dirs_next::config_dir().ok_or(StoreError::NoConfigDir)?;
        Ok(Self::new(config_dir.join(APP_DIR).join(STORE_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<IndexMap<String, String>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(IndexMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IndexMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, entries: &IndexMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all().await?.shift_remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.read_all().await?;
        entries.insert(key.to_owned(), value.to_owned());
        self.write_all(&entries).await
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read_all().await?.into_keys().collect())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.read_all().await?;
        let removed = entries.shift_remove(key).is_some();
        if removed {
            self.write_all(&entries).await?;
        }
        Ok(removed)
    }
}
