use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Where build artifacts and the exported comic end up.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;
    async fn delete(&self, path: &str) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

pub async fn write_json<T: Serialize + Sync>(storage: &dyn Storage, path: &str, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    storage.write(path, content.as_bytes()).await
}

pub async fn read_json<T: DeserializeOwned>(storage: &dyn Storage, path: &str) -> Result<T> {
    let bytes = storage.read(path).await?;
    serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse {}", path))
}

pub fn join(dir: &str, name: &str) -> String {
    Path::new(dir).join(name).to_string_lossy().to_string()
}

pub struct NativeStorage;

impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        if tokio::fs::try_exists(path).await? {
            if Path::new(path).is_dir() {
                tokio::fs::remove_dir_all(path).await?;
            } else {
                tokio::fs::remove_file(path).await?;
            }
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let path = Path::new(prefix);
        let mut entries = Vec::new();

        if path.is_dir() {
            let mut dir = tokio::fs::read_dir(path).await?;
            while let Some(entry) = dir.next_entry().await? {
                entries.push(entry.path().to_string_lossy().to_string());
            }
        } else if path.exists() {
            entries.push(prefix.to_string());
        }

        entries.sort();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_parent_dirs_and_lists_sorted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().to_string_lossy().to_string();
        let storage = NativeStorage::new();

        storage.write(&join(&root, "build/b.txt"), b"b").await?;
        storage.write(&join(&root, "build/a.txt"), b"a").await?;

        let listed = storage.list(&join(&root, "build")).await?;
        assert_eq!(listed.len(), 2);
        assert!(listed[0].ends_with("a.txt"));

        storage.delete(&join(&root, "build")).await?;
        assert!(!storage.exists(&join(&root, "build")).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_json_helpers() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = join(&dir.path().to_string_lossy(), "v.json");
        let storage = NativeStorage::new();

        write_json(&storage, &path, &vec![1, 2, 3]).await?;
        let back: Vec<i32> = read_json(&storage, &path).await?;
        assert_eq!(back, vec![1, 2, 3]);
        Ok(())
    }
}
