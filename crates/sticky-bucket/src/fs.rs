use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::collaborators::LocalStorage;
use crate::error::{Result, StickyBucketError};

/// Directory-backed [`LocalStorage`]. One file per key.
///
/// Layout: `<root>/items/<hex(sha256(key))>`. Attribute values are arbitrary
/// user input of any length, so file names are fixed-length digests. Each file
/// carries its full key; a file whose key differs is treated as missing.
#[derive(Debug, Clone)]
pub struct FsLocalStorage {
    items_dir: PathBuf,
}

impl FsLocalStorage {
    /// Create a store rooted at `root`. Creates `root/items/` if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let items_dir = root.as_ref().join("items");
        fs::create_dir_all(&items_dir)?;
        Ok(Self { items_dir })
    }

    fn item_path(&self, key: &str) -> PathBuf {
        self.items_dir.join(hex::encode(Sha256::digest(key.as_bytes())))
    }
}

/// On-disk item: the key it was written under and the stored value.
#[derive(Serialize, Deserialize)]
struct StoredItem {
    key: String,
    value: String,
}

fn read_item(path: &Path, key: &str) -> Result<Option<String>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let item: StoredItem = serde_json::from_slice(&raw)?;
    Ok((item.key == key).then_some(item.value))
}

fn write_item(dir: &Path, path: &Path, key: &str, value: &str) -> Result<()> {
    let item = StoredItem {
        key: key.to_string(),
        value: value.to_string(),
    };
    // Write to a temp file in the same directory, then rename over the item.
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut tmp, &item)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl LocalStorage for FsLocalStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let path = self.item_path(key);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || read_item(&path, &key))
            .await
            .map_err(|e| StickyBucketError::Join(e.to_string()))?
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let dir = self.items_dir.clone();
        let path = self.item_path(key);
        let key = key.to_string();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || write_item(&dir, &path, &key, &value))
            .await
            .map_err(|e| StickyBucketError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_storage() -> (tempfile::TempDir, FsLocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsLocalStorage::new(dir.path()).unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn item_roundtrip() {
        let (_dir, storage) = make_storage();
        storage.set_item("gbStickyBuckets::id||u1", "{}").await.unwrap();
        let got = storage.get_item("gbStickyBuckets::id||u1").await.unwrap();
        assert_eq!(got.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn missing_item_is_none() {
        let (_dir, storage) = make_storage();
        assert!(storage.get_item("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overwrite_replaces_single_file() {
        let (dir, storage) = make_storage();
        storage.set_item("k", "one").await.unwrap();
        storage.set_item("k", "two").await.unwrap();

        assert_eq!(storage.get_item("k").await.unwrap().as_deref(), Some("two"));
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("items"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn keys_with_path_characters_stay_inside_root() {
        let (dir, storage) = make_storage();
        storage.set_item("id||../../etc/passwd", "x").await.unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("items"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn long_keys_use_fixed_length_file_names() {
        let (dir, storage) = make_storage();
        let key = format!("gbStickyBuckets::sessionId||{}", "s".repeat(240));
        storage.set_item(&key, "{}").await.unwrap();

        assert_eq!(storage.get_item(&key).await.unwrap().as_deref(), Some("{}"));
        let names: Vec<String> = std::fs::read_dir(dir.path().join("items"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].len(), 64);
    }

    #[tokio::test]
    async fn item_under_other_key_reads_as_missing() {
        let (dir, storage) = make_storage();
        storage.set_item("k1", "one").await.unwrap();
        // Move k1's file to where k2 would live.
        std::fs::rename(storage.item_path("k1"), storage.item_path("k2")).unwrap();

        assert!(storage.get_item("k2").await.unwrap().is_none());
        assert!(dir.path().join("items").exists());
    }
}
