// src/model/blobs.rs

//! Content-addressed blob store for verbatim file payloads.
//!
//! Payloads are keyed by the SHA-256 of their bytes, so identical assets
//! captured under different paths are stored once and two actions with
//! different targets may reference the same stored blob.

use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::hash::ContentHash;
use crate::{Error, Result};

/// Read access to blob payloads, abstracted so reconciliation tests can run
/// against an in-memory table.
pub trait BlobSource {
    fn contains(&self, hash: &ContentHash) -> bool;
    fn fetch(&self, hash: &ContentHash) -> Result<Vec<u8>>;
}

impl BlobSource for BTreeMap<ContentHash, Vec<u8>> {
    fn contains(&self, hash: &ContentHash) -> bool {
        self.contains_key(hash)
    }

    fn fetch(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        self.get(hash)
            .cloned()
            .ok_or_else(|| Error::MissingBlob(hash.to_hex()))
    }
}

/// On-disk blob directory: one file per payload, named by its hex digest.
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// Create (or reuse) a blob directory.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Open an existing blob directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(Error::Other(format!(
                "blob directory {} does not exist",
                dir.display()
            )));
        }
        Ok(Self { dir })
    }

    pub fn path_of(&self, hash: &ContentHash) -> PathBuf {
        self.dir.join(hash.to_hex())
    }

    /// Store one payload, deduplicating by content.
    pub fn insert(&self, payload: &[u8]) -> Result<ContentHash> {
        let hash = ContentHash::of(payload);
        let path = self.path_of(&hash);
        if !path.exists() {
            fs::write(&path, payload)?;
        }
        Ok(hash)
    }

    /// Hash a batch of payloads in parallel, then store each once.
    /// Returns slot -> hash in slot order.
    pub fn insert_all(
        &self,
        payloads: &BTreeMap<String, Vec<u8>>,
    ) -> Result<BTreeMap<String, ContentHash>> {
        let hashed: Vec<(String, ContentHash)> = payloads
            .par_iter()
            .map(|(slot, bytes)| (slot.clone(), ContentHash::of(bytes)))
            .collect();

        let mut table = BTreeMap::new();
        for (slot, hash) in hashed {
            let path = self.path_of(&hash);
            if !path.exists() {
                fs::write(&path, &payloads[&slot])?;
            }
            table.insert(slot, hash);
        }
        debug!(count = table.len(), "stored blobs");
        Ok(table)
    }

    /// Export an in-memory payload table (used when normalize persists its
    /// side table).
    pub fn import(&self, blobs: &BTreeMap<ContentHash, Vec<u8>>) -> Result<()> {
        for (hash, payload) in blobs {
            let path = self.path_of(hash);
            if !path.exists() {
                fs::write(&path, payload)?;
            }
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl BlobSource for BlobStore {
    fn contains(&self, hash: &ContentHash) -> bool {
        self.path_of(hash).is_file()
    }

    fn fetch(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        let path = self.path_of(hash);
        if !path.is_file() {
            return Err(Error::MissingBlob(hash.to_hex()));
        }
        Ok(fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_payloads_stored_once() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::create(tmp.path().join("blobs")).unwrap();

        let payloads = BTreeMap::from([
            ("~/.config/wall-a.png".to_string(), b"same bytes".to_vec()),
            ("~/.config/wall-b.png".to_string(), b"same bytes".to_vec()),
            ("~/.zshrc".to_string(), b"different".to_vec()),
        ]);
        let table = store.insert_all(&payloads).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(
            table["~/.config/wall-a.png"],
            table["~/.config/wall-b.png"]
        );
        let stored: Vec<_> = fs::read_dir(store.dir()).unwrap().collect();
        assert_eq!(stored.len(), 2, "two distinct payloads on disk");
    }

    #[test]
    fn fetch_round_trip_and_missing_blob() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::create(tmp.path().join("blobs")).unwrap();
        let hash = store.insert(b"payload").unwrap();
        assert!(store.contains(&hash));
        assert_eq!(store.fetch(&hash).unwrap(), b"payload");

        let missing = ContentHash::of(b"never stored");
        assert!(!store.contains(&missing));
        assert!(matches!(store.fetch(&missing), Err(Error::MissingBlob(_))));
    }

    #[test]
    fn in_memory_source_behaves_like_store() {
        let mut table = BTreeMap::new();
        let hash = ContentHash::of(b"bytes");
        table.insert(hash, b"bytes".to_vec());
        assert!(BlobSource::contains(&table, &hash));
        assert_eq!(table.fetch(&hash).unwrap(), b"bytes");
    }
}
