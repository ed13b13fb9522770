// SPDX-License-Identifier: BUSL-1.1
//! # Files and the file-store collaborators
//!
//! The build worker never walks a user's source tree itself. It asks a
//! [`FileLister`] for the authoritative file set of a (user, machine) and
//! builders read contents through a [`FileGetter`] keyed by content hash.
//!
//! [`MemoryFileStore`] implements both over a `DashMap` and is what tests
//! and embedding hosts use.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ListError;
use crate::ids::{Machine, UserId, UserMachine};

/// One file of a user's tree as reported by the file store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub user_id: UserId,
    pub machine: Machine,
    pub name: String,
    /// Hex SHA-256 of the contents; the key for [`FileGetter::get`].
    pub hashed_content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Hex SHA-256 of `contents`, the key files are stored under.
pub fn content_hash(contents: &[u8]) -> String {
    hex::encode(Sha256::digest(contents))
}

/// Authoritative file listing per (user, machine).
#[async_trait]
pub trait FileLister: Send + Sync {
    async fn list(&self, user_id: UserId, machine: &Machine) -> Result<Vec<File>, ListError>;
}

/// Content-addressed file reads, used by builders from blocking threads.
pub trait FileGetter: Send + Sync {
    fn get(&self, hashed_content: &str) -> io::Result<Vec<u8>>;
}

/// The most recent `updated_at` in `files`, or the Unix epoch for an empty
/// listing.
pub fn latest_update(files: &[File]) -> DateTime<Utc> {
    files
        .iter()
        .map(|f| f.updated_at)
        .max()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// In-memory file store.
///
/// Cloning is cheap; clones share the same maps.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    files: DashMap<UserMachine, Vec<File>>,
    contents: DashMap<String, Vec<u8>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `name` for (user, machine), stamping it with `now`.
    pub fn upsert(
        &self,
        user_id: UserId,
        machine: &Machine,
        name: &str,
        contents: impl Into<Vec<u8>>,
    ) -> File {
        self.upsert_at(user_id, machine, name, contents, Utc::now())
    }

    /// Like [`MemoryFileStore::upsert`] with an explicit timestamp.
    pub fn upsert_at(
        &self,
        user_id: UserId,
        machine: &Machine,
        name: &str,
        contents: impl Into<Vec<u8>>,
        at: DateTime<Utc>,
    ) -> File {
        let contents = contents.into();
        let hashed_content = content_hash(&contents);
        self.inner.contents.insert(hashed_content.clone(), contents);

        let key = UserMachine::new(user_id, machine.clone());
        let mut entry = self.inner.files.entry(key).or_default();
        let created_at = entry
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.created_at)
            .unwrap_or(at);
        entry.retain(|f| f.name != name);
        let file = File {
            user_id,
            machine: machine.clone(),
            name: name.to_string(),
            hashed_content,
            created_at,
            updated_at: at,
        };
        entry.push(file.clone());
        file
    }

    pub fn remove(&self, user_id: UserId, machine: &Machine, name: &str) -> bool {
        let key = UserMachine::new(user_id, machine.clone());
        match self.inner.files.get_mut(&key) {
            Some(mut files) => {
                let before = files.len();
                files.retain(|f| f.name != name);
                files.len() != before
            }
            None => false,
        }
    }
}

#[async_trait]
impl FileLister for MemoryFileStore {
    async fn list(&self, user_id: UserId, machine: &Machine) -> Result<Vec<File>, ListError> {
        let key = UserMachine::new(user_id, machine.clone());
        Ok(self
            .inner
            .files
            .get(&key)
            .map(|files| files.value().clone())
            .unwrap_or_default())
    }
}

impl FileGetter for MemoryFileStore {
    fn get(&self, hashed_content: &str) -> io::Result<Vec<u8>> {
        self.inner
            .contents
            .get(hashed_content)
            .map(|c| c.value().clone())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no content for hash {hashed_content}"),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn upsert_replaces_and_keeps_created_at() {
        let store = MemoryFileStore::new();
        let m = Machine::new("m");
        let t0 = Utc::now();
        let first = store.upsert_at(UserId::new(1), &m, "/p/a.py", "x = 1", t0);
        let later = t0 + Duration::seconds(5);
        let second = store.upsert_at(UserId::new(1), &m, "/p/a.py", "x = 2", later);

        let files = store.list(UserId::new(1), &m).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(files[0].updated_at, later);
        assert_eq!(store.get(&second.hashed_content).unwrap(), b"x = 2");
    }

    #[tokio::test]
    async fn listings_are_scoped_per_user_machine() {
        let store = MemoryFileStore::new();
        store.upsert(UserId::new(1), &Machine::new("m"), "/a.py", "");
        store.upsert(UserId::new(2), &Machine::new("m"), "/b.py", "");
        let files = store.list(UserId::new(1), &Machine::new("m")).await.unwrap();
        assert_eq!(files.len(), 1);
        assert!(store
            .list(UserId::new(1), &Machine::new("other"))
            .await
            .unwrap()
            .is_empty());
        assert!(store.remove(UserId::new(1), &Machine::new("m"), "/a.py"));
        assert!(!store.remove(UserId::new(1), &Machine::new("m"), "/a.py"));
    }

    #[test]
    fn missing_content_is_not_found() {
        let store = MemoryFileStore::new();
        let err = store.get("deadbeef").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn latest_update_of_empty_listing_is_epoch() {
        assert_eq!(latest_update(&[]), DateTime::<Utc>::UNIX_EPOCH);
    }
}
