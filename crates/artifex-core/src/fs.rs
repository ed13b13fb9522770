// SPDX-License-Identifier: BUSL-1.1
//! A [`FileLister`] and [`FileGetter`] over a local directory tree.
//!
//! Used by the server's standalone mode, where every (user, machine) sees
//! the same tree. Listing walks the tree, hashes each included file and
//! remembers where each hash came from so that [`FileGetter::get`] can read
//! it back.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use walkdir::{DirEntry, WalkDir};

use crate::error::ListError;
use crate::file::{content_hash, File, FileGetter, FileLister};
use crate::ids::{Machine, UserId};
use crate::language::Language;

type IncludeFn = dyn Fn(&Path) -> bool + Send + Sync;

#[derive(Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
    include: Arc<IncludeFn>,
    by_hash: Arc<DashMap<String, PathBuf>>,
}

impl LocalFileSystem {
    /// Tree rooted at `root`, including every file with a known language
    /// extension outside hidden directories.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            include: Arc::new(|p: &Path| {
                Language::from_path(&p.to_string_lossy()) != Language::Unknown
            }),
            by_hash: Arc::new(DashMap::new()),
        }
    }

    pub fn with_include(mut self, include: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        self.include = Arc::new(include);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn walk(&self, user_id: UserId, machine: &Machine) -> io::Result<Vec<File>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() || !(self.include)(entry.path()) {
                continue;
            }
            let contents = std::fs::read(entry.path())?;
            let meta = entry.metadata().map_err(io::Error::from)?;
            let updated_at: DateTime<Utc> = meta.modified()?.into();
            let created_at: DateTime<Utc> = meta.created().map(Into::into).unwrap_or(updated_at);
            let hashed_content = content_hash(&contents);
            self.by_hash
                .insert(hashed_content.clone(), entry.path().to_path_buf());
            files.push(File {
                user_id,
                machine: machine.clone(),
                name: entry.path().to_string_lossy().into_owned(),
                hashed_content,
                created_at,
                updated_at,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

impl fmt::Debug for LocalFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalFileSystem")
            .field("root", &self.root)
            .field("known_hashes", &self.by_hash.len())
            .finish()
    }
}

#[async_trait]
impl FileLister for LocalFileSystem {
    async fn list(&self, user_id: UserId, machine: &Machine) -> Result<Vec<File>, ListError> {
        Ok(self.walk(user_id, machine)?)
    }
}

impl FileGetter for LocalFileSystem {
    fn get(&self, hashed_content: &str) -> io::Result<Vec<u8>> {
        let path = self
            .by_hash
            .get(hashed_content)
            .map(|p| p.value().clone())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no listed file has content hash {hashed_content}"),
                )
            })?;
        let contents = std::fs::read(&path)?;
        if content_hash(&contents) != hashed_content {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} changed since it was listed", path.display()),
            ));
        }
        Ok(contents)
    }
}
