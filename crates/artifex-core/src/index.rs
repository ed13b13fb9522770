// SPDX-License-Identifier: BUSL-1.1
//! # Reference builder and loader
//!
//! [`FileIndexBuilder`] writes an `index.json` manifest of every listed file
//! of the request's language; [`FileIndexLoader`] reads it back into a
//! [`FileIndex`]. Together they make the pipeline runnable end to end
//! without a real language indexer behind it.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::build::{BuildContext, Builder, BuilderParams, BuilderResult};
use crate::error::{BuildError, LoadError};
use crate::language::Language;
use crate::load::{Getter, LoadedIndex, Loader};
use crate::path;

/// Blob name of the manifest.
pub const INDEX_BLOB: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFile {
    pub name: String,
    pub hashed_content: String,
    pub size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileIndex {
    pub root: String,
    pub language: Language,
    pub files: Vec<IndexedFile>,
    #[serde(skip)]
    released: AtomicBool,
}

impl FileIndex {
    pub fn contains(&self, name: &str) -> bool {
        let name = path::normalize(name);
        self.files.iter().any(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Whether [`LoadedIndex::cleanup`] has run.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl LoadedIndex for FileIndex {
    fn cleanup(&self) -> anyhow::Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            anyhow::bail!("index for {} released twice", self.root);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Longest common ancestor directory of `names`.
fn common_root<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let mut root: Option<String> = None;
    for name in names {
        let dir = path::parent(name).unwrap_or("/");
        root = Some(match root {
            None => dir.to_string(),
            Some(current) => path::ancestors(&current)
                .find(|candidate| path::ancestors(dir).any(|d| d == *candidate))
                .unwrap_or("/")
                .to_string(),
        });
    }
    root.unwrap_or_else(|| "/".to_string())
}

#[derive(Debug, Clone, Default)]
pub struct FileIndexBuilder;

impl FileIndexBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl Builder for FileIndexBuilder {
    fn build(&self, ctx: &BuildContext, params: &BuilderParams) -> Result<BuilderResult, BuildError> {
        let mut selected: Vec<_> = params
            .files
            .iter()
            .filter(|f| Language::from_path(&f.name) == params.language)
            .collect();
        if selected.is_empty() {
            return Err(BuildError::NoFilesSelected);
        }
        selected.sort_by(|a, b| a.name.cmp(&b.name));

        let mut files = Vec::with_capacity(selected.len());
        let mut missing_hashes = Vec::new();
        for file in &selected {
            ctx.check()?;
            match params.file_getter.get(&file.hashed_content) {
                Ok(contents) => files.push(IndexedFile {
                    name: path::normalize(&file.name),
                    hashed_content: file.hashed_content.clone(),
                    size: contents.len() as u64,
                }),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    missing_hashes.push(file.hashed_content.clone());
                }
                Err(e) => return Err(e.into()),
            }
        }
        if files.is_empty() {
            return Err(BuildError::NoFilesSelected);
        }

        let index = FileIndex {
            root: common_root(files.iter().map(|f| f.name.as_str())),
            language: params.language,
            files,
            released: AtomicBool::new(false),
        };
        ctx.check()?;
        let mut sink = params.putter.put_writer(INDEX_BLOB)?;
        serde_json::to_writer(&mut sink, &index).map_err(io::Error::from)?;
        sink.finish()?;

        Ok(BuilderResult {
            root: index.root.clone(),
            files: index.files.into_iter().map(|f| f.name).collect(),
            missing_hashes,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileIndexLoader;

#[async_trait]
impl Loader for FileIndexLoader {
    async fn load(&self, getter: &dyn Getter) -> Result<Arc<dyn LoadedIndex>, LoadError> {
        if !getter.artifact().files.iter().any(|f| f == INDEX_BLOB) {
            return Err(LoadError::UnknownBlob(INDEX_BLOB.to_string()));
        }
        let bytes = getter.get(INDEX_BLOB).await?;
        let index: FileIndex = serde_json::from_slice(&bytes).map_err(|e| LoadError::Decode {
            name: INDEX_BLOB.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Arc::new(index))
    }
}
