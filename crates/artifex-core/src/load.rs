// SPDX-License-Identifier: BUSL-1.1
//! # Loader contract
//!
//! A [`Loader`] turns a published artifact's blobs, reached through a
//! [`Getter`], into an opaque [`LoadedIndex`] handed to consumers. The
//! client calls [`LoadedIndex::cleanup`] exactly once, after the object has
//! been evicted and its idle grace period has passed.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::artifact::Artifact;
use crate::error::LoadError;

/// Access to the blobs of one artifact.
#[async_trait]
pub trait Getter: Send + Sync {
    fn artifact(&self) -> &Artifact;

    /// Fetch the blob `name`, which must be one of `artifact().files`.
    async fn get(&self, name: &str) -> Result<Vec<u8>, LoadError>;
}

/// An object produced by a [`Loader`].
pub trait LoadedIndex: Any + Send + Sync {
    fn cleanup(&self) -> anyhow::Result<()>;

    fn as_any(&self) -> &dyn Any;
}

impl dyn LoadedIndex {
    /// Downcast to the concrete type a loader produced.
    pub fn downcast_ref<T: LoadedIndex>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, getter: &dyn Getter) -> Result<Arc<dyn LoadedIndex>, LoadError>;
}
