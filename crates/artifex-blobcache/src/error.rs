// SPDX-License-Identifier: BUSL-1.1
//! Blob cache error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobCacheError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("invalid blob key: {0:?}")]
    InvalidKey(String),

    #[error("blob cache io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlobCacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
