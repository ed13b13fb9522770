// SPDX-License-Identifier: BUSL-1.1
//! # artifex-core: Shared types for the Artifex build service
//!
//! Everything the server and the client agree on lives here: identifier
//! newtypes, the published [`Artifact`], path hashing, the per-language
//! [`Registry`] of builders and loaders, and the error taxonomy.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `artifex-*` crates.
//! - No `unsafe` code.
//! - No `.unwrap()` outside tests.
//! - Wire structs use the protocol's field names (`UserID`, `Machine`, ...).

pub mod artifact;
pub mod build;
pub mod error;
pub mod file;
pub mod fs;
pub mod ids;
pub mod index;
pub mod language;
pub mod load;
pub mod path;
pub mod registry;

pub use artifact::{artifact_key, Artifact};
pub use build::{BlobSink, BuildContext, Builder, BuilderParams, BuilderResult, MemoryPutter, Putter};
pub use error::{BuildError, BuildErrorKind, ListError, LoadError};
pub use file::{content_hash, latest_update, File, FileGetter, FileLister, MemoryFileStore};
pub use fs::LocalFileSystem;
pub use ids::{ArtifactId, Machine, UserId, UserMachine, UserMachineFile};
pub use index::{FileIndex, FileIndexBuilder, FileIndexLoader, INDEX_BLOB};
pub use language::Language;
pub use load::{Getter, LoadedIndex, Loader};
pub use path::PathHash;
pub use registry::Registry;
