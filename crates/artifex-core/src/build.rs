// SPDX-License-Identifier: BUSL-1.1
//! # Builder contract
//!
//! A [`Builder`] turns the file set of one (user, machine) into a set of
//! named blobs. It is synchronous: the worker runs it on a blocking thread
//! under a wall-clock deadline carried by [`BuildContext`]. Builders are
//! expected to call [`BuildContext::check`] between units of work; once the
//! deadline passes the worker stops waiting and records a
//! `deadline_exceeded` failure regardless.
//!
//! Blobs are written through a [`Putter`]. File contents are read through a
//! [`crate::FileGetter`].

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::BuildError;
use crate::file::{File, FileGetter};
use crate::ids::{ArtifactId, UserMachine};
use crate::language::Language;

/// Deadline and cancellation flag shared between the worker and a running
/// build.
#[derive(Debug, Clone)]
pub struct BuildContext {
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
}

impl BuildContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Signal the build to stop. Called by the worker when it gives up
    /// waiting.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || Instant::now() >= self.deadline
    }

    /// `Err(DeadlineExceeded)` once the build should stop.
    pub fn check(&self) -> Result<(), BuildError> {
        if self.is_done() {
            Err(BuildError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }
}

/// Everything a builder gets for one build.
#[derive(Clone)]
pub struct BuilderParams {
    pub uuid: ArtifactId,
    pub owner: UserMachine,
    /// The request's file of interest.
    pub filename: String,
    pub language: Language,
    /// Snapshot of the authoritative listing taken before the build.
    pub files: Vec<File>,
    pub file_getter: Arc<dyn FileGetter>,
    pub putter: Arc<dyn Putter>,
}

impl std::fmt::Debug for BuilderParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderParams")
            .field("uuid", &self.uuid)
            .field("owner", &self.owner)
            .field("filename", &self.filename)
            .field("language", &self.language)
            .field("files", &self.files.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuilderResult {
    /// Directory (or file) the build was anchored at.
    pub root: String,
    /// Source paths incorporated; these determine the indexed path set.
    pub files: Vec<String>,
    /// Content hashes the builder could not read.
    pub missing_hashes: Vec<String>,
}

pub trait Builder: Send + Sync {
    fn build(&self, ctx: &BuildContext, params: &BuilderParams) -> Result<BuilderResult, BuildError>;
}

/// Streaming blob writer returned by [`Putter::put_writer`]. The blob only
/// becomes visible after [`BlobSink::finish`].
pub trait BlobSink: Write + Send {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// Blob output of a build, scoped to one artifact id.
pub trait Putter: Send + Sync {
    fn put(&self, name: &str, data: &[u8]) -> io::Result<()>;

    fn put_writer(&self, name: &str) -> io::Result<Box<dyn BlobSink>>;
}

/// A [`Putter`] that keeps blobs in memory.
#[derive(Debug, Default)]
pub struct MemoryPutter {
    blobs: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryPutter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.blobs.get(name).map(|b| b.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.blobs.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Putter for MemoryPutter {
    fn put(&self, name: &str, data: &[u8]) -> io::Result<()> {
        self.blobs.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn put_writer(&self, name: &str) -> io::Result<Box<dyn BlobSink>> {
        Ok(Box::new(MemorySink {
            name: name.to_string(),
            buf: Vec::new(),
            blobs: Arc::clone(&self.blobs),
        }))
    }
}

struct MemorySink {
    name: String,
    buf: Vec<u8>,
    blobs: Arc<DashMap<String, Vec<u8>>>,
}

impl Write for MemorySink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BlobSink for MemorySink {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let sink = *self;
        sink.blobs.insert(sink.name, sink.buf);
        Ok(())
    }
}
