// SPDX-License-Identifier: BUSL-1.1
//! Artifex build server entry point.
//!
//! Standalone mode: every (user, machine) is served the source tree under
//! `--source-root`, built with the file-index builder for each language.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use artifex_blobcache::BlobCache;
use artifex_core::{FileIndexBuilder, Language, LocalFileSystem, Registry};
use artifex_server::config::ServerConfig;
use artifex_server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let blobs = BlobCache::open(config.blob_cache())
        .with_context(|| format!("opening blob cache at {}", config.blob_dir.display()))?;
    let files = LocalFileSystem::new(&config.source_root);
    let registry = Language::ALL.into_iter().fold(Registry::new(), |registry, language| {
        registry.with_builder(language, Arc::new(FileIndexBuilder::new()))
    });

    let server = Server::new(
        blobs,
        config.artifact_cache(),
        config.worker(),
        Arc::new(files.clone()),
        Arc::new(files),
        registry,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(
        %addr,
        workers = config.workers,
        source_root = %config.source_root.display(),
        "artifex-server listening"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                return;
            }
            tracing::info!("shutdown requested");
            shutdown.cancel();
        }
    });

    server.serve(listener, shutdown).await.context("server error")?;
    Ok(())
}
