// SPDX-License-Identifier: BUSL-1.1
//! `GET /queue`: plaintext dump of pending build requests.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/queue", get(show_queue))
}

async fn show_queue(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.queue.render_table(Utc::now()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use artifex_blobcache::{BlobCache, BlobCacheConfig};
    use artifex_core::{Machine, UserId, UserMachineFile};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::artifact_cache::{ArtifactCache, ArtifactCacheConfig};
    use crate::queue::RequestQueue;

    #[tokio::test]
    async fn queue_lists_pending_requests() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobCache::open(BlobCacheConfig::new(dir.path())).unwrap();
        let state = AppState::new(
            Arc::new(RequestQueue::new()),
            Arc::new(ArtifactCache::new(blobs, ArtifactCacheConfig::default())),
        );
        state
            .queue
            .submit(&UserMachineFile::new(UserId::new(42), Machine::new("box"), "/a.py"));

        let resp = router()
            .with_state(state)
            .oneshot(Request::builder().uri("/queue").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("POSITION"));
        assert!(text.contains("42") && text.contains("box") && text.contains("queued"));
    }
}
