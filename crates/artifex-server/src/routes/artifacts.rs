// SPDX-License-Identifier: BUSL-1.1
//! # Artifact wire protocol
//!
//! ## Endpoints
//!
//! - `POST /artifacts/submit-requests`: merge requests into the queue
//! - `POST /artifacts/find-matching`: artifacts covering each query, by UUID
//! - `GET  /artifacts/{uuid}/{name}`: stream one blob of a published artifact

use std::collections::BTreeMap;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::io::ReaderStream;

use artifex_core::{Artifact, ArtifactId, UserMachineFile};

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/artifacts/submit-requests", post(submit_requests))
        .route("/artifacts/find-matching", post(find_matching))
        .route("/artifacts/{uuid}/{name}", get(serve_blob))
}

async fn submit_requests(
    State(state): State<AppState>,
    Json(requests): Json<Vec<UserMachineFile>>,
) -> StatusCode {
    for request in &requests {
        state.queue.submit(request);
    }
    tracing::debug!(count = requests.len(), "submitted build requests");
    StatusCode::OK
}

async fn find_matching(
    State(state): State<AppState>,
    Json(queries): Json<Vec<UserMachineFile>>,
) -> Json<BTreeMap<ArtifactId, Artifact>> {
    Json(state.cache.find_all(&queries))
}

async fn serve_blob(
    State(state): State<AppState>,
    Path((uuid, name)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let uuid: ArtifactId = uuid
        .parse()
        .map_err(|_| AppError::NotFound(format!("no artifact {uuid}")))?;
    let cache = state.cache.clone();
    let file = tokio::task::spawn_blocking(move || cache.open_blob(&uuid, &name))
        .await
        .map_err(|e| AppError::Internal(format!("blob open task failed: {e}")))??;

    let stream = ReaderStream::new(tokio::fs::File::from_std(file));
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(stream),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use artifex_blobcache::{BlobCache, BlobCacheConfig};
    use artifex_core::path::indexed_path_hashes;
    use artifex_core::{artifact_key, Language, Machine, UserId};
    use axum::http::Request;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::artifact_cache::{ArtifactCache, ArtifactCacheConfig};
    use crate::queue::RequestQueue;

    fn test_state(dir: &std::path::Path) -> AppState {
        let blobs = BlobCache::open(BlobCacheConfig::new(dir)).unwrap();
        AppState::new(
            Arc::new(RequestQueue::new()),
            Arc::new(ArtifactCache::new(blobs, ArtifactCacheConfig::default())),
        )
    }

    fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_bytes(resp: Response) -> Vec<u8> {
        resp.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    fn publish(state: &AppState) -> ArtifactId {
        let artifact = Artifact {
            uuid: ArtifactId::new(),
            user_id: UserId::new(1),
            machine: Machine::new("m"),
            root: "/p".into(),
            language: Language::Python,
            files: vec!["index.json".into()],
            indexed_path_hashes: indexed_path_hashes(["/p/a.py", "/p/b.py"]),
            latest_file_update: Utc::now(),
            error: String::new(),
            error_kind: None,
        };
        let id = artifact.uuid;
        state
            .cache
            .blobs()
            .put(&artifact_key(&id, "index.json"), b"{\"files\":[]}")
            .unwrap();
        state.cache.publish(artifact);
        id
    }

    #[tokio::test]
    async fn submit_requests_merges_per_user_machine() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let app = router().with_state(state.clone());

        let body = serde_json::json!([
            {"UserID": 1, "Machine": "m", "Filename": "/a.py"},
            {"UserID": 1, "Machine": "m", "Filename": "/b.py"},
        ]);
        let resp = app
            .oneshot(json_request("/artifacts/submit-requests", body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_bytes(resp).await.is_empty());
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.queue.next().unwrap().filename, "/b.py");
    }

    #[tokio::test]
    async fn submit_rejects_malformed_body() {
        let dir = tempfile::tempdir().unwrap();
        let app = router().with_state(test_state(dir.path()));
        let resp = app
            .oneshot(json_request(
                "/artifacts/submit-requests",
                serde_json::json!({"UserID": 1}),
            ))
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn find_matching_returns_map_by_uuid() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let id = publish(&state);
        let app = router().with_state(state);

        let body = serde_json::json!([
            {"UserID": 1, "Machine": "m", "Filename": "/p/a.py"},
            {"UserID": 1, "Machine": "m", "Filename": "/other/x.py"},
            {"UserID": 2, "Machine": "m", "Filename": "/p/a.py"},
        ]);
        let resp = app
            .oneshot(json_request("/artifacts/find-matching", body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let found: BTreeMap<ArtifactId, Artifact> =
            serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&id].root, "/p");
    }

    #[tokio::test]
    async fn serve_blob_streams_published_blob() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let id = publish(&state);
        let app = router().with_state(state);

        let req = Request::builder()
            .uri(format!("/artifacts/{id}/index.json"))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_bytes(resp).await, b"{\"files\":[]}");

        for uri in [
            format!("/artifacts/{id}/missing.bin"),
            format!("/artifacts/{}/index.json", ArtifactId::new()),
            "/artifacts/not-a-uuid/index.json".to_string(),
        ] {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let resp = app.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        }
    }
}
