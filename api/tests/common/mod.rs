//! Shared helpers for the HTTP tests: an app wired to in-memory storage and
//! a scratch uploads directory.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`
use tunestream_api::{build_router, storage::MemStorage, AppState};

pub struct TestApp {
    pub router: Router,
    pub storage: Arc<MemStorage>,
    pub uploads: TempDir,
}

pub fn setup_app() -> TestApp {
    let uploads = tempfile::tempdir().expect("Should create uploads dir");
    let storage = Arc::new(MemStorage::new());
    let state = AppState::new(storage.clone(), uploads.path());
    TestApp {
        router: build_router(state),
        storage,
        uploads,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Should read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// Creates a user and returns its id.
    pub async fn user(&self, username: &str) -> i64 {
        let (status, body) = self
            .post(
                "/api/users",
                serde_json::json!({ "username": username, "email": format!("{username}@example.com") }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_i64().unwrap()
    }

    /// Creates a public song and returns its id.
    pub async fn song(&self, title: &str) -> i64 {
        let (status, body) = self
            .post(
                "/api/songs",
                serde_json::json!({ "title": title, "audioUrl": format!("/uploads/{title}.mp3") }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_i64().unwrap()
    }
}
