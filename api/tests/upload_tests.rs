//! Multipart upload tests. Each test gets its own scratch uploads directory,
//! so the directory listing shows exactly what a request left behind.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::{setup_app, TestApp};
use serde_json::json;
use std::path::Path;
use tunestream_api::routes::MAX_UPLOAD_BYTES;

const BOUNDARY: &str = "tunestream-test-boundary";

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn upload(app: &TestApp, parts: &[Part<'_>]) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/api/upload-audio")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap();
    app.send(request).await
}

fn stored_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn test_executable_is_rejected_before_anything_is_stored() {
    let app = setup_app();
    let (status, body) = upload(
        &app,
        &[
            Part::Text("title", "Totally a song"),
            Part::File("audio", "installer.exe", b"MZ\x90\x00"),
        ],
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("mp3"));
    assert_eq!(stored_files(app.uploads.path()), 0);

    let (_, songs) = app.get("/api/songs").await;
    assert_eq!(songs, json!([]));
}

#[tokio::test]
async fn test_mp3_upload_creates_song_and_is_served() {
    let app = setup_app();
    let uploader = app.user("uploader").await;
    let audio = b"ID3\x03\x00fake-frames-for-testing".repeat(64);
    let uploader_text = uploader.to_string();

    let (status, song) = upload(
        &app,
        &[
            Part::Text("title", "Field Recording"),
            Part::Text("genre", "Ambient"),
            Part::Text("uploadedBy", &uploader_text),
            Part::File("audio", "Field Recording.MP3", &audio),
        ],
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "{song}");
    assert_eq!(song["title"], "Field Recording");
    assert_eq!(song["genre"], "Ambient");
    assert_eq!(song["uploadedBy"], uploader);
    assert_eq!(song["audioFileName"], "Field Recording.MP3");
    assert_eq!(song["fileSize"], audio.len());

    let url = song["audioUrl"].as_str().unwrap();
    assert!(url.starts_with("/uploads/") && url.ends_with(".mp3"));
    assert_eq!(stored_files(app.uploads.path()), 1);

    let request = Request::builder().uri(url).body(Body::empty()).unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);

    // seeking needs partial content
    let request = Request::builder()
        .uri(url)
        .header(header::RANGE, "bytes=0-3")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(body, "ID3\u{3}");
}

#[tokio::test]
async fn test_missing_title_removes_the_stored_file() {
    let app = setup_app();
    let (status, body) = upload(&app, &[Part::File("audio", "untitled.wav", b"RIFF0000WAVE")]).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["path"], json!(["title"]));
    assert_eq!(stored_files(app.uploads.path()), 0);
}

#[tokio::test]
async fn test_non_numeric_artist_id_is_400() {
    let app = setup_app();
    let (status, body) = upload(
        &app,
        &[
            Part::File("audio", "song.aac", b"aac-bytes"),
            Part::Text("title", "Song"),
            Part::Text("artistId", "seven"),
        ],
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid artistId");
    assert_eq!(stored_files(app.uploads.path()), 0);
}

#[tokio::test]
async fn test_upload_without_file_is_400() {
    let app = setup_app();
    let (status, _) = upload(&app, &[Part::Text("title", "Nothing attached")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_file_is_413() {
    let app = setup_app();
    let audio = vec![0u8; MAX_UPLOAD_BYTES as usize + 1];
    let (status, body) = upload(
        &app,
        &[
            Part::Text("title", "Too long"),
            Part::File("audio", "long.mp3", &audio),
        ],
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["message"], "File too large");
    assert_eq!(stored_files(app.uploads.path()), 0);
}
