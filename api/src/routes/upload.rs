//! `POST /api/upload-audio`: a multipart form carrying one audio file and
//! the song's metadata. The file is streamed to the uploads directory and a
//! Song row pointing at it is created.

use axum::{
    extract::{
        multipart::{Field, MultipartError},
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    routing::post,
    Json, Router,
};
use schema::{ArtistId, NewSong, Song, UserId, Validate};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Largest accepted audio file.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Lower-case file extensions accepted as audio.
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "aac"];

const UPLOAD_FAILED: &str = "Failed to upload audio file";

pub fn routes() -> Router<AppState> {
    // room for the form fields around a maximum-size file
    let body_limit = MAX_UPLOAD_BYTES as usize + 1024 * 1024;
    Router::new().route(
        "/api/upload-audio",
        post(upload_audio).layer(DefaultBodyLimit::max(body_limit)),
    )
}

struct StoredAudio {
    url: String,
    original_name: String,
    size: u64,
}

#[derive(Default)]
struct UploadForm {
    audio: Option<StoredAudio>,
    title: Option<String>,
    artist_id: Option<ArtistId>,
    uploaded_by: Option<UserId>,
    genre: Option<String>,
}

async fn upload_audio(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Song>)> {
    let mut written: Option<PathBuf> = None;
    let result = handle_upload(&state, multipart, &mut written).await;

    if result.is_err() {
        if let Some(path) = written {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!("failed to remove abandoned upload {}: {}", path.display(), e);
            }
        }
    }
    result
}

async fn handle_upload(
    state: &AppState,
    mut multipart: Multipart,
    written: &mut Option<PathBuf>,
) -> ApiResult<(StatusCode, Json<Song>)> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                if form.audio.is_some() {
                    return Err(ApiError::BadRequest(
                        "Only one audio file may be uploaded".to_string(),
                    ));
                }
                form.audio = Some(store_audio(&state.uploads_dir, field, written).await?);
            }
            "title" => form.title = Some(text(field).await?),
            "artistId" => form.artist_id = parse_id(field, "artistId").await?.map(ArtistId),
            "uploadedBy" => form.uploaded_by = parse_id(field, "uploadedBy").await?.map(UserId),
            "genre" => form.genre = Some(text(field).await?).filter(|g| !g.trim().is_empty()),
            other => tracing::debug!("ignoring upload field {:?}", other),
        }
    }

    let audio = form
        .audio
        .ok_or_else(|| ApiError::BadRequest("No audio file uploaded".to_string()))?;

    let song = NewSong {
        artist_id: form.artist_id,
        uploaded_by: form.uploaded_by,
        audio_file_name: Some(audio.original_name),
        file_size: i32::try_from(audio.size).ok(),
        genre: form.genre,
        ..NewSong::new(form.title.unwrap_or_default(), audio.url)
    };
    song.validate()?;

    let created = state
        .storage
        .create_song(song)
        .await
        .map_err(ApiError::from_storage(UPLOAD_FAILED))?;

    tracing::info!(
        "stored upload {:?} as song {} ({} bytes)",
        created.audio_file_name,
        created.id,
        audio.size
    );
    Ok((StatusCode::CREATED, Json(created)))
}

/// Streams the file field to disk. The extension is checked before the
/// file is created and the size ceiling is enforced chunk by chunk.
async fn store_audio(
    dir: &Path,
    mut field: Field<'_>,
    written: &mut Option<PathBuf>,
) -> ApiResult<StoredAudio> {
    let original_name = field
        .file_name()
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("Audio field must be a file".to_string()))?;
    let extension = audio_extension(&original_name).ok_or_else(|| {
        ApiError::BadRequest("Only audio files (mp3, wav, m4a, aac) are allowed".to_string())
    })?;

    let stored_name = format!("{}.{}", Uuid::new_v4(), extension);
    let path = dir.join(&stored_name);
    let mut file = tokio::fs::File::create(&path).await.map_err(io_error)?;
    *written = Some(path);

    let mut size: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        size += chunk.len() as u64;
        if size > MAX_UPLOAD_BYTES {
            return Err(ApiError::PayloadTooLarge("File too large".to_string()));
        }
        file.write_all(&chunk).await.map_err(io_error)?;
    }
    file.flush().await.map_err(io_error)?;

    Ok(StoredAudio {
        url: format!("/uploads/{}", stored_name),
        original_name,
        size,
    })
}

fn audio_extension(file_name: &str) -> Option<&'static str> {
    let extension = Path::new(file_name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    ALLOWED_EXTENSIONS
        .iter()
        .find(|allowed| **allowed == extension)
        .copied()
}

async fn text(field: Field<'_>) -> ApiResult<String> {
    field.text().await.map_err(multipart_error)
}

async fn parse_id(field: Field<'_>, name: &'static str) -> ApiResult<Option<i32>> {
    let raw = text(field).await?;
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|_| ApiError::BadRequest(format!("Invalid {}", name)))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge("File too large".to_string())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

fn io_error(err: std::io::Error) -> ApiError {
    tracing::error!("{}: {}", UPLOAD_FAILED, err);
    ApiError::Internal(UPLOAD_FAILED)
}
