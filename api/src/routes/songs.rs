use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use schema::*;

use crate::error::{ApiError, ApiResult};
use crate::extract::{IdPath, ValidJson};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/songs", get(list_songs).post(create_song))
        .route("/api/songs/trending", get(list_trending))
        .route("/api/songs/:id", get(get_song).delete(delete_song))
        .route("/api/songs/:id/likes", post(like_song))
        .route("/api/songs/:id/likes/:user_id", delete(unlike_song))
        .route("/api/songs/:id/shares", post(share_song))
}

async fn list_songs(State(state): State<AppState>) -> ApiResult<Json<Vec<SongWithRelations>>> {
    let songs = state
        .storage
        .list_songs()
        .await
        .map_err(ApiError::from_storage("Failed to fetch songs"))?;
    Ok(Json(songs))
}

async fn list_trending(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<SongWithRelations>>> {
    let songs = state
        .storage
        .list_trending_songs()
        .await
        .map_err(ApiError::from_storage("Failed to fetch trending songs"))?;
    Ok(Json(songs))
}

async fn get_song(
    State(state): State<AppState>,
    IdPath(id): IdPath<SongId>,
) -> ApiResult<Json<SongWithRelations>> {
    state
        .storage
        .get_song(id)
        .await
        .map_err(ApiError::from_storage("Failed to fetch song"))?
        .map(Json)
        .ok_or(ApiError::NotFound("Song"))
}

async fn create_song(
    State(state): State<AppState>,
    ValidJson(song): ValidJson<NewSong>,
) -> ApiResult<(StatusCode, Json<Song>)> {
    let created = state
        .storage
        .create_song(song)
        .await
        .map_err(ApiError::from_storage("Failed to create song"))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn delete_song(
    State(state): State<AppState>,
    IdPath(id): IdPath<SongId>,
) -> ApiResult<StatusCode> {
    let deleted = state
        .storage
        .delete_song(id)
        .await
        .map_err(ApiError::from_storage("Failed to delete song"))?;
    if !deleted {
        return Err(ApiError::NotFound("Song"));
    }
    tracing::info!("deleted song {}", id);
    Ok(StatusCode::NO_CONTENT)
}

async fn like_song(
    State(state): State<AppState>,
    IdPath(id): IdPath<SongId>,
    ValidJson(like): ValidJson<NewSongLike>,
) -> ApiResult<(StatusCode, Json<SongLike>)> {
    let like = state
        .storage
        .like_song(id, like.user_id)
        .await
        .map_err(ApiError::from_storage("Failed to like song"))?;
    Ok((StatusCode::CREATED, Json(like)))
}

async fn unlike_song(
    State(state): State<AppState>,
    IdPath((id, user_id)): IdPath<(SongId, UserId)>,
) -> ApiResult<StatusCode> {
    state
        .storage
        .unlike_song(id, user_id)
        .await
        .map_err(ApiError::from_storage("Failed to unlike song"))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn share_song(
    State(state): State<AppState>,
    IdPath(id): IdPath<SongId>,
    ValidJson(share): ValidJson<NewSongShare>,
) -> ApiResult<(StatusCode, Json<SongShare>)> {
    let share = state
        .storage
        .share_song(id, share)
        .await
        .map_err(ApiError::from_storage("Failed to share song"))?;
    Ok((StatusCode::CREATED, Json(share)))
}
