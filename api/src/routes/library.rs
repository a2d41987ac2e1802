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
        .route("/api/favorites", post(add_favorite))
        .route("/api/favorites/:user_id", get(list_favorites))
        .route(
            "/api/favorites/:user_id/:content_type/:content_id",
            delete(remove_favorite),
        )
        .route("/api/user-playlists", post(create_user_playlist))
        .route(
            "/api/user-playlists/:id",
            get(get_user_playlist).delete(delete_user_playlist),
        )
        .route("/api/user-playlists/:id/songs", post(add_song))
        .route("/api/user-playlists/:id/songs/:song_id", delete(remove_song))
        .route("/api/users/:id/playlists", get(list_user_playlists))
}

async fn list_favorites(
    State(state): State<AppState>,
    IdPath(user_id): IdPath<UserId>,
) -> ApiResult<Json<Vec<UserFavorite>>> {
    let favorites = state
        .storage
        .list_favorites(user_id)
        .await
        .map_err(ApiError::from_storage("Failed to fetch favorites"))?;
    Ok(Json(favorites))
}

async fn add_favorite(
    State(state): State<AppState>,
    ValidJson(favorite): ValidJson<NewUserFavorite>,
) -> ApiResult<(StatusCode, Json<UserFavorite>)> {
    let favorite = state
        .storage
        .add_favorite(favorite)
        .await
        .map_err(ApiError::from_storage("Failed to add favorite"))?;
    Ok((StatusCode::CREATED, Json(favorite)))
}

async fn remove_favorite(
    State(state): State<AppState>,
    IdPath((user_id, content_type, content_id)): IdPath<(UserId, String, i32)>,
) -> ApiResult<StatusCode> {
    let content = ContentRef::from_parts(&content_type, content_id)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    state
        .storage
        .remove_favorite(user_id, content)
        .await
        .map_err(ApiError::from_storage("Failed to remove favorite"))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_user_playlists(
    State(state): State<AppState>,
    IdPath(user_id): IdPath<UserId>,
) -> ApiResult<Json<Vec<UserPlaylist>>> {
    let playlists = state
        .storage
        .list_user_playlists(user_id)
        .await
        .map_err(ApiError::from_storage("Failed to fetch user playlists"))?;
    Ok(Json(playlists))
}

async fn create_user_playlist(
    State(state): State<AppState>,
    ValidJson(playlist): ValidJson<NewUserPlaylist>,
) -> ApiResult<(StatusCode, Json<UserPlaylist>)> {
    let created = state
        .storage
        .create_user_playlist(playlist)
        .await
        .map_err(ApiError::from_storage("Failed to create playlist"))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_user_playlist(
    State(state): State<AppState>,
    IdPath(id): IdPath<UserPlaylistId>,
) -> ApiResult<Json<UserPlaylistWithSongs>> {
    state
        .storage
        .get_user_playlist(id)
        .await
        .map_err(ApiError::from_storage("Failed to fetch playlist"))?
        .map(Json)
        .ok_or(ApiError::NotFound("Playlist"))
}

async fn delete_user_playlist(
    State(state): State<AppState>,
    IdPath(id): IdPath<UserPlaylistId>,
) -> ApiResult<StatusCode> {
    let deleted = state
        .storage
        .delete_user_playlist(id)
        .await
        .map_err(ApiError::from_storage("Failed to delete playlist"))?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Playlist"))
    }
}

async fn add_song(
    State(state): State<AppState>,
    IdPath(id): IdPath<UserPlaylistId>,
    ValidJson(entry): ValidJson<NewPlaylistEntry>,
) -> ApiResult<(StatusCode, Json<UserPlaylistSong>)> {
    let membership = state
        .storage
        .add_song_to_playlist(id, entry)
        .await
        .map_err(ApiError::from_storage("Failed to add song to playlist"))?;
    Ok((StatusCode::CREATED, Json(membership)))
}

async fn remove_song(
    State(state): State<AppState>,
    IdPath((id, song_id)): IdPath<(UserPlaylistId, SongId)>,
) -> ApiResult<StatusCode> {
    state
        .storage
        .remove_song_from_playlist(id, song_id)
        .await
        .map_err(ApiError::from_storage("Failed to remove song from playlist"))?;
    Ok(StatusCode::NO_CONTENT)
}
