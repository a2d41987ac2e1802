use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use schema::*;

use crate::error::{ApiError, ApiResult};
use crate::extract::{IdPath, ValidJson};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/:id", get(get_user))
        .route("/api/artists", get(list_artists).post(create_artist))
        .route("/api/artists/:id", get(get_artist))
        .route("/api/podcasts", get(list_podcasts).post(create_podcast))
        .route("/api/podcasts/:id", get(get_podcast))
        .route("/api/playlists", get(list_playlists).post(create_playlist))
        .route("/api/playlists/top-charts", get(list_top_charts))
        .route("/api/playlists/:id", get(get_playlist))
        .route("/api/playlists/:id/songs", post(add_playlist_song))
        .route("/api/featured", get(list_featured).post(create_featured))
}

async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<User>>> {
    let users = state
        .storage
        .list_users()
        .await
        .map_err(ApiError::from_storage("Failed to fetch users"))?;
    Ok(Json(users))
}

async fn get_user(
    State(state): State<AppState>,
    IdPath(id): IdPath<UserId>,
) -> ApiResult<Json<User>> {
    state
        .storage
        .get_user(id)
        .await
        .map_err(ApiError::from_storage("Failed to fetch user"))?
        .map(Json)
        .ok_or(ApiError::NotFound("User"))
}

async fn create_user(
    State(state): State<AppState>,
    ValidJson(user): ValidJson<NewUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let created = state
        .storage
        .create_user(user)
        .await
        .map_err(ApiError::from_storage("Failed to create user"))?;
    tracing::info!("created user {} ({})", created.id, created.username);
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_artists(State(state): State<AppState>) -> ApiResult<Json<Vec<Artist>>> {
    let artists = state
        .storage
        .list_artists()
        .await
        .map_err(ApiError::from_storage("Failed to fetch artists"))?;
    Ok(Json(artists))
}

async fn get_artist(
    State(state): State<AppState>,
    IdPath(id): IdPath<ArtistId>,
) -> ApiResult<Json<Artist>> {
    state
        .storage
        .get_artist(id)
        .await
        .map_err(ApiError::from_storage("Failed to fetch artist"))?
        .map(Json)
        .ok_or(ApiError::NotFound("Artist"))
}

async fn create_artist(
    State(state): State<AppState>,
    ValidJson(artist): ValidJson<NewArtist>,
) -> ApiResult<(StatusCode, Json<Artist>)> {
    let created = state
        .storage
        .create_artist(artist)
        .await
        .map_err(ApiError::from_storage("Failed to create artist"))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_podcasts(State(state): State<AppState>) -> ApiResult<Json<Vec<Podcast>>> {
    let podcasts = state
        .storage
        .list_podcasts()
        .await
        .map_err(ApiError::from_storage("Failed to fetch podcasts"))?;
    Ok(Json(podcasts))
}

async fn get_podcast(
    State(state): State<AppState>,
    IdPath(id): IdPath<PodcastId>,
) -> ApiResult<Json<Podcast>> {
    state
        .storage
        .get_podcast(id)
        .await
        .map_err(ApiError::from_storage("Failed to fetch podcast"))?
        .map(Json)
        .ok_or(ApiError::NotFound("Podcast"))
}

async fn create_podcast(
    State(state): State<AppState>,
    ValidJson(podcast): ValidJson<NewPodcast>,
) -> ApiResult<(StatusCode, Json<Podcast>)> {
    let created = state
        .storage
        .create_podcast(podcast)
        .await
        .map_err(ApiError::from_storage("Failed to create podcast"))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_playlists(State(state): State<AppState>) -> ApiResult<Json<Vec<Playlist>>> {
    let playlists = state
        .storage
        .list_playlists()
        .await
        .map_err(ApiError::from_storage("Failed to fetch playlists"))?;
    Ok(Json(playlists))
}

async fn list_top_charts(State(state): State<AppState>) -> ApiResult<Json<Vec<Playlist>>> {
    let charts = state
        .storage
        .list_top_charts()
        .await
        .map_err(ApiError::from_storage("Failed to fetch top charts"))?;
    Ok(Json(charts))
}

async fn get_playlist(
    State(state): State<AppState>,
    IdPath(id): IdPath<PlaylistId>,
) -> ApiResult<Json<PlaylistWithSongs>> {
    state
        .storage
        .get_playlist(id)
        .await
        .map_err(ApiError::from_storage("Failed to fetch playlist"))?
        .map(Json)
        .ok_or(ApiError::NotFound("Playlist"))
}

async fn create_playlist(
    State(state): State<AppState>,
    ValidJson(playlist): ValidJson<NewPlaylist>,
) -> ApiResult<(StatusCode, Json<Playlist>)> {
    let created = state
        .storage
        .create_playlist(playlist)
        .await
        .map_err(ApiError::from_storage("Failed to create playlist"))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn add_playlist_song(
    State(state): State<AppState>,
    IdPath(id): IdPath<PlaylistId>,
    ValidJson(entry): ValidJson<NewPlaylistEntry>,
) -> ApiResult<(StatusCode, Json<PlaylistSong>)> {
    let membership = state
        .storage
        .add_song_to_curated_playlist(id, entry)
        .await
        .map_err(ApiError::from_storage("Failed to add song to playlist"))?;
    Ok((StatusCode::CREATED, Json(membership)))
}

async fn list_featured(State(state): State<AppState>) -> ApiResult<Json<Vec<FeaturedContent>>> {
    let featured = state
        .storage
        .list_featured()
        .await
        .map_err(ApiError::from_storage("Failed to fetch featured content"))?;
    Ok(Json(featured))
}

async fn create_featured(
    State(state): State<AppState>,
    ValidJson(content): ValidJson<NewFeaturedContent>,
) -> ApiResult<(StatusCode, Json<FeaturedContent>)> {
    let created = state
        .storage
        .create_featured(content)
        .await
        .map_err(ApiError::from_storage("Failed to create featured content"))?;
    Ok((StatusCode::CREATED, Json(created)))
}
