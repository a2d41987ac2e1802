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
        .route("/api/follows", post(follow))
        .route("/api/follows/:follower_id/:following_id", delete(unfollow))
        .route("/api/users/:id/followers", get(list_followers))
        .route("/api/users/:id/following", get(list_following))
        .route("/api/users/:id/likes", get(list_liked_songs))
        .route("/api/users/:id/history", get(list_history))
        .route("/api/history", post(add_to_history))
}

async fn follow(
    State(state): State<AppState>,
    ValidJson(follow): ValidJson<NewUserFollow>,
) -> ApiResult<(StatusCode, Json<UserFollow>)> {
    let follow = state
        .storage
        .follow_user(follow)
        .await
        .map_err(ApiError::from_storage("Failed to follow user"))?;
    Ok((StatusCode::CREATED, Json(follow)))
}

async fn unfollow(
    State(state): State<AppState>,
    IdPath((follower_id, following_id)): IdPath<(UserId, UserId)>,
) -> ApiResult<StatusCode> {
    state
        .storage
        .unfollow_user(follower_id, following_id)
        .await
        .map_err(ApiError::from_storage("Failed to unfollow user"))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_followers(
    State(state): State<AppState>,
    IdPath(id): IdPath<UserId>,
) -> ApiResult<Json<Vec<User>>> {
    let users = state
        .storage
        .list_followers(id)
        .await
        .map_err(ApiError::from_storage("Failed to fetch followers"))?;
    Ok(Json(users))
}

async fn list_following(
    State(state): State<AppState>,
    IdPath(id): IdPath<UserId>,
) -> ApiResult<Json<Vec<User>>> {
    let users = state
        .storage
        .list_following(id)
        .await
        .map_err(ApiError::from_storage("Failed to fetch following"))?;
    Ok(Json(users))
}

async fn list_liked_songs(
    State(state): State<AppState>,
    IdPath(id): IdPath<UserId>,
) -> ApiResult<Json<Vec<SongWithRelations>>> {
    let songs = state
        .storage
        .list_liked_songs(id)
        .await
        .map_err(ApiError::from_storage("Failed to fetch liked songs"))?;
    Ok(Json(songs))
}

async fn list_history(
    State(state): State<AppState>,
    IdPath(id): IdPath<UserId>,
) -> ApiResult<Json<Vec<HistoryItem>>> {
    let history = state
        .storage
        .list_history(id)
        .await
        .map_err(ApiError::from_storage("Failed to fetch listening history"))?;
    Ok(Json(history))
}

async fn add_to_history(
    State(state): State<AppState>,
    ValidJson(entry): ValidJson<NewListeningHistory>,
) -> ApiResult<(StatusCode, Json<ListeningHistoryEntry>)> {
    let entry = state
        .storage
        .add_to_history(entry)
        .await
        .map_err(ApiError::from_storage("Failed to record play"))?;
    Ok((StatusCode::CREATED, Json(entry)))
}
