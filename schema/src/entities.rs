//! Rows as they come back from storage, plus the joined shapes the API
//! returns.

use crate::content::{ContentRef, FollowType, ShareType};
use crate::ids::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub bio: Option<String>,
    pub is_artist: bool,
    pub follower_count: i32,
    pub following_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The slice of a user embedded in song listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub profile_image_url: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            profile_image_url: user.profile_image_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    pub id: ArtistId,
    pub name: String,
    pub profile_image_url: Option<String>,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub id: SongId,
    pub title: String,
    pub artist_id: Option<ArtistId>,
    pub uploaded_by: Option<UserId>,
    pub album_art: Option<String>,
    pub audio_url: String,
    pub audio_file_name: Option<String>,
    /// Bytes.
    pub file_size: Option<i32>,
    /// Seconds.
    pub duration: Option<i32>,
    pub genre: Option<String>,
    pub play_count: i32,
    pub likes_count: i32,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

/// A song with its artist and uploader resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongWithRelations {
    #[serde(flatten)]
    pub song: Song,
    pub artist: Option<Artist>,
    pub uploader: Option<UserSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct Podcast {
    pub id: PodcastId,
    pub title: String,
    pub host: String,
    pub thumbnail_url: Option<String>,
    pub audio_url: Option<String>,
    pub duration: Option<i32>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: PlaylistId,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub category: Option<String>,
    pub is_top_chart: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSong {
    pub id: i32,
    pub playlist_id: PlaylistId,
    pub song_id: SongId,
    pub position: Option<i32>,
}

/// One song inside a playlist listing, in playlist order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistEntry {
    pub position: Option<i32>,
    #[serde(flatten)]
    pub song: SongWithRelations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistWithSongs {
    #[serde(flatten)]
    pub playlist: Playlist,
    pub songs: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturedContent {
    pub id: i32,
    #[serde(flatten)]
    pub content: ContentRef,
    pub thumbnail_url: Option<String>,
    pub position: Option<i32>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFavorite {
    pub id: i32,
    pub user_id: UserId,
    #[serde(flatten)]
    pub content: ContentRef,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct UserPlaylist {
    pub id: UserPlaylistId,
    pub user_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub is_public: bool,
    /// Denormalized count of membership rows, recomputed on every change.
    pub song_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct UserPlaylistSong {
    pub id: i32,
    pub playlist_id: UserPlaylistId,
    pub song_id: SongId,
    pub position: Option<i32>,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPlaylistWithSongs {
    #[serde(flatten)]
    pub playlist: UserPlaylist,
    pub songs: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct UserFollow {
    pub id: i32,
    pub follower_id: UserId,
    pub following_id: UserId,
    #[cfg_attr(feature = "sqlx", sqlx(try_from = "String"))]
    pub follow_type: FollowType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct SongLike {
    pub id: i32,
    pub user_id: UserId,
    pub song_id: SongId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct SongShare {
    pub id: i32,
    pub user_id: UserId,
    pub song_id: SongId,
    #[cfg_attr(feature = "sqlx", sqlx(try_from = "String"))]
    pub share_type: ShareType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct ListeningHistoryEntry {
    pub id: i32,
    pub user_id: UserId,
    pub song_id: SongId,
    pub played_at: DateTime<Utc>,
    /// Seconds of the song that were actually played.
    pub play_duration: Option<i32>,
}

/// A history row with the song it refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    #[serde(flatten)]
    pub entry: ListeningHistoryEntry,
    pub song: SongWithRelations,
}
