//! Row shapes for queries that don't map one-to-one onto a schema entity.

use chrono::{DateTime, Utc};
use schema::{
    Artist, ArtistId, ContentRef, FeaturedContent, ListeningHistoryEntry, Song, SongWithRelations,
    UnknownVariant, UserFavorite, UserId, UserSummary,
};
use sqlx::FromRow;

/// A song joined with its artist (`a_*`) and uploader (`u_*`) columns.
#[derive(Debug, Clone, FromRow)]
pub struct SongJoinRow {
    #[sqlx(flatten)]
    pub song: Song,
    pub a_id: Option<ArtistId>,
    pub a_name: Option<String>,
    pub a_profile_image_url: Option<String>,
    pub a_bio: Option<String>,
    pub a_created_at: Option<DateTime<Utc>>,
    pub u_id: Option<UserId>,
    pub u_username: Option<String>,
    pub u_profile_image_url: Option<String>,
}

impl SongJoinRow {
    pub fn into_relations(self) -> SongWithRelations {
        let artist = match (self.a_id, self.a_name, self.a_created_at) {
            (Some(id), Some(name), Some(created_at)) => Some(Artist {
                id,
                name,
                profile_image_url: self.a_profile_image_url,
                bio: self.a_bio,
                created_at,
            }),
            _ => None,
        };
        let uploader = match (self.u_id, self.u_username) {
            (Some(id), Some(username)) => Some(UserSummary {
                id,
                username,
                profile_image_url: self.u_profile_image_url,
            }),
            _ => None,
        };

        SongWithRelations {
            song: self.song,
            artist,
            uploader,
        }
    }
}

/// A playlist membership row joined with its song.
#[derive(Debug, Clone, FromRow)]
pub struct PlaylistEntryRow {
    pub entry_position: Option<i32>,
    #[sqlx(flatten)]
    pub song: SongJoinRow,
}

/// A history row joined with its song.
#[derive(Debug, Clone, FromRow)]
pub struct HistoryRow {
    pub h_id: i32,
    pub h_user_id: UserId,
    pub h_played_at: DateTime<Utc>,
    pub h_play_duration: Option<i32>,
    #[sqlx(flatten)]
    pub song: SongJoinRow,
}

impl HistoryRow {
    pub fn into_item(self) -> schema::HistoryItem {
        let song = self.song.into_relations();
        schema::HistoryItem {
            entry: ListeningHistoryEntry {
                id: self.h_id,
                user_id: self.h_user_id,
                song_id: song.song.id,
                played_at: self.h_played_at,
                play_duration: self.h_play_duration,
            },
            song,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct FeaturedRow {
    pub id: i32,
    pub content_type: String,
    pub content_id: i32,
    pub thumbnail_url: Option<String>,
    pub position: Option<i32>,
    pub is_active: bool,
}

impl TryFrom<FeaturedRow> for FeaturedContent {
    type Error = UnknownVariant;

    fn try_from(row: FeaturedRow) -> Result<Self, Self::Error> {
        Ok(FeaturedContent {
            id: row.id,
            content: ContentRef::from_parts(&row.content_type, row.content_id)?,
            thumbnail_url: row.thumbnail_url,
            position: row.position,
            is_active: row.is_active,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct FavoriteRow {
    pub id: i32,
    pub user_id: UserId,
    pub content_type: String,
    pub content_id: i32,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<FavoriteRow> for UserFavorite {
    type Error = UnknownVariant;

    fn try_from(row: FavoriteRow) -> Result<Self, Self::Error> {
        Ok(UserFavorite {
            id: row.id,
            user_id: row.user_id,
            content: ContentRef::from_parts(&row.content_type, row.content_id)?,
            created_at: row.created_at,
        })
    }
}
