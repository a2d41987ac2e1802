//! Data access behind one trait so handlers never see which backend runs.
//!
//! Every operation that mutates a row and a denormalized counter derived
//! from it (playlist song counts, like/play counts, follower counts) runs
//! as one unit: a transaction in Postgres, a single write lock in memory.

mod memory;
mod postgres;

pub use memory::MemStorage;
pub use postgres::PgStorage;

use async_trait::async_trait;
use schema::*;
use thiserror::Error;

/// Number of songs returned by the trending listing.
pub const TRENDING_LIMIT: usize = 9;

/// Number of history rows returned per user.
pub const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row this operation depends on does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A unique column already holds this value.
    #[error("{0}")]
    Conflict(String),

    #[error("corrupt row: {0}")]
    Corrupt(#[from] UnknownVariant),
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    // Users
    async fn list_users(&self) -> Result<Vec<User>>;
    async fn get_user(&self, id: UserId) -> Result<Option<User>>;
    async fn create_user(&self, user: NewUser) -> Result<User>;

    // Artists
    async fn list_artists(&self) -> Result<Vec<Artist>>;
    async fn get_artist(&self, id: ArtistId) -> Result<Option<Artist>>;
    async fn create_artist(&self, artist: NewArtist) -> Result<Artist>;

    // Songs
    /// Public songs, newest first.
    async fn list_songs(&self) -> Result<Vec<SongWithRelations>>;
    /// Public songs by play count then likes, at most [`TRENDING_LIMIT`].
    async fn list_trending_songs(&self) -> Result<Vec<SongWithRelations>>;
    async fn get_song(&self, id: SongId) -> Result<Option<SongWithRelations>>;
    async fn create_song(&self, song: NewSong) -> Result<Song>;
    /// Removes the song and every row that references it. Returns false if
    /// there was no such song.
    async fn delete_song(&self, id: SongId) -> Result<bool>;

    // Podcasts
    async fn list_podcasts(&self) -> Result<Vec<Podcast>>;
    async fn get_podcast(&self, id: PodcastId) -> Result<Option<Podcast>>;
    async fn create_podcast(&self, podcast: NewPodcast) -> Result<Podcast>;

    // Curated playlists
    async fn list_playlists(&self) -> Result<Vec<Playlist>>;
    async fn list_top_charts(&self) -> Result<Vec<Playlist>>;
    async fn get_playlist(&self, id: PlaylistId) -> Result<Option<PlaylistWithSongs>>;
    async fn create_playlist(&self, playlist: NewPlaylist) -> Result<Playlist>;
    async fn add_song_to_curated_playlist(
        &self,
        playlist_id: PlaylistId,
        entry: NewPlaylistEntry,
    ) -> Result<PlaylistSong>;

    // Featured content
    async fn list_featured(&self) -> Result<Vec<FeaturedContent>>;
    async fn create_featured(&self, content: NewFeaturedContent) -> Result<FeaturedContent>;

    // Favorites
    async fn list_favorites(&self, user_id: UserId) -> Result<Vec<UserFavorite>>;
    async fn add_favorite(&self, favorite: NewUserFavorite) -> Result<UserFavorite>;
    async fn remove_favorite(&self, user_id: UserId, content: ContentRef) -> Result<bool>;

    // User playlists
    async fn list_user_playlists(&self, user_id: UserId) -> Result<Vec<UserPlaylist>>;
    async fn create_user_playlist(&self, playlist: NewUserPlaylist) -> Result<UserPlaylist>;
    async fn get_user_playlist(&self, id: UserPlaylistId)
        -> Result<Option<UserPlaylistWithSongs>>;
    async fn delete_user_playlist(&self, id: UserPlaylistId) -> Result<bool>;
    async fn add_song_to_playlist(
        &self,
        playlist_id: UserPlaylistId,
        entry: NewPlaylistEntry,
    ) -> Result<UserPlaylistSong>;
    async fn remove_song_from_playlist(
        &self,
        playlist_id: UserPlaylistId,
        song_id: SongId,
    ) -> Result<bool>;

    // Follows
    async fn follow_user(&self, follow: NewUserFollow) -> Result<UserFollow>;
    async fn unfollow_user(&self, follower_id: UserId, following_id: UserId) -> Result<bool>;
    async fn list_followers(&self, user_id: UserId) -> Result<Vec<User>>;
    async fn list_following(&self, user_id: UserId) -> Result<Vec<User>>;

    // Likes, shares, history
    async fn like_song(&self, song_id: SongId, user_id: UserId) -> Result<SongLike>;
    async fn unlike_song(&self, song_id: SongId, user_id: UserId) -> Result<bool>;
    async fn list_liked_songs(&self, user_id: UserId) -> Result<Vec<SongWithRelations>>;
    async fn share_song(&self, song_id: SongId, share: NewSongShare) -> Result<SongShare>;
    async fn add_to_history(&self, entry: NewListeningHistory) -> Result<ListeningHistoryEntry>;
    async fn list_history(&self, user_id: UserId) -> Result<Vec<HistoryItem>>;

    /// Recompute every denormalized counter from its source rows. Returns
    /// the number of rows whose stored value was wrong.
    async fn recount_counters(&self) -> Result<u64>;
}
