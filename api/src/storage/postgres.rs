use async_trait::async_trait;
use schema::*;
use sqlx::postgres::{PgExecutor, PgPool};

use super::{Result, Storage, StorageError, HISTORY_LIMIT, TRENDING_LIMIT};
use crate::db::{is_foreign_key_violation, is_unique_violation};
use crate::models::{FavoriteRow, FeaturedRow, HistoryRow, PlaylistEntryRow, SongJoinRow};

macro_rules! song_columns {
    () => {
        "s.id, s.title, s.artist_id, s.uploaded_by, s.album_art, s.audio_url, \
         s.audio_file_name, s.file_size, s.duration, s.genre, s.play_count, s.likes_count, \
         s.is_public, s.created_at, \
         a.id AS a_id, a.name AS a_name, a.profile_image_url AS a_profile_image_url, \
         a.bio AS a_bio, a.created_at AS a_created_at, \
         u.id AS u_id, u.username AS u_username, u.profile_image_url AS u_profile_image_url"
    };
}

macro_rules! song_relations {
    () => {
        " LEFT JOIN artists a ON a.id = s.artist_id LEFT JOIN users u ON u.id = s.uploaded_by "
    };
}

const USER_EXISTS: &str = "SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)";
const ARTIST_EXISTS: &str = "SELECT EXISTS(SELECT 1 FROM artists WHERE id = $1)";
const SONG_EXISTS: &str = "SELECT EXISTS(SELECT 1 FROM songs WHERE id = $1)";
const PODCAST_EXISTS: &str = "SELECT EXISTS(SELECT 1 FROM podcasts WHERE id = $1)";
const PLAYLIST_EXISTS: &str = "SELECT EXISTS(SELECT 1 FROM playlists WHERE id = $1)";

const RECOUNT_USER_PLAYLIST: &str = r#"
    UPDATE user_playlists
    SET song_count = (SELECT COUNT(*)::int FROM user_playlist_songs WHERE playlist_id = $1),
        updated_at = NOW()
    WHERE id = $1
"#;

async fn exists<'e, E: PgExecutor<'e>>(executor: E, sql: &'static str, id: i32) -> Result<bool> {
    let found: bool = sqlx::query_scalar(sql)
        .bind(id)
        .fetch_one(executor)
        .await?;
    Ok(found)
}

async fn require<'e, E: PgExecutor<'e>>(
    executor: E,
    sql: &'static str,
    id: i32,
    entity: &'static str,
) -> Result<()> {
    if exists(executor, sql, id).await? {
        Ok(())
    } else {
        Err(StorageError::NotFound(entity))
    }
}

/// Takes the song row `FOR KEY SHARE` until commit. A concurrent
/// `delete_song` either finishes first or waits. Returns whether it exists.
async fn lock_song<'e, E: PgExecutor<'e>>(executor: E, id: SongId) -> Result<bool> {
    let locked: Option<i32> = sqlx::query_scalar("SELECT id FROM songs WHERE id = $1 FOR KEY SHARE")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(locked.is_some())
}

async fn require_song<'e, E: PgExecutor<'e>>(executor: E, id: SongId) -> Result<()> {
    if lock_song(executor, id).await? {
        Ok(())
    } else {
        Err(StorageError::NotFound("Song"))
    }
}

fn content_check(content: ContentRef) -> (&'static str, &'static str) {
    match content.kind() {
        ContentKind::Song => (SONG_EXISTS, "Song"),
        ContentKind::Podcast => (PODCAST_EXISTS, "Podcast"),
        ContentKind::Playlist => (PLAYLIST_EXISTS, "Playlist"),
    }
}

/// Postgres-backed storage. Cloning shares the pool.
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn curated_entries(&self, playlist_id: PlaylistId) -> Result<Vec<PlaylistEntry>> {
        let rows = sqlx::query_as::<_, PlaylistEntryRow>(concat!(
            "SELECT ps.position AS entry_position, ",
            song_columns!(),
            " FROM playlist_songs ps JOIN songs s ON s.id = ps.song_id",
            song_relations!(),
            "WHERE ps.playlist_id = $1 ORDER BY ps.position ASC NULLS LAST, ps.id ASC"
        ))
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(into_entry).collect())
    }

    async fn user_playlist_entries(&self, playlist_id: UserPlaylistId) -> Result<Vec<PlaylistEntry>> {
        let rows = sqlx::query_as::<_, PlaylistEntryRow>(concat!(
            "SELECT ups.position AS entry_position, ",
            song_columns!(),
            " FROM user_playlist_songs ups JOIN songs s ON s.id = ups.song_id",
            song_relations!(),
            "WHERE ups.playlist_id = $1 ORDER BY ups.position ASC NULLS LAST, ups.id ASC"
        ))
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(into_entry).collect())
    }
}

fn into_entry(row: PlaylistEntryRow) -> PlaylistEntry {
    PlaylistEntry {
        position: row.entry_position,
        song: row.song.into_relations(),
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn list_users(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY username ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let created = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, first_name, last_name, profile_image_url, bio, is_artist)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.profile_image_url)
        .bind(&user.bio)
        .bind(user.is_artist)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::Conflict("Username or email already taken".to_string())
            } else {
                e.into()
            }
        })?;
        Ok(created)
    }

    async fn list_artists(&self) -> Result<Vec<Artist>> {
        let artists = sqlx::query_as::<_, Artist>("SELECT * FROM artists ORDER BY name ASC, id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(artists)
    }

    async fn get_artist(&self, id: ArtistId) -> Result<Option<Artist>> {
        let artist = sqlx::query_as::<_, Artist>("SELECT * FROM artists WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(artist)
    }

    async fn create_artist(&self, artist: NewArtist) -> Result<Artist> {
        let created = sqlx::query_as::<_, Artist>(
            "INSERT INTO artists (name, profile_image_url, bio) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(&artist.name)
        .bind(&artist.profile_image_url)
        .bind(&artist.bio)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn list_songs(&self) -> Result<Vec<SongWithRelations>> {
        let rows = sqlx::query_as::<_, SongJoinRow>(concat!(
            "SELECT ",
            song_columns!(),
            " FROM songs s",
            song_relations!(),
            "WHERE s.is_public ORDER BY s.created_at DESC, s.id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SongJoinRow::into_relations).collect())
    }

    async fn list_trending_songs(&self) -> Result<Vec<SongWithRelations>> {
        let rows = sqlx::query_as::<_, SongJoinRow>(concat!(
            "SELECT ",
            song_columns!(),
            " FROM songs s",
            song_relations!(),
            "WHERE s.is_public ORDER BY s.play_count DESC, s.likes_count DESC, s.id ASC LIMIT $1"
        ))
        .bind(TRENDING_LIMIT as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SongJoinRow::into_relations).collect())
    }

    async fn get_song(&self, id: SongId) -> Result<Option<SongWithRelations>> {
        let row = sqlx::query_as::<_, SongJoinRow>(concat!(
            "SELECT ",
            song_columns!(),
            " FROM songs s",
            song_relations!(),
            "WHERE s.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SongJoinRow::into_relations))
    }

    async fn create_song(&self, song: NewSong) -> Result<Song> {
        if let Some(artist_id) = song.artist_id {
            require(&self.pool, ARTIST_EXISTS, artist_id.get(), "Artist").await?;
        }
        if let Some(user_id) = song.uploaded_by {
            require(&self.pool, USER_EXISTS, user_id.get(), "User").await?;
        }

        let created = sqlx::query_as::<_, Song>(
            r#"
            INSERT INTO songs (
                title, artist_id, uploaded_by, album_art, audio_url,
                audio_file_name, file_size, duration, genre, is_public
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(&song.title)
        .bind(song.artist_id)
        .bind(song.uploaded_by)
        .bind(&song.album_art)
        .bind(&song.audio_url)
        .bind(&song.audio_file_name)
        .bind(song.file_size)
        .bind(song.duration)
        .bind(&song.genre)
        .bind(song.is_public)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn delete_song(&self, id: SongId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<i32> = sqlx::query_scalar("SELECT id FROM songs WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Ok(false);
        }

        let affected: Vec<i32> = sqlx::query_scalar(
            r#"
            SELECT id FROM user_playlists
            WHERE id IN (SELECT playlist_id FROM user_playlist_songs WHERE song_id = $1)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        for sql in [
            "DELETE FROM user_playlist_songs WHERE song_id = $1",
            "DELETE FROM playlist_songs WHERE song_id = $1",
            "DELETE FROM song_likes WHERE song_id = $1",
            "DELETE FROM song_shares WHERE song_id = $1",
            "DELETE FROM listening_history WHERE song_id = $1",
            "DELETE FROM user_favorites WHERE content_type = 'song' AND content_id = $1",
            "DELETE FROM featured_content WHERE content_type = 'song' AND content_id = $1",
            "DELETE FROM songs WHERE id = $1",
        ] {
            sqlx::query(sql).bind(id).execute(&mut *tx).await?;
        }

        for playlist_id in &affected {
            sqlx::query(RECOUNT_USER_PLAYLIST)
                .bind(playlist_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await.map_err(|e| {
            tracing::error!("Failed to commit song deletion: {}", e);
            e
        })?;

        tracing::debug!(
            "deleted song {} and recounted {} user playlists",
            id,
            affected.len()
        );
        Ok(true)
    }

    async fn list_podcasts(&self) -> Result<Vec<Podcast>> {
        let podcasts = sqlx::query_as::<_, Podcast>(
            "SELECT * FROM podcasts ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(podcasts)
    }

    async fn get_podcast(&self, id: PodcastId) -> Result<Option<Podcast>> {
        let podcast = sqlx::query_as::<_, Podcast>("SELECT * FROM podcasts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(podcast)
    }

    async fn create_podcast(&self, podcast: NewPodcast) -> Result<Podcast> {
        let created = sqlx::query_as::<_, Podcast>(
            r#"
            INSERT INTO podcasts (title, host, thumbnail_url, audio_url, duration, description)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&podcast.title)
        .bind(&podcast.host)
        .bind(&podcast.thumbnail_url)
        .bind(&podcast.audio_url)
        .bind(podcast.duration)
        .bind(&podcast.description)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn list_playlists(&self) -> Result<Vec<Playlist>> {
        let playlists = sqlx::query_as::<_, Playlist>(
            "SELECT * FROM playlists ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(playlists)
    }

    async fn list_top_charts(&self) -> Result<Vec<Playlist>> {
        let playlists = sqlx::query_as::<_, Playlist>(
            "SELECT * FROM playlists WHERE is_top_chart ORDER BY title ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(playlists)
    }

    async fn get_playlist(&self, id: PlaylistId) -> Result<Option<PlaylistWithSongs>> {
        let playlist = sqlx::query_as::<_, Playlist>("SELECT * FROM playlists WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(playlist) = playlist else {
            return Ok(None);
        };
        let songs = self.curated_entries(id).await?;
        Ok(Some(PlaylistWithSongs { playlist, songs }))
    }

    async fn create_playlist(&self, playlist: NewPlaylist) -> Result<Playlist> {
        let created = sqlx::query_as::<_, Playlist>(
            r#"
            INSERT INTO playlists (title, description, thumbnail_url, category, is_top_chart)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&playlist.title)
        .bind(&playlist.description)
        .bind(&playlist.thumbnail_url)
        .bind(&playlist.category)
        .bind(playlist.is_top_chart)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn add_song_to_curated_playlist(
        &self,
        playlist_id: PlaylistId,
        entry: NewPlaylistEntry,
    ) -> Result<PlaylistSong> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<i32> =
            sqlx::query_scalar("SELECT id FROM playlists WHERE id = $1 FOR UPDATE")
                .bind(playlist_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StorageError::NotFound("Playlist"));
        }
        require_song(&mut *tx, entry.song_id).await?;

        let existing = sqlx::query_as::<_, PlaylistSong>(
            "SELECT * FROM playlist_songs WHERE playlist_id = $1 AND song_id = $2",
        )
        .bind(playlist_id)
        .bind(entry.song_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(existing) = existing {
            tx.commit().await?;
            return Ok(existing);
        }

        let position = match entry.position {
            Some(position) => position,
            None => {
                sqlx::query_scalar(
                    "SELECT COALESCE(MAX(position) + 1, 0) FROM playlist_songs WHERE playlist_id = $1",
                )
                .bind(playlist_id)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let created = sqlx::query_as::<_, PlaylistSong>(
            "INSERT INTO playlist_songs (playlist_id, song_id, position) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(playlist_id)
        .bind(entry.song_id)
        .bind(position)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn list_featured(&self) -> Result<Vec<FeaturedContent>> {
        let rows = sqlx::query_as::<_, FeaturedRow>(
            "SELECT * FROM featured_content WHERE is_active ORDER BY position ASC NULLS LAST, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let featured = rows
            .into_iter()
            .map(FeaturedContent::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(featured)
    }

    async fn create_featured(&self, content: NewFeaturedContent) -> Result<FeaturedContent> {
        let (sql, entity) = content_check(content.content);
        require(&self.pool, sql, content.content.raw_id(), entity).await?;

        let row = sqlx::query_as::<_, FeaturedRow>(
            r#"
            INSERT INTO featured_content (content_type, content_id, thumbnail_url, position, is_active)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(content.content.kind().as_str())
        .bind(content.content.raw_id())
        .bind(&content.thumbnail_url)
        .bind(content.position)
        .bind(content.is_active)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_into()?)
    }

    async fn list_favorites(&self, user_id: UserId) -> Result<Vec<UserFavorite>> {
        let rows = sqlx::query_as::<_, FavoriteRow>(
            "SELECT * FROM user_favorites WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let favorites = rows
            .into_iter()
            .map(UserFavorite::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(favorites)
    }

    async fn add_favorite(&self, favorite: NewUserFavorite) -> Result<UserFavorite> {
        require(&self.pool, USER_EXISTS, favorite.user_id.get(), "User").await?;
        let (sql, entity) = content_check(favorite.content);
        require(&self.pool, sql, favorite.content.raw_id(), entity).await?;

        let inserted = sqlx::query_as::<_, FavoriteRow>(
            r#"
            INSERT INTO user_favorites (user_id, content_type, content_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, content_type, content_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(favorite.user_id)
        .bind(favorite.content.kind().as_str())
        .bind(favorite.content.raw_id())
        .fetch_optional(&self.pool)
        .await?;

        let row = match inserted {
            Some(row) => row,
            None => {
                sqlx::query_as::<_, FavoriteRow>(
                    "SELECT * FROM user_favorites WHERE user_id = $1 AND content_type = $2 AND content_id = $3",
                )
                .bind(favorite.user_id)
                .bind(favorite.content.kind().as_str())
                .bind(favorite.content.raw_id())
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok(row.try_into()?)
    }

    async fn remove_favorite(&self, user_id: UserId, content: ContentRef) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM user_favorites WHERE user_id = $1 AND content_type = $2 AND content_id = $3",
        )
        .bind(user_id)
        .bind(content.kind().as_str())
        .bind(content.raw_id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_user_playlists(&self, user_id: UserId) -> Result<Vec<UserPlaylist>> {
        let playlists = sqlx::query_as::<_, UserPlaylist>(
            "SELECT * FROM user_playlists WHERE user_id = $1 ORDER BY updated_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(playlists)
    }

    async fn create_user_playlist(&self, playlist: NewUserPlaylist) -> Result<UserPlaylist> {
        require(&self.pool, USER_EXISTS, playlist.user_id.get(), "User").await?;

        let created = sqlx::query_as::<_, UserPlaylist>(
            r#"
            INSERT INTO user_playlists (user_id, title, description, thumbnail_url, is_public)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(playlist.user_id)
        .bind(&playlist.title)
        .bind(&playlist.description)
        .bind(&playlist.thumbnail_url)
        .bind(playlist.is_public)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn get_user_playlist(
        &self,
        id: UserPlaylistId,
    ) -> Result<Option<UserPlaylistWithSongs>> {
        let playlist =
            sqlx::query_as::<_, UserPlaylist>("SELECT * FROM user_playlists WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(playlist) = playlist else {
            return Ok(None);
        };
        let songs = self.user_playlist_entries(id).await?;
        Ok(Some(UserPlaylistWithSongs { playlist, songs }))
    }

    async fn delete_user_playlist(&self, id: UserPlaylistId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<i32> =
            sqlx::query_scalar("SELECT id FROM user_playlists WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Ok(false);
        }

        sqlx::query("DELETE FROM user_playlist_songs WHERE playlist_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM user_playlists WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn add_song_to_playlist(
        &self,
        playlist_id: UserPlaylistId,
        entry: NewPlaylistEntry,
    ) -> Result<UserPlaylistSong> {
        let mut tx = self.pool.begin().await?;

        // Song before playlist, the same order `delete_song` takes them.
        let song_found = lock_song(&mut *tx, entry.song_id).await?;

        // Concurrent writers on this playlist serialize here, so the
        // recount below sees every committed row.
        let locked: Option<i32> =
            sqlx::query_scalar("SELECT id FROM user_playlists WHERE id = $1 FOR UPDATE")
                .bind(playlist_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StorageError::NotFound("Playlist"));
        }
        if !song_found {
            return Err(StorageError::NotFound("Song"));
        }

        let existing = sqlx::query_as::<_, UserPlaylistSong>(
            "SELECT * FROM user_playlist_songs WHERE playlist_id = $1 AND song_id = $2",
        )
        .bind(playlist_id)
        .bind(entry.song_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(existing) = existing {
            tx.commit().await?;
            return Ok(existing);
        }

        let position = match entry.position {
            Some(position) => position,
            None => {
                sqlx::query_scalar(
                    "SELECT COALESCE(MAX(position) + 1, 0) FROM user_playlist_songs WHERE playlist_id = $1",
                )
                .bind(playlist_id)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let created = sqlx::query_as::<_, UserPlaylistSong>(
            r#"
            INSERT INTO user_playlist_songs (playlist_id, song_id, position)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(playlist_id)
        .bind(entry.song_id)
        .bind(position)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(RECOUNT_USER_PLAYLIST)
            .bind(playlist_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await.map_err(|e| {
            tracing::error!("Failed to commit playlist {} insert: {}", playlist_id, e);
            e
        })?;
        Ok(created)
    }

    async fn remove_song_from_playlist(
        &self,
        playlist_id: UserPlaylistId,
        song_id: SongId,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<i32> =
            sqlx::query_scalar("SELECT id FROM user_playlists WHERE id = $1 FOR UPDATE")
                .bind(playlist_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StorageError::NotFound("Playlist"));
        }

        let removed = sqlx::query(
            "DELETE FROM user_playlist_songs WHERE playlist_id = $1 AND song_id = $2",
        )
        .bind(playlist_id)
        .bind(song_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if removed > 0 {
            sqlx::query(RECOUNT_USER_PLAYLIST)
                .bind(playlist_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await.map_err(|e| {
            tracing::error!("Failed to commit playlist {} removal: {}", playlist_id, e);
            e
        })?;
        Ok(removed > 0)
    }

    async fn follow_user(&self, follow: NewUserFollow) -> Result<UserFollow> {
        let mut tx = self.pool.begin().await?;

        require(&mut *tx, USER_EXISTS, follow.follower_id.get(), "User").await?;
        require(&mut *tx, USER_EXISTS, follow.following_id.get(), "User").await?;

        let inserted = sqlx::query_as::<_, UserFollow>(
            r#"
            INSERT INTO user_follows (follower_id, following_id, follow_type)
            VALUES ($1, $2, $3)
            ON CONFLICT (follower_id, following_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(follow.follower_id)
        .bind(follow.following_id)
        .bind(follow.follow_type.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let row = match inserted {
            Some(row) => {
                sqlx::query(
                    r#"
                    UPDATE users
                    SET following_count = following_count + CASE WHEN id = $1 THEN 1 ELSE 0 END,
                        follower_count = follower_count + CASE WHEN id = $2 THEN 1 ELSE 0 END
                    WHERE id IN ($1, $2)
                    "#,
                )
                .bind(follow.follower_id)
                .bind(follow.following_id)
                .execute(&mut *tx)
                .await?;
                row
            }
            None => {
                sqlx::query_as::<_, UserFollow>(
                    "SELECT * FROM user_follows WHERE follower_id = $1 AND following_id = $2",
                )
                .bind(follow.follower_id)
                .bind(follow.following_id)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;
        Ok(row)
    }

    async fn unfollow_user(&self, follower_id: UserId, following_id: UserId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query(
            "DELETE FROM user_follows WHERE follower_id = $1 AND following_id = $2",
        )
        .bind(follower_id)
        .bind(following_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if removed > 0 {
            sqlx::query(
                r#"
                UPDATE users
                SET following_count = GREATEST(following_count - CASE WHEN id = $1 THEN 1 ELSE 0 END, 0),
                    follower_count = GREATEST(follower_count - CASE WHEN id = $2 THEN 1 ELSE 0 END, 0)
                WHERE id IN ($1, $2)
                "#,
            )
            .bind(follower_id)
            .bind(following_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(removed > 0)
    }

    async fn list_followers(&self, user_id: UserId) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT u.* FROM user_follows f
            JOIN users u ON u.id = f.follower_id
            WHERE f.following_id = $1
            ORDER BY f.created_at DESC, f.id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn list_following(&self, user_id: UserId) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT u.* FROM user_follows f
            JOIN users u ON u.id = f.following_id
            WHERE f.follower_id = $1
            ORDER BY f.created_at DESC, f.id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn like_song(&self, song_id: SongId, user_id: UserId) -> Result<SongLike> {
        let mut tx = self.pool.begin().await?;

        require_song(&mut *tx, song_id).await?;
        require(&mut *tx, USER_EXISTS, user_id.get(), "User").await?;

        let inserted = sqlx::query_as::<_, SongLike>(
            r#"
            INSERT INTO song_likes (user_id, song_id) VALUES ($1, $2)
            ON CONFLICT (user_id, song_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(song_id)
        .fetch_optional(&mut *tx)
        .await?;

        let like = match inserted {
            Some(like) => {
                sqlx::query("UPDATE songs SET likes_count = likes_count + 1 WHERE id = $1")
                    .bind(song_id)
                    .execute(&mut *tx)
                    .await?;
                like
            }
            None => {
                sqlx::query_as::<_, SongLike>(
                    "SELECT * FROM song_likes WHERE user_id = $1 AND song_id = $2",
                )
                .bind(user_id)
                .bind(song_id)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;
        Ok(like)
    }

    async fn unlike_song(&self, song_id: SongId, user_id: UserId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM song_likes WHERE user_id = $1 AND song_id = $2")
            .bind(user_id)
            .bind(song_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if removed > 0 {
            sqlx::query(
                "UPDATE songs SET likes_count = GREATEST(likes_count - 1, 0) WHERE id = $1",
            )
            .bind(song_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(removed > 0)
    }

    async fn list_liked_songs(&self, user_id: UserId) -> Result<Vec<SongWithRelations>> {
        let rows = sqlx::query_as::<_, SongJoinRow>(concat!(
            "SELECT ",
            song_columns!(),
            " FROM song_likes l JOIN songs s ON s.id = l.song_id",
            song_relations!(),
            "WHERE l.user_id = $1 ORDER BY l.created_at DESC, l.id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SongJoinRow::into_relations).collect())
    }

    async fn share_song(&self, song_id: SongId, share: NewSongShare) -> Result<SongShare> {
        require(&self.pool, SONG_EXISTS, song_id.get(), "Song").await?;
        require(&self.pool, USER_EXISTS, share.user_id.get(), "User").await?;

        let created = sqlx::query_as::<_, SongShare>(
            "INSERT INTO song_shares (user_id, song_id, share_type) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(share.user_id)
        .bind(song_id)
        .bind(share.share_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            // song deleted after the check above
            if is_foreign_key_violation(&e) {
                StorageError::NotFound("Song")
            } else {
                StorageError::Database(e)
            }
        })?;
        Ok(created)
    }

    async fn add_to_history(&self, entry: NewListeningHistory) -> Result<ListeningHistoryEntry> {
        let mut tx = self.pool.begin().await?;

        require_song(&mut *tx, entry.song_id).await?;
        require(&mut *tx, USER_EXISTS, entry.user_id.get(), "User").await?;

        let created = sqlx::query_as::<_, ListeningHistoryEntry>(
            r#"
            INSERT INTO listening_history (user_id, song_id, play_duration)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.song_id)
        .bind(entry.play_duration)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE songs SET play_count = play_count + 1 WHERE id = $1")
            .bind(entry.song_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn list_history(&self, user_id: UserId) -> Result<Vec<HistoryItem>> {
        let rows = sqlx::query_as::<_, HistoryRow>(concat!(
            "SELECT h.id AS h_id, h.user_id AS h_user_id, h.played_at AS h_played_at, ",
            "h.play_duration AS h_play_duration, ",
            song_columns!(),
            " FROM listening_history h JOIN songs s ON s.id = h.song_id",
            song_relations!(),
            "WHERE h.user_id = $1 ORDER BY h.played_at DESC, h.id DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(HISTORY_LIMIT as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(HistoryRow::into_item).collect())
    }

    async fn recount_counters(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut repaired = 0;

        for sql in [
            r#"
            UPDATE user_playlists p SET song_count = c.n
            FROM (
                SELECT up.id, COUNT(ups.id)::int AS n
                FROM user_playlists up
                LEFT JOIN user_playlist_songs ups ON ups.playlist_id = up.id
                GROUP BY up.id
            ) c
            WHERE p.id = c.id AND p.song_count <> c.n
            "#,
            r#"
            UPDATE songs s SET likes_count = c.n
            FROM (
                SELECT s2.id, COUNT(l.id)::int AS n
                FROM songs s2
                LEFT JOIN song_likes l ON l.song_id = s2.id
                GROUP BY s2.id
            ) c
            WHERE s.id = c.id AND s.likes_count <> c.n
            "#,
            r#"
            UPDATE songs s SET play_count = c.n
            FROM (
                SELECT s2.id, COUNT(h.id)::int AS n
                FROM songs s2
                LEFT JOIN listening_history h ON h.song_id = s2.id
                GROUP BY s2.id
            ) c
            WHERE s.id = c.id AND s.play_count <> c.n
            "#,
            r#"
            UPDATE users u SET follower_count = c.n
            FROM (
                SELECT u2.id, COUNT(f.id)::int AS n
                FROM users u2
                LEFT JOIN user_follows f ON f.following_id = u2.id
                GROUP BY u2.id
            ) c
            WHERE u.id = c.id AND u.follower_count <> c.n
            "#,
            r#"
            UPDATE users u SET following_count = c.n
            FROM (
                SELECT u2.id, COUNT(f.id)::int AS n
                FROM users u2
                LEFT JOIN user_follows f ON f.follower_id = u2.id
                GROUP BY u2.id
            ) c
            WHERE u.id = c.id AND u.following_count <> c.n
            "#,
        ] {
            repaired += sqlx::query(sql).execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(repaired)
    }
}
