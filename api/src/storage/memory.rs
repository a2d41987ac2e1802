use async_trait::async_trait;
use chrono::Utc;
use schema::*;
use tokio::sync::RwLock;

use super::{Result, Storage, StorageError, HISTORY_LIMIT, TRENDING_LIMIT};

#[derive(Default)]
struct Sequences {
    users: i32,
    artists: i32,
    songs: i32,
    podcasts: i32,
    playlists: i32,
    playlist_songs: i32,
    featured: i32,
    favorites: i32,
    user_playlists: i32,
    user_playlist_songs: i32,
    follows: i32,
    likes: i32,
    shares: i32,
    history: i32,
}

fn next(counter: &mut i32) -> i32 {
    *counter += 1;
    *counter
}

#[derive(Default)]
struct Tables {
    seq: Sequences,
    users: Vec<User>,
    artists: Vec<Artist>,
    songs: Vec<Song>,
    podcasts: Vec<Podcast>,
    playlists: Vec<Playlist>,
    playlist_songs: Vec<PlaylistSong>,
    featured: Vec<FeaturedContent>,
    favorites: Vec<UserFavorite>,
    user_playlists: Vec<UserPlaylist>,
    user_playlist_songs: Vec<UserPlaylistSong>,
    follows: Vec<UserFollow>,
    likes: Vec<SongLike>,
    shares: Vec<SongShare>,
    history: Vec<ListeningHistoryEntry>,
}

impl Tables {
    fn user(&self, id: UserId) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    fn user_mut(&mut self, id: UserId) -> Option<&mut User> {
        self.users.iter_mut().find(|u| u.id == id)
    }

    fn song(&self, id: SongId) -> Option<&Song> {
        self.songs.iter().find(|s| s.id == id)
    }

    fn song_mut(&mut self, id: SongId) -> Option<&mut Song> {
        self.songs.iter_mut().find(|s| s.id == id)
    }

    fn require_user(&self, id: UserId) -> Result<()> {
        self.user(id).map(|_| ()).ok_or(StorageError::NotFound("User"))
    }

    fn require_song(&self, id: SongId) -> Result<()> {
        self.song(id).map(|_| ()).ok_or(StorageError::NotFound("Song"))
    }

    fn require_content(&self, content: ContentRef) -> Result<()> {
        let found = match content {
            ContentRef::Song(id) => self.song(id).is_some(),
            ContentRef::Podcast(id) => self.podcasts.iter().any(|p| p.id == id),
            ContentRef::Playlist(id) => self.playlists.iter().any(|p| p.id == id),
        };
        if found {
            Ok(())
        } else {
            Err(StorageError::NotFound(match content.kind() {
                ContentKind::Song => "Song",
                ContentKind::Podcast => "Podcast",
                ContentKind::Playlist => "Playlist",
            }))
        }
    }

    fn with_relations(&self, song: &Song) -> SongWithRelations {
        SongWithRelations {
            song: song.clone(),
            artist: song
                .artist_id
                .and_then(|id| self.artists.iter().find(|a| a.id == id))
                .cloned(),
            uploader: song
                .uploaded_by
                .and_then(|id| self.user(id))
                .map(UserSummary::from),
        }
    }

    fn entries<I>(&self, members: I) -> Vec<PlaylistEntry>
    where
        I: IntoIterator<Item = (i32, Option<i32>, SongId)>,
    {
        let mut members: Vec<_> = members.into_iter().collect();
        // position ascending with unpositioned rows last, then insertion order
        members.sort_by_key(|(id, position, _)| (position.is_none(), *position, *id));
        members
            .into_iter()
            .filter_map(|(_, position, song_id)| {
                self.song(song_id).map(|song| PlaylistEntry {
                    position,
                    song: self.with_relations(song),
                })
            })
            .collect()
    }

    fn recount_user_playlist(&mut self, id: UserPlaylistId) {
        let count = self
            .user_playlist_songs
            .iter()
            .filter(|m| m.playlist_id == id)
            .count() as i32;
        if let Some(playlist) = self.user_playlists.iter_mut().find(|p| p.id == id) {
            playlist.song_count = count;
            playlist.updated_at = Utc::now();
        }
    }
}

/// Process-local storage used when no database is configured, and by the
/// test-suite. A single lock guards all tables, so every operation is
/// atomic with respect to the others.
#[derive(Default)]
pub struct MemStorage {
    tables: RwLock<Tables>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn list_users(&self) -> Result<Vec<User>> {
        let tables = self.tables.read().await;
        let mut users = tables.users.clone();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.tables.read().await.user(id).cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut tables = self.tables.write().await;
        let taken = tables.users.iter().any(|u| {
            u.username == user.username || (user.email.is_some() && u.email == user.email)
        });
        if taken {
            return Err(StorageError::Conflict(
                "Username or email already taken".to_string(),
            ));
        }

        let now = Utc::now();
        let created = User {
            id: UserId(next(&mut tables.seq.users)),
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            profile_image_url: user.profile_image_url,
            bio: user.bio,
            is_artist: user.is_artist,
            follower_count: 0,
            following_count: 0,
            created_at: now,
            updated_at: now,
        };
        tables.users.push(created.clone());
        Ok(created)
    }

    async fn list_artists(&self) -> Result<Vec<Artist>> {
        let tables = self.tables.read().await;
        let mut artists = tables.artists.clone();
        artists.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(artists)
    }

    async fn get_artist(&self, id: ArtistId) -> Result<Option<Artist>> {
        let tables = self.tables.read().await;
        Ok(tables.artists.iter().find(|a| a.id == id).cloned())
    }

    async fn create_artist(&self, artist: NewArtist) -> Result<Artist> {
        let mut tables = self.tables.write().await;
        let created = Artist {
            id: ArtistId(next(&mut tables.seq.artists)),
            name: artist.name,
            profile_image_url: artist.profile_image_url,
            bio: artist.bio,
            created_at: Utc::now(),
        };
        tables.artists.push(created.clone());
        Ok(created)
    }

    async fn list_songs(&self) -> Result<Vec<SongWithRelations>> {
        let tables = self.tables.read().await;
        let mut songs: Vec<&Song> = tables.songs.iter().filter(|s| s.is_public).collect();
        songs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(songs.into_iter().map(|s| tables.with_relations(s)).collect())
    }

    async fn list_trending_songs(&self) -> Result<Vec<SongWithRelations>> {
        let tables = self.tables.read().await;
        let mut songs: Vec<&Song> = tables.songs.iter().filter(|s| s.is_public).collect();
        songs.sort_by(|a, b| {
            b.play_count
                .cmp(&a.play_count)
                .then(b.likes_count.cmp(&a.likes_count))
                .then(a.id.cmp(&b.id))
        });
        Ok(songs
            .into_iter()
            .take(TRENDING_LIMIT)
            .map(|s| tables.with_relations(s))
            .collect())
    }

    async fn get_song(&self, id: SongId) -> Result<Option<SongWithRelations>> {
        let tables = self.tables.read().await;
        Ok(tables.song(id).map(|s| tables.with_relations(s)))
    }

    async fn create_song(&self, song: NewSong) -> Result<Song> {
        let mut tables = self.tables.write().await;
        if let Some(artist_id) = song.artist_id {
            if !tables.artists.iter().any(|a| a.id == artist_id) {
                return Err(StorageError::NotFound("Artist"));
            }
        }
        if let Some(user_id) = song.uploaded_by {
            tables.require_user(user_id)?;
        }

        let created = Song {
            id: SongId(next(&mut tables.seq.songs)),
            title: song.title,
            artist_id: song.artist_id,
            uploaded_by: song.uploaded_by,
            album_art: song.album_art,
            audio_url: song.audio_url,
            audio_file_name: song.audio_file_name,
            file_size: song.file_size,
            duration: song.duration,
            genre: song.genre,
            play_count: 0,
            likes_count: 0,
            is_public: song.is_public,
            created_at: Utc::now(),
        };
        tables.songs.push(created.clone());
        Ok(created)
    }

    async fn delete_song(&self, id: SongId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if tables.song(id).is_none() {
            return Ok(false);
        }

        let mut affected: Vec<UserPlaylistId> = tables
            .user_playlist_songs
            .iter()
            .filter(|m| m.song_id == id)
            .map(|m| m.playlist_id)
            .collect();
        affected.sort_unstable();
        affected.dedup();

        let as_content = ContentRef::Song(id);
        tables.user_playlist_songs.retain(|m| m.song_id != id);
        tables.playlist_songs.retain(|m| m.song_id != id);
        tables.likes.retain(|l| l.song_id != id);
        tables.shares.retain(|s| s.song_id != id);
        tables.history.retain(|h| h.song_id != id);
        tables.favorites.retain(|f| f.content != as_content);
        tables.featured.retain(|f| f.content != as_content);
        tables.songs.retain(|s| s.id != id);

        for playlist_id in affected {
            tables.recount_user_playlist(playlist_id);
        }
        Ok(true)
    }

    async fn list_podcasts(&self) -> Result<Vec<Podcast>> {
        let tables = self.tables.read().await;
        let mut podcasts = tables.podcasts.clone();
        podcasts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(podcasts)
    }

    async fn get_podcast(&self, id: PodcastId) -> Result<Option<Podcast>> {
        let tables = self.tables.read().await;
        Ok(tables.podcasts.iter().find(|p| p.id == id).cloned())
    }

    async fn create_podcast(&self, podcast: NewPodcast) -> Result<Podcast> {
        let mut tables = self.tables.write().await;
        let created = Podcast {
            id: PodcastId(next(&mut tables.seq.podcasts)),
            title: podcast.title,
            host: podcast.host,
            thumbnail_url: podcast.thumbnail_url,
            audio_url: podcast.audio_url,
            duration: podcast.duration,
            description: podcast.description,
            created_at: Utc::now(),
        };
        tables.podcasts.push(created.clone());
        Ok(created)
    }

    async fn list_playlists(&self) -> Result<Vec<Playlist>> {
        let tables = self.tables.read().await;
        let mut playlists = tables.playlists.clone();
        playlists.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(playlists)
    }

    async fn list_top_charts(&self) -> Result<Vec<Playlist>> {
        let tables = self.tables.read().await;
        let mut charts: Vec<Playlist> = tables
            .playlists
            .iter()
            .filter(|p| p.is_top_chart)
            .cloned()
            .collect();
        charts.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(charts)
    }

    async fn get_playlist(&self, id: PlaylistId) -> Result<Option<PlaylistWithSongs>> {
        let tables = self.tables.read().await;
        let Some(playlist) = tables.playlists.iter().find(|p| p.id == id) else {
            return Ok(None);
        };
        let songs = tables.entries(
            tables
                .playlist_songs
                .iter()
                .filter(|m| m.playlist_id == id)
                .map(|m| (m.id, m.position, m.song_id)),
        );
        Ok(Some(PlaylistWithSongs {
            playlist: playlist.clone(),
            songs,
        }))
    }

    async fn create_playlist(&self, playlist: NewPlaylist) -> Result<Playlist> {
        let mut tables = self.tables.write().await;
        let created = Playlist {
            id: PlaylistId(next(&mut tables.seq.playlists)),
            title: playlist.title,
            description: playlist.description,
            thumbnail_url: playlist.thumbnail_url,
            category: playlist.category,
            is_top_chart: playlist.is_top_chart,
            created_at: Utc::now(),
        };
        tables.playlists.push(created.clone());
        Ok(created)
    }

    async fn add_song_to_curated_playlist(
        &self,
        playlist_id: PlaylistId,
        entry: NewPlaylistEntry,
    ) -> Result<PlaylistSong> {
        let mut tables = self.tables.write().await;
        if !tables.playlists.iter().any(|p| p.id == playlist_id) {
            return Err(StorageError::NotFound("Playlist"));
        }
        tables.require_song(entry.song_id)?;

        let members = tables.playlist_songs.iter().filter(|m| m.playlist_id == playlist_id);
        if let Some(existing) = members.clone().find(|m| m.song_id == entry.song_id) {
            return Ok(existing.clone());
        }
        let position = entry.position.unwrap_or_else(|| {
            members
                .filter_map(|m| m.position)
                .max()
                .map_or(0, |max| max + 1)
        });

        let created = PlaylistSong {
            id: next(&mut tables.seq.playlist_songs),
            playlist_id,
            song_id: entry.song_id,
            position: Some(position),
        };
        tables.playlist_songs.push(created.clone());
        Ok(created)
    }

    async fn list_featured(&self) -> Result<Vec<FeaturedContent>> {
        let tables = self.tables.read().await;
        let mut featured: Vec<FeaturedContent> =
            tables.featured.iter().filter(|f| f.is_active).cloned().collect();
        featured.sort_by_key(|f| (f.position.is_none(), f.position, f.id));
        Ok(featured)
    }

    async fn create_featured(&self, content: NewFeaturedContent) -> Result<FeaturedContent> {
        let mut tables = self.tables.write().await;
        tables.require_content(content.content)?;

        let created = FeaturedContent {
            id: next(&mut tables.seq.featured),
            content: content.content,
            thumbnail_url: content.thumbnail_url,
            position: content.position,
            is_active: content.is_active,
        };
        tables.featured.push(created.clone());
        Ok(created)
    }

    async fn list_favorites(&self, user_id: UserId) -> Result<Vec<UserFavorite>> {
        let tables = self.tables.read().await;
        let mut favorites: Vec<UserFavorite> = tables
            .favorites
            .iter()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect();
        favorites.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(favorites)
    }

    async fn add_favorite(&self, favorite: NewUserFavorite) -> Result<UserFavorite> {
        let mut tables = self.tables.write().await;
        tables.require_user(favorite.user_id)?;
        tables.require_content(favorite.content)?;

        if let Some(existing) = tables
            .favorites
            .iter()
            .find(|f| f.user_id == favorite.user_id && f.content == favorite.content)
        {
            return Ok(existing.clone());
        }

        let created = UserFavorite {
            id: next(&mut tables.seq.favorites),
            user_id: favorite.user_id,
            content: favorite.content,
            created_at: Utc::now(),
        };
        tables.favorites.push(created.clone());
        Ok(created)
    }

    async fn remove_favorite(&self, user_id: UserId, content: ContentRef) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.favorites.len();
        tables
            .favorites
            .retain(|f| !(f.user_id == user_id && f.content == content));
        Ok(tables.favorites.len() < before)
    }

    async fn list_user_playlists(&self, user_id: UserId) -> Result<Vec<UserPlaylist>> {
        let tables = self.tables.read().await;
        let mut playlists: Vec<UserPlaylist> = tables
            .user_playlists
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        playlists.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(playlists)
    }

    async fn create_user_playlist(&self, playlist: NewUserPlaylist) -> Result<UserPlaylist> {
        let mut tables = self.tables.write().await;
        tables.require_user(playlist.user_id)?;

        let now = Utc::now();
        let created = UserPlaylist {
            id: UserPlaylistId(next(&mut tables.seq.user_playlists)),
            user_id: playlist.user_id,
            title: playlist.title,
            description: playlist.description,
            thumbnail_url: playlist.thumbnail_url,
            is_public: playlist.is_public,
            song_count: 0,
            created_at: now,
            updated_at: now,
        };
        tables.user_playlists.push(created.clone());
        Ok(created)
    }

    async fn get_user_playlist(
        &self,
        id: UserPlaylistId,
    ) -> Result<Option<UserPlaylistWithSongs>> {
        let tables = self.tables.read().await;
        let Some(playlist) = tables.user_playlists.iter().find(|p| p.id == id) else {
            return Ok(None);
        };
        let songs = tables.entries(
            tables
                .user_playlist_songs
                .iter()
                .filter(|m| m.playlist_id == id)
                .map(|m| (m.id, m.position, m.song_id)),
        );
        Ok(Some(UserPlaylistWithSongs {
            playlist: playlist.clone(),
            songs,
        }))
    }

    async fn delete_user_playlist(&self, id: UserPlaylistId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if !tables.user_playlists.iter().any(|p| p.id == id) {
            return Ok(false);
        }
        tables.user_playlist_songs.retain(|m| m.playlist_id != id);
        tables.user_playlists.retain(|p| p.id != id);
        Ok(true)
    }

    async fn add_song_to_playlist(
        &self,
        playlist_id: UserPlaylistId,
        entry: NewPlaylistEntry,
    ) -> Result<UserPlaylistSong> {
        let mut tables = self.tables.write().await;
        if !tables.user_playlists.iter().any(|p| p.id == playlist_id) {
            return Err(StorageError::NotFound("Playlist"));
        }
        tables.require_song(entry.song_id)?;

        let members = tables
            .user_playlist_songs
            .iter()
            .filter(|m| m.playlist_id == playlist_id);
        if let Some(existing) = members.clone().find(|m| m.song_id == entry.song_id) {
            return Ok(existing.clone());
        }
        let position = entry.position.unwrap_or_else(|| {
            members
                .filter_map(|m| m.position)
                .max()
                .map_or(0, |max| max + 1)
        });

        let created = UserPlaylistSong {
            id: next(&mut tables.seq.user_playlist_songs),
            playlist_id,
            song_id: entry.song_id,
            position: Some(position),
            added_at: Utc::now(),
        };
        tables.user_playlist_songs.push(created.clone());
        tables.recount_user_playlist(playlist_id);
        Ok(created)
    }

    async fn remove_song_from_playlist(
        &self,
        playlist_id: UserPlaylistId,
        song_id: SongId,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if !tables.user_playlists.iter().any(|p| p.id == playlist_id) {
            return Err(StorageError::NotFound("Playlist"));
        }

        let before = tables.user_playlist_songs.len();
        tables
            .user_playlist_songs
            .retain(|m| !(m.playlist_id == playlist_id && m.song_id == song_id));
        let removed = tables.user_playlist_songs.len() < before;

        if removed {
            tables.recount_user_playlist(playlist_id);
        }
        Ok(removed)
    }

    async fn follow_user(&self, follow: NewUserFollow) -> Result<UserFollow> {
        let mut tables = self.tables.write().await;
        tables.require_user(follow.follower_id)?;
        tables.require_user(follow.following_id)?;

        if let Some(existing) = tables.follows.iter().find(|f| {
            f.follower_id == follow.follower_id && f.following_id == follow.following_id
        }) {
            return Ok(existing.clone());
        }

        let created = UserFollow {
            id: next(&mut tables.seq.follows),
            follower_id: follow.follower_id,
            following_id: follow.following_id,
            follow_type: follow.follow_type,
            created_at: Utc::now(),
        };
        tables.follows.push(created.clone());
        if let Some(follower) = tables.user_mut(follow.follower_id) {
            follower.following_count += 1;
        }
        if let Some(followed) = tables.user_mut(follow.following_id) {
            followed.follower_count += 1;
        }
        Ok(created)
    }

    async fn unfollow_user(&self, follower_id: UserId, following_id: UserId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.follows.len();
        tables
            .follows
            .retain(|f| !(f.follower_id == follower_id && f.following_id == following_id));
        if tables.follows.len() == before {
            return Ok(false);
        }

        if let Some(follower) = tables.user_mut(follower_id) {
            follower.following_count = (follower.following_count - 1).max(0);
        }
        if let Some(followed) = tables.user_mut(following_id) {
            followed.follower_count = (followed.follower_count - 1).max(0);
        }
        Ok(true)
    }

    async fn list_followers(&self, user_id: UserId) -> Result<Vec<User>> {
        let tables = self.tables.read().await;
        let mut follows: Vec<&UserFollow> = tables
            .follows
            .iter()
            .filter(|f| f.following_id == user_id)
            .collect();
        follows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(follows
            .into_iter()
            .filter_map(|f| tables.user(f.follower_id).cloned())
            .collect())
    }

    async fn list_following(&self, user_id: UserId) -> Result<Vec<User>> {
        let tables = self.tables.read().await;
        let mut follows: Vec<&UserFollow> = tables
            .follows
            .iter()
            .filter(|f| f.follower_id == user_id)
            .collect();
        follows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(follows
            .into_iter()
            .filter_map(|f| tables.user(f.following_id).cloned())
            .collect())
    }

    async fn like_song(&self, song_id: SongId, user_id: UserId) -> Result<SongLike> {
        let mut tables = self.tables.write().await;
        tables.require_song(song_id)?;
        tables.require_user(user_id)?;

        if let Some(existing) = tables
            .likes
            .iter()
            .find(|l| l.song_id == song_id && l.user_id == user_id)
        {
            return Ok(existing.clone());
        }

        let created = SongLike {
            id: next(&mut tables.seq.likes),
            user_id,
            song_id,
            created_at: Utc::now(),
        };
        tables.likes.push(created.clone());
        if let Some(song) = tables.song_mut(song_id) {
            song.likes_count += 1;
        }
        Ok(created)
    }

    async fn unlike_song(&self, song_id: SongId, user_id: UserId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.likes.len();
        tables
            .likes
            .retain(|l| !(l.song_id == song_id && l.user_id == user_id));
        if tables.likes.len() == before {
            return Ok(false);
        }

        if let Some(song) = tables.song_mut(song_id) {
            song.likes_count = (song.likes_count - 1).max(0);
        }
        Ok(true)
    }

    async fn list_liked_songs(&self, user_id: UserId) -> Result<Vec<SongWithRelations>> {
        let tables = self.tables.read().await;
        let mut likes: Vec<&SongLike> = tables.likes.iter().filter(|l| l.user_id == user_id).collect();
        likes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(likes
            .into_iter()
            .filter_map(|l| tables.song(l.song_id).map(|s| tables.with_relations(s)))
            .collect())
    }

    async fn share_song(&self, song_id: SongId, share: NewSongShare) -> Result<SongShare> {
        let mut tables = self.tables.write().await;
        tables.require_song(song_id)?;
        tables.require_user(share.user_id)?;

        let created = SongShare {
            id: next(&mut tables.seq.shares),
            user_id: share.user_id,
            song_id,
            share_type: share.share_type,
            created_at: Utc::now(),
        };
        tables.shares.push(created.clone());
        Ok(created)
    }

    async fn add_to_history(&self, entry: NewListeningHistory) -> Result<ListeningHistoryEntry> {
        let mut tables = self.tables.write().await;
        tables.require_song(entry.song_id)?;
        tables.require_user(entry.user_id)?;

        let created = ListeningHistoryEntry {
            id: next(&mut tables.seq.history),
            user_id: entry.user_id,
            song_id: entry.song_id,
            played_at: Utc::now(),
            play_duration: entry.play_duration,
        };
        tables.history.push(created.clone());
        if let Some(song) = tables.song_mut(entry.song_id) {
            song.play_count += 1;
        }
        Ok(created)
    }

    async fn list_history(&self, user_id: UserId) -> Result<Vec<HistoryItem>> {
        let tables = self.tables.read().await;
        let mut entries: Vec<&ListeningHistoryEntry> =
            tables.history.iter().filter(|h| h.user_id == user_id).collect();
        entries.sort_by(|a, b| b.played_at.cmp(&a.played_at).then(b.id.cmp(&a.id)));
        Ok(entries
            .into_iter()
            .take(HISTORY_LIMIT)
            .filter_map(|h| {
                tables.song(h.song_id).map(|s| HistoryItem {
                    entry: h.clone(),
                    song: tables.with_relations(s),
                })
            })
            .collect())
    }

    async fn recount_counters(&self) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let tables = &mut *tables;
        let mut repaired = 0;

        for playlist in tables.user_playlists.iter_mut() {
            let count = tables
                .user_playlist_songs
                .iter()
                .filter(|m| m.playlist_id == playlist.id)
                .count() as i32;
            if playlist.song_count != count {
                playlist.song_count = count;
                repaired += 1;
            }
        }

        for song in tables.songs.iter_mut() {
            let likes = tables.likes.iter().filter(|l| l.song_id == song.id).count() as i32;
            let plays = tables.history.iter().filter(|h| h.song_id == song.id).count() as i32;
            if song.likes_count != likes {
                song.likes_count = likes;
                repaired += 1;
            }
            if song.play_count != plays {
                song.play_count = plays;
                repaired += 1;
            }
        }

        for user in tables.users.iter_mut() {
            let followers = tables
                .follows
                .iter()
                .filter(|f| f.following_id == user.id)
                .count() as i32;
            let following = tables
                .follows
                .iter()
                .filter(|f| f.follower_id == user.id)
                .count() as i32;
            if user.follower_count != followers {
                user.follower_count = followers;
                repaired += 1;
            }
            if user.following_count != following {
                user.following_count = following;
                repaired += 1;
            }
        }

        Ok(repaired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn user(store: &MemStorage, name: &str) -> User {
        store
            .create_user(NewUser {
                username: name.to_string(),
                email: Some(format!("{name}@example.com")),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    async fn song(store: &MemStorage, title: &str) -> Song {
        store
            .create_song(NewSong::new(title, format!("/uploads/{title}.mp3")))
            .await
            .unwrap()
    }

    fn playlist_for(user_id: UserId) -> NewUserPlaylist {
        NewUserPlaylist {
            user_id,
            title: "Road trip".to_string(),
            description: None,
            thumbnail_url: None,
            is_public: true,
        }
    }

    #[tokio::test]
    async fn private_songs_are_hidden_from_listings() {
        let store = MemStorage::new();
        song(&store, "public").await;
        let mut hidden = NewSong::new("hidden", "/uploads/hidden.mp3");
        hidden.is_public = false;
        let hidden = store.create_song(hidden).await.unwrap();

        let listed = store.list_songs().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].song.title, "public");
        assert!(store.list_trending_songs().await.unwrap().len() == 1);

        // still reachable directly
        assert!(store.get_song(hidden.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn trending_is_capped_and_ordered_by_plays() {
        let store = MemStorage::new();
        let listener = user(&store, "listener").await;
        let mut ids = Vec::new();
        for i in 0..12 {
            ids.push(song(&store, &format!("track-{i}")).await.id);
        }
        for _ in 0..3 {
            store
                .add_to_history(NewListeningHistory {
                    user_id: listener.id,
                    song_id: ids[11],
                    play_duration: Some(30),
                })
                .await
                .unwrap();
        }
        store.like_song(ids[5], listener.id).await.unwrap();

        let trending = store.list_trending_songs().await.unwrap();
        assert_eq!(trending.len(), TRENDING_LIMIT);
        assert_eq!(trending[0].song.id, ids[11]);
        assert_eq!(trending[0].song.play_count, 3);
        assert_eq!(trending[1].song.id, ids[5]);
        assert_eq!(trending[2].song.id, ids[0]);
    }

    #[tokio::test]
    async fn playlist_membership_keeps_song_count_exact() {
        let store = MemStorage::new();
        let owner = user(&store, "owner").await;
        let a = song(&store, "a").await;
        let b = song(&store, "b").await;
        let playlist = store.create_user_playlist(playlist_for(owner.id)).await.unwrap();

        let first = store
            .add_song_to_playlist(playlist.id, NewPlaylistEntry::append(a.id))
            .await
            .unwrap();
        let again = store
            .add_song_to_playlist(playlist.id, NewPlaylistEntry::append(a.id))
            .await
            .unwrap();
        assert_eq!(first, again);
        store
            .add_song_to_playlist(playlist.id, NewPlaylistEntry::append(b.id))
            .await
            .unwrap();

        let full = store.get_user_playlist(playlist.id).await.unwrap().unwrap();
        assert_eq!(full.playlist.song_count, 2);
        let order: Vec<_> = full.songs.iter().map(|e| (e.position, e.song.song.id)).collect();
        assert_eq!(order, vec![(Some(0), a.id), (Some(1), b.id)]);

        assert!(store.remove_song_from_playlist(playlist.id, a.id).await.unwrap());
        assert!(!store.remove_song_from_playlist(playlist.id, a.id).await.unwrap());
        let full = store.get_user_playlist(playlist.id).await.unwrap().unwrap();
        assert_eq!(full.playlist.song_count, 1);
        assert_eq!(full.songs.len(), 1);
    }

    #[tokio::test]
    async fn missing_playlist_or_song_is_not_found() {
        let store = MemStorage::new();
        let owner = user(&store, "owner").await;
        let playlist = store.create_user_playlist(playlist_for(owner.id)).await.unwrap();

        let err = store
            .add_song_to_playlist(UserPlaylistId(99), NewPlaylistEntry::append(SongId(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound("Playlist")));

        let err = store
            .add_song_to_playlist(playlist.id, NewPlaylistEntry::append(SongId(42)))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound("Song")));
    }

    #[tokio::test]
    async fn follow_round_trip_updates_both_counters() {
        let store = MemStorage::new();
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;
        let follow = NewUserFollow {
            follower_id: alice.id,
            following_id: bob.id,
            follow_type: FollowType::User,
        };

        store.follow_user(follow).await.unwrap();
        store.follow_user(follow).await.unwrap();

        let bob_now = store.get_user(bob.id).await.unwrap().unwrap();
        let alice_now = store.get_user(alice.id).await.unwrap().unwrap();
        assert_eq!(bob_now.follower_count, 1);
        assert_eq!(alice_now.following_count, 1);
        assert_eq!(store.list_followers(bob.id).await.unwrap()[0].id, alice.id);
        assert_eq!(store.list_following(alice.id).await.unwrap()[0].id, bob.id);

        assert!(store.unfollow_user(alice.id, bob.id).await.unwrap());
        assert!(!store.unfollow_user(alice.id, bob.id).await.unwrap());
        let bob_now = store.get_user(bob.id).await.unwrap().unwrap();
        assert_eq!(bob_now.follower_count, 0);
        assert!(store.list_followers(bob.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let store = MemStorage::new();
        user(&store, "dup").await;
        let err = store
            .create_user(NewUser {
                username: "dup".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn likes_are_idempotent_and_never_negative() {
        let store = MemStorage::new();
        let fan = user(&store, "fan").await;
        let track = song(&store, "anthem").await;

        store.like_song(track.id, fan.id).await.unwrap();
        store.like_song(track.id, fan.id).await.unwrap();
        let current = store.get_song(track.id).await.unwrap().unwrap();
        assert_eq!(current.song.likes_count, 1);

        assert!(store.unlike_song(track.id, fan.id).await.unwrap());
        assert!(!store.unlike_song(track.id, fan.id).await.unwrap());
        let current = store.get_song(track.id).await.unwrap().unwrap();
        assert_eq!(current.song.likes_count, 0);
    }

    #[tokio::test]
    async fn favorites_are_unique_per_content() {
        let store = MemStorage::new();
        let fan = user(&store, "fan").await;
        let track = song(&store, "anthem").await;
        let favorite = NewUserFavorite {
            user_id: fan.id,
            content: ContentRef::Song(track.id),
        };

        let first = store.add_favorite(favorite).await.unwrap();
        let second = store.add_favorite(favorite).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_favorites(fan.id).await.unwrap().len(), 1);

        let err = store
            .add_favorite(NewUserFavorite {
                user_id: fan.id,
                content: ContentRef::Podcast(PodcastId(7)),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound("Podcast")));

        assert!(store.remove_favorite(fan.id, ContentRef::Song(track.id)).await.unwrap());
        assert!(store.list_favorites(fan.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_song_cascades_and_recounts() {
        let store = MemStorage::new();
        let owner = user(&store, "owner").await;
        let track = song(&store, "gone").await;
        let playlist = store.create_user_playlist(playlist_for(owner.id)).await.unwrap();
        store
            .add_song_to_playlist(playlist.id, NewPlaylistEntry::append(track.id))
            .await
            .unwrap();
        store.like_song(track.id, owner.id).await.unwrap();

        assert!(store.delete_song(track.id).await.unwrap());
        assert!(!store.delete_song(track.id).await.unwrap());

        let full = store.get_user_playlist(playlist.id).await.unwrap().unwrap();
        assert_eq!(full.playlist.song_count, 0);
        assert!(full.songs.is_empty());
        assert!(store.list_liked_songs(owner.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recount_repairs_drifted_counters() {
        let store = MemStorage::new();
        let fan = user(&store, "fan").await;
        let track = song(&store, "anthem").await;
        store.like_song(track.id, fan.id).await.unwrap();

        {
            let mut tables = store.tables.write().await;
            let song = tables.song_mut(track.id).unwrap();
            song.likes_count = 40;
            song.play_count = 3;
        }

        assert_eq!(store.recount_counters().await.unwrap(), 2);
        let current = store.get_song(track.id).await.unwrap().unwrap();
        assert_eq!(current.song.likes_count, 1);
        assert_eq!(current.song.play_count, 0);
        assert_eq!(store.recount_counters().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recount_repairs_playlist_and_follow_counters() {
        let store = MemStorage::new();
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;
        let track = song(&store, "opener").await;
        let playlist = store.create_user_playlist(playlist_for(alice.id)).await.unwrap();
        store
            .add_song_to_playlist(playlist.id, NewPlaylistEntry::append(track.id))
            .await
            .unwrap();
        for (follower_id, following_id) in [(alice.id, bob.id), (bob.id, alice.id)] {
            store
                .follow_user(NewUserFollow {
                    follower_id,
                    following_id,
                    follow_type: FollowType::User,
                })
                .await
                .unwrap();
        }

        {
            let mut tables = store.tables.write().await;
            if let Some(p) = tables.user_playlists.iter_mut().find(|p| p.id == playlist.id) {
                p.song_count = 9;
            }
            tables.user_mut(alice.id).unwrap().follower_count = 5;
            tables.user_mut(bob.id).unwrap().following_count = 0;
        }

        assert_eq!(store.recount_counters().await.unwrap(), 3);
        let full = store.get_user_playlist(playlist.id).await.unwrap().unwrap();
        assert_eq!(full.playlist.song_count, 1);
        let alice_now = store.get_user(alice.id).await.unwrap().unwrap();
        let bob_now = store.get_user(bob.id).await.unwrap().unwrap();
        assert_eq!(alice_now.follower_count, 1);
        assert_eq!(bob_now.following_count, 1);
        assert_eq!(store.recount_counters().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn deleting_a_song_recounts_each_playlist_once() {
        let store = MemStorage::new();
        let owner = user(&store, "owner").await;
        let track = song(&store, "shared").await;
        let keep = song(&store, "kept").await;
        let first = store.create_user_playlist(playlist_for(owner.id)).await.unwrap();
        let second = store.create_user_playlist(playlist_for(owner.id)).await.unwrap();
        for playlist_id in [first.id, second.id, first.id] {
            store
                .add_song_to_playlist(playlist_id, NewPlaylistEntry::append(track.id))
                .await
                .unwrap();
        }
        store
            .add_song_to_playlist(second.id, NewPlaylistEntry::append(keep.id))
            .await
            .unwrap();

        assert!(store.delete_song(track.id).await.unwrap());
        let first_now = store.get_user_playlist(first.id).await.unwrap().unwrap();
        let second_now = store.get_user_playlist(second.id).await.unwrap().unwrap();
        assert_eq!(first_now.playlist.song_count, 0);
        assert_eq!(second_now.playlist.song_count, 1);
        assert_eq!(store.recount_counters().await.unwrap(), 0);
    }
}
