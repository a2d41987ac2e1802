//! Loads a JSON catalog into the database through the storage layer.
//!
//! Songs name their artist, playlists list song titles and featured
//! entries name the item they point at, so a catalog file never has to
//! know the ids the database will assign.

use anyhow::{anyhow, Context};
use clap::Parser;
use schema::*;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tunestream_api::{
    db,
    storage::{PgStorage, Storage},
};

#[derive(Debug, Parser)]
#[command(name = "seed", about = "Load a JSON catalog into the database")]
struct Args {
    /// Catalog file, see demos/catalog.json
    catalog: PathBuf,

    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgresql://localhost/tunestream"
    )]
    database_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Catalog {
    users: Vec<NewUser>,
    artists: Vec<NewArtist>,
    songs: Vec<SeedSong>,
    podcasts: Vec<NewPodcast>,
    playlists: Vec<SeedPlaylist>,
    featured: Vec<SeedFeatured>,
}

#[derive(Debug, Deserialize)]
struct SeedSong {
    /// Artist name, resolved against `artists`.
    #[serde(default)]
    artist: Option<String>,
    #[serde(flatten)]
    song: NewSong,
}

#[derive(Debug, Deserialize)]
struct SeedPlaylist {
    /// Song titles in playlist order.
    #[serde(default)]
    songs: Vec<String>,
    #[serde(flatten)]
    playlist: NewPlaylist,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedFeatured {
    content_type: ContentKind,
    /// Title (or name) of the referenced item.
    title: String,
    #[serde(default)]
    thumbnail_url: Option<String>,
    #[serde(default)]
    position: Option<i32>,
}

#[derive(Debug, Default)]
struct Seeded {
    artists: HashMap<String, ArtistId>,
    songs: HashMap<String, SongId>,
    podcasts: HashMap<String, PodcastId>,
    playlists: HashMap<String, PlaylistId>,
}

impl Seeded {
    fn resolve(&self, kind: ContentKind, title: &str) -> Option<ContentRef> {
        match kind {
            ContentKind::Song => self.songs.get(title).copied().map(ContentRef::Song),
            ContentKind::Podcast => self.podcasts.get(title).copied().map(ContentRef::Podcast),
            ContentKind::Playlist => self.playlists.get(title).copied().map(ContentRef::Playlist),
        }
    }
}

async fn seed(storage: &dyn Storage, catalog: Catalog) -> anyhow::Result<Seeded> {
    let mut seeded = Seeded::default();

    for user in catalog.users {
        user.validate()
            .with_context(|| format!("invalid user {:?}", user.username))?;
        let created = storage.create_user(user).await?;
        tracing::info!("user {} -> {}", created.username, created.id);
    }

    for artist in catalog.artists {
        artist
            .validate()
            .with_context(|| format!("invalid artist {:?}", artist.name))?;
        let created = storage.create_artist(artist).await?;
        seeded.artists.insert(created.name.clone(), created.id);
    }
    tracing::info!("seeded {} artists", seeded.artists.len());

    for SeedSong { artist, mut song } in catalog.songs {
        if let Some(name) = artist {
            let id = seeded
                .artists
                .get(&name)
                .ok_or_else(|| anyhow!("song {:?} names unknown artist {:?}", song.title, name))?;
            song.artist_id = Some(*id);
        }
        song.validate()
            .with_context(|| format!("invalid song {:?}", song.title))?;
        let created = storage.create_song(song).await?;
        seeded.songs.insert(created.title.clone(), created.id);
    }
    tracing::info!("seeded {} songs", seeded.songs.len());

    for podcast in catalog.podcasts {
        podcast
            .validate()
            .with_context(|| format!("invalid podcast {:?}", podcast.title))?;
        let created = storage.create_podcast(podcast).await?;
        seeded.podcasts.insert(created.title.clone(), created.id);
    }
    tracing::info!("seeded {} podcasts", seeded.podcasts.len());

    for SeedPlaylist { songs, playlist } in catalog.playlists {
        playlist
            .validate()
            .with_context(|| format!("invalid playlist {:?}", playlist.title))?;
        let created = storage.create_playlist(playlist).await?;
        for title in songs {
            let song_id = seeded.songs.get(&title).ok_or_else(|| {
                anyhow!("playlist {:?} lists unknown song {:?}", created.title, title)
            })?;
            storage
                .add_song_to_curated_playlist(created.id, NewPlaylistEntry::append(*song_id))
                .await?;
        }
        seeded.playlists.insert(created.title.clone(), created.id);
    }
    tracing::info!("seeded {} playlists", seeded.playlists.len());

    let featured_count = catalog.featured.len();
    for entry in catalog.featured {
        let content = seeded
            .resolve(entry.content_type, &entry.title)
            .ok_or_else(|| {
                anyhow!(
                    "featured entry points at unknown {} {:?}",
                    entry.content_type.as_str(),
                    entry.title
                )
            })?;
        storage
            .create_featured(NewFeaturedContent {
                content,
                thumbnail_url: entry.thumbnail_url,
                position: entry.position,
                is_active: true,
            })
            .await?;
    }
    tracing::info!("seeded {} featured entries", featured_count);

    Ok(seeded)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter("seed=info,tunestream_api=info")
        .init();

    let args = Args::parse();

    let raw = std::fs::read_to_string(&args.catalog)
        .with_context(|| format!("Failed to read {}", args.catalog.display()))?;
    let catalog: Catalog = serde_json::from_str(&raw).context("Failed to parse catalog")?;

    let pool = db::init_db(&args.database_url, 4)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database connection established.");

    let storage = PgStorage::new(pool);
    seed(&storage, catalog).await?;

    tracing::info!("Seeding complete.");
    Ok(())
}
