//! Storage tests against a real Postgres database.
//!
//! Ignored by default. Run with
//! `DATABASE_URL=postgres://... cargo test --test postgres_storage -- --ignored`.
//! Rows are namespaced with a random suffix so runs can share a database.

use schema::*;
use tunestream_api::{
    db,
    storage::{PgStorage, Storage, StorageError, TRENDING_LIMIT},
};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

async fn setup_pool() -> PgPool {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for Postgres tests");
    db::init_db(&url, 5)
        .await
        .expect("Should connect to test database")
}

async fn setup_storage() -> PgStorage {
    PgStorage::new(setup_pool().await)
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

async fn user(storage: &PgStorage) -> User {
    storage
        .create_user(NewUser {
            username: unique("user"),
            ..Default::default()
        })
        .await
        .unwrap()
}

async fn song(storage: &PgStorage) -> Song {
    storage
        .create_song(NewSong::new(unique("song"), "/uploads/test.mp3"))
        .await
        .unwrap()
}

#[tokio::test]
#[ignore]
async fn test_playlist_round_trip() {
    let storage = setup_storage().await;
    let owner = user(&storage).await;
    let track = song(&storage).await;
    let playlist = storage
        .create_user_playlist(NewUserPlaylist {
            user_id: owner.id,
            title: unique("playlist"),
            description: None,
            thumbnail_url: None,
            is_public: true,
        })
        .await
        .unwrap();

    let first = storage
        .add_song_to_playlist(playlist.id, NewPlaylistEntry::append(track.id))
        .await
        .unwrap();
    let again = storage
        .add_song_to_playlist(playlist.id, NewPlaylistEntry::append(track.id))
        .await
        .unwrap();
    assert_eq!(first.id, again.id);

    let full = storage.get_user_playlist(playlist.id).await.unwrap().unwrap();
    assert_eq!(full.playlist.song_count, 1);
    assert_eq!(full.songs[0].song.song.id, track.id);

    assert!(storage
        .remove_song_from_playlist(playlist.id, track.id)
        .await
        .unwrap());
    let full = storage.get_user_playlist(playlist.id).await.unwrap().unwrap();
    assert_eq!(full.playlist.song_count, 0);
    assert!(full.songs.is_empty());

    assert!(storage.delete_user_playlist(playlist.id).await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_concurrent_adds_keep_song_count_exact() {
    let storage = std::sync::Arc::new(setup_storage().await);
    let owner = user(&storage).await;
    let playlist = storage
        .create_user_playlist(NewUserPlaylist {
            user_id: owner.id,
            title: unique("busy"),
            description: None,
            thumbnail_url: None,
            is_public: true,
        })
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let track = song(&storage).await;
        let storage = storage.clone();
        handles.push(tokio::spawn(async move {
            storage
                .add_song_to_playlist(playlist.id, NewPlaylistEntry::append(track.id))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let full = storage.get_user_playlist(playlist.id).await.unwrap().unwrap();
    assert_eq!(full.playlist.song_count, 8);
    assert_eq!(full.songs.len(), 8);
}

#[tokio::test]
#[ignore]
async fn test_follow_and_like_counters() {
    let storage = setup_storage().await;
    let alice = user(&storage).await;
    let bob = user(&storage).await;
    let track = song(&storage).await;

    let follow = NewUserFollow {
        follower_id: alice.id,
        following_id: bob.id,
        follow_type: FollowType::User,
    };
    storage.follow_user(follow).await.unwrap();
    storage.follow_user(follow).await.unwrap();
    let bob_now = storage.get_user(bob.id).await.unwrap().unwrap();
    assert_eq!(bob_now.follower_count, 1);

    assert!(storage.unfollow_user(alice.id, bob.id).await.unwrap());
    assert!(!storage.unfollow_user(alice.id, bob.id).await.unwrap());
    let bob_now = storage.get_user(bob.id).await.unwrap().unwrap();
    let alice_now = storage.get_user(alice.id).await.unwrap().unwrap();
    assert_eq!(bob_now.follower_count, 0);
    assert_eq!(alice_now.following_count, 0);

    storage.like_song(track.id, alice.id).await.unwrap();
    storage.like_song(track.id, alice.id).await.unwrap();
    let current = storage.get_song(track.id).await.unwrap().unwrap();
    assert_eq!(current.song.likes_count, 1);
    assert!(storage.unlike_song(track.id, alice.id).await.unwrap());
    let current = storage.get_song(track.id).await.unwrap().unwrap();
    assert_eq!(current.song.likes_count, 0);
}

#[tokio::test]
#[ignore]
async fn test_duplicate_username_is_conflict() {
    let storage = setup_storage().await;
    let existing = user(&storage).await;
    let err = storage
        .create_user(NewUser {
            username: existing.username.clone(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));
}

#[tokio::test]
#[ignore]
async fn test_favorites_and_featured_decode() {
    let storage = setup_storage().await;
    let fan = user(&storage).await;
    let track = song(&storage).await;

    let favorite = storage
        .add_favorite(NewUserFavorite {
            user_id: fan.id,
            content: ContentRef::Song(track.id),
        })
        .await
        .unwrap();
    let listed = storage.list_favorites(fan.id).await.unwrap();
    assert_eq!(listed, vec![favorite]);

    let featured = storage
        .create_featured(NewFeaturedContent {
            content: ContentRef::Song(track.id),
            thumbnail_url: None,
            position: None,
            is_active: true,
        })
        .await
        .unwrap();
    assert_eq!(featured.content, ContentRef::Song(track.id));
    assert!(storage
        .list_featured()
        .await
        .unwrap()
        .iter()
        .any(|f| f.id == featured.id));

    // deleting the song clears everything that pointed at it
    assert!(storage.delete_song(track.id).await.unwrap());
    assert!(storage.list_favorites(fan.id).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn test_trending_and_recount() {
    let storage = setup_storage().await;
    let trending = storage.list_trending_songs().await.unwrap();
    assert!(trending.len() <= TRENDING_LIMIT);
    assert!(trending
        .windows(2)
        .all(|w| w[0].song.play_count >= w[1].song.play_count));

    storage.recount_counters().await.unwrap();
    // a second pass has nothing left to repair
    assert_eq!(storage.recount_counters().await.unwrap(), 0);
}

#[tokio::test]
#[ignore]
async fn test_recount_repairs_playlist_and_follow_drift() {
    let pool = setup_pool().await;
    let storage = PgStorage::new(pool.clone());
    let alice = user(&storage).await;
    let bob = user(&storage).await;
    let track = song(&storage).await;
    let playlist = storage
        .create_user_playlist(NewUserPlaylist {
            user_id: alice.id,
            title: unique("drift"),
            description: None,
            thumbnail_url: None,
            is_public: true,
        })
        .await
        .unwrap();
    storage
        .add_song_to_playlist(playlist.id, NewPlaylistEntry::append(track.id))
        .await
        .unwrap();
    for (follower_id, following_id) in [(alice.id, bob.id), (bob.id, alice.id)] {
        storage
            .follow_user(NewUserFollow {
                follower_id,
                following_id,
                follow_type: FollowType::User,
            })
            .await
            .unwrap();
    }

    sqlx::query("UPDATE user_playlists SET song_count = 9 WHERE id = $1")
        .bind(playlist.id)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("UPDATE users SET follower_count = 5 WHERE id = $1")
        .bind(alice.id)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("UPDATE users SET following_count = 0 WHERE id = $1")
        .bind(bob.id)
        .execute(&pool)
        .await
        .unwrap();

    assert!(storage.recount_counters().await.unwrap() >= 3);
    let full = storage.get_user_playlist(playlist.id).await.unwrap().unwrap();
    assert_eq!(full.playlist.song_count, 1);
    let alice_now = storage.get_user(alice.id).await.unwrap().unwrap();
    let bob_now = storage.get_user(bob.id).await.unwrap().unwrap();
    assert_eq!(alice_now.follower_count, 1);
    assert_eq!(bob_now.following_count, 1);
    assert_eq!(storage.recount_counters().await.unwrap(), 0);
}

#[tokio::test]
#[ignore]
async fn test_writes_racing_a_song_delete_report_missing_song() {
    let pool = setup_pool().await;
    let storage = PgStorage::new(pool.clone());
    let fan = user(&storage).await;
    let playlist = storage
        .create_user_playlist(NewUserPlaylist {
            user_id: fan.id,
            title: unique("race"),
            description: None,
            thumbnail_url: None,
            is_public: true,
        })
        .await
        .unwrap();
    let (fan_id, playlist_id) = (fan.id, playlist.id);

    for action in ["like", "playlist"] {
        let song_id = song(&storage).await.id;

        // delete the song in an open transaction, commit once the write is waiting
        let mut tx = pool.begin().await.unwrap();
        sqlx::query("DELETE FROM songs WHERE id = $1")
            .bind(song_id)
            .execute(&mut *tx)
            .await
            .unwrap();

        let racing = storage.clone();
        let write = tokio::spawn(async move {
            match action {
                "like" => racing.like_song(song_id, fan_id).await.map(|_| ()),
                _ => racing
                    .add_song_to_playlist(playlist_id, NewPlaylistEntry::append(song_id))
                    .await
                    .map(|_| ()),
            }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.commit().await.unwrap();

        let err = write.await.unwrap().unwrap_err();
        assert!(
            matches!(err, StorageError::NotFound("Song")),
            "{action}: {err:?}"
        );
    }

    let full = storage.get_user_playlist(playlist_id).await.unwrap().unwrap();
    assert_eq!(full.playlist.song_count, 0);
}
