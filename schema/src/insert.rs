//! Insert payloads accepted by the API and the storage layer.
//!
//! Required columns are plain fields so a missing value fails
//! deserialization with the field name; columns with database defaults
//! carry the same defaults here.

use crate::content::{ContentRef, FollowType, ShareType};
use crate::ids::*;
use crate::validation::{
    non_negative, optional_text, required_text, Validate, ValidationErrors, MAX_NAME_LEN,
    MAX_TEXT_LEN, MAX_URL_LEN,
};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub is_artist: bool,
}

impl Validate for NewUser {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        required_text(&mut errors, "username", &self.username, MAX_NAME_LEN);
        if let Some(email) = &self.email {
            if !email.contains('@') {
                errors.add("email", "Invalid email");
            }
        }
        optional_text(&mut errors, "email", self.email.as_deref(), MAX_NAME_LEN);
        optional_text(&mut errors, "firstName", self.first_name.as_deref(), MAX_NAME_LEN);
        optional_text(&mut errors, "lastName", self.last_name.as_deref(), MAX_NAME_LEN);
        optional_text(
            &mut errors,
            "profileImageUrl",
            self.profile_image_url.as_deref(),
            MAX_URL_LEN,
        );
        optional_text(&mut errors, "bio", self.bio.as_deref(), MAX_TEXT_LEN);
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewArtist {
    pub name: String,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

impl Validate for NewArtist {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        required_text(&mut errors, "name", &self.name, MAX_NAME_LEN);
        optional_text(
            &mut errors,
            "profileImageUrl",
            self.profile_image_url.as_deref(),
            MAX_URL_LEN,
        );
        optional_text(&mut errors, "bio", self.bio.as_deref(), MAX_TEXT_LEN);
        errors.into_result()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSong {
    pub title: String,
    #[serde(default)]
    pub artist_id: Option<ArtistId>,
    #[serde(default)]
    pub uploaded_by: Option<UserId>,
    #[serde(default)]
    pub album_art: Option<String>,
    pub audio_url: String,
    #[serde(default)]
    pub audio_file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<i32>,
    #[serde(default)]
    pub duration: Option<i32>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default = "default_true")]
    pub is_public: bool,
}

impl NewSong {
    pub fn new(title: impl Into<String>, audio_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist_id: None,
            uploaded_by: None,
            album_art: None,
            audio_url: audio_url.into(),
            audio_file_name: None,
            file_size: None,
            duration: None,
            genre: None,
            is_public: true,
        }
    }
}

impl Validate for NewSong {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        required_text(&mut errors, "title", &self.title, MAX_NAME_LEN);
        required_text(&mut errors, "audioUrl", &self.audio_url, MAX_URL_LEN);
        optional_text(&mut errors, "albumArt", self.album_art.as_deref(), MAX_URL_LEN);
        optional_text(
            &mut errors,
            "audioFileName",
            self.audio_file_name.as_deref(),
            MAX_NAME_LEN,
        );
        optional_text(&mut errors, "genre", self.genre.as_deref(), MAX_NAME_LEN);
        non_negative(&mut errors, "fileSize", self.file_size);
        non_negative(&mut errors, "duration", self.duration);
        errors.into_result()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPodcast {
    pub title: String,
    pub host: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub duration: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Validate for NewPodcast {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        required_text(&mut errors, "title", &self.title, MAX_NAME_LEN);
        required_text(&mut errors, "host", &self.host, MAX_NAME_LEN);
        optional_text(&mut errors, "thumbnailUrl", self.thumbnail_url.as_deref(), MAX_URL_LEN);
        optional_text(&mut errors, "audioUrl", self.audio_url.as_deref(), MAX_URL_LEN);
        optional_text(&mut errors, "description", self.description.as_deref(), MAX_TEXT_LEN);
        non_negative(&mut errors, "duration", self.duration);
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlaylist {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub is_top_chart: bool,
}

impl Validate for NewPlaylist {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        required_text(&mut errors, "title", &self.title, MAX_NAME_LEN);
        optional_text(&mut errors, "description", self.description.as_deref(), MAX_TEXT_LEN);
        optional_text(&mut errors, "thumbnailUrl", self.thumbnail_url.as_deref(), MAX_URL_LEN);
        optional_text(&mut errors, "category", self.category.as_deref(), MAX_NAME_LEN);
        errors.into_result()
    }
}

/// Adds a song to a playlist; without a position the song is appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlaylistEntry {
    pub song_id: SongId,
    #[serde(default)]
    pub position: Option<i32>,
}

impl NewPlaylistEntry {
    pub fn append(song_id: SongId) -> Self {
        Self {
            song_id,
            position: None,
        }
    }
}

impl Validate for NewPlaylistEntry {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        non_negative(&mut errors, "position", self.position);
        errors.into_result()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFeaturedContent {
    #[serde(flatten)]
    pub content: ContentRef,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub position: Option<i32>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Validate for NewFeaturedContent {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        optional_text(&mut errors, "thumbnailUrl", self.thumbnail_url.as_deref(), MAX_URL_LEN);
        non_negative(&mut errors, "position", self.position);
        errors.into_result()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUserFavorite {
    pub user_id: UserId,
    #[serde(flatten)]
    pub content: ContentRef,
}

impl Validate for NewUserFavorite {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUserPlaylist {
    pub user_id: UserId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_public: bool,
}

impl Validate for NewUserPlaylist {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        required_text(&mut errors, "title", &self.title, MAX_NAME_LEN);
        optional_text(&mut errors, "description", self.description.as_deref(), MAX_TEXT_LEN);
        optional_text(&mut errors, "thumbnailUrl", self.thumbnail_url.as_deref(), MAX_URL_LEN);
        errors.into_result()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUserFollow {
    pub follower_id: UserId,
    pub following_id: UserId,
    #[serde(default = "default_follow_type")]
    pub follow_type: FollowType,
}

fn default_follow_type() -> FollowType {
    FollowType::User
}

impl Validate for NewUserFollow {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.follower_id == self.following_id {
            errors.add("followingId", "Cannot follow yourself");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSongLike {
    pub user_id: UserId,
}

impl Validate for NewSongLike {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSongShare {
    pub user_id: UserId,
    pub share_type: ShareType,
}

impl Validate for NewSongShare {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewListeningHistory {
    pub user_id: UserId,
    pub song_id: SongId,
    #[serde(default)]
    pub play_duration: Option<i32>,
}

impl Validate for NewListeningHistory {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        non_negative(&mut errors, "playDuration", self.play_duration);
        errors.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn artist_without_name_fails_on_name() {
        let err = serde_json::from_value::<NewArtist>(json!({"bio": "x"})).unwrap_err();
        assert!(ValidationErrors::from_serde(&err).mentions("name"));

        let blank: NewArtist = serde_json::from_value(json!({"name": "  "})).unwrap();
        assert!(blank.validate().unwrap_err().mentions("name"));
    }

    #[test]
    fn song_defaults_to_public() {
        let song: NewSong =
            serde_json::from_value(json!({"title": "Intro", "audioUrl": "/uploads/a.mp3"}))
                .unwrap();
        assert!(song.is_public);
        assert!(song.validate().is_ok());
    }

    #[test]
    fn song_reports_every_bad_field() {
        let mut song = NewSong::new("", "/uploads/a.mp3");
        song.duration = Some(-5);
        song.file_size = Some(-1);

        let errors = song.validate().unwrap_err();
        assert!(errors.mentions("title"));
        assert!(errors.mentions("duration"));
        assert!(errors.mentions("fileSize"));
    }

    #[test]
    fn self_follow_is_invalid() {
        let follow = NewUserFollow {
            follower_id: UserId(1),
            following_id: UserId(1),
            follow_type: FollowType::User,
        };
        assert!(follow.validate().unwrap_err().mentions("followingId"));
    }

    #[test]
    fn favorite_parses_tagged_content() {
        let favorite: NewUserFavorite = serde_json::from_value(
            json!({"userId": 2, "contentType": "playlist", "contentId": 11}),
        )
        .unwrap();
        assert_eq!(favorite.content, ContentRef::Playlist(PlaylistId(11)));
    }

    #[test]
    fn email_must_look_like_an_address() {
        let user = NewUser {
            username: "ana".into(),
            email: Some("ana.example.com".into()),
            ..Default::default()
        };
        assert!(user.validate().unwrap_err().mentions("email"));
    }
}
