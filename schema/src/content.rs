//! Tagged references and small enumerations stored as text columns.

use crate::ids::{PlaylistId, PodcastId, SongId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Returned when a stored or requested discriminator is not one we know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// The kind of item a featured entry or a favorite points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Song,
    Podcast,
    Playlist,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Song => "song",
            ContentKind::Podcast => "podcast",
            ContentKind::Playlist => "playlist",
        }
    }
}

impl FromStr for ContentKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "song" => Ok(ContentKind::Song),
            "podcast" => Ok(ContentKind::Podcast),
            "playlist" => Ok(ContentKind::Playlist),
            other => Err(UnknownVariant {
                kind: "content type",
                value: other.to_string(),
            }),
        }
    }
}

/// A reference to one catalog item of any kind.
///
/// Serialized adjacently tagged so that, flattened into its owner, it reads
/// `{"contentType": "song", "contentId": 7}`. The database keeps the same
/// pair of columns; nothing at the storage level enforces that the id
/// exists, so writers check before inserting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "contentType", content = "contentId", rename_all = "lowercase")]
pub enum ContentRef {
    Song(SongId),
    Podcast(PodcastId),
    Playlist(PlaylistId),
}

impl ContentRef {
    pub fn kind(&self) -> ContentKind {
        match self {
            ContentRef::Song(_) => ContentKind::Song,
            ContentRef::Podcast(_) => ContentKind::Podcast,
            ContentRef::Playlist(_) => ContentKind::Playlist,
        }
    }

    pub fn raw_id(&self) -> i32 {
        match self {
            ContentRef::Song(id) => id.0,
            ContentRef::Podcast(id) => id.0,
            ContentRef::Playlist(id) => id.0,
        }
    }

    pub fn new(kind: ContentKind, id: i32) -> Self {
        match kind {
            ContentKind::Song => ContentRef::Song(SongId(id)),
            ContentKind::Podcast => ContentRef::Podcast(PodcastId(id)),
            ContentKind::Playlist => ContentRef::Playlist(PlaylistId(id)),
        }
    }

    /// Rebuild a reference from its stored `(content_type, content_id)` pair.
    pub fn from_parts(kind: &str, id: i32) -> Result<Self, UnknownVariant> {
        Ok(Self::new(kind.parse()?, id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowType {
    User,
    Artist,
}

impl FollowType {
    pub fn as_str(self) -> &'static str {
        match self {
            FollowType::User => "user",
            FollowType::Artist => "artist",
        }
    }
}

impl TryFrom<String> for FollowType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "user" => Ok(FollowType::User),
            "artist" => Ok(FollowType::Artist),
            _ => Err(UnknownVariant {
                kind: "follow type",
                value,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareType {
    Link,
    Social,
    Email,
}

impl ShareType {
    pub fn as_str(self) -> &'static str {
        match self {
            ShareType::Link => "link",
            ShareType::Social => "social",
            ShareType::Email => "email",
        }
    }
}

impl TryFrom<String> for ShareType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "link" => Ok(ShareType::Link),
            "social" => Ok(ShareType::Social),
            "email" => Ok(ShareType::Email),
            _ => Err(UnknownVariant {
                kind: "share type",
                value,
            }),
        }
    }
}
