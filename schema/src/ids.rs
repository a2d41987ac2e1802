//! Strongly-typed row identifiers.
//!
//! Every table uses a `serial` primary key; the newtypes keep a song id from
//! being passed where a podcast id is expected. On the wire and in the
//! database they are plain integers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

macro_rules! define_id {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
            #[cfg_attr(feature = "sqlx", sqlx(transparent))]
            #[serde(transparent)]
            pub struct $name(pub i32);

            impl $name {
                pub fn get(self) -> i32 {
                    self.0
                }
            }

            impl From<i32> for $name {
                fn from(value: i32) -> Self {
                    Self(value)
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl FromStr for $name {
                type Err = ParseIntError;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    s.trim().parse().map(Self)
                }
            }
        )+
    };
}

define_id!(
    UserId,
    ArtistId,
    SongId,
    PodcastId,
    /// A curated playlist (top charts, editorial categories).
    PlaylistId,
    /// A playlist owned by a user.
    UserPlaylistId,
);
