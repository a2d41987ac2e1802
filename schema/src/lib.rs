//! Catalog schema shared by the API server and its tools: entity rows,
//! typed identifiers, tagged content references and validated insert
//! payloads.

pub mod content;
pub mod entities;
pub mod ids;
pub mod insert;
pub mod validation;

pub use content::{ContentKind, ContentRef, FollowType, ShareType, UnknownVariant};
pub use entities::*;
pub use ids::*;
pub use insert::*;
pub use validation::{from_json_slice, FieldError, Validate, ValidationErrors};
