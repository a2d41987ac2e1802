//! HTTP handlers, grouped by area. Each handler validates its input, calls
//! exactly one storage operation and serializes the result.

use axum::Router;

use crate::AppState;

mod catalog;
mod library;
mod social;
mod songs;
mod upload;

pub use upload::{ALLOWED_EXTENSIONS, MAX_UPLOAD_BYTES};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(catalog::routes())
        .merge(songs::routes())
        .merge(library::routes())
        .merge(social::routes())
        .merge(upload::routes())
}
