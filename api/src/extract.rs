//! Request extractors that reject with [`ApiError`] instead of axum's
//! plain-text rejections.

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Request},
    http::request::Parts,
};
use schema::{from_json_slice, Validate};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// JSON body that has been deserialized and passed `Validate`.
#[derive(Debug)]
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;

        let value: T = from_json_slice(&bytes).map_err(|errors| {
            tracing::debug!("rejected body: {}", errors);
            ApiError::Validation(errors)
        })?;
        value.validate()?;

        Ok(ValidJson(value))
    }
}

/// Path parameters; anything that does not parse is a 400 "Invalid id".
#[derive(Debug)]
pub struct IdPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for IdPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(IdPath(value)),
            Err(e) => {
                tracing::debug!("rejected path {}: {}", parts.uri.path(), e);
                Err(ApiError::BadRequest("Invalid id".to_string()))
            }
        }
    }
}
