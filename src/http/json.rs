//! A `Json<T>` extractor variant that keeps the uniform `{error: string}`
//! envelope (spec §4.1, §7) even when the request body fails to parse,
//! instead of axum's default plain-text rejection body.

use super::models::ErrorResponse;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::Json;
use serde::de::DeserializeOwned;

/// Drop-in replacement for `axum::Json<T>` as a handler argument: on a
/// malformed body (invalid JSON syntax, wrong top-level shape, etc.) it
/// rejects with the same `(StatusCode, Json<ErrorResponse>)` shape every
/// other handler error uses, rather than axum's default rejection body.
///
/// This does not relax field-level leniency — individual fields such as
/// `CreateTunnelRequest::duration` handle "present but unparseable" via
/// their own `deserialize_with`, per spec §4.1's "a missing or
/// unparseable value defaults to 300".
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::plain(format!("invalid request body: {rejection}"))),
            )),
        }
    }
}
