use axum::{
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::{future::Future, time::Duration};
use tracing::error;

use crate::{cache::ResponseCache, error::BotError};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// JSON body tagged with whether it came from the response cache.
#[derive(Debug, Clone)]
pub struct CachedJson {
    pub body: Value,
    pub hit: bool,
}

impl CachedJson {
    pub fn hit(body: Value) -> Self {
        Self { body, hit: true }
    }

    pub fn miss(body: Value) -> Self {
        Self { body, hit: false }
    }
}

impl IntoResponse for CachedJson {
    fn into_response(self) -> Response {
        let marker = if self.hit { "HIT" } else { "MISS" };
        let mut response = Json(self.body).into_response();
        response
            .headers_mut()
            .insert(X_CACHE, HeaderValue::from_static(marker));
        response
    }
}

/// Serves `key` from `cache` while younger than `ttl`, otherwise computes,
/// stores and returns a fresh body. Failed computations are not cached.
pub async fn cached<F, Fut>(cache: &ResponseCache, key: &str, ttl: Duration, compute: F) -> Result<CachedJson, BotError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, BotError>>,
{
    if let Some(body) = cache.get(key, ttl) {
        return Ok(CachedJson::hit(body));
    }

    let body = compute().await?;
    cache.set(key, body.clone());
    Ok(CachedJson::miss(body))
}

/// Errors surface to dashboard clients as a generic 500; details stay in the log.
impl IntoResponse for BotError {
    fn into_response(self) -> Response {
        error!("❌ API error: {}", self);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Internal server error" })),
        )
            .into_response()
    }
}
