//! Dashboard HTTP API.
//!
//! Every route except `/health` goes through the per-IP rate limiter.
//! Member profiles and leaderboard pages are served through the response
//! cache and tagged with `X-Cache: HIT|MISS`.

pub mod middleware;
pub mod response;

pub use response::{cached, CachedJson};

use axum::{
    extract::{Path, Query, State},
    middleware::from_fn_with_state,
    routing::get,
    Json, Router,
};
use chrono::FixedOffset;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    cache::CacheService,
    clock::Clock,
    error::{BotError, Result},
    identity::{Identity, IdentityResolver, MAX_CONCURRENT_FETCHES},
    ratelimit::ApiRateLimiter,
    storage::{Period, SnapshotStore},
};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 100;

/// Shared handles for route handlers.
#[derive(Clone)]
pub struct AppState {
    pub guild_id: u64,
    pub cache: Arc<CacheService>,
    pub limiter: Arc<ApiRateLimiter>,
    pub identities: IdentityResolver,
    pub store: Arc<dyn SnapshotStore>,
    pub clock: Arc<dyn Clock>,
    /// Day boundary for period leaderboards; matches the snapshot loop.
    pub snapshot_offset: FixedOffset,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/leaderboard", get(leaderboard))
        .route("/api/members/{user_id}", get(member_profile))
        .layer(from_fn_with_state(state.limiter.clone(), middleware::rate_limit))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "cache": state.cache.stats(),
        "rate_limiter": {
            "tracked_clients": state.limiter.tracked(),
        },
    }))
}

async fn member_profile(
    State(state): State<AppState>,
    Path(user_id): Path<u64>,
) -> std::result::Result<CachedJson, BotError> {
    let key = format!("member:{}", user_id);
    let ttl = state.cache.stats_ttl();

    cached(&state.cache.responses, &key, ttl, || async {
        let identity = state.identities.resolve(user_id).await;
        let counters = state.store.counters(state.guild_id, user_id).await?;
        Ok::<_, BotError>(json!({
            "user_id": user_id.to_string(),
            "identity": identity,
            "stats": counters,
        }))
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
struct LeaderboardQuery {
    period: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> std::result::Result<CachedJson, BotError> {
    let period = query.period.as_deref().map_or(Period::All, Period::parse_or_all);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);
    let key = format!("leaderboard:{}:{}:{}", period.as_str(), limit, offset);

    cached(&state.cache.responses, &key, state.cache.leaderboard_ttl(), || async {
        let since = period.since(state.clock.today(state.snapshot_offset));
        let page = state.store.leaderboard(state.guild_id, since, limit, offset).await?;

        let user_ids: Vec<u64> = page.rows.iter().map(|row| row.user_id).collect();
        let identities = state
            .identities
            .resolve_many(&user_ids, MAX_CONCURRENT_FETCHES)
            .await;

        let entries: Vec<Value> = page
            .rows
            .iter()
            .map(|row| {
                let identity = identities
                    .get(&row.user_id)
                    .cloned()
                    .unwrap_or_else(|| Identity::placeholder(row.user_id));
                json!({
                    "rank": row.rank,
                    "user_id": row.user_id.to_string(),
                    "display_name": identity.display_name,
                    "username": identity.username,
                    "avatar": identity.avatar_url,
                    "is_booster": identity.is_booster,
                    "level": row.level,
                    "xp": row.xp,
                    "xp_gained": row.xp_gained,
                    "total_messages": row.total_messages,
                    "voice_minutes": row.voice_minutes,
                })
            })
            .collect();

        Ok::<_, BotError>(json!({
            "leaderboard": entries,
            "total": page.total,
            "limit": limit,
            "offset": offset,
            "period": period,
        }))
    })
    .await
}

/// Serves the API until `shutdown` is cancelled.
pub async fn serve(state: AppState, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| BotError::Server(format!("cannot bind {}: {}", addr, e)))?;

    info!("🌐 Dashboard API listening on http://{}", addr);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .map_err(|e| BotError::Server(e.to_string()))?;

    info!("🌐 Dashboard API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::{offset_from_hours, ManualClock},
        config::Config,
        identity::{Identity, MemberLookup, MockIdentitySource},
        ratelimit::ApiRateLimiterConfig,
        storage::{Activity, JsonSnapshotStore},
    };
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const GUILD: u64 = 1;

    async fn state(quota: u32, dir: &TempDir) -> AppState {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let cache = Arc::new(CacheService::new(&Config::default(), Arc::new(clock.clone())));

        let mut source = MockIdentitySource::new();
        source.expect_fetch_member().returning(|_| {
            Ok(MemberLookup::Found(Identity {
                avatar_url: None,
                display_name: "Rami".into(),
                username: Some("rami".into()),
                joined_at: None,
                is_booster: false,
            }))
        });

        let store = Arc::new(JsonSnapshotStore::new(dir.path()).await.unwrap());
        store
            .record_activity(GUILD, 5, Activity { xp: 120, messages: 4, voice_minutes: 0 })
            .await
            .unwrap();
        store
            .record_activity(GUILD, 6, Activity { xp: 80, messages: 2, voice_minutes: 0 })
            .await
            .unwrap();

        AppState {
            guild_id: GUILD,
            identities: IdentityResolver::new(Arc::new(source), cache.clone(), Duration::from_secs(2)),
            cache,
            limiter: Arc::new(ApiRateLimiter::new(ApiRateLimiterConfig {
                quota,
                window: Duration::from_secs(60),
                burst: 100,
                max_tracked: 100,
            })),
            store,
            clock: Arc::new(clock),
            snapshot_offset: offset_from_hours(0).unwrap(),
        }
    }

    fn get(uri: &str, ip: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn over_quota_gets_429_with_retry_after() {
        let dir = TempDir::new().unwrap();
        let app = router(state(2, &dir).await);

        for remaining in ["1", "0"] {
            let response = app.clone().oneshot(get("/api/members/5", "1.2.3.4")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()["x-ratelimit-limit"], "2");
            assert_eq!(response.headers()["x-ratelimit-remaining"], remaining);
        }

        let response = app.clone().oneshot(get("/api/members/5", "1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response.headers()["retry-after"].to_str().unwrap().parse().unwrap();
        assert!(retry_after > 0 && retry_after <= 60);

        let body = json_body(response).await;
        assert_eq!(body["error"], "Rate limit exceeded");
        assert_eq!(body["retry_after"], retry_after);

        // A different client is unaffected.
        let response = app.oneshot(get("/api/members/5", "5.6.7.8")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_bypasses_the_limiter() {
        let dir = TempDir::new().unwrap();
        let app = router(state(1, &dir).await);

        for _ in 0..5 {
            let response = app.clone().oneshot(get("/health", "1.2.3.4")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let body = json_body(app.oneshot(get("/health", "1.2.3.4")).await.unwrap()).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["cache"]["response_capacity"], 200);
    }

    #[tokio::test]
    async fn profile_is_cached_between_requests() {
        let dir = TempDir::new().unwrap();
        let app = router(state(10, &dir).await);

        let first = app.clone().oneshot(get("/api/members/5", "1.1.1.1")).await.unwrap();
        assert_eq!(first.headers()["x-cache"], "MISS");
        let body = json_body(first).await;
        assert_eq!(body["identity"]["display_name"], "Rami");
        assert_eq!(body["stats"]["xp"], 120);

        let second = app.oneshot(get("/api/members/5", "1.1.1.1")).await.unwrap();
        assert_eq!(second.headers()["x-cache"], "HIT");
    }

    #[tokio::test]
    async fn leaderboard_pages_are_enriched_and_cached_per_query() {
        let dir = TempDir::new().unwrap();
        let app = router(state(10, &dir).await);

        let first = app.clone().oneshot(get("/api/leaderboard?limit=1", "1.1.1.1")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["x-cache"], "MISS");
        let body = json_body(first).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["period"], "all");
        assert_eq!(body["leaderboard"][0]["user_id"], "5");
        assert_eq!(body["leaderboard"][0]["rank"], 1);
        assert_eq!(body["leaderboard"][0]["display_name"], "Rami");

        let again = app.clone().oneshot(get("/api/leaderboard?limit=1", "1.1.1.1")).await.unwrap();
        assert_eq!(again.headers()["x-cache"], "HIT");

        // No snapshot yet: the weekly board counts everything as gained.
        let weekly = app.oneshot(get("/api/leaderboard?period=week", "1.1.1.1")).await.unwrap();
        assert_eq!(weekly.headers()["x-cache"], "MISS");
        let body = json_body(weekly).await;
        assert_eq!(body["period"], "week");
        assert_eq!(body["leaderboard"][1]["xp_gained"], 80);
    }
}
