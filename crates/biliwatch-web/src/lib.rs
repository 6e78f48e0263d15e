//! JSON reporting and trigger API over the snapshot store and scheduler.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use biliwatch_store::{SnapshotStore, SortField, SortOrder, VideoQuery};
use biliwatch_sync::{AcquisitionService, CrawlConfig, RefreshOutcome, Scheduler};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

pub const CRATE_NAME: &str = "biliwatch-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SnapshotStore>,
    pub scheduler: Arc<Scheduler>,
    pub service: Arc<AcquisitionService>,
}

#[derive(Debug, Deserialize, Default)]
struct VideosQuery {
    date: Option<String>,
    sort_by: Option<String>,
    order: Option<String>,
    main_zone: Option<String>,
    sub_zone: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct VideoUpdateRequest {
    bvid: String,
}

pub fn app(state: AppState) -> Router {
    // the reporting frontend is served from a different origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/videos", get(videos_handler))
        .route("/api/dates", get(dates_handler))
        .route("/api/video/update", post(video_update_handler))
        .route("/api/crawl/start", post(crawl_start_handler))
        .route("/api/crawl/update-online", post(update_online_handler))
        .route("/api/crawl/status", get(crawl_status_handler))
        .route(
            "/api/crawl/config",
            get(crawl_config_get_handler).post(crawl_config_post_handler),
        )
        .layer(cors)
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "web API listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn videos_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VideosQuery>,
) -> Response {
    let params = VideoQuery {
        date: query.date,
        sort_by: query.sort_by.as_deref().map(SortField::parse).unwrap_or_default(),
        order: query.order.as_deref().map(SortOrder::parse).unwrap_or_default(),
        main_zone: query.main_zone,
        sub_zone: query.sub_zone,
    };
    match state.store.query(&params).await {
        Ok(videos) => Json(json!({ "count": videos.len(), "videos": videos })).into_response(),
        Err(err) => internal_error("querying snapshots", err),
    }
}

async fn dates_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.available_dates().await {
        Ok(dates) => Json(json!({ "dates": dates })).into_response(),
        Err(err) => internal_error("listing snapshot dates", err),
    }
}

async fn video_update_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VideoUpdateRequest>,
) -> Response {
    match state.service.refresh_video(&request.bvid).await {
        Ok(RefreshOutcome::Updated) => {
            Json(json!({ "updated": true, "bvid": request.bvid })).into_response()
        }
        Ok(RefreshOutcome::AlreadyEnriched) => Json(json!({
            "updated": false,
            "bvid": request.bvid,
            "reason": "already enriched"
        }))
        .into_response(),
        Ok(RefreshOutcome::Unknown) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown video {}", request.bvid) })),
        )
            .into_response(),
        Err(err) => internal_error("refreshing video", err),
    }
}

/// Kick off a catalog cycle in the background. 409 while one is in flight.
async fn crawl_start_handler(State(state): State<Arc<AppState>>) -> Response {
    if state.service.is_catalog_running() {
        return conflict("catalog cycle already running");
    }
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        if let Err(err) = scheduler.trigger_catalog().await {
            error!(%err, "manually triggered catalog cycle failed");
        }
    });
    Json(json!({ "message": "catalog cycle started" })).into_response()
}

async fn update_online_handler(State(state): State<Arc<AppState>>) -> Response {
    if state.service.is_online_running() {
        return conflict("online-count cycle already running");
    }
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        if let Err(err) = scheduler.trigger_online().await {
            error!(%err, "manually triggered online-count cycle failed");
        }
    });
    Json(json!({ "message": "online-count cycle started" })).into_response()
}

async fn crawl_status_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.scheduler.status().await).into_response()
}

async fn crawl_config_get_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.scheduler.config().await).into_response()
}

async fn crawl_config_post_handler(
    State(state): State<Arc<AppState>>,
    Json(config): Json<CrawlConfig>,
) -> Response {
    if config.max_videos == 0 || config.interval_minutes == 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "max_videos and interval_minutes must be positive" })),
        )
            .into_response();
    }
    state.scheduler.update_config(config).await;
    Json(config).into_response()
}

fn conflict(message: &str) -> Response {
    (StatusCode::CONFLICT, Json(json!({ "error": message }))).into_response()
}

fn internal_error(action: &str, err: impl std::fmt::Display) -> Response {
    error!(%err, action, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("{action} failed") })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use biliwatch_client::{BrowserRuntime, BrowserSession, ClientError};
    use biliwatch_core::{VideoRecord, ZoneTable};
    use biliwatch_sync::SyncConfig;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    /// Browser runtime that refuses to open sessions; handler tests never
    /// reach the network.
    struct OfflineRuntime;

    #[async_trait]
    impl BrowserRuntime for OfflineRuntime {
        async fn open_session(&self) -> Result<Box<dyn BrowserSession>, ClientError> {
            Err(ClientError::transient("no browser in tests"))
        }
    }

    async fn test_state() -> AppState {
        let store = SnapshotStore::connect("sqlite::memory:", ZoneTable::default())
            .await
            .expect("connect");
        store.init().await.expect("init");
        let store = Arc::new(store);
        let service = Arc::new(AcquisitionService::new(
            Arc::new(OfflineRuntime),
            store.clone(),
            SyncConfig::default(),
        ));
        let scheduler = Arc::new(Scheduler::new(service.clone(), CrawlConfig::default()));
        AppState {
            store,
            scheduler,
            service,
        }
    }

    async fn seed_video(state: &AppState, bvid: &str, title: &str, date: &str) {
        let record = VideoRecord {
            bvid: Some(bvid.to_string()),
            title: title.to_string(),
            view: Some(100),
            online_count: "0".to_string(),
            tid_v2: Some(2064),
            ..VideoRecord::default()
        };
        state
            .store
            .save_videos(&[record], date, Utc::now())
            .await
            .expect("seed");
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let app = app(test_state().await);
        let (status, body) = get_json(app, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn videos_endpoint_returns_seeded_rows_sorted() {
        let state = test_state().await;
        seed_video(&state, "BV1xx411c7mD", "alpha", "2026-08-25").await;
        seed_video(&state, "BV1yy411c7mD", "beta", "2026-08-25").await;
        let app = app(state);

        let (status, body) =
            get_json(app, "/api/videos?date=2026-08-25&sort_by=title&order=asc").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["videos"][0]["title"], "alpha");
    }

    #[tokio::test]
    async fn videos_endpoint_with_empty_store_returns_empty_list() {
        let app = app(test_state().await);
        let (status, body) = get_json(app, "/api/videos").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn dates_endpoint_lists_days() {
        let state = test_state().await;
        seed_video(&state, "BV1xx411c7mD", "a", "2026-08-24").await;
        seed_video(&state, "BV1xx411c7mD", "a", "2026-08-25").await;
        let app = app(state);

        let (status, body) = get_json(app, "/api/dates").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dates"][0], "2026-08-25");
        assert_eq!(body["dates"][1], "2026-08-24");
    }

    #[tokio::test]
    async fn unknown_video_update_is_404() {
        let app = app(test_state().await);
        let (status, _body) = post_json(
            app,
            "/api/video/update",
            json!({ "bvid": "BV1qq411c7mD" }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn enriched_video_update_is_skipped_with_reason() {
        let state = test_state().await;
        seed_video(&state, "BV1xx411c7mD", "done", "2026-08-25").await;
        let app = app(state);
        let (status, body) = post_json(
            app,
            "/api/video/update",
            json!({ "bvid": "BV1xx411c7mD" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["updated"], false);
        assert_eq!(body["reason"], "already enriched");
    }

    #[tokio::test]
    async fn crawl_start_answers_immediately() {
        let app = app(test_state().await);
        let (status, body) = post_json(app, "/api/crawl/start", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "catalog cycle started");
    }

    #[tokio::test]
    async fn status_and_config_round_trip() {
        let state = test_state().await;
        let app = app(state);

        let (status, body) = get_json(app.clone(), "/api/crawl/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["catalog_running"], false);
        assert_eq!(body["interval_minutes"], 60);

        let (status, body) = post_json(
            app.clone(),
            "/api/crawl/config",
            json!({ "max_videos": 30, "interval_minutes": 15 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["max_videos"], 30);

        let (status, body) = get_json(app, "/api/crawl/config").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["interval_minutes"], 15);
    }

    #[tokio::test]
    async fn zeroed_config_is_rejected() {
        let app = app(test_state().await);
        let (status, _body) = post_json(
            app,
            "/api/crawl/config",
            json!({ "max_videos": 0, "interval_minutes": 15 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
