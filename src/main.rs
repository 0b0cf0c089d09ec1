use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use petrec::services::profile::ProfileRebuildReport;
use petrec::services::scheduler::{run_scheduler, DailySchedule};
use petrec::utils::validation::{validate_batch_size, validate_page_size};
use petrec::{init_tracing, AppState, Config, RankedItem, RecError, UserProfileSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const USER_HEADER: &str = "x-user-id";
const MAX_PROFILE_BATCH: usize = 10_000;

#[derive(Debug, Deserialize)]
struct GroupQuery {
    page: Option<usize>,
    size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ProfileRebuildRequest {
    user_ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    message: String,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: "Success".to_string(),
        }
    }

    fn accepted(message: &str) -> Self {
        Self {
            success: true,
            data: None,
            message: message.to_string(),
        }
    }
}

type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), StatusCode>;

fn status_for(err: &RecError) -> StatusCode {
    match err {
        RecError::Validation(_) => StatusCode::BAD_REQUEST,
        RecError::UserNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn fail(context: &str, err: RecError) -> StatusCode {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("{}: {}", context, err);
    } else {
        warn!("{}: {}", context, err);
    }
    status
}

fn principal(headers: &HeaderMap) -> Result<i64, StatusCode> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok())
        .ok_or(StatusCode::UNAUTHORIZED)
}

async fn health_check() -> Json<ApiResponse<HashMap<String, String>>> {
    let mut status = HashMap::new();
    status.insert("status".to_string(), "healthy".to_string());
    status.insert("service".to_string(), "petrec".to_string());
    status.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());

    Json(ApiResponse::success(status))
}

async fn trigger_batch(State(state): State<AppState>) -> ApiResult<()> {
    let handle = state
        .executor
        .trigger()
        .map_err(|e| fail("Failed to start batch", e))?;

    tokio::spawn(async move {
        match handle.await {
            Ok(outcome) => info!(outcome = ?outcome, "Triggered batch finished"),
            Err(e) => error!("Triggered batch task failed: {}", e),
        }
    });

    Ok((StatusCode::ACCEPTED, Json(ApiResponse::accepted("Batch started"))))
}

async fn get_group_recommendations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<GroupQuery>,
) -> ApiResult<Vec<RankedItem>> {
    let user_id = principal(&headers)?;
    let page = params.page.unwrap_or(0);
    let size = params.size.unwrap_or(state.config.read.default_page_size);
    validate_page_size(size, state.config.read.max_page_size)
        .map_err(|e| fail("Rejected page request", e))?;

    let items = state
        .ranking
        .get_ranked(user_id, page, size, state.executor.today())
        .await
        .map_err(|e| fail("Failed to read group ranking", e))?;

    Ok((StatusCode::OK, Json(ApiResponse::success(items))))
}

async fn rebuild_profiles(
    State(state): State<AppState>,
    Json(request): Json<ProfileRebuildRequest>,
) -> ApiResult<()> {
    validate_batch_size(request.user_ids.len(), MAX_PROFILE_BATCH)
        .map_err(|e| fail("Rejected profile rebuild", e))?;

    let profiles = state.profiles.clone();
    tokio::spawn(async move {
        let report: ProfileRebuildReport = profiles.rebuild_many(&request.user_ids).await;
        if !report.failed.is_empty() {
            warn!(failed = ?report.failed, "Some profiles were not rebuilt");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(ApiResponse::accepted("Profile rebuild started"))))
}

async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<UserProfileSnapshot> {
    let snapshot = state
        .profiles
        .snapshot(user_id)
        .await
        .map_err(|e| fail("Failed to load profile", e))?;
    Ok((StatusCode::OK, Json(ApiResponse::success(snapshot))))
}

async fn invalidate_profile(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<()> {
    state
        .profiles
        .invalidate(user_id)
        .await
        .map_err(|e| fail("Failed to invalidate profile", e))?;
    Ok((StatusCode::OK, Json(ApiResponse::accepted("Profile invalidated"))))
}

async fn evict_item(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
) -> ApiResult<usize> {
    let groups = state
        .orchestrator
        .membership()
        .evict(item_id)
        .await
        .map_err(|e| fail("Failed to evict item", e))?;
    Ok((StatusCode::OK, Json(ApiResponse::success(groups))))
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/recommend/batch", post(trigger_batch))
        .route("/recommend/group", get(get_group_recommendations))
        .route("/recommend/profiles/rebuild", post(rebuild_profiles))
        .route("/recommend/profiles/:user_id", get(get_profile).delete(invalidate_profile))
        .route("/recommend/items/:item_id", delete(evict_item))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing().await;

    let config = match std::env::var("PETREC_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::default(),
    };
    info!("Starting petrec server with config: {:?}", config.server);

    let addr = config.server.socket_addr()?;
    let state = AppState::new(config).await?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    if state.config.scheduler.enabled {
        let schedule = DailySchedule::from_config(&state.config.scheduler)?;
        tokio::spawn(run_scheduler(schedule, state.executor.clone(), shutdown_tx.subscribe()));
    }

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
            let _ = shutdown_tx.send(());
        })
        .await?;

    Ok(())
}
