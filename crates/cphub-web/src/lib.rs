//! JSON read surface + authenticated refresh for contest hub.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cphub_core::{Contest, Platform};
use cphub_storage::StoreError;
use cphub_sync::{env_lookup, parse_setting, ContestService, PassSummary};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "cphub-web";

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub port: u16,
    pub refresh_token: Option<String>,
}

impl WebConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: &F) -> anyhow::Result<Self> {
        Ok(Self {
            port: parse_setting(lookup, "CPHUB_WEB_PORT", 8000)?,
            refresh_token: lookup("CPHUB_REFRESH_TOKEN").filter(|t| !t.trim().is_empty()),
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ContestService>,
    pub refresh_token: Option<String>,
}

impl AppState {
    pub fn new(service: Arc<ContestService>, refresh_token: Option<String>) -> Self {
        Self {
            service,
            refresh_token,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unknown platform {0:?}")]
    InvalidPlatform(String),
    #[error("missing or invalid bearer token")]
    Unauthorized,
    #[error("refresh is disabled")]
    RefreshDisabled,
    #[error("internal error")]
    Query(#[from] StoreError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidPlatform(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::RefreshDisabled => StatusCode::FORBIDDEN,
            AppError::Query(err) => {
                error!(error = %err, "store query failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub platform: Option<String>,
}

impl ListQuery {
    fn limit(&self) -> usize {
        clamp_limit(self.limit)
    }

    fn platform(&self) -> Result<Option<Platform>, AppError> {
        parse_platform_filter(self.platform.as_deref())
    }
}

pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// `None`, empty and `all` mean no filter.
pub fn parse_platform_filter(raw: Option<&str>) -> Result<Option<Platform>, AppError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) if value.eq_ignore_ascii_case("all") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| AppError::InvalidPlatform(value.to_string())),
    }
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub count: usize,
    pub run_id: Uuid,
    pub summary: PassSummary,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/contests/upcoming", get(upcoming_handler))
        .route("/api/contests/running", get(running_handler))
        .route("/api/contests/past", get(past_handler))
        .route("/api/contests/refresh", post(refresh_handler))
        .with_state(Arc::new(state))
}

/// Binds `0.0.0.0:port` and serves until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "http server listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "installing ctrl-c handler failed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn upcoming_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Contest>>, AppError> {
    let platform = query.platform()?;
    Ok(Json(state.service.upcoming(query.limit(), platform).await?))
}

async fn running_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Contest>>, AppError> {
    Ok(Json(state.service.running(query.limit()).await?))
}

async fn past_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Contest>>, AppError> {
    let platform = query.platform()?;
    Ok(Json(state.service.past(query.limit(), platform).await?))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RefreshResponse>, AppError> {
    let Some(expected) = state.refresh_token.as_deref() else {
        return Err(AppError::RefreshDisabled);
    };
    if bearer_token(&headers) != Some(expected) {
        return Err(AppError::Unauthorized);
    }

    let summary = state.service.refresh().await?;
    info!(run_id = %summary.run_id, stored = summary.stored, "manual refresh complete");
    Ok(Json(RefreshResponse {
        count: summary.stored,
        run_id: summary.run_id,
        summary,
    }))
}
