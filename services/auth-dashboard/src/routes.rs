//! Dashboard HTTP API
//!
//! Endpoints:
//! - GET  /health                         uptime check
//! - GET  /metrics                        Prometheus exposition
//! - GET  /auth/{connector}/status        scheme, configured flag, env vars
//! - POST /auth/{connector}/api-key       store an API key
//! - GET  /auth/{connector}/authorize     start the OAuth flow
//! - GET  /oauth/{connector}/callback     provider redirect target
//! - POST /auth/{connector}/refresh       force a token refresh
//!
//! Responses never include token or key values.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use connector_auth::ConnectorAuth;
use connector_auth::profile::is_valid_name;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::ApiError;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: ConnectorAuth,
    pub server: Arc<ServerConfig>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
pub fn build_router(state: AppState) -> Router {
    let max_connections = state.server.max_connections;
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/auth/{connector}/status", get(status_handler))
        .route("/auth/{connector}/api-key", post(api_key_handler))
        .route("/auth/{connector}/authorize", get(authorize_handler))
        .route("/auth/{connector}/refresh", post(refresh_handler))
        .route("/oauth/{connector}/callback", get(callback_handler))
        .route_layer(axum::middleware::from_fn(crate::metrics::track))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn json_ok(body: serde_json::Value) -> Response {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Connector names become path components on disk.
fn checked(connector: String) -> Result<String, ApiError> {
    if is_valid_name(&connector) {
        Ok(connector)
    } else {
        Err(ApiError::InvalidConnector(connector))
    }
}

async fn health_handler(State(state): State<AppState>) -> Response {
    json_ok(serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn status_handler(
    State(state): State<AppState>,
    Path(connector): Path<String>,
) -> Result<Response, ApiError> {
    let connector = checked(connector)?;
    let status = state.auth.get_status(&connector).await;
    Ok(json_ok(serde_json::to_value(status).unwrap_or_default()))
}

#[derive(Deserialize)]
struct ApiKeyRequest {
    value: String,
    #[serde(default)]
    field: Option<String>,
}

/// POST /auth/{connector}/api-key: store the key under the resolved field.
async fn api_key_handler(
    State(state): State<AppState>,
    Path(connector): Path<String>,
    axum::Json(body): axum::Json<ApiKeyRequest>,
) -> Result<Response, ApiError> {
    let connector = checked(connector)?;
    let field = state
        .auth
        .save_api_key(&connector, &body.value, body.field.as_deref())
        .await?;

    Ok(json_ok(serde_json::json!({
        "connector": connector,
        "field": field,
        "status": "saved",
    })))
}

/// GET /auth/{connector}/authorize: issue a state token and return the URL
/// the user should open.
async fn authorize_handler(
    State(state): State<AppState>,
    Path(connector): Path<String>,
) -> Result<Response, ApiError> {
    let connector = checked(connector)?;
    let redirect_uri = state.server.redirect_uri(&connector);

    let authorization_url = state
        .auth
        .build_authorization_url(&connector, &redirect_uri)
        .await
        .ok_or_else(|| ApiError::OAuthUnavailable(connector.clone()))?;

    Ok(json_ok(serde_json::json!({
        "authorization_url": authorization_url,
        "redirect_uri": redirect_uri,
    })))
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// GET /oauth/{connector}/callback: consume the state token, then exchange
/// the code. The state is consumed even when the exchange later fails.
async fn callback_handler(
    State(state): State<AppState>,
    Path(connector): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ApiError> {
    let connector = checked(connector)?;

    if let Some(error) = query.error {
        warn!(connector, error = %error, "provider returned authorization error");
        return Err(ApiError::AuthorizationDenied(error));
    }
    let code = query.code.ok_or(ApiError::MissingParameter("code"))?;
    let csrf = query.state.ok_or(ApiError::MissingParameter("state"))?;

    if !state.auth.validate_state(&csrf, &connector).await {
        return Err(ApiError::InvalidState);
    }

    let redirect_uri = state.server.redirect_uri(&connector);
    let tokens = state
        .auth
        .exchange_code(&connector, &code, &redirect_uri)
        .await?;

    info!(connector, "OAuth flow completed");
    Ok(json_ok(serde_json::json!({
        "connector": connector,
        "status": "authorized",
        "expires_at": tokens.expires_at,
        "has_refresh_token": tokens.has_refresh_token(),
    })))
}

/// POST /auth/{connector}/refresh
async fn refresh_handler(
    State(state): State<AppState>,
    Path(connector): Path<String>,
) -> Result<Response, ApiError> {
    let connector = checked(connector)?;
    let tokens = state.auth.refresh(&connector).await?;

    Ok(json_ok(serde_json::json!({
        "connector": connector,
        "status": "refreshed",
        "expires_at": tokens.expires_at,
    })))
}
