//! HTTP API handlers.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::controller::Controller;
use crate::error::{BotError, LadderError};
use crate::ladder::LadderAmounts;
use crate::market::Coin;
use crate::metrics;
use crate::store::AmountSettings;

/// Application state shared with handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Operator command surface.
    pub controller: Arc<Controller>,
    /// Prometheus render handle, absent when no recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// Create new app state.
    pub fn new(controller: Arc<Controller>) -> Self {
        Self {
            controller,
            prometheus: None,
        }
    }

    /// Serve metrics from `handle`.
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether the monitors are running.
    pub ready: bool,
    /// Session health.
    pub connection: String,
}

/// Command acknowledgement.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    /// Always "ok".
    pub status: &'static str,
    /// Command-specific detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl CommandResponse {
    fn ok() -> Json<Self> {
        Json(Self {
            status: "ok",
            detail: None,
        })
    }

    fn with(detail: serde_json::Value) -> Json<Self> {
        Json(Self {
            status: "ok",
            detail: Some(detail),
        })
    }
}

/// Error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error text.
    pub error: String,
}

/// Maps core errors to HTTP status codes.
#[derive(Debug)]
pub struct ApiError(BotError);

impl From<BotError> for ApiError {
    fn from(err: BotError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BotError::Rejected(_) | BotError::Ladder(LadderError::TradeInFlight) => {
                StatusCode::CONFLICT
            }
            BotError::Ladder(LadderError::InvalidInput(_) | LadderError::InvalidPrice(_)) => {
                StatusCode::BAD_REQUEST
            }
            e if e.is_connectivity() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "Command failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Coin selection request.
#[derive(Debug, Deserialize)]
pub struct CoinRequest {
    /// Coin to trade.
    pub coin: Coin,
}

/// Default price request.
#[derive(Debug, Deserialize)]
pub struct PriceRequest {
    /// Price in cents.
    pub price: Decimal,
}

/// Record request latency per matched route.
pub async fn track_latency(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(req).await;
    metrics::record_http_latency(start, &endpoint);
    response
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 while running, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let ctl = &state.controller;
    let response = ReadyResponse {
        ready: ctl.is_running(),
        connection: ctl.connection_state().to_string(),
    };

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Prometheus text exposition.
pub async fn metrics_text(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics recorder not installed".to_string(),
        ),
    }
}

/// Status handler - counters, connection state, levels and tasks.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.status().await)
}

/// Start the monitors.
pub async fn start(State(state): State<AppState>) -> Result<Json<CommandResponse>, ApiError> {
    state.controller.start().await?;
    Ok(CommandResponse::ok())
}

/// Stop the monitors.
pub async fn stop(State(state): State<AppState>) -> Result<Json<CommandResponse>, ApiError> {
    state.controller.stop().await?;
    Ok(CommandResponse::ok())
}

/// Replace the stake percentages.
pub async fn set_amounts(
    State(state): State<AppState>,
    Json(settings): Json<AmountSettings>,
) -> Result<Json<CommandResponse>, ApiError> {
    let amounts: LadderAmounts = state.controller.set_amounts(settings).await?;
    Ok(CommandResponse::with(serde_json::to_value(amounts).map_err(BotError::from)?))
}

/// Switch coin.
pub async fn select_coin(
    State(state): State<AppState>,
    Json(req): Json<CoinRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let url = state.controller.select_coin(req.coin).await?;
    Ok(CommandResponse::with(serde_json::json!({ "url": url })))
}

/// Change the default target price.
pub async fn set_default_price(
    State(state): State<AppState>,
    Json(req): Json<PriceRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    state.controller.set_default_price(req.price).await?;
    Ok(CommandResponse::ok())
}

/// Reset the ladder.
pub async fn reset(State(state): State<AppState>) -> Result<Json<CommandResponse>, ApiError> {
    let counted = state.controller.reset().await?;
    Ok(CommandResponse::with(serde_json::json!({ "counted": counted })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_maps_to_conflict() {
        let response = ApiError(BotError::Rejected("busy".into())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn invalid_price_maps_to_bad_request() {
        let err = BotError::Ladder(LadderError::InvalidPrice(Decimal::ONE_HUNDRED));
        assert_eq!(ApiError(err).into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn coin_request_parses_symbol() {
        let req: CoinRequest = serde_json::from_str(r#"{"coin":"ETH"}"#).unwrap();
        assert_eq!(req.coin, Coin::Eth);
    }
}
