//! HTTP API route definitions.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::{
    health, metrics_text, ready, reset, select_coin, set_amounts, set_default_price, start,
    status, stop, track_latency, AppState,
};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics_text))
        // Status endpoint
        .route("/api/v1/status", get(status))
        // Operator commands
        .route("/api/v1/start", post(start))
        .route("/api/v1/stop", post(stop))
        .route("/api/v1/amounts", post(set_amounts))
        .route("/api/v1/coin", post(select_coin))
        .route("/api/v1/default-price", post(set_default_price))
        .route("/api/v1/reset", post(reset))
        .route_layer(middleware::from_fn(track_latency))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::tests::controller;
    use crate::monitors::testing::fixture;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let f = fixture("api-health", vec![], "");
        let app = create_router(AppState::new(Arc::new(controller(&f))));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_endpoint_follows_start() {
        let f = fixture("api-ready", vec![], "");
        let state = AppState::new(Arc::new(controller(&f)));
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/start", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        state.controller.shutdown().await;
    }

    #[tokio::test]
    async fn default_price_out_of_range_is_bad_request() {
        let f = fixture("api-price", vec![], "");
        let app = create_router(AppState::new(Arc::new(controller(&f))));

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/default-price", r#"{"price":"101"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(post_json("/api/v1/default-price", r#"{"price":"48"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_reports_levels_and_tasks() {
        let f = fixture("api-status", vec![], "");
        let app = create_router(AppState::new(Arc::new(controller(&f))));

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/reset", ""))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["detail"]["counted"], true);

        let response = app
            .oneshot(Request::builder().uri("/api/v1/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["running"], false);
        assert_eq!(body["connection"], "Connected");
        assert_eq!(body["ladder"]["reset_count"], 1);
        assert_eq!(body["ladder"]["up"]["levels"].as_array().unwrap().len(), 5);
        assert_eq!(body["tasks"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_unavailable() {
        let f = fixture("api-metrics", vec![], "");
        let app = create_router(AppState::new(Arc::new(controller(&f))));

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
