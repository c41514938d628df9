//! Gift Fulfillment Library
//!
//! Takes paid gift orders through validation, prepaid-pool funding and
//! submission to an external purchasing vendor, recording every outcome on
//! the order itself.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod message_queue;
pub mod metrics;
pub mod middleware_helpers;
pub mod rate_limiter;
pub mod services;
pub mod tracing;
pub mod vendor;
pub mod webhooks;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

// Common response wrappers
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    /// Recoverable pipeline outcome: always carries data, `success` says whether
    /// the order reached the vendor.
    pub fn outcome(success: bool, data: T, message: String) -> Self {
        Self {
            success,
            data: Some(data),
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn outcome_response_keeps_data_on_failure() {
        let response = ApiResponse::outcome(false, json!({"outcome": "deferred"}), "held".into());
        assert!(!response.success);
        assert_eq!(response.data.unwrap()["outcome"], "deferred");
        assert_eq!(response.message.as_deref(), Some("held"));
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    let orders = Router::new()
        .route("/redrive-due", post(handlers::fulfillment::redrive_due))
        .route("/:id/process", post(handlers::fulfillment::process_order))
        .route(
            "/:id/force-process",
            post(handlers::fulfillment::force_process_order),
        )
        .route("/:id/redrive", post(handlers::fulfillment::redrive_order))
        .route(
            "/:id/fulfillment",
            get(handlers::fulfillment::get_fulfillment),
        );

    let webhooks = Router::new().route(
        "/vendor/:order_id/:event",
        post(handlers::vendor_webhooks::receive_vendor_webhook),
    );

    let auto_gifts = Router::new().route(
        "/recommendations",
        post(handlers::auto_gifts::recommend_gifts),
    );

    Router::new()
        .nest("/orders", orders)
        .nest("/webhooks", webhooks)
        .nest("/auto-gifts", auto_gifts)
}

/// Full application router with request ids and HTTP tracing applied.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(api_status))
        .route("/metrics", get(metrics_endpoint))
        .nest("/api/v1", api_v1_routes())
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> ApiResult<Value> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "gift-fulfillment",
        "environment": state.config.environment,
        "funding_fail_open": state.config.funding_fail_open,
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(State(state): State<AppState>) -> Response {
    let (db_status, latency_ms) = match db::check_connection(&state.db).await {
        Ok(latency) => ("healthy", Some(latency.as_millis() as u64)),
        Err(_) => ("unhealthy", None),
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
            "database_latency_ms": latency_ms,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    let code = if db_status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(ApiResponse::success(health_data))).into_response()
}

async fn metrics_endpoint() -> Response {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            ::tracing::error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
