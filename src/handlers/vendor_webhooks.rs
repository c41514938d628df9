use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    errors::ServiceError, services::fulfillment_pipeline::WebhookReceipt,
    webhooks::VendorWebhookEvent, ApiResponse, AppState,
};

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    pub token: Option<String>,
}

// POST /api/v1/webhooks/vendor/:order_id/:event?token=
pub async fn receive_vendor_webhook(
    State(state): State<AppState>,
    Path((order_id, event)): Path<(Uuid, String)>,
    Query(query): Query<WebhookQuery>,
    body: Bytes,
) -> Result<Json<ApiResponse<WebhookReceipt>>, ServiceError> {
    let event = VendorWebhookEvent::from_str(&event).map_err(|_| {
        warn!(order_id = %order_id, event = %event, "Unknown vendor webhook event");
        ServiceError::InvalidInput(format!("Unknown webhook event: {}", event))
    })?;

    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized("Missing webhook token".to_string()))?;

    let payload: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ServiceError::InvalidInput(format!("invalid json: {}", e)))?
    };

    let receipt = state
        .services
        .pipeline
        .handle_vendor_event(order_id, event, &token, payload)
        .await?;
    info!(order_id = %order_id, event = %event, status = %receipt.status, "Vendor webhook processed");
    Ok(Json(ApiResponse::success(receipt)))
}
