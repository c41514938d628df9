use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    entities::{order_note, FundingStatus, NoteKind, OrderStatus, PaymentStatus},
    errors::ServiceError,
    services::{
        fulfillment_pipeline::{FulfillmentOutcome, RedriveResult},
        order_state::Trigger,
    },
    webhooks::constant_time_eq,
    ApiResponse, AppState,
};

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Debug, Default, Deserialize)]
pub struct ForceProcessRequest {
    #[serde(default, alias = "bypassFundingCheck")]
    pub bypass_funding_check: bool,
}

#[derive(Debug, Serialize)]
pub struct FulfillmentResult {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub lifecycle: &'static str,
    #[serde(flatten)]
    pub outcome: FulfillmentOutcome,
}

#[derive(Debug, Serialize)]
pub struct NoteView {
    pub kind: NoteKind,
    pub note: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl From<order_note::Model> for NoteView {
    fn from(model: order_note::Model) -> Self {
        Self {
            kind: model.kind,
            note: model.note,
            details: model.details,
            created_at: model.created_at,
        }
    }
}

/// What an administrator or customer-facing UI needs about one order.
#[derive(Debug, Serialize)]
pub struct FulfillmentView {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub lifecycle: &'static str,
    pub payment_status: PaymentStatus,
    pub funding_status: FundingStatus,
    pub funding_hold_reason: Option<String>,
    pub expected_funding_date: Option<DateTime<Utc>>,
    pub scheduled_delivery_date: Option<DateTime<Utc>>,
    pub vendor_request_id: Option<String>,
    pub vendor_order_id: Option<String>,
    pub last_error: Option<String>,
    /// From the most recent attention note, when it was an address problem.
    pub missing_fields: Vec<String>,
    pub tracking_numbers: Option<Value>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub notes: Vec<NoteView>,
}

async fn respond(
    state: &AppState,
    order_id: Uuid,
    outcome: FulfillmentOutcome,
) -> Result<Json<ApiResponse<FulfillmentResult>>, ServiceError> {
    let order = state.services.pipeline.state().load(order_id).await?;
    let success = outcome.is_success();
    let message = outcome.summary();
    Ok(Json(ApiResponse::outcome(
        success,
        FulfillmentResult {
            order_id,
            status: order.status,
            lifecycle: order.lifecycle(),
            outcome,
        },
        message,
    )))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ServiceError> {
    let Some(expected) = state.config.admin_api_token.as_deref() else {
        return Err(ServiceError::Forbidden(
            "Manual fulfillment actions are disabled".to_string(),
        ));
    };
    let presented = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if presented.is_empty() || !constant_time_eq(expected, presented) {
        warn!("Rejected admin request with missing or invalid token");
        return Err(ServiceError::Unauthorized("Invalid admin token".to_string()));
    }
    Ok(())
}

/// Payment-confirmation trigger.
pub async fn process_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<FulfillmentResult>>, ServiceError> {
    let outcome = state
        .services
        .pipeline
        .process(id, Trigger::PaymentConfirmed)
        .await?;
    respond(&state, id, outcome).await
}

/// Manual force-process; the only caller allowed to bypass the funding gate.
pub async fn force_process_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    body: Option<Json<ForceProcessRequest>>,
) -> Result<Json<ApiResponse<FulfillmentResult>>, ServiceError> {
    require_admin(&state, &headers)?;
    let request = body.map(|Json(b)| b).unwrap_or_default();
    info!(order_id = %id, bypass = request.bypass_funding_check, "Manual force-process requested");

    let outcome = state
        .services
        .pipeline
        .process(
            id,
            Trigger::ManualForce {
                bypass_funding_check: request.bypass_funding_check,
            },
        )
        .await?;
    respond(&state, id, outcome).await
}

/// Retries one order parked for funding.
pub async fn redrive_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<FulfillmentResult>>, ServiceError> {
    let outcome = state
        .services
        .pipeline
        .process(id, Trigger::ScheduledRedrive)
        .await?;
    respond(&state, id, outcome).await
}

pub async fn redrive_due(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<RedriveResult>>>, ServiceError> {
    let results = state.services.pipeline.redrive_due().await?;
    Ok(Json(ApiResponse::success(results)))
}

pub async fn get_fulfillment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<FulfillmentView>>, ServiceError> {
    let manager = state.services.pipeline.state();
    let order = manager.load(id).await?;
    let notes = manager.notes(id).await?;

    let missing_fields = if order.status == OrderStatus::RequiresAttention {
        notes
            .iter()
            .rev()
            .find(|n| n.kind == NoteKind::Error)
            .and_then(|n| n.details.as_ref())
            .and_then(|d| d.get("missing_fields"))
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let view = FulfillmentView {
        order_id: order.id,
        order_number: order.order_number.clone(),
        status: order.status,
        lifecycle: order.lifecycle(),
        payment_status: order.payment_status,
        funding_status: order.funding_status,
        funding_hold_reason: order.funding_hold_reason,
        expected_funding_date: order.expected_funding_date,
        scheduled_delivery_date: order.scheduled_delivery_date,
        vendor_request_id: order.vendor_request_id,
        vendor_order_id: order.vendor_order_id,
        last_error: order.last_error,
        missing_fields,
        tracking_numbers: order.tracking_numbers,
        submitted_at: order.submitted_at,
        notes: notes.into_iter().map(NoteView::from).collect(),
    };
    Ok(Json(ApiResponse::success(view)))
}
