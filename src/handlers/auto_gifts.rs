use axum::{extract::State, response::Json};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

use crate::{
    errors::ServiceError,
    services::recommendations::{
        self, CandidateProduct, GiftEvent, GiftingRule, RecommendationSet, RecommendationSettings,
    },
    ApiResponse, AppState,
};

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct RecommendationRequest {
    pub rule: GiftingRule,
    pub event: GiftEvent,
    pub candidates: Vec<CandidateProduct>,
    /// The user's auto-approval setting.
    #[serde(default = "default_true")]
    pub auto_approve: bool,
    #[serde(default)]
    pub max_results: Option<usize>,
}

pub async fn recommend_gifts(
    State(state): State<AppState>,
    Json(request): Json<RecommendationRequest>,
) -> Result<Json<ApiResponse<RecommendationSet>>, ServiceError> {
    request.event.validate()?;
    if request.rule.budget_limit <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "budget_limit must be positive".to_string(),
        ));
    }

    let defaults = RecommendationSettings::default();
    let settings = RecommendationSettings {
        approval_threshold: state.config.auto_gift_approval_threshold,
        max_results: request.max_results.unwrap_or(defaults.max_results).max(1),
        ..defaults
    };

    let result = recommendations::recommend(
        &request.rule,
        &request.event,
        &request.candidates,
        request.auto_approve,
        &settings,
        Utc::now(),
    );
    Ok(Json(ApiResponse::success(result)))
}
