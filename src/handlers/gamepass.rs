use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use validator::Validate;

use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::gamepass::{GamepassCandidate, Verification};
use crate::services::pricing;
use crate::ApiResponse;

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[schema(example = json!({ "roblox_user_id": 9001, "robux_amount": 500 }))]
pub struct VerifyGamepassRequest {
    #[validate(range(min = 1))]
    pub roblox_user_id: i64,

    /// The Robux amount the customer wants to buy; the required
    /// gamepass price is derived from it
    #[validate(range(min = 1))]
    pub robux_amount: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyGamepassResponse {
    pub matched: bool,
    /// The price the gamepass must be listed at
    pub required_price: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing: Option<GamepassCandidate>,
    /// Present on success; pass it back when creating the payment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
    /// Customer-facing explanation when no listing matched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Verify that the customer created a matching for-sale gamepass
#[utoipa::path(
    post,
    path = "/api/v1/gamepass/verify",
    request_body = VerifyGamepassRequest,
    responses(
        (status = 200, description = "Verification outcome", body = crate::ApiResponse<VerifyGamepassResponse>),
        (status = 502, description = "Marketplace unreachable", body = crate::errors::ErrorResponse)
    ),
    tag = "Gamepass"
)]
pub async fn verify_gamepass(
    State(state): State<AppState>,
    Json(request): Json<VerifyGamepassRequest>,
) -> Result<Json<ApiResponse<VerifyGamepassResponse>>, ServiceError> {
    request.validate()?;

    // Recomputed from the requested amount on every call; an earlier
    // verification for a different amount cannot be replayed
    let required_price = pricing::required_gamepass_price(request.robux_amount);

    let outcome = state
        .services
        .gamepass
        .verify(request.roblox_user_id, required_price)
        .await?;

    let response = match outcome {
        Verification::Matched { listing, ticket } => {
            if let Err(e) = state
                .event_sender
                .send(crate::events::Event::GamepassVerified {
                    platform_user_id: request.roblox_user_id,
                    gamepass_id: listing.id,
                })
                .await
            {
                tracing::warn!(error = %e, "failed to send gamepass verified event");
            }
            VerifyGamepassResponse {
                matched: true,
                required_price,
                listing: Some(listing),
                ticket: Some(ticket),
                message: None,
            }
        }
        Verification::NoMatch { reason } => VerifyGamepassResponse {
            matched: false,
            required_price,
            listing: None,
            ticket: None,
            message: Some(reason.user_message(required_price)),
        },
    };

    Ok(Json(ApiResponse::success(response)))
}

/// Gamepass routes
pub fn gamepass_routes() -> Router<AppState> {
    Router::new().route("/verify", post(verify_gamepass))
}
