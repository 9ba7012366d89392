use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};

use crate::{
    dto::{
        payments::{ReconciliationResult, VerifyPaymentRequest},
        webhooks::WebhookReceipt,
    },
    error::{AppError, AppResult},
    response::{ApiResponse, Meta},
    state::AppState,
};

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/verify", post(verify_payment))
        .route("/webhook", post(payment_webhook))
}

#[utoipa::path(
    post,
    path = "/api/payments/verify",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment reconciled", body = ApiResponse<ReconciliationResult>),
        (status = 400, description = "Missing fields, invalid signature or unknown order"),
        (status = 409, description = "Claim conflicts with recorded state"),
        (status = 502, description = "Gateway unavailable"),
    ),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> AppResult<Json<ApiResponse<ReconciliationResult>>> {
    let missing = payload.missing_fields();
    if !missing.is_empty() {
        return Err(AppError::Validation(format!(
            "missing fields: {}",
            missing.join(", ")
        )));
    }

    let reconciliation = state
        .reconciler
        .verify_payment(
            payload.gateway_order_id.trim(),
            payload.gateway_payment_id.trim(),
            payload.signature.trim(),
        )
        .await
        .map_err(|err| match err {
            // The checkout callback reports a bad signature or an order it
            // cannot resolve as a bad request.
            AppError::Security(reason) => AppError::BadRequest(reason),
            AppError::NotFound => {
                AppError::BadRequest("no order matches this gateway order id".into())
            }
            other => other,
        })?;

    Ok(Json(ApiResponse::success(
        "Payment verified",
        reconciliation.into(),
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    post,
    path = "/api/payments/webhook",
    request_body(content = String, description = "Raw gateway event, signed with the webhook secret"),
    params(("X-Razorpay-Signature" = String, Header, description = "Hex HMAC-SHA256 of the raw body")),
    responses(
        (status = 200, description = "Event accepted, already applied or ignored", body = ApiResponse<WebhookReceipt>),
        (status = 400, description = "Malformed event"),
        (status = 401, description = "Missing or invalid signature"),
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<ApiResponse<WebhookReceipt>>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let receipt = state.reconciler.handle_webhook(&body, signature).await?;
    Ok(Json(ApiResponse::success(
        "Webhook processed",
        receipt,
        Some(Meta::empty()),
    )))
}
