use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{patch, post},
};
use uuid::Uuid;

use crate::{
    dto::{admin::UpdateOrderStatusRequest, payments::ReconciliationResult},
    error::AppResult,
    middleware::auth::AuthUser,
    models::Order,
    response::ApiResponse,
    services::admin_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders/{id}/status", patch(update_order_status))
        .route("/payments/{transaction_id}/refund", post(refund_payment))
}

#[utoipa::path(
    patch,
    path = "/api/admin/orders/{id}/status",
    params(
    (
        "id" = Uuid, Path, description = "Order ID")
    ),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Update order status", body = ApiResponse<Order>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Illegal transition"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let resp = admin_service::update_order_status(&state, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/admin/payments/{transaction_id}/refund",
    params(
    (
        "transaction_id" = String, Path, description = "Gateway payment id")
    ),
    responses(
        (status = 200, description = "Payment marked refunded", body = ApiResponse<ReconciliationResult>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Payment is not refundable"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(transaction_id): Path<String>,
) -> AppResult<Json<ApiResponse<ReconciliationResult>>> {
    let resp = admin_service::refund_payment(&state, &user, &transaction_id).await?;
    Ok(Json(resp))
}
