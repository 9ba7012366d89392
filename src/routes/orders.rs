use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::orders::{OrderDetail, PlaceOrderRequest, PlaceOrderResponse},
    error::AppResult,
    response::ApiResponse,
    services::order_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(place_order))
        .route("/{id}", get(get_order))
        .route("/{id}/payment", post(retry_payment))
}

#[utoipa::path(
    post,
    path = "/api/orders",
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Order placed and gateway transaction opened", body = ApiResponse<PlaceOrderResponse>),
        (status = 400, description = "Invalid order"),
        (status = 404, description = "Cart not found"),
        (status = 502, description = "Gateway unavailable, order kept pending"),
    ),
    tag = "Orders"
)]
pub async fn place_order(
    State(state): State<AppState>,
    Json(payload): Json<PlaceOrderRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<PlaceOrderResponse>>)> {
    let resp = order_service::place_order(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order with items and payments", body = ApiResponse<OrderDetail>),
        (status = 404, description = "Not Found"),
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OrderDetail>>> {
    let resp = order_service::get_order(&state, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/payment",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Gateway transaction for the order", body = ApiResponse<PlaceOrderResponse>),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Order can no longer be paid"),
        (status = 502, description = "Gateway unavailable"),
    ),
    tag = "Orders"
)]
pub async fn retry_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<PlaceOrderResponse>>> {
    let resp = order_service::retry_gateway_transaction(&state, id).await?;
    Ok(Json(resp))
}
