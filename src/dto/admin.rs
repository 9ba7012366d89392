use serde::Deserialize;
use utoipa::ToSchema;

use crate::entity::status::OrderStatus;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}
