use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Order, OrderItem, Payment, ShippingInfo};

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    /// Cart to check out. Mutually exclusive with `items`.
    #[serde(default)]
    pub cart_id: Option<Uuid>,
    #[serde(default)]
    pub items: Vec<OrderLineRequest>,
    #[serde(default)]
    pub shipping: ShippingInfo,
    /// Total the client expects to pay, in major units.
    #[schema(value_type = String, example = "250.00")]
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineRequest {
    pub product_id: Uuid,
    pub quantity: i32,
    #[schema(value_type = String, example = "100.00")]
    pub unit_price: Decimal,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub line_total: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub gateway_transaction_id: String,
    #[schema(value_type = String)]
    pub amount: Decimal,
    /// Amount in minor units, as handed to the gateway checkout.
    pub amount_minor: i64,
    pub currency: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub payments: Vec<Payment>,
}
