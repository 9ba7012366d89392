use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entity::{
        order_items::Model as OrderItemModel,
        orders::Model as OrderModel,
        payments::Model as PaymentModel,
        status::{OrderStatus, PaymentStatus},
    },
    money,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct ShippingInfo {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub address_line: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub gateway_order_id: Option<String>,
    pub confirmation_sent: bool,
    pub shipping: ShippingInfo,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    #[schema(value_type = String)]
    pub line_total: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub transaction_id: String,
    pub order_id: Uuid,
    pub gateway: String,
    pub method: Option<String>,
    pub status: PaymentStatus,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub currency: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OrderModel> for Order {
    fn from(model: OrderModel) -> Self {
        Order {
            id: model.id,
            order_number: model.order_number,
            total_amount: money::from_minor(model.total_amount),
            currency: model.currency,
            status: model.status,
            payment_status: model.payment_status,
            gateway_order_id: model.gateway_order_id,
            confirmation_sent: model.confirmation_sent,
            shipping: ShippingInfo {
                full_name: model.full_name,
                email: model.email,
                phone: model.phone,
                address_line: model.address_line,
                city: model.city,
                postal_code: model.postal_code,
                country: model.country,
            },
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

impl From<OrderItemModel> for OrderItem {
    fn from(model: OrderItemModel) -> Self {
        OrderItem {
            id: model.id,
            order_id: model.order_id,
            product_id: model.product_id,
            quantity: model.quantity,
            unit_price: money::from_minor(model.unit_price),
            line_total: money::from_minor(model.line_total),
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<PaymentModel> for Payment {
    fn from(model: PaymentModel) -> Self {
        Payment {
            id: model.id,
            transaction_id: model.transaction_id,
            order_id: model.order_id,
            gateway: model.gateway,
            method: model.method,
            status: model.status,
            amount: money::from_minor(model.amount),
            currency: model.currency,
            paid_at: model.paid_at.map(|dt| dt.with_timezone(&Utc)),
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}
