use chrono::{NaiveDate, Utc};
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, SqlErr, TransactionTrait, sea_query::Expr,
};
use std::time::Duration;
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{OrderDetail, OrderLineRequest, PlaceOrderRequest, PlaceOrderResponse},
    entity::{
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems, Model as OrderItemModel},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        payments::{Column as PaymentCol, Entity as Payments},
        status::{OrderStatus, PaymentStatus},
    },
    error::{AppError, AppResult},
    gateway::GatewayError,
    models::ShippingInfo,
    money,
    response::{ApiResponse, Meta},
    services::cart_snapshot::SnapshotLine,
    state::AppState,
};

const ORDER_NUMBER_ATTEMPTS: usize = 3;
const TOKEN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub currency: String,
    pub order_number_prefix: String,
    pub gateway_timeout: Duration,
}

/// Builds an order from a cart or an explicit item list, persists it, then
/// opens the gateway transaction for it.
#[tracing::instrument(skip_all, fields(cart_id = ?payload.cart_id))]
pub async fn place_order(
    state: &AppState,
    payload: PlaceOrderRequest,
) -> AppResult<ApiResponse<PlaceOrderResponse>> {
    validate_shipping(&payload.shipping)?;
    let declared_total = money::to_minor(payload.total_amount, "total amount")?;
    if declared_total < 0 {
        return Err(AppError::Validation("total amount must not be negative".into()));
    }

    let lines = match (payload.cart_id, payload.items.is_empty()) {
        (Some(_), false) => {
            return Err(AppError::Validation(
                "provide either a cart or an item list, not both".into(),
            ));
        }
        (Some(cart_id), true) => {
            let snapshot = state.carts.get_snapshot(cart_id).await?;
            let lines_total = validate_lines(&snapshot.lines)?;
            if lines_total != snapshot.grand_total {
                tracing::error!(
                    %cart_id,
                    grand_total = snapshot.grand_total,
                    lines_total,
                    "cart snapshot is inconsistent"
                );
                return Err(AppError::Validation(
                    "cart total does not match its lines, refresh the cart".into(),
                ));
            }
            snapshot.lines
        }
        (None, _) => lines_from_request(&payload.items)?,
    };

    let computed_total = validate_lines(&lines)?;
    if computed_total != declared_total {
        return Err(AppError::Validation(format!(
            "total amount {} does not match the sum of line totals {}",
            money::from_minor(declared_total),
            money::from_minor(computed_total)
        )));
    }

    let (order, items) = persist_order(
        &state.orm,
        &state.checkout,
        &payload.shipping,
        &lines,
        computed_total,
    )
    .await?;
    tracing::info!(
        order_id = %order.id,
        order_number = %order.order_number,
        items = items.len(),
        total = order.total_amount,
        "order placed"
    );
    audit::record(
        &state.orm,
        None,
        "order_placed",
        "orders",
        serde_json::json!({ "order_id": order.id, "order_number": order.order_number }),
    )
    .await;

    let order = open_gateway_transaction(state, order).await?;
    let gateway_transaction_id = order.gateway_order_id.clone().unwrap_or_default();

    Ok(ApiResponse::success(
        "Order placed",
        PlaceOrderResponse {
            order_id: order.id,
            order_number: order.order_number,
            gateway_transaction_id,
            amount: money::from_minor(order.total_amount),
            amount_minor: order.total_amount,
            currency: order.currency,
        },
        Some(Meta::empty()),
    ))
}

/// Opens (or returns) the gateway transaction of an order that is still
/// awaiting payment. Used when the first attempt failed or the client
/// restarts checkout.
#[tracing::instrument(skip(state))]
pub async fn retry_gateway_transaction(
    state: &AppState,
    order_id: Uuid,
) -> AppResult<ApiResponse<PlaceOrderResponse>> {
    let order = Orders::find_by_id(order_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if matches!(order.payment_status, PaymentStatus::Paid | PaymentStatus::Refunded) {
        return Err(AppError::Conflict(format!(
            "order {} is already {}",
            order.order_number, order.payment_status
        )));
    }
    if !matches!(order.status, OrderStatus::Pending | OrderStatus::PaymentFailed) {
        return Err(AppError::Conflict(format!(
            "order {} is {} and cannot be paid",
            order.order_number, order.status
        )));
    }

    let order = open_gateway_transaction(state, order).await?;
    let gateway_transaction_id = order.gateway_order_id.clone().unwrap_or_default();
    Ok(ApiResponse::success(
        "Payment ready",
        PlaceOrderResponse {
            order_id: order.id,
            order_number: order.order_number,
            gateway_transaction_id,
            amount: money::from_minor(order.total_amount),
            amount_minor: order.total_amount,
            currency: order.currency,
        },
        Some(Meta::empty()),
    ))
}

pub async fn get_order(state: &AppState, id: Uuid) -> AppResult<ApiResponse<OrderDetail>> {
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .order_by_asc(OrderItemCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    let payments = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.id))
        .order_by_asc(PaymentCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderDetail {
            order: order.into(),
            items,
            payments,
        },
        Some(Meta::empty()),
    ))
}

/// Stores the gateway transaction id on the order, creating the transaction
/// if the order does not have one yet. The order stays PENDING on failure.
async fn open_gateway_transaction(state: &AppState, order: OrderModel) -> AppResult<OrderModel> {
    if order.gateway_order_id.is_some() {
        return Ok(order);
    }

    let created = tokio::time::timeout(
        state.checkout.gateway_timeout,
        state
            .gateway
            .create_transaction(order.total_amount, &order.currency, &order.order_number),
    )
    .await
    .unwrap_or(Err(GatewayError::Timeout));

    let gateway_order_id = match created {
        Ok(id) => id,
        Err(source) => {
            tracing::warn!(
                order_id = %order.id,
                error = %source,
                category = ?source.category(),
                "gateway transaction not created, order left pending"
            );
            audit::record(
                &state.orm,
                None,
                "gateway_transaction_failed",
                "orders",
                serde_json::json!({ "order_id": order.id, "error": source.to_string() }),
            )
            .await;
            return Err(AppError::Gateway {
                source,
                order_id: Some(order.id),
            });
        }
    };

    // Only the first writer wins; a concurrent retry may have stored one already.
    Orders::update_many()
        .col_expr(OrderCol::GatewayOrderId, Expr::value(gateway_order_id.clone()))
        .col_expr(OrderCol::UpdatedAt, Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())))
        .filter(OrderCol::Id.eq(order.id))
        .filter(OrderCol::GatewayOrderId.is_null())
        .exec(&state.orm)
        .await?;

    let order = Orders::find_by_id(order.id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    tracing::info!(
        order_number = %order.order_number,
        gateway_order_id = ?order.gateway_order_id,
        "gateway transaction opened"
    );
    Ok(order)
}

async fn persist_order(
    orm: &DatabaseConnection,
    settings: &CheckoutSettings,
    shipping: &ShippingInfo,
    lines: &[SnapshotLine],
    total_amount: i64,
) -> AppResult<(OrderModel, Vec<OrderItemModel>)> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let order_number = generate_order_number(&settings.order_number_prefix, Utc::now().date_naive());
        match insert_order(orm, settings, shipping, lines, total_amount, order_number).await {
            Err(AppError::OrmError(err))
                if attempt < ORDER_NUMBER_ATTEMPTS && is_unique_violation(&err) =>
            {
                tracing::warn!(attempt, "order number collision, retrying");
            }
            result => return result,
        }
    }
}

async fn insert_order(
    orm: &DatabaseConnection,
    settings: &CheckoutSettings,
    shipping: &ShippingInfo,
    lines: &[SnapshotLine],
    total_amount: i64,
    order_number: String,
) -> AppResult<(OrderModel, Vec<OrderItemModel>)> {
    let now = Utc::now();
    let txn = orm.begin().await?;

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        order_number: Set(order_number),
        total_amount: Set(total_amount),
        currency: Set(settings.currency.clone()),
        status: Set(OrderStatus::Pending),
        payment_status: Set(PaymentStatus::Pending),
        gateway_order_id: Set(None),
        confirmation_sent: Set(false),
        full_name: Set(shipping.full_name.trim().to_string()),
        email: Set(shipping.email.trim().to_string()),
        phone: Set(shipping.phone.trim().to_string()),
        address_line: Set(shipping.address_line.trim().to_string()),
        city: Set(shipping.city.trim().to_string()),
        postal_code: Set(shipping.postal_code.trim().to_string()),
        country: Set(shipping.country.trim().to_string()),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;

    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            line_total: Set(line.line_total),
            created_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;
        items.push(item);
    }

    txn.commit().await?;
    Ok((order, items))
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn lines_from_request(items: &[OrderLineRequest]) -> AppResult<Vec<SnapshotLine>> {
    items
        .iter()
        .map(|item| {
            let unit_price = money::to_minor(item.unit_price, "unit price")?;
            let line_total = match item.line_total {
                Some(total) => money::to_minor(total, "line total")?,
                None => unit_price.saturating_mul(i64::from(item.quantity)),
            };
            Ok(SnapshotLine {
                product_id: item.product_id,
                unit_price,
                quantity: item.quantity,
                line_total,
            })
        })
        .collect()
}

/// Checks every line and returns the order total in minor units.
pub fn validate_lines(lines: &[SnapshotLine]) -> AppResult<i64> {
    if lines.is_empty() {
        return Err(AppError::Validation("order must contain at least one item".into()));
    }

    let mut total: i64 = 0;
    for line in lines {
        if line.quantity < 1 {
            return Err(AppError::Validation(format!(
                "quantity for product {} must be at least 1",
                line.product_id
            )));
        }
        if line.unit_price < 0 {
            return Err(AppError::Validation(format!(
                "unit price for product {} must not be negative",
                line.product_id
            )));
        }
        let expected = line
            .unit_price
            .checked_mul(i64::from(line.quantity))
            .ok_or_else(|| AppError::Validation("line total is out of range".into()))?;
        if expected != line.line_total {
            return Err(AppError::Validation(format!(
                "line total for product {} is {} but quantity x unit price is {}",
                line.product_id,
                money::from_minor(line.line_total),
                money::from_minor(expected)
            )));
        }
        total = total
            .checked_add(expected)
            .ok_or_else(|| AppError::Validation("order total is out of range".into()))?;
    }
    Ok(total)
}

pub fn validate_shipping(shipping: &ShippingInfo) -> AppResult<()> {
    let fields = [
        ("fullName", &shipping.full_name),
        ("email", &shipping.email),
        ("phone", &shipping.phone),
        ("addressLine", &shipping.address_line),
        ("city", &shipping.city),
        ("postalCode", &shipping.postal_code),
        ("country", &shipping.country),
    ];
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();
    if !missing.is_empty() {
        return Err(AppError::Validation(format!(
            "missing shipping fields: {}",
            missing.join(", ")
        )));
    }
    if !shipping.email.contains('@') {
        return Err(AppError::Validation("shipping email is invalid".into()));
    }
    Ok(())
}

/// `<PREFIX><YYYYMMDD>-<8 uppercase alphanumerics>`
pub fn generate_order_number(prefix: &str, date: NaiveDate) -> String {
    let mut rng = rand::thread_rng();
    let token: String = (0..8)
        .map(|_| TOKEN_CHARSET[rng.gen_range(0..TOKEN_CHARSET.len())] as char)
        .collect();
    format!("{}{}-{}", prefix, date.format("%Y%m%d"), token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(quantity: i32, unit_price: i64, line_total: i64) -> SnapshotLine {
        SnapshotLine {
            product_id: Uuid::new_v4(),
            unit_price,
            quantity,
            line_total,
        }
    }

    fn shipping() -> ShippingInfo {
        ShippingInfo {
            full_name: "Asha Rao".into(),
            email: "asha@example.com".into(),
            phone: "+91 90000 00000".into(),
            address_line: "12 MG Road".into(),
            city: "Bengaluru".into(),
            postal_code: "560001".into(),
            country: "IN".into(),
        }
    }

    #[test]
    fn sums_line_totals() {
        let total = validate_lines(&[line(2, 10000, 20000), line(1, 5000, 5000)]).unwrap();
        assert_eq!(total, 25000);
    }

    #[test]
    fn rejects_bad_lines() {
        assert!(matches!(validate_lines(&[]), Err(AppError::Validation(_))));
        assert!(matches!(validate_lines(&[line(0, 100, 0)]), Err(AppError::Validation(_))));
        assert!(matches!(validate_lines(&[line(1, -1, -1)]), Err(AppError::Validation(_))));
        assert!(matches!(validate_lines(&[line(2, 100, 201)]), Err(AppError::Validation(_))));
        assert!(matches!(
            validate_lines(&[line(i32::MAX, i64::MAX, 0)]),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn free_items_are_allowed() {
        assert_eq!(validate_lines(&[line(3, 0, 0)]).unwrap(), 0);
    }

    #[test]
    fn shipping_fields_are_required() {
        assert!(validate_shipping(&shipping()).is_ok());

        let mut blank = shipping();
        blank.city = "   ".into();
        blank.phone = String::new();
        match validate_shipping(&blank) {
            Err(AppError::Validation(msg)) => {
                assert!(msg.contains("city"));
                assert!(msg.contains("phone"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        let mut bad_email = shipping();
        bad_email.email = "asha.example.com".into();
        assert!(validate_shipping(&bad_email).is_err());
    }

    #[test]
    fn order_number_format() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let number = generate_order_number("ORD", date);
        let (head, token) = number.split_once('-').unwrap();
        assert_eq!(head, "ORD20261016");
        assert_eq!(token.len(), 8);
        assert!(token.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert_ne!(number, generate_order_number("ORD", date));
    }
}
