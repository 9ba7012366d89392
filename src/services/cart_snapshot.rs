use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

use crate::{
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        products::Entity as Products,
    },
    error::{AppError, AppResult},
};

/// Priced line of a cart at the moment the snapshot was taken. Amounts are
/// minor units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLine {
    pub product_id: Uuid,
    pub unit_price: i64,
    pub quantity: i32,
    pub line_total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartSnapshot {
    pub lines: Vec<SnapshotLine>,
    pub grand_total: i64,
}

#[async_trait]
pub trait CartSnapshotProvider: Send + Sync {
    async fn get_snapshot(&self, cart_id: Uuid) -> AppResult<CartSnapshot>;
}

/// Prices a cart from the `cart_items` and `products` tables.
pub struct DbCartSnapshotProvider {
    orm: DatabaseConnection,
}

impl DbCartSnapshotProvider {
    pub fn new(orm: DatabaseConnection) -> Self {
        Self { orm }
    }
}

#[async_trait]
impl CartSnapshotProvider for DbCartSnapshotProvider {
    async fn get_snapshot(&self, cart_id: Uuid) -> AppResult<CartSnapshot> {
        let rows = CartItems::find()
            .filter(CartCol::CartId.eq(cart_id))
            .order_by_asc(CartCol::CreatedAt)
            .find_also_related(Products)
            .all(&self.orm)
            .await?;

        if rows.is_empty() {
            return Err(AppError::NotFound);
        }

        let mut lines = Vec::with_capacity(rows.len());
        for (item, product) in rows {
            let product = product.ok_or_else(|| {
                AppError::Validation(format!("product {} is no longer available", item.product_id))
            })?;
            lines.push(SnapshotLine {
                product_id: product.id,
                unit_price: product.price,
                quantity: item.quantity,
                line_total: product.price.saturating_mul(i64::from(item.quantity)),
            });
        }
        let grand_total = lines.iter().map(|line| line.line_total).sum();

        Ok(CartSnapshot { lines, grand_total })
    }
}
