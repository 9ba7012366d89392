use std::sync::Arc;

use sea_orm::DatabaseConnection;
use uuid::Uuid;

use crate::{
    gateway::PaymentGateway,
    services::{
        cart_snapshot::CartSnapshotProvider, locks::KeyedLocks, order_service::CheckoutSettings,
        payment_service::Reconciler,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub orm: DatabaseConnection,
    pub gateway: Arc<dyn PaymentGateway>,
    pub carts: Arc<dyn CartSnapshotProvider>,
    pub reconciler: Arc<Reconciler>,
    /// Shared with the reconciler so admin updates and payment facts for one
    /// order never interleave.
    pub order_locks: Arc<KeyedLocks<Uuid>>,
    pub checkout: CheckoutSettings,
    pub jwt_secret: String,
}
