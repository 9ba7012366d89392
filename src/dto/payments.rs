use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    models::{Order, Payment},
    services::payment_service::{ReconcileOutcome, Reconciliation},
};

/// Fields the checkout widget hands back after a successful payment.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    #[serde(default)]
    pub gateway_order_id: String,
    #[serde(default)]
    pub gateway_payment_id: String,
    #[serde(default)]
    pub signature: String,
}

impl VerifyPaymentRequest {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("gatewayOrderId", &self.gateway_order_id),
            ("gatewayPaymentId", &self.gateway_payment_id),
            ("signature", &self.signature),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    pub outcome: ReconcileOutcome,
    pub order: Order,
    pub payment: Option<Payment>,
}

impl From<Reconciliation> for ReconciliationResult {
    fn from(value: Reconciliation) -> Self {
        Self {
            outcome: value.outcome,
            order: value.order.into(),
            payment: value.payment.map(Into::into),
        }
    }
}
