use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{gateway::GatewayPayment, services::payment_service::ReconcileOutcome};

/// `{ "event": ..., "payload": { "payment": { "entity": ... }, "order": { "entity": ... } } }`
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub payment: Option<Entity<GatewayPayment>>,
    #[serde(default)]
    pub order: Option<Entity<GatewayOrder>>,
}

#[derive(Debug, Deserialize)]
pub struct Entity<T> {
    pub entity: T,
}

#[derive(Debug, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    #[serde(default)]
    pub receipt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEvent {
    PaymentCaptured,
    PaymentFailed,
    PaymentAuthorized,
    OrderPaid,
    Unknown,
}

impl WebhookEvent {
    pub fn parse(event: &str) -> Self {
        match event {
            "payment.captured" => WebhookEvent::PaymentCaptured,
            "payment.failed" => WebhookEvent::PaymentFailed,
            "payment.authorized" => WebhookEvent::PaymentAuthorized,
            "order.paid" => WebhookEvent::OrderPaid,
            _ => WebhookEvent::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookReceipt {
    pub event: String,
    pub outcome: ReconcileOutcome,
    pub order_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_payment_captured_envelope() {
        let raw = r#"{
            "entity": "event",
            "event": "payment.captured",
            "payload": {
                "payment": { "entity": {
                    "id": "pay_1", "amount": 25000, "currency": "INR",
                    "status": "captured", "order_id": "order_1", "method": "upi",
                    "created_at": 1700000000
                }},
                "order": { "entity": { "id": "order_1", "receipt": "ORD20260101-ABCDEFGH" } }
            }
        }"#;
        let envelope: WebhookEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(WebhookEvent::parse(&envelope.event), WebhookEvent::PaymentCaptured);
        let payment = envelope.payload.payment.unwrap().entity;
        assert_eq!(payment.id, "pay_1");
        assert_eq!(
            envelope.payload.order.unwrap().entity.receipt.as_deref(),
            Some("ORD20260101-ABCDEFGH")
        );
    }

    #[test]
    fn unknown_events_parse_without_payload() {
        let envelope: WebhookEnvelope =
            serde_json::from_str(r#"{"event":"refund.processed"}"#).unwrap();
        assert_eq!(WebhookEvent::parse(&envelope.event), WebhookEvent::Unknown);
        assert!(envelope.payload.payment.is_none());
    }
}
