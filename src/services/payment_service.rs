//! Payment reconciliation.
//!
//! The checkout verify callback and the gateway webhook both report payment
//! facts for the same gateway transactions, in any order and possibly at the
//! same time. Both channels end in [`Reconciler::apply_payment_fact`], which
//! serializes on the order (in-process lock plus a row lock inside the
//! transaction) and is idempotent on the gateway transaction id.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait, prelude::DateTimeWithTimeZone,
    sea_query::LockType,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    audit,
    dto::webhooks::{WebhookEnvelope, WebhookEvent, WebhookReceipt},
    entity::{
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        payments::{ActiveModel as PaymentActive, Column as PaymentCol, Entity as Payments, Model as PaymentModel},
        status::{OrderStatus, PaymentStatus},
    },
    error::{AppError, AppResult},
    gateway::{GatewayError, GatewayPayment, PaymentGateway},
    services::{
        locks::KeyedLocks,
        notification::{NotificationQueue, OrderConfirmation},
        state_machine::{self, Trigger},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The fact changed stored state.
    Applied,
    /// The same fact was already recorded.
    AlreadyApplied,
    /// The fact was accepted but contradicts or predates stored state.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Verify,
    Webhook,
}

/// How a fact points at its order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRef {
    GatewayOrderId(String),
    OrderNumber(String),
}

#[derive(Debug, Clone)]
pub struct PaymentFact {
    pub transaction_id: String,
    /// Tried in order until one resolves.
    pub order_refs: Vec<OrderRef>,
    pub amount: i64,
    pub currency: String,
    pub method: Option<String>,
    pub status: PaymentStatus,
    pub channel: Channel,
}

impl PaymentFact {
    pub fn from_gateway(payment: GatewayPayment, order_refs: Vec<OrderRef>, channel: Channel) -> Self {
        PaymentFact {
            status: claimed_status(&payment.status),
            transaction_id: payment.id,
            order_refs,
            amount: payment.amount,
            currency: payment.currency,
            method: payment.method,
            channel,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub outcome: ReconcileOutcome,
    pub order: OrderModel,
    pub payment: Option<PaymentModel>,
}

/// Gateway payment status to stored payment status.
pub fn claimed_status(raw: &str) -> PaymentStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "captured" => PaymentStatus::Paid,
        "authorized" | "created" => PaymentStatus::Pending,
        _ => PaymentStatus::Failed,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Insert,
    Update,
    Skip(ReconcileOutcome),
}

/// What to do with the payment row for `transaction_id`, given what is stored.
pub fn decide(existing: Option<PaymentStatus>, claimed: PaymentStatus) -> AppResult<Decision> {
    use PaymentStatus::*;
    let decision = match (existing, claimed) {
        (None, _) => Decision::Insert,
        (Some(stored), claimed) if stored == claimed => Decision::Skip(ReconcileOutcome::AlreadyApplied),
        (Some(stored @ Refunded), Paid) => {
            state_machine::payment_transition(stored, Paid)?;
            Decision::Update
        }
        (Some(Pending), Paid | Failed) => Decision::Update,
        // PAID and FAILED are final for a transaction; late or contradicting
        // facts are dropped.
        (Some(_), _) => Decision::Skip(ReconcileOutcome::Ignored),
    };
    Ok(decision)
}

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub gateway_name: String,
    pub gateway_timeout: Duration,
}

pub struct Reconciler {
    orm: DatabaseConnection,
    gateway: Arc<dyn PaymentGateway>,
    notifications: NotificationQueue,
    locks: Arc<KeyedLocks<Uuid>>,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(
        orm: DatabaseConnection,
        gateway: Arc<dyn PaymentGateway>,
        notifications: NotificationQueue,
        locks: Arc<KeyedLocks<Uuid>>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            orm,
            gateway,
            notifications,
            locks,
            settings,
        }
    }

    /// Synchronous channel: the browser reports a completed checkout.
    #[tracing::instrument(skip(self, signature))]
    pub async fn verify_payment(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> AppResult<Reconciliation> {
        if !self
            .gateway
            .verify_payment_signature(gateway_order_id, gateway_payment_id, signature)
        {
            tracing::warn!("payment signature rejected");
            return Err(AppError::Security("invalid payment signature".into()));
        }

        // The client only proves which payment it made; amount and status
        // come from the gateway.
        let payment = tokio::time::timeout(
            self.settings.gateway_timeout,
            self.gateway.fetch_payment(gateway_payment_id),
        )
        .await
        .map_err(|_| GatewayError::Timeout)??;

        if payment.id != gateway_payment_id {
            return Err(AppError::Security("gateway returned a different payment".into()));
        }
        if let Some(order_id) = payment.order_id.as_deref() {
            if order_id != gateway_order_id {
                tracing::warn!(payment_order_id = %order_id, "payment belongs to another gateway order");
                return Err(AppError::Security("payment does not belong to this order".into()));
            }
        }

        let fact = PaymentFact::from_gateway(
            payment,
            vec![OrderRef::GatewayOrderId(gateway_order_id.to_string())],
            Channel::Verify,
        );
        self.apply_payment_fact(fact).await
    }

    /// Applies one payment fact. Repeating the same fact is a no-op.
    #[tracing::instrument(
        skip(self, fact),
        fields(transaction_id = %fact.transaction_id, channel = ?fact.channel, claimed = %fact.status)
    )]
    pub async fn apply_payment_fact(&self, fact: PaymentFact) -> AppResult<Reconciliation> {
        let order = self
            .resolve_order(&fact.order_refs)
            .await?
            .ok_or(AppError::NotFound)?;

        let _guard = self.locks.lock(order.id).await;
        let txn = self.orm.begin().await?;

        let order = Orders::find_by_id(order.id)
            .lock(LockType::Update)
            .one(&txn)
            .await?
            .ok_or(AppError::NotFound)?;
        let existing = Payments::find()
            .filter(PaymentCol::TransactionId.eq(fact.transaction_id.as_str()))
            .one(&txn)
            .await?;

        if let Some(existing) = &existing {
            if existing.order_id != order.id {
                return Err(AppError::Conflict(format!(
                    "transaction {} is recorded against another order",
                    fact.transaction_id
                )));
            }
        }

        let decision = decide(existing.as_ref().map(|p| p.status), fact.status)?;
        if let Decision::Skip(outcome) = decision {
            if outcome == ReconcileOutcome::Ignored {
                tracing::warn!(
                    stored = ?existing.as_ref().map(|p| p.status),
                    "payment fact contradicts recorded state, ignored"
                );
            } else {
                tracing::debug!("payment fact already applied");
            }
            txn.rollback().await?;
            return Ok(Reconciliation {
                outcome,
                order,
                payment: existing,
            });
        }

        if fact.status == PaymentStatus::Paid {
            if order.payment_status == PaymentStatus::Paid {
                txn.rollback().await?;
                // A second capture for the same order is money taken twice.
                // It is not stored as PAID; it needs a manual refund.
                tracing::error!(
                    order_number = %order.order_number,
                    transaction_id = %fact.transaction_id,
                    amount = fact.amount,
                    "duplicate capture for an order that is already paid"
                );
                audit::record(
                    &self.orm,
                    None,
                    "duplicate_capture",
                    "payments",
                    serde_json::json!({
                        "order_id": order.id,
                        "transaction_id": fact.transaction_id,
                        "amount": fact.amount,
                        "currency": fact.currency,
                        "channel": fact.channel,
                    }),
                )
                .await;
                return Err(AppError::Conflict(format!(
                    "order {} is already paid by another transaction",
                    order.order_number
                )));
            }
            if fact.amount != order.total_amount || !fact.currency.eq_ignore_ascii_case(&order.currency) {
                tracing::error!(
                    order_number = %order.order_number,
                    captured = fact.amount,
                    expected = order.total_amount,
                    "captured amount does not match order total"
                );
                return Err(AppError::Conflict(format!(
                    "captured {} {} does not match order total {} {}",
                    fact.amount, fact.currency, order.total_amount, order.currency
                )));
            }
            if order.payment_status == PaymentStatus::Refunded {
                state_machine::payment_transition(order.payment_status, PaymentStatus::Paid)?;
            }
        }

        let payment = self.write_payment(&txn, &order, existing, &fact).await?;
        let (order, notify) = self.apply_to_order(&txn, order, &fact).await?;
        txn.commit().await?;

        tracing::info!(
            order_number = %order.order_number,
            order_status = %order.status,
            payment_status = %payment.status,
            "payment reconciled"
        );

        if notify {
            self.notifications.enqueue(OrderConfirmation {
                order: order.clone().into(),
                payment: payment.clone().into(),
            });
        }

        audit::record(
            &self.orm,
            None,
            "payment_reconciled",
            "payments",
            serde_json::json!({
                "order_id": order.id,
                "transaction_id": payment.transaction_id,
                "status": payment.status,
                "channel": fact.channel,
            }),
        )
        .await;

        Ok(Reconciliation {
            outcome: ReconcileOutcome::Applied,
            order,
            payment: Some(payment),
        })
    }

    /// Asynchronous channel: a signed event posted by the gateway. The raw
    /// body is authenticated before it is parsed.
    #[tracing::instrument(skip_all, fields(bytes = raw_body.len()))]
    pub async fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> AppResult<WebhookReceipt> {
        let Some(signature) = signature.filter(|s| !s.trim().is_empty()) else {
            tracing::warn!("webhook without signature rejected");
            return Err(AppError::Security("missing webhook signature".into()));
        };
        if !self.gateway.verify_webhook_signature(raw_body, signature) {
            tracing::warn!("webhook signature rejected");
            return Err(AppError::Security("invalid webhook signature".into()));
        }

        let envelope: WebhookEnvelope = serde_json::from_slice(raw_body)
            .map_err(|err| AppError::BadRequest(format!("invalid webhook payload: {err}")))?;
        let event = WebhookEvent::parse(&envelope.event);
        let ignored = |order_id: Option<Uuid>| WebhookReceipt {
            event: envelope.event.clone(),
            outcome: ReconcileOutcome::Ignored,
            order_id,
        };

        if event == WebhookEvent::Unknown {
            tracing::info!(event = %envelope.event, "unhandled webhook event acknowledged");
            return Ok(ignored(None));
        }

        let Some(payment) = envelope.payload.payment.as_ref().map(|p| p.entity.clone()) else {
            tracing::warn!(event = %envelope.event, "webhook event without payment entity");
            return Ok(ignored(None));
        };

        let mut order_refs = Vec::new();
        if let Some(gateway_order_id) = payment.order_id.clone() {
            order_refs.push(OrderRef::GatewayOrderId(gateway_order_id));
        }
        if let Some(order) = envelope.payload.order.as_ref() {
            if payment.order_id.is_none() {
                order_refs.push(OrderRef::GatewayOrderId(order.entity.id.clone()));
            }
            if let Some(receipt) = order.entity.receipt.clone() {
                order_refs.push(OrderRef::OrderNumber(receipt));
            }
        }

        let fact = PaymentFact::from_gateway(payment, order_refs, Channel::Webhook);
        match self.apply_payment_fact(fact).await {
            Ok(reconciliation) => Ok(WebhookReceipt {
                event: envelope.event.clone(),
                outcome: reconciliation.outcome,
                order_id: Some(reconciliation.order.id),
            }),
            // Redelivery cannot fix these, so acknowledge instead of making the gateway retry.
            Err(AppError::NotFound) => {
                tracing::warn!(event = %envelope.event, "webhook for unknown order acknowledged");
                Ok(ignored(None))
            }
            Err(AppError::Conflict(reason)) => {
                tracing::warn!(event = %envelope.event, %reason, "conflicting webhook acknowledged");
                Ok(ignored(None))
            }
            Err(err) => Err(err),
        }
    }

    async fn resolve_order(&self, refs: &[OrderRef]) -> AppResult<Option<OrderModel>> {
        for order_ref in refs {
            let condition = match order_ref {
                OrderRef::GatewayOrderId(id) => OrderCol::GatewayOrderId.eq(id.as_str()),
                OrderRef::OrderNumber(number) => OrderCol::OrderNumber.eq(number.as_str()),
            };
            if let Some(order) = Orders::find().filter(condition).one(&self.orm).await? {
                return Ok(Some(order));
            }
        }
        Ok(None)
    }

    async fn write_payment(
        &self,
        txn: &DatabaseTransaction,
        order: &OrderModel,
        existing: Option<PaymentModel>,
        fact: &PaymentFact,
    ) -> AppResult<PaymentModel> {
        // The gateway payment entity only carries its creation time, so the
        // capture is stamped when it is first recorded here.
        let now = Utc::now();
        let paid_at: Option<DateTimeWithTimeZone> = match fact.status {
            PaymentStatus::Paid => Some(now.into()),
            _ => None,
        };

        let payment = match existing {
            Some(existing) => {
                let mut active: PaymentActive = existing.into();
                active.status = Set(fact.status);
                active.amount = Set(fact.amount);
                active.currency = Set(fact.currency.to_uppercase());
                if fact.method.is_some() {
                    active.method = Set(fact.method.clone());
                }
                active.paid_at = Set(paid_at);
                active.updated_at = Set(now.into());
                active.update(txn).await?
            }
            None => {
                PaymentActive {
                    id: Set(Uuid::new_v4()),
                    transaction_id: Set(fact.transaction_id.clone()),
                    order_id: Set(order.id),
                    gateway: Set(self.settings.gateway_name.clone()),
                    method: Set(fact.method.clone()),
                    status: Set(fact.status),
                    amount: Set(fact.amount),
                    currency: Set(fact.currency.to_uppercase()),
                    paid_at: Set(paid_at),
                    created_at: Set(now.into()),
                    updated_at: Set(now.into()),
                }
                .insert(txn)
                .await?
            }
        };
        Ok(payment)
    }

    /// Moves the order along after a payment row changed. Returns the order
    /// and whether the confirmation should go out.
    async fn apply_to_order(
        &self,
        txn: &DatabaseTransaction,
        order: OrderModel,
        fact: &PaymentFact,
    ) -> AppResult<(OrderModel, bool)> {
        let mut status = order.status;
        let mut payment_status = order.payment_status;
        let mut confirmation_sent = order.confirmation_sent;
        let mut notify = false;

        match fact.status {
            PaymentStatus::Paid => {
                payment_status =
                    state_machine::payment_transition(order.payment_status, PaymentStatus::Paid)?;
                match state_machine::transition(order.status, OrderStatus::Confirmed, Trigger::PaymentPaid) {
                    Ok(next) => status = next,
                    Err(err) => {
                        tracing::warn!(error = %err, "payment recorded without confirming order")
                    }
                }
                if status == OrderStatus::Confirmed && !confirmation_sent {
                    confirmation_sent = true;
                    notify = true;
                }
            }
            PaymentStatus::Failed => {
                if order.status == OrderStatus::Pending && order.payment_status == PaymentStatus::Pending {
                    status = state_machine::transition(
                        order.status,
                        OrderStatus::PaymentFailed,
                        Trigger::PaymentFailed,
                    )?;
                    payment_status = PaymentStatus::Failed;
                } else {
                    tracing::info!(
                        order_status = %order.status,
                        "failed attempt recorded, order status kept"
                    );
                }
            }
            PaymentStatus::Pending | PaymentStatus::Refunded => {}
        }

        if status == order.status
            && payment_status == order.payment_status
            && confirmation_sent == order.confirmation_sent
        {
            return Ok((order, false));
        }

        let mut active: OrderActive = order.into();
        active.status = Set(status);
        active.payment_status = Set(payment_status);
        active.confirmation_sent = Set(confirmation_sent);
        active.updated_at = Set(Utc::now().into());
        let order = active.update(txn).await?;
        Ok((order, notify))
    }

    /// Marks a captured payment as refunded. Refunds are issued at the gateway;
    /// this records the outcome.
    #[tracing::instrument(skip(self))]
    pub async fn refund_payment(&self, transaction_id: &str, actor: &str) -> AppResult<Reconciliation> {
        let payment = Payments::find()
            .filter(PaymentCol::TransactionId.eq(transaction_id))
            .one(&self.orm)
            .await?
            .ok_or(AppError::NotFound)?;

        let _guard = self.locks.lock(payment.order_id).await;
        let txn = self.orm.begin().await?;

        let order = Orders::find_by_id(payment.order_id)
            .lock(LockType::Update)
            .one(&txn)
            .await?
            .ok_or(AppError::NotFound)?;
        let payment = Payments::find_by_id(payment.id)
            .one(&txn)
            .await?
            .ok_or(AppError::NotFound)?;

        let now = Utc::now();
        let status = state_machine::payment_transition(payment.status, PaymentStatus::Refunded)?;
        let mut active: PaymentActive = payment.into();
        active.status = Set(status);
        active.updated_at = Set(now.into());
        let payment = active.update(&txn).await?;

        let order = if order.payment_status == PaymentStatus::Paid {
            let mut active: OrderActive = order.into();
            active.payment_status = Set(PaymentStatus::Refunded);
            active.updated_at = Set(now.into());
            active.update(&txn).await?
        } else {
            order
        };
        txn.commit().await?;

        tracing::info!(order_number = %order.order_number, "payment refunded");
        audit::record(
            &self.orm,
            Some(actor),
            "payment_refunded",
            "payments",
            serde_json::json!({ "order_id": order.id, "transaction_id": payment.transaction_id }),
        )
        .await;

        Ok(Reconciliation {
            outcome: ReconcileOutcome::Applied,
            order,
            payment: Some(payment),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PaymentStatus::*;

    #[test]
    fn maps_gateway_statuses() {
        assert_eq!(claimed_status("captured"), Paid);
        assert_eq!(claimed_status("CAPTURED"), Paid);
        assert_eq!(claimed_status("authorized"), Pending);
        assert_eq!(claimed_status("failed"), Failed);
        assert_eq!(claimed_status("refunded"), Failed);
    }

    #[test]
    fn first_fact_inserts() {
        assert_eq!(decide(None, Paid).unwrap(), Decision::Insert);
        assert_eq!(decide(None, Failed).unwrap(), Decision::Insert);
    }

    #[test]
    fn repeated_fact_is_a_no_op() {
        assert_eq!(
            decide(Some(Paid), Paid).unwrap(),
            Decision::Skip(ReconcileOutcome::AlreadyApplied)
        );
        assert_eq!(
            decide(Some(Failed), Failed).unwrap(),
            Decision::Skip(ReconcileOutcome::AlreadyApplied)
        );
    }

    #[test]
    fn pending_payment_is_resolved_in_place() {
        assert_eq!(decide(Some(Pending), Paid).unwrap(), Decision::Update);
        assert_eq!(decide(Some(Pending), Failed).unwrap(), Decision::Update);
    }

    #[test]
    fn terminal_payments_are_not_overwritten() {
        assert_eq!(
            decide(Some(Paid), Failed).unwrap(),
            Decision::Skip(ReconcileOutcome::Ignored)
        );
        assert_eq!(
            decide(Some(Failed), Paid).unwrap(),
            Decision::Skip(ReconcileOutcome::Ignored)
        );
        assert_eq!(
            decide(Some(Paid), Pending).unwrap(),
            Decision::Skip(ReconcileOutcome::Ignored)
        );
        assert!(matches!(decide(Some(Refunded), Paid), Err(AppError::Conflict(_))));
    }
}
