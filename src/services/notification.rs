//! Order confirmation notifications.
//!
//! The reconciler enqueues a confirmation after its transaction commits; a
//! background worker delivers it with a single bounded attempt. Nothing in
//! here can fail a reconciliation.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::models::{Order, Payment};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfirmation {
    pub order: Order,
    pub payment: Payment,
}

#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn order_confirmed(&self, confirmation: &OrderConfirmation) -> anyhow::Result<()>;
}

/// Writes confirmations to the log. Used when no delivery endpoint is configured.
pub struct LogNotifier;

#[async_trait]
impl OrderNotifier for LogNotifier {
    async fn order_confirmed(&self, confirmation: &OrderConfirmation) -> anyhow::Result<()> {
        tracing::info!(
            order_number = %confirmation.order.order_number,
            email = %confirmation.order.shipping.email,
            transaction_id = %confirmation.payment.transaction_id,
            "order confirmation"
        );
        Ok(())
    }
}

/// POSTs the confirmation as JSON to an external mailer/notification service.
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl OrderNotifier for HttpNotifier {
    async fn order_confirmed(&self, confirmation: &OrderConfirmation) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(confirmation)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Sending half of the notification queue.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::UnboundedSender<OrderConfirmation>,
}

impl NotificationQueue {
    /// Spawns the delivery worker. The worker exits once every queue handle is dropped.
    pub fn spawn(notifier: Arc<dyn OrderNotifier>, timeout: Duration) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<OrderConfirmation>();
        let worker = tokio::spawn(async move {
            while let Some(confirmation) = rx.recv().await {
                deliver(notifier.as_ref(), &confirmation, timeout).await;
            }
            tracing::debug!("notification worker stopped");
        });
        (Self { tx }, worker)
    }

    pub fn enqueue(&self, confirmation: OrderConfirmation) {
        let order_number = confirmation.order.order_number.clone();
        if self.tx.send(confirmation).is_err() {
            tracing::error!(%order_number, "notification worker is gone, confirmation dropped");
        }
    }
}

async fn deliver(notifier: &dyn OrderNotifier, confirmation: &OrderConfirmation, timeout: Duration) {
    let order_number = &confirmation.order.order_number;
    match tokio::time::timeout(timeout, notifier.order_confirmed(confirmation)).await {
        Ok(Ok(())) => tracing::info!(%order_number, "confirmation delivered"),
        Ok(Err(err)) => {
            tracing::error!(%order_number, error = %err, "confirmation delivery failed")
        }
        Err(_) => tracing::error!(%order_number, "confirmation delivery timed out"),
    }
}
