//! Adapter over the external payment gateway.
//!
//! Everything that crosses this boundary is untrusted: signatures are checked
//! with [`signature`] before a payload is acted on, and network calls are
//! bounded by the client timeout.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

pub mod http;
pub mod signature;

pub use http::HttpGatewayClient;

/// Payment as reported by the gateway, either fetched by id or embedded in a
/// webhook payload (`payload.payment.entity`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    /// Gateway order (transaction) the payment was made against.
    #[serde(default)]
    pub order_id: Option<String>,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub method: Option<String>,
    pub status: String,
    /// Unix seconds at which the payment was created. Not the capture time.
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway rejected request ({status}): {description}")]
    Rejected { status: u16, description: String },

    #[error("unexpected gateway response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// Coarse reason for a gateway failure. Only used to pick a user-facing
/// message; never drives control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorCategory {
    MerchantAccount,
    Authentication,
    AmountOrCurrency,
    Generic,
}

impl GatewayError {
    pub fn category(&self) -> GatewayErrorCategory {
        let message = self.to_string().to_lowercase();
        if message.contains("merchant") || message.contains("account") {
            GatewayErrorCategory::MerchantAccount
        } else if message.contains("authentication")
            || message.contains("unauthorized")
            || message.contains("api key")
            || message.contains("(401)")
        {
            GatewayErrorCategory::Authentication
        } else if message.contains("amount") || message.contains("currency") {
            GatewayErrorCategory::AmountOrCurrency
        } else {
            GatewayErrorCategory::Generic
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self.category() {
            GatewayErrorCategory::MerchantAccount => {
                "Payment gateway merchant account issue, please contact support"
            }
            GatewayErrorCategory::Authentication => {
                "Payment gateway authentication issue, please try again later"
            }
            GatewayErrorCategory::AmountOrCurrency => "Payment amount or currency was rejected",
            GatewayErrorCategory::Generic => "Payment gateway unavailable, please try again",
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a gateway-side transaction (gateway order) and returns its id.
    async fn create_transaction(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<String, GatewayError>;

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, GatewayError>;

    /// Checks the checkout callback signature over `"{order_id}|{payment_id}"`.
    fn verify_payment_signature(
        &self,
        gateway_order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> bool;

    /// Checks the webhook signature over the raw, unparsed body.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;
}
