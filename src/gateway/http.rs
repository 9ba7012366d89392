use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::config::GatewayConfig;

use super::{GatewayError, GatewayPayment, PaymentGateway, signature};

/// REST client for the gateway: basic auth with the key pair, amounts in
/// minor units, every request bounded by the configured timeout.
#[derive(Clone)]
pub struct HttpGatewayClient {
    client: reqwest::Client,
    config: GatewayConfig,
}

#[derive(Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
    payment_capture: u8,
}

#[derive(Deserialize)]
struct CreatedOrder {
    id: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    description: Option<String>,
}

impl HttpGatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let description = serde_json::from_str::<ErrorEnvelope>(&text)
            .ok()
            .and_then(|envelope| envelope.error.description)
            .unwrap_or(text);
        Err(GatewayError::Rejected {
            status: status.as_u16(),
            description,
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpGatewayClient {
    #[tracing::instrument(skip(self), fields(gateway = %self.config.name))]
    async fn create_transaction(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<String, GatewayError> {
        let body = CreateOrderBody {
            amount: amount_minor,
            currency,
            receipt,
            payment_capture: 1,
        };
        let response = self
            .client
            .post(self.url("/v1/orders"))
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&body)
            .send()
            .await?;
        let created: CreatedOrder = Self::decode(response).await?;
        tracing::debug!(gateway_order_id = %created.id, "gateway transaction created");
        Ok(created.id)
    }

    #[tracing::instrument(skip(self), fields(gateway = %self.config.name))]
    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/payments/{payment_id}")))
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .send()
            .await?;
        Self::decode(response).await
    }

    fn verify_payment_signature(
        &self,
        gateway_order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> bool {
        signature::verify_payment(
            &self.config.key_secret,
            gateway_order_id,
            payment_id,
            signature,
        )
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        signature::verify_webhook(&self.config.webhook_secret, payload, signature)
    }
}
