use std::{env, time::Duration};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub gateway: GatewayConfig,
    pub currency: String,
    pub order_number_prefix: String,
    pub jwt_secret: String,
    pub notify_webhook_url: Option<String>,
    pub notify_timeout: Duration,
}

/// Credentials and endpoint of the payment gateway. Handed to the gateway
/// client and the reconciler at construction time.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub name: String,
    pub base_url: String,
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let gateway = GatewayConfig::from_env()?;
        let currency = env::var("CURRENCY").unwrap_or_else(|_| "INR".to_string());
        let order_number_prefix =
            env::var("ORDER_NUMBER_PREFIX").unwrap_or_else(|_| "ORD".to_string());
        let jwt_secret = env::var("JWT_SECRET")?;
        let notify_webhook_url = env::var("NOTIFY_WEBHOOK_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        let notify_timeout = secs_from_env("NOTIFY_TIMEOUT_SECS", 5);
        Ok(Self {
            port,
            database_url,
            host,
            gateway,
            currency,
            order_number_prefix,
            jwt_secret,
            notify_webhook_url,
            notify_timeout,
        })
    }
}

impl GatewayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            name: env::var("GATEWAY_NAME").unwrap_or_else(|_| "razorpay".to_string()),
            base_url: env::var("GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.razorpay.com".to_string()),
            key_id: env::var("GATEWAY_KEY_ID").unwrap_or_default(),
            key_secret: env::var("GATEWAY_KEY_SECRET")?,
            webhook_secret: env::var("GATEWAY_WEBHOOK_SECRET")?,
            timeout: secs_from_env("GATEWAY_TIMEOUT_SECS", 10),
        })
    }
}

fn secs_from_env(key: &str, default: u64) -> Duration {
    let secs = env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}
