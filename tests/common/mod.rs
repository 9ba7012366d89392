#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use http_body_util::BodyExt;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use storefront_payments::{
    db::{create_orm_conn, create_schema},
    entity::{
        cart_items::ActiveModel as CartItemActive,
        orders::{Entity as Orders, Model as OrderModel},
        payments::{Column as PaymentCol, Entity as Payments, Model as PaymentModel},
        products::ActiveModel as ProductActive,
    },
    gateway::{GatewayError, GatewayPayment, PaymentGateway, signature},
    models::ShippingInfo,
    routes::create_app,
    services::{
        cart_snapshot::DbCartSnapshotProvider,
        locks::KeyedLocks,
        notification::{NotificationQueue, OrderConfirmation, OrderNotifier},
        order_service::CheckoutSettings,
        payment_service::{Reconciler, ReconcilerSettings},
    },
    state::AppState,
};

pub const KEY_SECRET: &str = "test_key_secret";
pub const WEBHOOK_SECRET: &str = "test_webhook_secret";
pub const JWT_SECRET: &str = "test_jwt_secret";

/// In-process gateway: hands out sequential order ids and serves payments
/// registered by the test. Signatures are checked with the real HMAC code.
#[derive(Default)]
pub struct FakeGateway {
    payments: Mutex<HashMap<String, GatewayPayment>>,
    next_order: AtomicUsize,
    fail_create: AtomicBool,
    stall_fetch: AtomicBool,
    pub created: AtomicUsize,
}

impl FakeGateway {
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn stall_fetch(&self, stall: bool) {
        self.stall_fetch.store(stall, Ordering::SeqCst);
    }

    pub fn put_payment(&self, payment: GatewayPayment) {
        self.payments
            .lock()
            .unwrap()
            .insert(payment.id.clone(), payment);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_transaction(
        &self,
        _amount_minor: i64,
        _currency: &str,
        _receipt: &str,
    ) -> Result<String, GatewayError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 401,
                description: "Authentication failed".into(),
            });
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let n = self.next_order.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("order_test_{n}"))
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, GatewayError> {
        if self.stall_fetch.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.payments
            .lock()
            .unwrap()
            .get(payment_id)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected {
                status: 400,
                description: "The id provided does not exist".into(),
            })
    }

    fn verify_payment_signature(&self, gateway_order_id: &str, payment_id: &str, sig: &str) -> bool {
        signature::verify_payment(KEY_SECRET, gateway_order_id, payment_id, sig)
    }

    fn verify_webhook_signature(&self, payload: &[u8], sig: &str) -> bool {
        signature::verify_webhook(WEBHOOK_SECRET, payload, sig)
    }
}

pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<OrderConfirmation>,
}

#[async_trait]
impl OrderNotifier for RecordingNotifier {
    async fn order_confirmed(&self, confirmation: &OrderConfirmation) -> anyhow::Result<()> {
        let _ = self.tx.send(confirmation.clone());
        Ok(())
    }
}

/// Records the attempt, then fails it.
pub struct FailingNotifier {
    tx: mpsc::UnboundedSender<OrderConfirmation>,
}

#[async_trait]
impl OrderNotifier for FailingNotifier {
    async fn order_confirmed(&self, confirmation: &OrderConfirmation) -> anyhow::Result<()> {
        let _ = self.tx.send(confirmation.clone());
        anyhow::bail!("mailer returned 503")
    }
}

/// Records the attempt, then never answers within the delivery timeout.
pub struct StalledNotifier {
    tx: mpsc::UnboundedSender<OrderConfirmation>,
}

#[async_trait]
impl OrderNotifier for StalledNotifier {
    async fn order_confirmed(&self, confirmation: &OrderConfirmation) -> anyhow::Result<()> {
        let _ = self.tx.send(confirmation.clone());
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

pub struct TestApp {
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    pub confirmations: mpsc::UnboundedReceiver<OrderConfirmation>,
}

pub async fn setup() -> TestApp {
    setup_with_notifier(|tx| Arc::new(RecordingNotifier { tx }), Duration::from_secs(1)).await
}

pub async fn setup_failing_notifier() -> TestApp {
    setup_with_notifier(|tx| Arc::new(FailingNotifier { tx }), Duration::from_secs(1)).await
}

pub async fn setup_stalled_notifier() -> TestApp {
    setup_with_notifier(|tx| Arc::new(StalledNotifier { tx }), Duration::from_millis(100)).await
}

/// Builds the app around a notifier that reports every delivery attempt on
/// the channel it is handed.
pub async fn setup_with_notifier<F>(notifier: F, notify_timeout: Duration) -> TestApp
where
    F: FnOnce(mpsc::UnboundedSender<OrderConfirmation>) -> Arc<dyn OrderNotifier>,
{
    let orm = create_orm_conn("sqlite::memory:").await.unwrap();
    create_schema(&orm).await.unwrap();

    let gateway = Arc::new(FakeGateway::default());
    let (tx, confirmations) = mpsc::unbounded_channel();
    let (notifications, _worker) = NotificationQueue::spawn(notifier(tx), notify_timeout);
    let order_locks = Arc::new(KeyedLocks::new());
    let gateway_timeout = Duration::from_millis(300);
    let reconciler = Arc::new(Reconciler::new(
        orm.clone(),
        gateway.clone(),
        notifications,
        order_locks.clone(),
        ReconcilerSettings {
            gateway_name: "razorpay".into(),
            gateway_timeout,
        },
    ));

    let state = AppState {
        orm: orm.clone(),
        gateway: gateway.clone(),
        carts: Arc::new(DbCartSnapshotProvider::new(orm)),
        reconciler,
        order_locks,
        checkout: CheckoutSettings {
            currency: "INR".into(),
            order_number_prefix: "ORD".into(),
            gateway_timeout,
        },
        jwt_secret: JWT_SECRET.into(),
    };

    TestApp {
        state,
        gateway,
        confirmations,
    }
}

impl TestApp {
    pub fn router(&self) -> Router {
        create_app(self.state.clone())
    }

    pub async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn post_webhook(&self, body: &str, signature: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::post("/api/payments/webhook")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            request = request.header("x-razorpay-signature", signature);
        }
        self.request(request.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn place_order(&self, total: &str, items: Value) -> (StatusCode, Value) {
        self.post_json(
            "/api/orders",
            json!({ "items": items, "shipping": shipping_json(), "totalAmount": total }),
        )
        .await
    }

    /// Places a two-item order worth 250.00 and returns (order id, gateway order id).
    pub async fn placed_order(&self) -> (Uuid, String) {
        let (status, body) = self
            .place_order(
                "250.00",
                json!([
                    { "productId": Uuid::new_v4(), "quantity": 2, "unitPrice": "100.00" },
                    { "productId": Uuid::new_v4(), "quantity": 1, "unitPrice": "50.00" }
                ]),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let data = &body["data"];
        (
            data["orderId"].as_str().unwrap().parse().unwrap(),
            data["gatewayTransactionId"].as_str().unwrap().to_string(),
        )
    }

    pub async fn order(&self, id: Uuid) -> OrderModel {
        Orders::find_by_id(id)
            .one(&self.state.orm)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn payments_for(&self, order_id: Uuid) -> Vec<PaymentModel> {
        Payments::find()
            .filter(PaymentCol::OrderId.eq(order_id))
            .all(&self.state.orm)
            .await
            .unwrap()
    }

    pub async fn payment_count(&self) -> u64 {
        Payments::find().count(&self.state.orm).await.unwrap()
    }

    /// Seeds a cart and returns its id.
    pub async fn cart_with(&self, lines: &[(i64, i32)]) -> Uuid {
        let cart_id = Uuid::new_v4();
        for (price, quantity) in lines {
            let product = ProductActive {
                id: Set(Uuid::new_v4()),
                name: Set(format!("Product {price}")),
                price: Set(*price),
                created_at: Set(Utc::now().into()),
            }
            .insert(&self.state.orm)
            .await
            .unwrap();
            CartItemActive {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart_id),
                product_id: Set(product.id),
                quantity: Set(*quantity),
                created_at: Set(Utc::now().into()),
            }
            .insert(&self.state.orm)
            .await
            .unwrap();
        }
        cart_id
    }

    /// Drains confirmations delivered so far, waiting briefly for the worker.
    pub async fn drain_confirmations(&mut self) -> Vec<OrderConfirmation> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut out = Vec::new();
        while let Ok(confirmation) = self.confirmations.try_recv() {
            out.push(confirmation);
        }
        out
    }
}

pub fn shipping_json() -> Value {
    json!({
        "fullName": "Asha Rao",
        "email": "asha@example.com",
        "phone": "+91 90000 00000",
        "addressLine": "12 MG Road",
        "city": "Bengaluru",
        "postalCode": "560001",
        "country": "IN"
    })
}

pub fn shipping() -> ShippingInfo {
    serde_json::from_value(shipping_json()).unwrap()
}

pub fn captured(payment_id: &str, gateway_order_id: &str, amount: i64) -> GatewayPayment {
    GatewayPayment {
        id: payment_id.into(),
        order_id: Some(gateway_order_id.into()),
        amount,
        currency: "INR".into(),
        method: Some("upi".into()),
        status: "captured".into(),
        created_at: Some(Utc::now().timestamp()),
    }
}

pub fn failed(payment_id: &str, gateway_order_id: &str, amount: i64) -> GatewayPayment {
    GatewayPayment {
        status: "failed".into(),
        ..captured(payment_id, gateway_order_id, amount)
    }
}

pub fn webhook_body(event: &str, payment: &GatewayPayment) -> String {
    json!({
        "entity": "event",
        "event": event,
        "payload": {
            "payment": { "entity": {
                "id": payment.id,
                "order_id": payment.order_id,
                "amount": payment.amount,
                "currency": payment.currency,
                "method": payment.method,
                "status": payment.status,
                "created_at": payment.created_at,
            }}
        }
    })
    .to_string()
}

pub fn sign_webhook(body: &str) -> String {
    signature::sign_webhook(WEBHOOK_SECRET, body.as_bytes())
}

pub fn sign_payment(gateway_order_id: &str, payment_id: &str) -> String {
    signature::sign_payment(KEY_SECRET, gateway_order_id, payment_id)
}

pub fn admin_token(role: &str) -> String {
    let claims = storefront_payments::middleware::auth::Claims {
        sub: format!("{role}@example.com"),
        role: role.into(),
        exp: (Utc::now().timestamp() + 3600) as usize,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}
