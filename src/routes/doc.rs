use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        admin::UpdateOrderStatusRequest,
        orders::{OrderDetail, OrderLineRequest, PlaceOrderRequest, PlaceOrderResponse},
        payments::{ReconciliationResult, VerifyPaymentRequest},
        webhooks::WebhookReceipt,
    },
    entity::status::{OrderStatus, PaymentStatus},
    models::{Order, OrderItem, Payment, ShippingInfo},
    response::{ApiResponse, Meta},
    routes::{admin, health, orders, payments},
    services::payment_service::ReconcileOutcome,
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        orders::place_order,
        orders::get_order,
        orders::retry_payment,
        payments::verify_payment,
        payments::payment_webhook,
        admin::update_order_status,
        admin::refund_payment
    ),
    components(
        schemas(
            Order,
            OrderItem,
            Payment,
            ShippingInfo,
            OrderStatus,
            PaymentStatus,
            ReconcileOutcome,
            PlaceOrderRequest,
            OrderLineRequest,
            PlaceOrderResponse,
            OrderDetail,
            VerifyPaymentRequest,
            ReconciliationResult,
            WebhookReceipt,
            UpdateOrderStatusRequest,
            Meta,
            ApiResponse<PlaceOrderResponse>,
            ApiResponse<OrderDetail>,
            ApiResponse<ReconciliationResult>,
            ApiResponse<WebhookReceipt>,
            ApiResponse<Order>
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Orders", description = "Order placement"),
        (name = "Payments", description = "Payment verification and gateway webhooks"),
        (name = "Admin", description = "Fulfilment and refunds"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
