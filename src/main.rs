use std::{net::SocketAddr, sync::Arc};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_payments::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    gateway::{HttpGatewayClient, PaymentGateway},
    routes::create_app,
    services::{
        cart_snapshot::DbCartSnapshotProvider,
        locks::KeyedLocks,
        notification::{HttpNotifier, LogNotifier, NotificationQueue, OrderNotifier},
        order_service::CheckoutSettings,
        payment_service::{Reconciler, ReconcilerSettings},
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,storefront_payments=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    let gateway: Arc<dyn PaymentGateway> = Arc::new(HttpGatewayClient::new(config.gateway.clone())?);
    let notifier: Arc<dyn OrderNotifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(HttpNotifier::new(url.clone(), config.notify_timeout)?),
        None => Arc::new(LogNotifier),
    };
    let (notifications, _notification_worker) =
        NotificationQueue::spawn(notifier, config.notify_timeout);

    let order_locks = Arc::new(KeyedLocks::new());
    let reconciler = Arc::new(Reconciler::new(
        orm.clone(),
        gateway.clone(),
        notifications,
        order_locks.clone(),
        ReconcilerSettings {
            gateway_name: config.gateway.name.clone(),
            gateway_timeout: config.gateway.timeout,
        },
    ));

    let state = AppState {
        orm: orm.clone(),
        gateway,
        carts: Arc::new(DbCartSnapshotProvider::new(orm)),
        reconciler,
        order_locks,
        checkout: CheckoutSettings {
            currency: config.currency.clone(),
            order_number_prefix: config.order_number_prefix.clone(),
            gateway_timeout: config.gateway.timeout,
        },
        jwt_secret: config.jwt_secret.clone(),
    };

    let app = create_app(state);

    let addr = SocketAddr::from((config.host.parse::<std::net::IpAddr>()?, config.port));
    tracing::info!("listening on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;

    Ok(())
}
