//! Orderflow service entry point.

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orderflow::api::{self, AppState};
use orderflow::handlers::{OrderCreatedHandler, PaymentCompletedHandler, PaymentFailedHandler};
use orderflow::messaging::{HandlerRegistry, InMemoryBroker, MessageBus, NatsBus};
use orderflow::services::{
    AlertThresholds, InventoryService, LogNotifier, OrderService, PaymentService,
};
use orderflow::store::memory::{MemoryInventoryStore, MemoryOrderStore, MemoryPaymentStore};
use orderflow::store::postgres::{PgInventoryStore, PgOrderStore, PgPaymentStore};
use orderflow::store::{InventoryStore, OrderStore, PaymentStore};
use orderflow::Config;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = Config::from_env();

    let bus: Arc<dyn MessageBus> = match &cfg.nats_url {
        Some(url) => {
            tracing::info!(url, "connecting to NATS");
            Arc::new(NatsBus::connect(url, cfg.publish_timeout).await?)
        }
        None => {
            tracing::info!("no NATS_URL configured, using in-memory broker");
            Arc::new(InMemoryBroker::new(cfg.max_delivery_attempts))
        }
    };

    let (order_store, payment_store, inventory_store): (
        Arc<dyn OrderStore>,
        Arc<dyn PaymentStore>,
        Arc<dyn InventoryStore>,
    ) = match &cfg.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            (
                Arc::new(PgOrderStore::new(pool.clone())),
                Arc::new(PgPaymentStore::new(pool.clone())),
                Arc::new(PgInventoryStore::new(pool)),
            )
        }
        None => {
            tracing::info!("no DATABASE_URL configured, using in-memory stores");
            (
                Arc::new(MemoryOrderStore::default()),
                Arc::new(MemoryPaymentStore::default()),
                Arc::new(MemoryInventoryStore::default()),
            )
        }
    };

    let orders = Arc::new(OrderService::new(
        order_store,
        Arc::clone(&bus),
        "order-service",
    ));
    let payments = Arc::new(PaymentService::new(
        payment_store,
        Arc::clone(&bus),
        "payment-service",
    ));
    let inventory = Arc::new(InventoryService::new(
        inventory_store,
        Arc::clone(&bus),
        "inventory-service",
        AlertThresholds::uniform(cfg.low_stock_threshold),
        Arc::new(LogNotifier),
    ));

    HandlerRegistry::new("inventory-service")
        .register(Arc::new(OrderCreatedHandler::new(Arc::clone(&inventory))))
        .start(bus.as_ref())
        .await?;
    HandlerRegistry::new("order-service")
        .register(Arc::new(PaymentCompletedHandler::new(Arc::clone(&orders))))
        .register(Arc::new(PaymentFailedHandler::new(Arc::clone(&orders))))
        .start(bus.as_ref())
        .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scan = Arc::clone(&inventory).spawn_scan_loop(cfg.alert_scan_interval, shutdown_rx);

    let app = api::router(AppState {
        orders,
        payments,
        inventory,
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", cfg.port)).await?;
    tracing::info!(port = cfg.port, "orderflow listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Drain: stop the scan loop, then let consumers finish in-flight work.
    let _ = shutdown_tx.send(true);
    let _ = scan.await;
    bus.shutdown().await?;
    Ok(())
}
