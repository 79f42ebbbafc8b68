//! `stockflow-sim`: drive the order core with concurrent shoppers.
//!
//! Uses Postgres when `DATABASE_URL` is set, otherwise the in-memory store.
//! Every shopper puts one copy of a scarce item in their cart and checks out
//! at the same time; the run ends with a report of who got one.

use std::sync::{Arc, Barrier};
use std::thread;

use anyhow::{Context, anyhow};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use stockflow_core::UserId;
use stockflow_infra::{
    CartService, CatalogService, InMemoryStore, LoggingSink, NotificationWorker, OrderWorkflow,
    PostgresStore, ServiceError, StockflowConfig, Store,
};

const SHOPPERS: usize = 8;
const INITIAL_STOCK: i64 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockflow_observability::init();

    let config = StockflowConfig::from_env().context("invalid configuration")?;
    info!(
        reservation_mode = ?config.reservation_mode,
        max_retries = config.retry.max_retries,
        postgres = config.database_url.is_some(),
        "starting simulation"
    );

    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(SHOPPERS as u32 + 2)
                .connect(&url)
                .await
                .context("failed to connect to postgres")?;
            let store = PostgresStore::new(pool);
            store.migrate().await.context("failed to create schema")?;
            run(Arc::new(store), config).await
        }
        None => run(Arc::new(InMemoryStore::new()), config).await,
    }
}

async fn run<S>(store: Arc<S>, config: StockflowConfig) -> anyhow::Result<()>
where
    S: Store + 'static,
{
    tokio::task::spawn_blocking(move || simulate(store, &config))
        .await
        .context("simulation task panicked")?
}

fn simulate<S>(store: Arc<S>, config: &StockflowConfig) -> anyhow::Result<()>
where
    S: Store + 'static,
{
    let (notifier, worker) = NotificationWorker::spawn("order-notifications", LoggingSink)
        .context("failed to start notification worker")?;

    let catalog = CatalogService::new(store.clone(), config.retry.clone());
    let carts = CartService::new(store.clone(), config.retry.clone());
    let workflow = Arc::new(
        OrderWorkflow::new(store.clone(), config.retry.clone(), notifier)
            .with_reservation_mode(config.reservation_mode),
    );

    let item = catalog.register_item("Programming Rust, 2nd Edition", "49.99".parse()?, INITIAL_STOCK)?;
    let item_id = item.id_typed();

    let shoppers: Vec<UserId> = (0..SHOPPERS).map(|_| UserId::new()).collect();
    for &user in &shoppers {
        carts.add_line(user, item_id, 1)?;
    }

    let barrier = Arc::new(Barrier::new(shoppers.len()));
    let handles: Vec<_> = shoppers
        .iter()
        .map(|&user| {
            let workflow = workflow.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                (user, workflow.place_order(user))
            })
        })
        .collect();

    let mut placed = Vec::new();
    let mut sold_out = 0usize;
    for handle in handles {
        let (user, result) = handle.join().map_err(|_| anyhow!("shopper thread panicked"))?;
        match result {
            Ok(order) => placed.push((user, order)),
            Err(ServiceError::InsufficientStock { .. }) => sold_out += 1,
            Err(err) => warn!(%user, error = %err, "checkout failed"),
        }
    }

    let remaining = catalog.get_item(item_id)?.available_stock();
    info!(placed = placed.len(), sold_out, remaining, "checkout race finished");

    // One buyer changes their mind.
    if let Some((user, order)) = placed.first() {
        workflow.cancel_order(*user, order.id_typed())?;
        let restored = catalog.get_item(item_id)?.available_stock();
        info!(order_id = %order.id_typed(), restored, "order cancelled");
    }

    worker.shutdown();
    Ok(())
}
