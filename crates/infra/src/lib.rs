//! Infrastructure and application services for stockflow: record stores,
//! the stock ledger, cart and order workflows, retry, notifications, config.

pub mod config;
pub mod error;
pub mod notifications;
pub mod retry;
pub mod services;
pub mod store;
pub mod workers;

pub use config::{ConfigError, StockflowConfig};
pub use error::ServiceError;
pub use notifications::{
    BusSink, LoggingSink, NoopNotifier, NotificationSink, NotifyError, OrderNotifier,
    QueuedNotifier,
};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use services::{CartService, CatalogService, OrderWorkflow, ReservationMode, StockLedger};
pub use store::{ChangeSet, InMemoryStore, PostgresStore, Staged, Store, StoreError};
pub use workers::{NotificationWorker, WorkerHandle};

#[cfg(test)]
mod test_support;
