//! Application services: read records, let aggregates decide, commit
//! conditionally, and retry when a version race is lost.

mod cart;
mod catalog;
mod ledger;
mod orders;

pub use cart::CartService;
pub use catalog::CatalogService;
pub use ledger::StockLedger;
pub use orders::{OrderWorkflow, ReservationMode};
