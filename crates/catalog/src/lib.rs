//! Catalog domain module.
//!
//! Business rules for catalog items and their available stock, implemented purely
//! as deterministic domain logic (no IO, no storage). Stock is only ever changed
//! through [`AdjustStock`], which enforces `available_stock >= 0`.

pub mod item;

pub use item::{
    AdjustStock, Item, ItemCommand, ItemEvent, ItemRegistered, ItemRepriced, RegisterItem,
    RepriceItem, StockAdjusted,
};
