//! Record storage with atomic, version-checked multi-record commits.
//!
//! Every write is conditional: a [`ChangeSet`] carries the post-image of each
//! record together with the [`ExpectedVersion`] observed when it was read, and
//! [`Store::commit`] applies all of them or none of them.

mod in_memory;
mod postgres;

use std::sync::Arc;

use thiserror::Error;

use stockflow_cart::Cart;
use stockflow_catalog::Item;
use stockflow_core::{AggregateRoot, ExpectedVersion, ItemId, OrderId, UserId};
use stockflow_orders::Order;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A staged record's expected version no longer matches the stored one.
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    /// The backend could not serve the request (connection, serialization, poisoned lock).
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// A record staged for a conditional write.
#[derive(Debug, Clone, PartialEq)]
pub struct Staged<T> {
    pub record: T,
    pub expected: ExpectedVersion,
}

/// Set of conditional writes committed atomically.
///
/// Staging the same record twice replaces the earlier post-image but keeps the
/// first expectation, so several adjustments to one item inside a single commit
/// still check against the version that was originally read.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    items: Vec<Staged<Item>>,
    carts: Vec<Staged<Cart>>,
    orders: Vec<Staged<Order>>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_item(&mut self, item: Item, expected: ExpectedVersion) -> &mut Self {
        stage(&mut self.items, item, expected);
        self
    }

    pub fn put_cart(&mut self, cart: Cart, expected: ExpectedVersion) -> &mut Self {
        stage(&mut self.carts, cart, expected);
        self
    }

    pub fn put_order(&mut self, order: Order, expected: ExpectedVersion) -> &mut Self {
        stage(&mut self.orders, order, expected);
        self
    }

    /// Latest staged post-image of an item, if this change set already touches it.
    pub fn staged_item(&self, item_id: ItemId) -> Option<&Staged<Item>> {
        self.items.iter().find(|s| s.record.id_typed() == item_id)
    }

    pub fn items(&self) -> &[Staged<Item>] {
        &self.items
    }

    pub fn carts(&self) -> &[Staged<Cart>] {
        &self.carts
    }

    pub fn orders(&self) -> &[Staged<Order>] {
        &self.orders
    }

    pub fn len(&self) -> usize {
        self.items.len() + self.carts.len() + self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn stage<T: AggregateRoot>(slot: &mut Vec<Staged<T>>, record: T, expected: ExpectedVersion) {
    match slot.iter_mut().find(|s| s.record.id() == record.id()) {
        Some(existing) => existing.record = record,
        None => slot.push(Staged { record, expected }),
    }
}

/// Versioned record store.
///
/// Reads return the latest committed record (version `0` is never stored;
/// absence means "does not exist"). Writes happen only through [`Store::commit`].
pub trait Store: Send + Sync {
    fn load_item(&self, item_id: ItemId) -> Result<Option<Item>, StoreError>;

    fn list_items(&self) -> Result<Vec<Item>, StoreError>;

    fn load_cart(&self, user_id: UserId) -> Result<Option<Cart>, StoreError>;

    fn load_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError>;

    /// All orders owned by `user_id`, in no particular order.
    fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>, StoreError>;

    /// Apply every staged write, or none of them.
    ///
    /// Returns [`StoreError::Conflict`] if any expectation fails against the
    /// currently stored version.
    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn load_item(&self, item_id: ItemId) -> Result<Option<Item>, StoreError> {
        (**self).load_item(item_id)
    }

    fn list_items(&self) -> Result<Vec<Item>, StoreError> {
        (**self).list_items()
    }

    fn load_cart(&self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
        (**self).load_cart(user_id)
    }

    fn load_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        (**self).load_order(order_id)
    }

    fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        (**self).list_orders(user_id)
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        (**self).commit(changes)
    }
}
