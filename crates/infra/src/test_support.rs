//! Shared fixtures for unit and integration tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;

use stockflow_cart::Cart;
use stockflow_catalog::{Item, ItemCommand, RegisterItem};
use stockflow_core::{Aggregate, ExpectedVersion, ItemId, OrderId, UserId};
use stockflow_orders::{Order, OrderPlaced};

use crate::notifications::OrderNotifier;
use crate::store::{ChangeSet, Store, StoreError};

/// Register an item directly in the store.
pub(crate) fn seed_item<S: Store>(store: &S, title: &str, price: &str, stock: i64) -> Item {
    let item_id = ItemId::new();
    let (item, _) = Item::empty(item_id)
        .execute(&ItemCommand::RegisterItem(RegisterItem {
            item_id,
            title: title.to_string(),
            unit_price: price.parse().unwrap(),
            initial_stock: stock,
            occurred_at: Utc::now(),
        }))
        .unwrap();

    let mut changes = ChangeSet::new();
    changes.put_item(item.clone(), ExpectedVersion::Exact(0));
    store.commit(changes).unwrap();
    item
}

/// Store wrapper whose first `failures` matching commits report a conflict
/// without writing anything.
pub(crate) struct FlakyStore<S> {
    inner: S,
    passes: AtomicU32,
    remaining: AtomicU32,
    attempts: AtomicU32,
    matches: fn(&ChangeSet) -> bool,
}

impl<S: Store> FlakyStore<S> {
    pub(crate) fn new(inner: S, failures: u32) -> Self {
        Self::when(inner, failures, |_| true)
    }

    /// Only commits that write an order are failed.
    pub(crate) fn on_order_commits(inner: S, failures: u32) -> Self {
        Self::when(inner, failures, |changes| !changes.orders().is_empty())
    }

    /// Let the first `passes` commits through, then fail the next `failures`.
    pub(crate) fn after(inner: S, passes: u32, failures: u32) -> Self {
        let store = Self::new(inner, failures);
        store.passes.store(passes, Ordering::SeqCst);
        store
    }

    fn when(inner: S, failures: u32, matches: fn(&ChangeSet) -> bool) -> Self {
        Self {
            inner,
            passes: AtomicU32::new(0),
            remaining: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
            matches,
        }
    }

    pub(crate) fn commit_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl<S: Store> Store for FlakyStore<S> {
    fn load_item(&self, item_id: ItemId) -> Result<Option<Item>, StoreError> {
        self.inner.load_item(item_id)
    }

    fn list_items(&self) -> Result<Vec<Item>, StoreError> {
        self.inner.list_items()
    }

    fn load_cart(&self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
        self.inner.load_cart(user_id)
    }

    fn load_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        self.inner.load_order(order_id)
    }

    fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        self.inner.list_orders(user_id)
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if (self.matches)(&changes)
            && self
                .passes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
            && self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StoreError::Conflict("injected conflict".to_string()));
        }
        self.inner.commit(changes)
    }
}

/// Notifier that remembers which orders it was told about.
#[derive(Debug, Default)]
pub(crate) struct RecordingNotifier {
    placed: Mutex<Vec<OrderId>>,
}

impl RecordingNotifier {
    pub(crate) fn placed_orders(&self) -> Vec<OrderId> {
        self.placed.lock().unwrap().clone()
    }
}

impl OrderNotifier for RecordingNotifier {
    fn order_placed(&self, event: OrderPlaced) {
        self.placed.lock().unwrap().push(event.order_id);
    }
}
