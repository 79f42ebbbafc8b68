use std::collections::HashMap;
use std::sync::RwLock;

use stockflow_cart::Cart;
use stockflow_catalog::Item;
use stockflow_core::{AggregateRoot, ExpectedVersion, ItemId, OrderId, UserId};
use stockflow_orders::Order;

use super::{ChangeSet, Staged, Store, StoreError};

#[derive(Debug, Default)]
struct Records {
    items: HashMap<ItemId, Item>,
    carts: HashMap<UserId, Cart>,
    orders: HashMap<OrderId, Order>,
}

/// In-memory record store.
///
/// Intended for tests/dev. A single lock guards all three tables so a commit
/// spanning items, a cart and an order is atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<Records>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

fn check<T>(kind: &str, table: &HashMap<T::Id, T>, staged: &[Staged<T>]) -> Result<(), StoreError>
where
    T: AggregateRoot,
{
    for s in staged {
        let current = table.get(s.record.id()).map(|r| r.version()).unwrap_or(0);
        if !s.expected.matches(current) {
            return Err(StoreError::Conflict(format!(
                "{kind} {:?}: expected {:?}, found {current}",
                s.record.id(),
                s.expected
            )));
        }
    }
    Ok(())
}

fn write<T>(table: &mut HashMap<T::Id, T>, staged: Vec<Staged<T>>)
where
    T: AggregateRoot,
{
    for s in staged {
        table.insert(s.record.id().clone(), s.record);
    }
}

impl Store for InMemoryStore {
    fn load_item(&self, item_id: ItemId) -> Result<Option<Item>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.items.get(&item_id).cloned())
    }

    fn list_items(&self) -> Result<Vec<Item>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.items.values().cloned().collect())
    }

    fn load_cart(&self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.carts.get(&user_id).cloned())
    }

    fn load_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.orders.get(&order_id).cloned())
    }

    fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .orders
            .values()
            .filter(|o| o.is_owned_by(user_id))
            .cloned()
            .collect())
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut records = self.records.write().map_err(poisoned)?;

        // Validate everything before touching anything.
        check("item", &records.items, changes.items())?;
        check("cart", &records.carts, changes.carts())?;
        check("order", &records.orders, changes.orders())?;

        let ChangeSet {
            items,
            carts,
            orders,
        } = changes;
        write(&mut records.items, items);
        write(&mut records.carts, carts);
        write(&mut records.orders, orders);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockflow_catalog::{ItemCommand, RegisterItem};
    use stockflow_core::Aggregate;

    fn new_item(stock: i64) -> Item {
        let item_id = ItemId::new();
        let (item, _) = Item::empty(item_id)
            .execute(&ItemCommand::RegisterItem(RegisterItem {
                item_id,
                title: "Widget".to_string(),
                unit_price: "1.00".parse().unwrap(),
                initial_stock: stock,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        item
    }

    #[test]
    fn commit_then_load_roundtrips() {
        let store = InMemoryStore::new();
        let item = new_item(3);

        let mut changes = ChangeSet::new();
        changes.put_item(item.clone(), ExpectedVersion::Exact(0));
        store.commit(changes).unwrap();

        assert_eq!(store.load_item(item.id_typed()).unwrap(), Some(item));
    }

    #[test]
    fn stale_expectation_is_a_conflict() {
        let store = InMemoryStore::new();
        let item = new_item(3);

        let mut first = ChangeSet::new();
        first.put_item(item.clone(), ExpectedVersion::Exact(0));
        store.commit(first).unwrap();

        let mut again = ChangeSet::new();
        again.put_item(item, ExpectedVersion::Exact(0));
        assert!(matches!(store.commit(again), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn failed_commit_writes_nothing() {
        let store = InMemoryStore::new();
        let existing = new_item(3);
        let mut seed = ChangeSet::new();
        seed.put_item(existing.clone(), ExpectedVersion::Exact(0));
        store.commit(seed).unwrap();

        let fresh = new_item(7);
        let mut changes = ChangeSet::new();
        changes
            .put_item(fresh.clone(), ExpectedVersion::Exact(0))
            .put_item(existing.clone(), ExpectedVersion::Exact(5));

        assert!(store.commit(changes).is_err());
        assert_eq!(store.load_item(fresh.id_typed()).unwrap(), None);
        assert_eq!(store.load_item(existing.id_typed()).unwrap(), Some(existing));
    }

    #[test]
    fn restaging_keeps_first_expectation() {
        let item = new_item(3);
        let mut changes = ChangeSet::new();
        changes.put_item(item.clone(), ExpectedVersion::Exact(1));
        changes.put_item(item.clone(), ExpectedVersion::Exact(9));

        assert_eq!(changes.len(), 1);
        let staged = changes.staged_item(item.id_typed()).unwrap();
        assert_eq!(staged.expected, ExpectedVersion::Exact(1));
    }
}
