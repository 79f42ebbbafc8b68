use chrono::Utc;
use tracing::info;

use stockflow_catalog::{Item, ItemCommand, RegisterItem, RepriceItem};
use stockflow_core::{Aggregate, AggregateRoot, ExpectedVersion, ItemId, Money};

use crate::error::ServiceError;
use crate::retry::RetryPolicy;
use crate::store::{ChangeSet, Store};

use super::ledger::StockLedger;

/// Catalog maintenance: registering items, repricing and restocking.
///
/// Stock changes are delegated to the [`StockLedger`]; this service never
/// writes `available_stock` itself.
#[derive(Debug, Clone)]
pub struct CatalogService<S> {
    store: S,
    ledger: StockLedger<S>,
    retry: RetryPolicy,
}

impl<S: Store + Clone> CatalogService<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self {
            ledger: StockLedger::new(store.clone(), retry.clone()),
            store,
            retry,
        }
    }

    pub fn register_item(
        &self,
        title: &str,
        unit_price: Money,
        initial_stock: i64,
    ) -> Result<Item, ServiceError> {
        let item_id = ItemId::new();
        let (item, _) = Item::empty(item_id).execute(&ItemCommand::RegisterItem(RegisterItem {
            item_id,
            title: title.to_string(),
            unit_price,
            initial_stock,
            occurred_at: Utc::now(),
        }))?;

        let mut changes = ChangeSet::new();
        changes.put_item(item.clone(), ExpectedVersion::Exact(0));
        self.store.commit(changes)?;

        info!(%item_id, title = item.title(), %unit_price, initial_stock, "item registered");
        Ok(item)
    }

    pub fn get_item(&self, item_id: ItemId) -> Result<Item, ServiceError> {
        self.store
            .load_item(item_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("item {item_id}")))
    }

    /// All items, ordered by title.
    pub fn list_items(&self) -> Result<Vec<Item>, ServiceError> {
        let mut items = self.store.list_items()?;
        items.sort_by(|a, b| a.title().cmp(b.title()).then(a.id_typed().cmp(&b.id_typed())));
        Ok(items)
    }

    /// Change the current unit price. Orders already placed keep their
    /// purchase price.
    pub fn reprice_item(&self, item_id: ItemId, unit_price: Money) -> Result<Item, ServiceError> {
        self.retry.run("reprice_item", |_| {
            let current = self.get_item(item_id)?;
            let (next, events) = current.execute(&ItemCommand::RepriceItem(RepriceItem {
                item_id,
                unit_price,
                occurred_at: Utc::now(),
            }))?;
            if events.is_empty() {
                return Ok(current);
            }

            let mut changes = ChangeSet::new();
            changes.put_item(next.clone(), ExpectedVersion::Exact(current.version()));
            self.store.commit(changes)?;

            info!(%item_id, %unit_price, "item repriced");
            Ok(next)
        })
    }

    /// Add `quantity` units to an item's stock.
    pub fn restock(&self, item_id: ItemId, quantity: u32) -> Result<Item, ServiceError> {
        if quantity == 0 {
            return Err(ServiceError::InvalidArgument(
                "restock quantity must be positive".to_string(),
            ));
        }
        self.ledger.apply_delta(item_id, i64::from(quantity))
    }

    /// Signed manual correction (shrinkage, stock count).
    pub fn adjust_stock(&self, item_id: ItemId, delta: i64) -> Result<Item, ServiceError> {
        self.ledger.apply_delta(item_id, delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::store::InMemoryStore;

    fn service() -> CatalogService<Arc<InMemoryStore>> {
        CatalogService::new(Arc::new(InMemoryStore::new()), RetryPolicy::immediate(3))
    }

    fn price(raw: &str) -> Money {
        raw.parse().unwrap()
    }

    #[test]
    fn registered_item_is_readable() {
        let catalog = service();
        let item = catalog.register_item("Rust in Action", price("35.00"), 4).unwrap();

        let loaded = catalog.get_item(item.id_typed()).unwrap();
        assert_eq!(loaded.title(), "Rust in Action");
        assert_eq!(loaded.available_stock(), 4);
        assert_eq!(loaded.version(), 1);
    }

    #[test]
    fn negative_initial_stock_is_rejected() {
        let catalog = service();
        assert!(matches!(
            catalog.register_item("Broken", price("1.00"), -1),
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn list_is_sorted_by_title() {
        let catalog = service();
        catalog.register_item("Zero to Production", price("40.00"), 1).unwrap();
        catalog.register_item("Atomics and Locks", price("30.00"), 1).unwrap();

        let titles: Vec<_> = catalog
            .list_items()
            .unwrap()
            .iter()
            .map(|i| i.title().to_string())
            .collect();
        assert_eq!(titles, vec!["Atomics and Locks", "Zero to Production"]);
    }

    #[test]
    fn reprice_bumps_version_only_when_price_changes() {
        let catalog = service();
        let item = catalog.register_item("Widget", price("1.00"), 1).unwrap();

        let same = catalog.reprice_item(item.id_typed(), price("1.00")).unwrap();
        assert_eq!(same.version(), 1);

        let repriced = catalog.reprice_item(item.id_typed(), price("1.50")).unwrap();
        assert_eq!(repriced.unit_price(), price("1.50"));
        assert_eq!(repriced.version(), 2);
    }

    #[test]
    fn restock_adds_and_rejects_zero() {
        let catalog = service();
        let item = catalog.register_item("Widget", price("1.00"), 0).unwrap();

        assert_eq!(catalog.restock(item.id_typed(), 5).unwrap().available_stock(), 5);
        assert!(matches!(
            catalog.restock(item.id_typed(), 0),
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn get_unknown_item_is_not_found() {
        assert!(matches!(
            service().get_item(ItemId::new()),
            Err(ServiceError::NotFound(_))
        ));
    }
}
