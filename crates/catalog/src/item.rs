use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{Aggregate, AggregateRoot, DomainError, ItemId, Money};
use stockflow_events::Event;

/// Aggregate root: Item (catalog entry with price and available stock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    id: ItemId,
    title: String,
    unit_price: Money,
    available_stock: i64,
    version: u64,
    created: bool,
}

impl Item {
    /// Create an empty, not-yet-registered instance.
    pub fn empty(id: ItemId) -> Self {
        Self {
            id,
            title: String::new(),
            unit_price: Money::ZERO,
            available_stock: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ItemId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    pub fn available_stock(&self) -> i64 {
        self.available_stock
    }

    pub fn is_registered(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Item {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterItem {
    pub item_id: ItemId,
    pub title: String,
    pub unit_price: Money,
    pub initial_stock: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock (negative = reservation, positive = restock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub item_id: ItemId,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RepriceItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepriceItem {
    pub item_id: ItemId,
    pub unit_price: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemCommand {
    RegisterItem(RegisterItem),
    AdjustStock(AdjustStock),
    RepriceItem(RepriceItem),
}

/// Event: ItemRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRegistered {
    pub item_id: ItemId,
    pub title: String,
    pub unit_price: Money,
    pub initial_stock: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub item_id: ItemId,
    pub delta: i64,
    pub stock_after: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRepriced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRepriced {
    pub item_id: ItemId,
    pub unit_price: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemEvent {
    ItemRegistered(ItemRegistered),
    StockAdjusted(StockAdjusted),
    ItemRepriced(ItemRepriced),
}

impl Event for ItemEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ItemEvent::ItemRegistered(_) => "catalog.item.registered",
            ItemEvent::StockAdjusted(_) => "catalog.item.stock_adjusted",
            ItemEvent::ItemRepriced(_) => "catalog.item.repriced",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ItemEvent::ItemRegistered(e) => e.occurred_at,
            ItemEvent::StockAdjusted(e) => e.occurred_at,
            ItemEvent::ItemRepriced(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Item {
    type Command = ItemCommand;
    type Event = ItemEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ItemEvent::ItemRegistered(e) => {
                self.id = e.item_id;
                self.title = e.title.clone();
                self.unit_price = e.unit_price;
                self.available_stock = e.initial_stock;
                self.created = true;
            }
            ItemEvent::StockAdjusted(e) => {
                self.available_stock = e.stock_after;
            }
            ItemEvent::ItemRepriced(e) => {
                self.unit_price = e.unit_price;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ItemCommand::RegisterItem(cmd) => self.handle_register(cmd),
            ItemCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
            ItemCommand::RepriceItem(cmd) => self.handle_reprice(cmd),
        }
    }
}

impl Item {
    fn ensure_registered(&self, item_id: ItemId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("item {item_id}")));
        }
        if self.id != item_id {
            return Err(DomainError::invalid_argument("item_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterItem) -> Result<Vec<ItemEvent>, DomainError> {
        if self.created {
            return Err(DomainError::version_conflict("item already exists"));
        }
        if cmd.title.trim().is_empty() {
            return Err(DomainError::invalid_argument("title cannot be empty"));
        }
        if cmd.initial_stock < 0 {
            return Err(DomainError::invalid_argument("initial stock cannot be negative"));
        }
        Ok(vec![ItemEvent::ItemRegistered(ItemRegistered {
            item_id: cmd.item_id,
            title: cmd.title.trim().to_string(),
            unit_price: cmd.unit_price,
            initial_stock: cmd.initial_stock,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<ItemEvent>, DomainError> {
        self.ensure_registered(cmd.item_id)?;

        if cmd.delta == 0 {
            return Err(DomainError::invalid_argument("delta cannot be zero"));
        }

        let stock_after = self
            .available_stock
            .checked_add(cmd.delta)
            .ok_or_else(|| DomainError::invalid_argument("stock adjustment overflows"))?;

        if stock_after < 0 {
            let requested = cmd
                .delta
                .checked_neg()
                .ok_or_else(|| DomainError::invalid_argument("stock adjustment overflows"))?;
            return Err(DomainError::InsufficientStock {
                item_id: self.id,
                requested,
                available: self.available_stock,
            });
        }

        Ok(vec![ItemEvent::StockAdjusted(StockAdjusted {
            item_id: cmd.item_id,
            delta: cmd.delta,
            stock_after,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reprice(&self, cmd: &RepriceItem) -> Result<Vec<ItemEvent>, DomainError> {
        self.ensure_registered(cmd.item_id)?;

        if cmd.unit_price == self.unit_price {
            return Ok(vec![]);
        }

        Ok(vec![ItemEvent::ItemRepriced(ItemRepriced {
            item_id: cmd.item_id,
            unit_price: cmd.unit_price,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn price(raw: &str) -> Money {
        raw.parse().unwrap()
    }

    fn registered(stock: i64) -> Item {
        let item_id = ItemId::new();
        let item = Item::empty(item_id);
        let (item, _) = item
            .execute(&ItemCommand::RegisterItem(RegisterItem {
                item_id,
                title: "The Rust Programming Language".to_string(),
                unit_price: price("39.95"),
                initial_stock: stock,
                occurred_at: test_time(),
            }))
            .unwrap();
        item
    }

    fn adjust(item: &Item, delta: i64) -> Result<Item, DomainError> {
        item.execute(&ItemCommand::AdjustStock(AdjustStock {
            item_id: item.id_typed(),
            delta,
            occurred_at: test_time(),
        }))
        .map(|(next, _)| next)
    }

    #[test]
    fn register_sets_stock_price_and_version() {
        let item = registered(3);
        assert!(item.is_registered());
        assert_eq!(item.available_stock(), 3);
        assert_eq!(item.unit_price(), price("39.95"));
        assert_eq!(item.version(), 1);
    }

    #[test]
    fn register_rejects_blank_title() {
        let item_id = ItemId::new();
        let err = Item::empty(item_id)
            .handle(&ItemCommand::RegisterItem(RegisterItem {
                item_id,
                title: "   ".to_string(),
                unit_price: price("1.00"),
                initial_stock: 1,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
    }

    #[test]
    fn decrement_within_stock_succeeds_and_bumps_version() {
        let item = registered(3);
        let next = adjust(&item, -2).unwrap();
        assert_eq!(next.available_stock(), 1);
        assert_eq!(next.version(), item.version() + 1);
    }

    #[test]
    fn decrement_below_zero_is_insufficient_stock() {
        let item = registered(1);
        let err = adjust(&item, -2).unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                item_id: item.id_typed(),
                requested: 2,
                available: 1,
            }
        );
    }

    #[test]
    fn zero_delta_is_invalid() {
        let item = registered(1);
        assert!(matches!(adjust(&item, 0), Err(DomainError::InvalidArgument(_))));
    }

    #[test]
    fn most_negative_delta_is_rejected_without_overflow() {
        let item = registered(3);
        assert!(matches!(adjust(&item, i64::MIN), Err(DomainError::InvalidArgument(_))));
        assert!(matches!(
            adjust(&item, i64::MIN + 1),
            Err(DomainError::InsufficientStock { requested: i64::MAX, available: 3, .. })
        ));
    }

    #[test]
    fn adjusting_unregistered_item_is_not_found() {
        let item = Item::empty(ItemId::new());
        assert!(matches!(adjust(&item, 1), Err(DomainError::NotFound(_))));
    }

    #[test]
    fn reprice_to_same_price_is_a_no_op() {
        let item = registered(1);
        let events = item
            .handle(&ItemCommand::RepriceItem(RepriceItem {
                item_id: item.id_typed(),
                unit_price: item.unit_price(),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn stock_events_are_named_under_catalog_item() {
        let item = registered(2);
        let events = item
            .handle(&ItemCommand::AdjustStock(AdjustStock {
                item_id: item.id_typed(),
                delta: -1,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "catalog.item.stock_adjusted");
        assert_eq!(events[0].version(), 1);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let item = registered(5);
        let before = item.clone();
        let _ = item.handle(&ItemCommand::AdjustStock(AdjustStock {
            item_id: item.id_typed(),
            delta: -3,
            occurred_at: test_time(),
        }));
        assert_eq!(item, before);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever deltas are attempted, accepted ones keep stock
        /// non-negative and stock always equals initial + sum(accepted deltas).
        #[test]
        fn stock_never_negative(
            initial in 0i64..50,
            deltas in prop::collection::vec(-20i64..20, 1..40)
        ) {
            let mut item = registered(initial);
            let mut accepted = 0i64;

            for delta in deltas {
                if let Ok(next) = adjust(&item, delta) {
                    accepted += delta;
                    item = next;
                }
                prop_assert!(item.available_stock() >= 0);
            }

            prop_assert_eq!(item.available_stock(), initial + accepted);
        }
    }
}
