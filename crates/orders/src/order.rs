use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{
    Aggregate, AggregateRoot, DomainError, DomainResult, ItemId, Money, OrderId, UserId,
};
use stockflow_events::Event;

/// Order status lifecycle. `Placed` is the only entry state; the others are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Placed,
    Fulfilled,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Fulfilled | OrderStatus::Cancelled)
    }
}

/// Order line: item snapshot with the price frozen at reservation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub item_id: ItemId,
    pub title: String,
    pub quantity: u32,
    pub price_at_purchase: Money,
}

impl OrderLine {
    pub fn line_total(&self) -> DomainResult<Money> {
        self.price_at_purchase.line_total(self.quantity)
    }
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: Option<UserId>,
    lines: Vec<OrderLine>,
    total_amount: Money,
    order_date: Option<DateTime<Utc>>,
    status: OrderStatus,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-placed aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            user_id: None,
            lines: Vec::new(),
            total_amount: Money::ZERO,
            order_date: None,
            status: OrderStatus::Placed,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == Some(user_id)
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    /// Sum of `quantity × price_at_purchase`; always equal to `total_amount()`.
    pub fn recomputed_total(&self) -> DomainResult<Money> {
        Money::total(self.lines.iter().map(OrderLine::line_total))
    }

    pub fn order_date(&self) -> Option<DateTime<Utc>> {
        self.order_date
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn is_placed(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder (owner-initiated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FulfilOrder (back-office).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfilOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    CancelOrder(CancelOrder),
    FulfilOrder(FulfilOrder),
}

/// Event: OrderPlaced. Carries every line and the exact total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub total_amount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFulfilled {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    OrderCancelled(OrderCancelled),
    OrderFulfilled(OrderFulfilled),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::OrderCancelled(_) => "orders.order.cancelled",
            OrderEvent::OrderFulfilled(_) => "orders.order.fulfilled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::OrderCancelled(e) => e.occurred_at,
            OrderEvent::OrderFulfilled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.user_id = Some(e.user_id);
                self.lines = e.lines.clone();
                self.total_amount = e.total_amount;
                self.order_date = Some(e.occurred_at);
                self.status = OrderStatus::Placed;
                self.created = true;
            }
            OrderEvent::OrderCancelled(_) => {
                self.status = OrderStatus::Cancelled;
            }
            OrderEvent::OrderFulfilled(_) => {
                self.status = OrderStatus::Fulfilled;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
            OrderCommand::FulfilOrder(cmd) => self.handle_fulfil(cmd),
        }
    }
}

impl Order {
    fn ensure_placed(&self, order_id: OrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("order {order_id}")));
        }
        if self.id != order_id {
            return Err(DomainError::invalid_argument("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_transition_from_placed(&self, target: &str) -> Result<(), DomainError> {
        if self.status != OrderStatus::Placed {
            return Err(DomainError::invalid_transition(format!(
                "cannot move order from {:?} to {target}",
                self.status
            )));
        }
        Ok(())
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::version_conflict("order already exists"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::invalid_argument(
                "order must contain at least one line",
            ));
        }
        if cmd.lines.iter().any(|l| l.quantity == 0) {
            return Err(DomainError::invalid_argument("quantity must be positive"));
        }

        let total_amount = Money::total(cmd.lines.iter().map(OrderLine::line_total))?;

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            user_id: cmd.user_id,
            lines: cmd.lines.clone(),
            total_amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed(cmd.order_id)?;
        if !self.is_owned_by(cmd.user_id) {
            return Err(DomainError::AccessDenied);
        }
        self.ensure_transition_from_placed("Cancelled")?;

        Ok(vec![OrderEvent::OrderCancelled(OrderCancelled {
            order_id: cmd.order_id,
            user_id: cmd.user_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_fulfil(&self, cmd: &FulfilOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed(cmd.order_id)?;
        self.ensure_transition_from_placed("Fulfilled")?;

        Ok(vec![OrderEvent::OrderFulfilled(OrderFulfilled {
            order_id: cmd.order_id,
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

    fn line(quantity: u32, price: &str) -> OrderLine {
        OrderLine {
            item_id: ItemId::new(),
            title: "Refactoring".to_string(),
            quantity,
            price_at_purchase: price.parse().unwrap(),
        }
    }

    fn placed(user_id: UserId, lines: Vec<OrderLine>) -> Order {
        let order_id = OrderId::new();
        let (order, _) = Order::empty(order_id)
            .execute(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                user_id,
                lines,
                occurred_at: test_time(),
            }))
            .unwrap();
        order
    }

    fn cancel(order: &Order, user_id: UserId) -> Result<Order, DomainError> {
        order
            .execute(&OrderCommand::CancelOrder(CancelOrder {
                order_id: order.id_typed(),
                user_id,
                occurred_at: test_time(),
            }))
            .map(|(next, _)| next)
    }

    fn fulfil(order: &Order) -> Result<Order, DomainError> {
        order
            .execute(&OrderCommand::FulfilOrder(FulfilOrder {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }))
            .map(|(next, _)| next)
    }

    #[test]
    fn total_is_exact_decimal_sum() {
        let order = placed(UserId::new(), vec![line(2, "10.00"), line(1, "5.50")]);
        assert_eq!(order.total_amount(), "25.50".parse::<Money>().unwrap());
        assert_eq!(order.total_amount(), order.recomputed_total().unwrap());
        assert_eq!(order.status(), OrderStatus::Placed);
        assert_eq!(order.version(), 1);
    }

    #[test]
    fn placing_without_lines_is_rejected() {
        let order_id = OrderId::new();
        let err = Order::empty(order_id)
            .handle(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                user_id: UserId::new(),
                lines: vec![],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
    }

    #[test]
    fn overflowing_total_is_rejected() {
        let order_id = OrderId::new();
        let err = Order::empty(order_id)
            .handle(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                user_id: UserId::new(),
                lines: vec![
                    line(1, "79228162514264337593543950335"),
                    line(1, "1"),
                ],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
    }

    #[test]
    fn cancel_changes_only_status() {
        let user_id = UserId::new();
        let order = placed(user_id, vec![line(3, "7.25")]);
        let cancelled = cancel(&order, user_id).unwrap();

        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert_eq!(cancelled.lines(), order.lines());
        assert_eq!(cancelled.total_amount(), order.total_amount());
        assert_eq!(cancelled.order_date(), order.order_date());
    }

    #[test]
    fn cancelling_twice_is_invalid_transition() {
        let user_id = UserId::new();
        let cancelled = cancel(&placed(user_id, vec![line(1, "1.00")]), user_id).unwrap();
        assert!(matches!(
            cancel(&cancelled, user_id),
            Err(DomainError::InvalidTransition(_))
        ));
    }

    #[test]
    fn fulfilled_orders_are_terminal() {
        let user_id = UserId::new();
        let fulfilled = fulfil(&placed(user_id, vec![line(1, "1.00")])).unwrap();
        assert_eq!(fulfilled.status(), OrderStatus::Fulfilled);
        assert!(matches!(
            cancel(&fulfilled, user_id),
            Err(DomainError::InvalidTransition(_))
        ));
        assert!(matches!(fulfil(&fulfilled), Err(DomainError::InvalidTransition(_))));
    }

    #[test]
    fn only_the_owner_can_cancel() {
        let order = placed(UserId::new(), vec![line(1, "1.00")]);
        assert_eq!(cancel(&order, UserId::new()), Err(DomainError::AccessDenied));
    }

    #[test]
    fn cancelling_unknown_order_is_not_found() {
        let order = Order::empty(OrderId::new());
        assert!(matches!(
            cancel(&order, UserId::new()),
            Err(DomainError::NotFound(_))
        ));
    }

    proptest! {
        /// Property: the stored total always equals the recomputation from lines,
        /// also after status transitions.
        #[test]
        fn total_matches_recomputation(
            raw in prop::collection::vec((1u32..20, 0i64..50_000), 1..8),
            cancel_it in any::<bool>()
        ) {
            let user_id = UserId::new();
            let lines: Vec<OrderLine> = raw
                .iter()
                .map(|(q, cents)| OrderLine {
                    item_id: ItemId::new(),
                    title: "Item".to_string(),
                    quantity: *q,
                    price_at_purchase: Money::from_minor(*cents, 2).unwrap(),
                })
                .collect();

            let mut order = placed(user_id, lines);
            if cancel_it {
                order = cancel(&order, user_id).unwrap();
            }

            prop_assert_eq!(order.total_amount(), order.recomputed_total().unwrap());
        }
    }
}
