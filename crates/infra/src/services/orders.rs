use core::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use stockflow_cart::{Cart, CartCommand, ClearCart};
use stockflow_catalog::Item;
use stockflow_core::{Aggregate, AggregateRoot, ExpectedVersion, ItemId, OrderId, UserId};
use stockflow_orders::{
    CancelOrder, FulfilOrder, Order, OrderCommand, OrderEvent, OrderLine, OrderPlaced, PlaceOrder,
};

use crate::error::ServiceError;
use crate::notifications::OrderNotifier;
use crate::retry::RetryPolicy;
use crate::store::{ChangeSet, Store};

use super::ledger::StockLedger;

/// Floor on the retry budget of a compensating release. Releases only add
/// stock, so they keep going well past the budget of a reservation.
const RELEASE_MIN_RETRIES: u32 = 32;

/// How `place_order` reserves stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationMode {
    /// Reservations, the order and the cart clear go out in one atomic
    /// commit; a lost race reruns the whole cycle.
    #[default]
    Transactional,
    /// Each line is reserved with its own ledger commit; a failure releases
    /// everything reserved so far, in reverse order.
    Compensating,
}

impl FromStr for ReservationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transactional" => Ok(ReservationMode::Transactional),
            "compensating" => Ok(ReservationMode::Compensating),
            other => Err(format!(
                "unknown reservation mode '{other}' (expected 'transactional' or 'compensating')"
            )),
        }
    }
}

/// Order lifecycle: checkout from a cart, reads, and cancellation.
///
/// Stock only moves through the [`StockLedger`]. Placement either fully
/// succeeds (stock reserved, order stored, cart cleared, one notification) or
/// leaves stock and cart exactly as they were.
#[derive(Debug)]
pub struct OrderWorkflow<S, N> {
    store: S,
    ledger: StockLedger<S>,
    retry: RetryPolicy,
    release_retry: RetryPolicy,
    mode: ReservationMode,
    notifier: N,
}

impl<S, N> OrderWorkflow<S, N>
where
    S: Store + Clone,
    N: OrderNotifier,
{
    pub fn new(store: S, retry: RetryPolicy, notifier: N) -> Self {
        Self {
            ledger: StockLedger::new(store.clone(), retry.clone()),
            release_retry: retry
                .clone()
                .with_max_retries(retry.max_retries.max(RELEASE_MIN_RETRIES)),
            store,
            retry,
            mode: ReservationMode::default(),
            notifier,
        }
    }

    pub fn with_reservation_mode(mut self, mode: ReservationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn reservation_mode(&self) -> ReservationMode {
        self.mode
    }

    /// Turn the user's cart into an order.
    ///
    /// Each line captures the item's price at the moment of reservation. On
    /// success the cart is empty and an `OrderPlaced` notification has been
    /// handed to the notifier; notification never affects the outcome.
    pub fn place_order(&self, user_id: UserId) -> Result<Order, ServiceError> {
        let placed = match self.mode {
            ReservationMode::Transactional => self.place_transactional(user_id),
            ReservationMode::Compensating => self.place_compensating(user_id),
        };

        match placed {
            Ok((order, event)) => {
                info!(
                    order_id = %order.id_typed(),
                    %user_id,
                    lines = order.lines().len(),
                    total = %order.total_amount(),
                    "order placed"
                );
                self.notifier.order_placed(event);
                Ok(order)
            }
            Err(err) => {
                warn!(%user_id, error = %err, "order placement failed");
                Err(err)
            }
        }
    }

    pub fn get_order(&self, user_id: UserId, order_id: OrderId) -> Result<Order, ServiceError> {
        self.load_owned(user_id, order_id)
    }

    /// The user's orders, newest first.
    pub fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>, ServiceError> {
        let mut orders = self.store.list_orders(user_id)?;
        orders.sort_by(|a, b| {
            b.order_date()
                .cmp(&a.order_date())
                .then(b.id_typed().cmp(&a.id_typed()))
        });
        Ok(orders)
    }

    /// Cancel a placed order and return its stock, in one atomic commit.
    pub fn cancel_order(&self, user_id: UserId, order_id: OrderId) -> Result<Order, ServiceError> {
        let cancelled = self.retry.run("cancel_order", |_| {
            let order = self.load_owned(user_id, order_id)?;
            let (cancelled, _) = order.execute(&OrderCommand::CancelOrder(CancelOrder {
                order_id,
                user_id,
                occurred_at: Utc::now(),
            }))?;

            let mut changes = ChangeSet::new();
            for line in order.lines() {
                self.ledger
                    .stage_delta(&mut changes, line.item_id, i64::from(line.quantity))?;
            }
            changes.put_order(cancelled.clone(), ExpectedVersion::Exact(order.version()));
            self.store.commit(changes)?;
            Ok(cancelled)
        })?;

        info!(%order_id, %user_id, "order cancelled");
        Ok(cancelled)
    }

    /// Mark a placed order as shipped. Not bound to a user.
    pub fn fulfil_order(&self, order_id: OrderId) -> Result<Order, ServiceError> {
        self.retry.run("fulfil_order", |_| {
            let order = self
                .store
                .load_order(order_id)?
                .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))?;
            let (fulfilled, _) = order.execute(&OrderCommand::FulfilOrder(FulfilOrder {
                order_id,
                occurred_at: Utc::now(),
            }))?;

            let mut changes = ChangeSet::new();
            changes.put_order(fulfilled.clone(), ExpectedVersion::Exact(order.version()));
            self.store.commit(changes)?;

            info!(%order_id, "order fulfilled");
            Ok(fulfilled)
        })
    }

    fn place_transactional(&self, user_id: UserId) -> Result<(Order, OrderPlaced), ServiceError> {
        self.retry.run("place_order", |_| {
            let cart = self.load_checkout_cart(user_id)?;

            let mut changes = ChangeSet::new();
            let mut lines = Vec::with_capacity(cart.lines().len());
            for line in cart.lines() {
                let item = self
                    .ledger
                    .stage_delta(&mut changes, line.item_id, -i64::from(line.quantity))?;
                lines.push(order_line(&item, line.quantity));
            }

            let placed = stage_placement(&mut changes, &cart, user_id, lines)?;
            self.store.commit(changes)?;
            Ok(placed)
        })
    }

    fn place_compensating(&self, user_id: UserId) -> Result<(Order, OrderPlaced), ServiceError> {
        let cart = self.load_checkout_cart(user_id)?;

        let mut reserved: Vec<(ItemId, u32)> = Vec::with_capacity(cart.lines().len());
        let mut lines = Vec::with_capacity(cart.lines().len());
        for line in cart.lines() {
            match self.ledger.apply_delta(line.item_id, -i64::from(line.quantity)) {
                Ok(item) => {
                    reserved.push((line.item_id, line.quantity));
                    lines.push(order_line(&item, line.quantity));
                }
                Err(err) => {
                    self.release(&reserved)?;
                    return Err(err);
                }
            }
        }

        let mut changes = ChangeSet::new();
        let committed = stage_placement(&mut changes, &cart, user_id, lines)
            .and_then(|placed| self.store.commit(changes).map(|_| placed).map_err(Into::into));

        match committed {
            Ok(placed) => Ok(placed),
            Err(err) => {
                self.release(&reserved)?;
                Err(match err {
                    // The cart moved underneath us; the reservations were for a stale view.
                    ServiceError::VersionConflict(_) => ServiceError::ConcurrentUpdateExceeded {
                        operation: "place_order",
                        attempts: 1,
                    },
                    other => other,
                })
            }
        }
    }

    /// Give back reserved stock, newest reservation first.
    ///
    /// Every line is attempted even if an earlier one fails; the first failure
    /// is returned as `StockReleaseFailed`.
    fn release(&self, reserved: &[(ItemId, u32)]) -> Result<(), ServiceError> {
        let mut stranded = None;
        for &(item_id, quantity) in reserved.iter().rev() {
            let released = self.release_retry.run("release_stock", |_| {
                let mut changes = ChangeSet::new();
                self.ledger
                    .stage_delta(&mut changes, item_id, i64::from(quantity))?;
                self.store.commit(changes)?;
                Ok(())
            });
            if let Err(err) = released {
                error!(%item_id, quantity, error = %err, "failed to release reserved stock");
                stranded.get_or_insert(ServiceError::StockReleaseFailed {
                    item_id,
                    quantity,
                    reason: err.to_string(),
                });
            }
        }
        stranded.map_or(Ok(()), Err)
    }

    fn load_checkout_cart(&self, user_id: UserId) -> Result<Cart, ServiceError> {
        match self.store.load_cart(user_id)? {
            Some(cart) if !cart.is_empty() => Ok(cart),
            _ => Err(ServiceError::EmptyCart),
        }
    }

    fn load_owned(&self, user_id: UserId, order_id: OrderId) -> Result<Order, ServiceError> {
        let order = self
            .store
            .load_order(order_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))?;
        if !order.is_owned_by(user_id) {
            return Err(ServiceError::AccessDenied);
        }
        Ok(order)
    }
}

fn order_line(item: &Item, quantity: u32) -> OrderLine {
    OrderLine {
        item_id: item.id_typed(),
        title: item.title().to_string(),
        quantity,
        price_at_purchase: item.unit_price(),
    }
}

/// Stage the new order and the cleared cart.
fn stage_placement(
    changes: &mut ChangeSet,
    cart: &Cart,
    user_id: UserId,
    lines: Vec<OrderLine>,
) -> Result<(Order, OrderPlaced), ServiceError> {
    let now = Utc::now();
    let order_id = OrderId::new();
    let (order, events) = Order::empty(order_id).execute(&OrderCommand::PlaceOrder(PlaceOrder {
        order_id,
        user_id,
        lines,
        occurred_at: now,
    }))?;
    let placed = events
        .into_iter()
        .find_map(|event| match event {
            OrderEvent::OrderPlaced(placed) => Some(placed),
            _ => None,
        })
        .ok_or_else(|| ServiceError::Internal("placing an order emitted no OrderPlaced".into()))?;

    let (cleared, _) = cart.execute(&CartCommand::ClearCart(ClearCart {
        user_id,
        occurred_at: now,
    }))?;

    changes
        .put_order(order.clone(), ExpectedVersion::Exact(0))
        .put_cart(cleared, ExpectedVersion::Exact(cart.version()));
    Ok((order, placed))
}
