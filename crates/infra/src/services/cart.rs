use chrono::Utc;
use tracing::debug;

use stockflow_cart::{AddLine, Cart, CartCommand, ClearCart, OpenCart, RemoveLine};
use stockflow_core::{Aggregate, AggregateRoot, ExpectedVersion, ItemId, UserId};

use crate::error::ServiceError;
use crate::retry::RetryPolicy;
use crate::store::{ChangeSet, Store};

/// Per-user cart operations. A cart is created on first access.
#[derive(Debug, Clone)]
pub struct CartService<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: Store> CartService<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// The user's cart, created empty if it does not exist yet.
    pub fn get(&self, user_id: UserId) -> Result<Cart, ServiceError> {
        self.retry.run("get_cart", |_| {
            if let Some(cart) = self.store.load_cart(user_id)? {
                return Ok(cart);
            }

            let cart = open(user_id)?;
            let mut changes = ChangeSet::new();
            changes.put_cart(cart.clone(), ExpectedVersion::Exact(0));
            self.store.commit(changes)?;

            debug!(%user_id, "cart created");
            Ok(cart)
        })
    }

    /// Add `quantity` of an item, merging with an existing line for it.
    ///
    /// Stock is not checked here; availability is decided at order placement.
    pub fn add_line(
        &self,
        user_id: UserId,
        item_id: ItemId,
        quantity: u32,
    ) -> Result<Cart, ServiceError> {
        if quantity == 0 {
            return Err(ServiceError::InvalidArgument(
                "quantity must be positive".to_string(),
            ));
        }
        if self.store.load_item(item_id)?.is_none() {
            return Err(ServiceError::NotFound(format!("item {item_id}")));
        }

        self.mutate("add_line", user_id, || {
            CartCommand::AddLine(AddLine {
                user_id,
                item_id,
                quantity,
                occurred_at: Utc::now(),
            })
        })
    }

    /// Drop the line for `item_id`. Removing an absent line is a no-op.
    pub fn remove_line(&self, user_id: UserId, item_id: ItemId) -> Result<Cart, ServiceError> {
        self.mutate("remove_line", user_id, || {
            CartCommand::RemoveLine(RemoveLine {
                user_id,
                item_id,
                occurred_at: Utc::now(),
            })
        })
    }

    pub fn clear(&self, user_id: UserId) -> Result<Cart, ServiceError> {
        self.mutate("clear_cart", user_id, || {
            CartCommand::ClearCart(ClearCart {
                user_id,
                occurred_at: Utc::now(),
            })
        })
    }

    fn mutate<F>(&self, operation: &'static str, user_id: UserId, command: F) -> Result<Cart, ServiceError>
    where
        F: Fn() -> CartCommand,
    {
        self.retry.run(operation, |_| {
            let (current, expected) = match self.store.load_cart(user_id)? {
                Some(cart) => {
                    let version = cart.version();
                    (cart, ExpectedVersion::Exact(version))
                }
                None => (open(user_id)?, ExpectedVersion::Exact(0)),
            };

            let (next, events) = current.execute(&command())?;
            if events.is_empty() && expected != ExpectedVersion::Exact(0) {
                return Ok(next);
            }

            let mut changes = ChangeSet::new();
            changes.put_cart(next.clone(), expected);
            self.store.commit(changes)?;

            debug!(%user_id, operation, version = next.version(), "cart updated");
            Ok(next)
        })
    }
}

fn open(user_id: UserId) -> Result<Cart, ServiceError> {
    let (cart, _) = Cart::empty(user_id).execute(&CartCommand::OpenCart(OpenCart {
        user_id,
        occurred_at: Utc::now(),
    }))?;
    Ok(cart)
}
