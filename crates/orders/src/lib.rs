//! Orders domain module.
//!
//! An order is created atomically with all of its lines, prices frozen at purchase
//! time. Status only moves `Placed -> Fulfilled` or `Placed -> Cancelled`.

pub mod order;

pub use order::{
    CancelOrder, FulfilOrder, Order, OrderCancelled, OrderCommand, OrderEvent, OrderFulfilled,
    OrderLine, OrderPlaced, OrderStatus, PlaceOrder,
};
