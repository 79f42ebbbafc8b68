//! Shopping cart domain module.
//!
//! A cart is a per-user bag of `(item, quantity)` lines. It never holds prices and
//! performs no stock checks; availability is decided at order placement.

pub mod cart;

pub use cart::{
    AddLine, Cart, CartCleared, CartCommand, CartEvent, CartLine, CartOpened, ClearCart,
    LineAdded, LineRemoved, OpenCart, RemoveLine,
};
