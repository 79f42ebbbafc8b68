use chrono::{DateTime, Utc};

/// Something that happened to a stockflow record: an item registered or
/// restocked, a cart line added, an order placed or cancelled.
///
/// Aggregates emit these from `handle` and fold them in `apply`. Placed orders
/// also travel to subscribers inside an [`EventEnvelope`](crate::EventEnvelope).
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted, area-first name (`orders.order.placed`, `cart.line_added`).
    fn event_type(&self) -> &'static str;

    /// Payload schema version. Bumped when a field changes meaning.
    fn version(&self) -> u32;

    fn occurred_at(&self) -> DateTime<Utc>;
}
