use chrono::Utc;
use tracing::debug;

use stockflow_catalog::{AdjustStock, Item, ItemCommand};
use stockflow_core::{Aggregate, AggregateRoot, ExpectedVersion, ItemId};

use crate::error::ServiceError;
use crate::retry::RetryPolicy;
use crate::store::{ChangeSet, Store};

/// Single writer of `available_stock`.
///
/// Every stock change, whether a reservation, a release or a restock, is a
/// signed delta checked against the item's current version. A delta that would
/// drive stock below zero fails with `InsufficientStock` and writes nothing.
#[derive(Debug, Clone)]
pub struct StockLedger<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: Store> StockLedger<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Apply `delta` to one item's stock and commit it on its own.
    ///
    /// Lost version races are retried according to the policy.
    pub fn apply_delta(&self, item_id: ItemId, delta: i64) -> Result<Item, ServiceError> {
        self.retry.run("apply_delta", |attempt| {
            let mut changes = ChangeSet::new();
            let item = self.stage_delta(&mut changes, item_id, delta)?;
            self.store.commit(changes)?;

            debug!(
                %item_id,
                delta,
                attempt,
                stock = item.available_stock(),
                version = item.version(),
                "stock delta committed"
            );
            Ok(item)
        })
    }

    /// Decide `delta` against the freshest view of the item and stage the
    /// result into `changes` without committing.
    ///
    /// If `changes` already carries this item, the delta builds on the staged
    /// post-image and the original version expectation is kept.
    pub fn stage_delta(
        &self,
        changes: &mut ChangeSet,
        item_id: ItemId,
        delta: i64,
    ) -> Result<Item, ServiceError> {
        let (current, expected) = match changes.staged_item(item_id) {
            Some(staged) => (staged.record.clone(), staged.expected),
            None => {
                let item = self
                    .store
                    .load_item(item_id)?
                    .ok_or_else(|| ServiceError::NotFound(format!("item {item_id}")))?;
                let version = item.version();
                (item, ExpectedVersion::Exact(version))
            }
        };

        let (next, _) = current.execute(&ItemCommand::AdjustStock(AdjustStock {
            item_id,
            delta,
            occurred_at: Utc::now(),
        }))?;

        changes.put_item(next.clone(), expected);
        Ok(next)
    }
}
