use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{Aggregate, AggregateRoot, DomainError, ItemId, UserId};
use stockflow_events::Event;

/// One cart line: at most one per item.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub item_id: ItemId,
    pub quantity: u32,
}

/// Aggregate root: Cart, keyed by its owner.
///
/// Lines keep insertion order; order placement reserves (and compensates) in this order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    user_id: UserId,
    lines: Vec<CartLine>,
    version: u64,
    created: bool,
}

impl Cart {
    /// Create an empty, not-yet-opened cart.
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            lines: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn is_open(&self) -> bool {
        self.created
    }

    pub fn quantity_of(&self, item_id: ItemId) -> Option<u32> {
        self.lines
            .iter()
            .find(|l| l.item_id == item_id)
            .map(|l| l.quantity)
    }
}

impl AggregateRoot for Cart {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.user_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCart {
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLine {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearCart {
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartCommand {
    OpenCart(OpenCart),
    AddLine(AddLine),
    RemoveLine(RemoveLine),
    ClearCart(ClearCart),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartOpened {
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineAdded. `line_quantity` is the merged quantity of the line afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub line_quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRemoved {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartCleared {
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartEvent {
    CartOpened(CartOpened),
    LineAdded(LineAdded),
    LineRemoved(LineRemoved),
    CartCleared(CartCleared),
}

impl Event for CartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CartEvent::CartOpened(_) => "cart.opened",
            CartEvent::LineAdded(_) => "cart.line_added",
            CartEvent::LineRemoved(_) => "cart.line_removed",
            CartEvent::CartCleared(_) => "cart.cleared",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CartEvent::CartOpened(e) => e.occurred_at,
            CartEvent::LineAdded(e) => e.occurred_at,
            CartEvent::LineRemoved(e) => e.occurred_at,
            CartEvent::CartCleared(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Cart {
    type Command = CartCommand;
    type Event = CartEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CartEvent::CartOpened(e) => {
                self.user_id = e.user_id;
                self.lines.clear();
                self.created = true;
            }
            CartEvent::LineAdded(e) => {
                match self.lines.iter_mut().find(|l| l.item_id == e.item_id) {
                    Some(line) => line.quantity = e.line_quantity,
                    None => self.lines.push(CartLine {
                        item_id: e.item_id,
                        quantity: e.line_quantity,
                    }),
                }
            }
            CartEvent::LineRemoved(e) => {
                self.lines.retain(|l| l.item_id != e.item_id);
            }
            CartEvent::CartCleared(_) => {
                self.lines.clear();
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CartCommand::OpenCart(cmd) => self.handle_open(cmd),
            CartCommand::AddLine(cmd) => self.handle_add_line(cmd),
            CartCommand::RemoveLine(cmd) => self.handle_remove_line(cmd),
            CartCommand::ClearCart(cmd) => self.handle_clear(cmd),
        }
    }
}

impl Cart {
    fn ensure_owner(&self, user_id: UserId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("cart of user {user_id}")));
        }
        if self.user_id != user_id {
            return Err(DomainError::AccessDenied);
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenCart) -> Result<Vec<CartEvent>, DomainError> {
        if self.created {
            return Ok(vec![]);
        }
        Ok(vec![CartEvent::CartOpened(CartOpened {
            user_id: cmd.user_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_owner(cmd.user_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::invalid_argument("quantity must be positive"));
        }

        let line_quantity = match self.quantity_of(cmd.item_id) {
            Some(existing) => existing
                .checked_add(cmd.quantity)
                .ok_or_else(|| DomainError::invalid_argument("quantity overflows"))?,
            None => cmd.quantity,
        };

        Ok(vec![CartEvent::LineAdded(LineAdded {
            user_id: cmd.user_id,
            item_id: cmd.item_id,
            line_quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_line(&self, cmd: &RemoveLine) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_owner(cmd.user_id)?;

        if self.quantity_of(cmd.item_id).is_none() {
            return Ok(vec![]);
        }

        Ok(vec![CartEvent::LineRemoved(LineRemoved {
            user_id: cmd.user_id,
            item_id: cmd.item_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_clear(&self, cmd: &ClearCart) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_owner(cmd.user_id)?;

        if self.lines.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![CartEvent::CartCleared(CartCleared {
            user_id: cmd.user_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
