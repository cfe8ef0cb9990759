//! Single-assignment variables.
//!
//! A variable is a storage cell that receives its value once and wakes
//! everything listening on it. Delayed variables (lists and options) may
//! receive values gradually and only become ready when frozen, either
//! explicitly by the driver or by reaching their upper bound.
//!
//! The state lives here; the operations that have to touch other
//! variables, instances or the scheduler live on [`crate::Runtime`].

use keystone_core::{CompileError, CompileResult, InstanceId, Location, Value, VarId, WaiterId};
use keystone_model::AttributeDef;

/// Which variable variant a cell is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// Plain single-assignment variable; any second write fails
    Plain,
    /// Single-valued attribute slot; updates the relation counterpart
    Attribute,
    /// Accumulating list with cardinality bounds
    List {
        /// Lower bound; the list can be read once it holds this many items
        low: u32,
        /// Upper bound; reaching it freezes the list
        high: Option<u32>,
    },
    /// Zero-or-one value
    Option,
}

impl VariableKind {
    /// Whether the variable only becomes ready when frozen
    #[must_use]
    pub const fn is_delayed(&self) -> bool {
        matches!(self, Self::List { .. } | Self::Option)
    }
}

/// The instance slot a variable backs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    /// Instance holding the slot
    pub instance: InstanceId,
    /// Declaration of the slot
    pub attribute: AttributeDef,
}

/// Something notified when a variable changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listener {
    /// Work unit counting down its dependencies
    Waiter(WaiterId),
    /// Copies every value into `target` as it arrives and releases its
    /// promise on `target` once the source is ready
    Forward {
        /// Variable receiving the values
        target: VarId,
        /// Statement that set up the forwarding
        location: Location,
    },
}

/// A single-assignment storage cell
#[derive(Debug, Clone)]
pub struct Variable {
    kind: VariableKind,
    description: String,
    owner: Option<Owner>,
    pub(crate) value: Option<Value>,
    pub(crate) items: Vec<Value>,
    pub(crate) frozen: bool,
    pub(crate) queued: bool,
    pub(crate) providers: i64,
    pub(crate) listeners: Vec<Listener>,
    pub(crate) set_at: Option<Location>,
}

impl Variable {
    /// Create an empty variable
    #[must_use]
    pub fn new(kind: VariableKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            owner: None,
            value: None,
            items: Vec::new(),
            frozen: false,
            queued: false,
            providers: 0,
            listeners: Vec::new(),
            set_at: None,
        }
    }

    /// Attach the instance slot this variable backs
    #[must_use]
    pub fn with_owner(mut self, owner: Owner) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Variant
    #[must_use]
    pub const fn kind(&self) -> VariableKind {
        self.kind
    }

    /// Human readable name, used in error messages
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Owning instance slot, if any
    #[must_use]
    pub fn owner(&self) -> Option<&Owner> {
        self.owner.as_ref()
    }

    /// Whether a value is definitely available (`has_value`)
    #[must_use]
    pub fn is_ready(&self) -> bool {
        if self.kind.is_delayed() {
            self.frozen
        } else {
            self.value.is_some()
        }
    }

    /// Whether the current state is acceptable as a final value
    #[must_use]
    pub fn can_get(&self) -> bool {
        match self.kind {
            VariableKind::Plain | VariableKind::Attribute => self.value.is_some(),
            VariableKind::List { low, .. } => self.items.len() >= low as usize,
            VariableKind::Option => true,
        }
    }

    /// Whether the variable has been frozen
    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Read the value
    ///
    /// # Errors
    ///
    /// Returns `Unset` if the variable is not ready
    pub fn get_value(&self) -> CompileResult<Value> {
        if !self.is_ready() {
            return Err(CompileError::Unset {
                variable: self.description.clone(),
            });
        }
        // A frozen option without a value reads as null
        Ok(self.partial())
    }

    /// Values received so far, ready or not
    #[must_use]
    pub fn partial(&self) -> Value {
        match self.kind {
            VariableKind::List { .. } => Value::List(self.items.clone()),
            _ => self.value.clone().unwrap_or(Value::Null),
        }
    }

    /// Number of work units waiting for this variable
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.listeners
            .iter()
            .filter(|l| matches!(l, Listener::Waiter(_)))
            .count()
    }

    /// Producers that announced a value but have not delivered yet
    #[must_use]
    pub const fn providers(&self) -> i64 {
        self.providers
    }

    /// Where the value was last set
    #[must_use]
    pub fn set_at(&self) -> Option<&Location> {
        self.set_at.as_ref()
    }
}
