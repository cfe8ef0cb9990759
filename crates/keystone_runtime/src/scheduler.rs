//! Work queues for the resolution driver.
//!
//! The scheduler is completely deterministic:
//! - No thread pools
//! - Runnable units execute in the order they became runnable (FIFO)
//! - Pending variables are kept in insertion order (IndexSet)
//!
//! It does not decide when resolution is over; that is the driver's job.

use crate::registry::Registry;
use crate::units::Unit;
use crate::waiter::Waiter;
use indexmap::IndexSet;
use keystone_core::{CompileError, CompileResult, Location, VarId, WaiterId};
use keystone_model::TypeRegistry;
use std::collections::VecDeque;
use std::sync::Arc;

/// Lifecycle of a registered work unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Waiting for dependencies or on the runnable queue
    Waiting,
    /// Taken off the queue and executing
    Running,
    /// Finished
    Done,
    /// Raised an error
    Failed,
}

/// Arena entry for a work unit
struct UnitSlot {
    waiter: Waiter,
    unit: Option<Unit>,
    state: UnitState,
    description: String,
    location: Location,
}

/// Holds the runnable queue, the pending-freeze set and every work unit
pub struct QueueScheduler {
    /// Units ready to execute
    runnable: VecDeque<WaiterId>,
    /// Delayed variables that could be frozen
    pending: IndexSet<VarId>,
    /// All units ever registered
    units: Vec<UnitSlot>,
    /// Entity metadata
    types: Arc<TypeRegistry>,
    /// Plugins and operators
    registry: Arc<Registry>,
}

impl QueueScheduler {
    /// Create a new scheduler
    #[must_use]
    pub fn new(types: Arc<TypeRegistry>, registry: Arc<Registry>) -> Self {
        Self {
            runnable: VecDeque::new(),
            pending: IndexSet::new(),
            units: Vec::new(),
            types,
            registry,
        }
    }

    /// Register a unit; it is not runnable until its waiter says so
    pub fn register(&mut self, unit: Unit) -> WaiterId {
        let id = WaiterId::from_index(self.units.len());
        self.units.push(UnitSlot {
            waiter: Waiter::new(),
            description: unit.to_string(),
            location: unit.location().clone(),
            unit: Some(unit),
            state: UnitState::Waiting,
        });
        id
    }

    /// Waiter of a unit
    ///
    /// # Errors
    ///
    /// Returns a fatal error for an unknown handle
    pub fn waiter_mut(&mut self, id: WaiterId) -> CompileResult<&mut Waiter> {
        self.units
            .get_mut(id.index())
            .map(|slot| &mut slot.waiter)
            .ok_or_else(|| CompileError::invariant(format!("unknown waiter {id}")))
    }

    /// Queue a unit for execution
    pub fn add_running(&mut self, id: WaiterId) {
        self.runnable.push_back(id);
    }

    /// Offer a delayed variable for freezing; idempotent
    pub fn add_possible(&mut self, var: VarId) {
        self.pending.insert(var);
    }

    /// Next runnable unit
    pub fn pop_runnable(&mut self) -> Option<WaiterId> {
        self.runnable.pop_front()
    }

    /// Oldest pending variable
    pub fn pop_pending(&mut self) -> Option<VarId> {
        self.pending.shift_remove_index(0)
    }

    /// Take the unit out of its slot to execute it
    ///
    /// # Errors
    ///
    /// Returns a fatal error if the unit is not waiting to run
    pub fn take_unit(&mut self, id: WaiterId) -> CompileResult<Unit> {
        let slot = self
            .units
            .get_mut(id.index())
            .ok_or_else(|| CompileError::invariant(format!("unknown waiter {id}")))?;
        if slot.state != UnitState::Waiting {
            return Err(CompileError::invariant(format!(
                "unit {} scheduled while {:?}",
                slot.description, slot.state
            )));
        }
        let unit = slot
            .unit
            .take()
            .ok_or_else(|| CompileError::invariant(format!("unit {} missing", slot.description)))?;
        slot.state = UnitState::Running;
        Ok(unit)
    }

    /// Put a unit back after it asked to be rescheduled
    pub fn restore(&mut self, id: WaiterId, unit: Unit) {
        if let Some(slot) = self.units.get_mut(id.index()) {
            slot.unit = Some(unit);
            slot.state = UnitState::Waiting;
        }
    }

    /// Mark a unit finished
    pub fn complete(&mut self, id: WaiterId) {
        self.set_state(id, UnitState::Done);
    }

    /// Mark a unit failed
    pub fn fail(&mut self, id: WaiterId) {
        self.set_state(id, UnitState::Failed);
    }

    fn set_state(&mut self, id: WaiterId, state: UnitState) {
        if let Some(slot) = self.units.get_mut(id.index()) {
            slot.state = state;
            slot.unit = None;
        }
    }

    /// State of a unit
    #[must_use]
    pub fn state(&self, id: WaiterId) -> Option<UnitState> {
        self.units.get(id.index()).map(|slot| slot.state)
    }

    /// Units that never finished, with where they were written
    #[must_use]
    pub fn unfinished(&self) -> Vec<String> {
        self.units
            .iter()
            .filter(|slot| matches!(slot.state, UnitState::Waiting | UnitState::Running))
            .map(|slot| format!("{} ({})", slot.description, slot.location))
            .collect()
    }

    /// Whether anything is runnable
    #[must_use]
    pub fn has_runnable(&self) -> bool {
        !self.runnable.is_empty()
    }

    /// Number of runnable units
    #[must_use]
    pub fn runnable_len(&self) -> usize {
        self.runnable.len()
    }

    /// Number of pending variables
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether a variable is in the pending set
    #[must_use]
    pub fn is_pending(&self, var: VarId) -> bool {
        self.pending.contains(&var)
    }

    /// Number of units ever registered
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Number of units that finished
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.units
            .iter()
            .filter(|slot| slot.state == UnitState::Done)
            .count()
    }

    /// Entity metadata
    #[must_use]
    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// Plugins and operators
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}
