//! Resolution state.
//!
//! The runtime owns every variable, instance and work unit of one compile.
//! Objects refer to each other through arena handles, so cycles between
//! instances (relations) and between variables and units (listeners) need
//! no shared ownership.
//!
//! Everything that touches more than one variable lives here: assignment
//! with relation counterparts, listener notification, promises and
//! freezing.

use crate::instance::Instance;
use crate::monitor::Metrics;
use crate::registry::Registry;
use crate::scheduler::QueueScheduler;
use crate::units::{Step, Unit};
use crate::variable::{Listener, Variable, VariableKind};
use keystone_core::{CompileError, CompileResult, Location, Outcome, Value, VarId, WaiterId};
use keystone_model::TypeRegistry;
use std::sync::Arc;
use tracing::trace;

/// Variables, instances and the scheduler of one compile
pub struct Runtime {
    pub(crate) variables: Vec<Variable>,
    pub(crate) instances: Vec<Instance>,
    scheduler: QueueScheduler,
    metrics: Metrics,
}

impl Runtime {
    /// Create an empty runtime
    #[must_use]
    pub fn new(types: Arc<TypeRegistry>, registry: Arc<Registry>) -> Self {
        Self {
            variables: Vec::new(),
            instances: Vec::new(),
            scheduler: QueueScheduler::new(types, registry),
            metrics: Metrics::new(),
        }
    }

    /// Entity metadata
    #[must_use]
    pub fn types(&self) -> &Arc<TypeRegistry> {
        self.scheduler.types()
    }

    /// Plugins and operators
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        self.scheduler.registry()
    }

    /// The work queues
    #[must_use]
    pub fn scheduler(&self) -> &QueueScheduler {
        &self.scheduler
    }

    /// The work queues, mutably
    pub fn scheduler_mut(&mut self) -> &mut QueueScheduler {
        &mut self.scheduler
    }

    /// Counters
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Counters, mutably
    pub fn metrics_mut(&mut self) -> &mut Metrics {
        &mut self.metrics
    }

    // ---- variables ----

    /// Create a variable
    pub fn new_variable(&mut self, kind: VariableKind, description: impl Into<String>) -> VarId {
        self.add_variable(Variable::new(kind, description))
    }

    pub(crate) fn add_variable(&mut self, variable: Variable) -> VarId {
        let id = VarId::from_index(self.variables.len());
        self.variables.push(variable);
        // an empty option or a list with no lower bound is complete as is
        self.queue(id);
        id
    }

    /// Access a variable
    ///
    /// # Panics
    ///
    /// Panics if the handle was not created by this runtime
    #[must_use]
    pub fn variable(&self, var: VarId) -> &Variable {
        &self.variables[var.index()]
    }

    /// Iterate over all variables
    pub fn variables(&self) -> impl Iterator<Item = (VarId, &Variable)> {
        self.variables
            .iter()
            .enumerate()
            .map(|(i, v)| (VarId::from_index(i), v))
    }

    pub(crate) fn var(&self, var: VarId) -> CompileResult<&Variable> {
        self.variables
            .get(var.index())
            .ok_or_else(|| CompileError::invariant(format!("unknown variable {var}")))
    }

    fn var_mut(&mut self, var: VarId) -> CompileResult<&mut Variable> {
        self.variables
            .get_mut(var.index())
            .ok_or_else(|| CompileError::invariant(format!("unknown variable {var}")))
    }

    /// Whether the variable has its final value
    #[must_use]
    pub fn is_ready(&self, var: VarId) -> bool {
        self.variables.get(var.index()).is_some_and(Variable::is_ready)
    }

    /// Whether the variable's current state is acceptable as final
    #[must_use]
    pub fn can_get(&self, var: VarId) -> bool {
        self.variables.get(var.index()).is_some_and(Variable::can_get)
    }

    /// Read a ready variable
    ///
    /// # Errors
    ///
    /// Returns `Unset` if the variable is not ready
    pub fn get_value(&self, var: VarId) -> CompileResult<Value> {
        self.var(var)?.get_value()
    }

    /// Read a variable, or learn that the caller has to wait for it
    ///
    /// # Errors
    ///
    /// Returns a fatal error for an unknown handle
    pub fn try_get(&self, var: VarId) -> CompileResult<Outcome<Value>> {
        let variable = self.var(var)?;
        if variable.is_ready() {
            variable.get_value().map(Outcome::Ready)
        } else {
            Ok(Outcome::Pending(var))
        }
    }

    /// Assign a value.
    ///
    /// Plain variables accept exactly one value. Attribute and option
    /// slots also accept an equal value again. Lists append (flattening
    /// nested lists, ignoring duplicates) and freeze once full. With
    /// `recur` set, assigning an instance to a relation also updates the
    /// other end.
    ///
    /// # Errors
    ///
    /// Returns `DoubleSet`, `ListOverfull`, `ModifiedAfterFreeze` or a
    /// type error
    pub fn set_value(&mut self, var: VarId, value: Value, location: &Location, recur: bool) -> CompileResult<()> {
        match self.var(var)?.kind() {
            VariableKind::Plain => self.set_plain(var, value, location),
            VariableKind::Attribute => self.set_single(var, value, location, recur),
            VariableKind::Option => self.set_option(var, value, location, recur),
            VariableKind::List { high, .. } => self.extend_list(var, value, high, location, recur),
        }
    }

    fn set_plain(&mut self, var: VarId, value: Value, location: &Location) -> CompileResult<()> {
        let variable = self.var_mut(var)?;
        if let Some(old) = &variable.value {
            return Err(CompileError::DoubleSet {
                variable: variable.description().to_string(),
                old: old.to_string(),
                new: value.to_string(),
            });
        }
        variable.value = Some(value);
        variable.set_at = Some(location.clone());
        self.notify(var)
    }

    fn set_single(&mut self, var: VarId, value: Value, location: &Location, recur: bool) -> CompileResult<()> {
        self.check_type(var, &value)?;
        let variable = self.var_mut(var)?;
        if let Some(old) = &variable.value {
            if *old == value {
                return Ok(());
            }
            return Err(CompileError::DoubleSet {
                variable: variable.description().to_string(),
                old: old.to_string(),
                new: value.to_string(),
            });
        }
        variable.value = Some(value.clone());
        variable.set_at = Some(location.clone());
        self.notify(var)?;
        self.set_counterpart(var, &value, location, recur)
    }

    fn set_option(&mut self, var: VarId, value: Value, location: &Location, recur: bool) -> CompileResult<()> {
        self.check_type(var, &value)?;
        let variable = self.var_mut(var)?;
        match &variable.value {
            Some(old) if *old == value => return Ok(()),
            Some(old) => {
                return Err(CompileError::DoubleSet {
                    variable: variable.description().to_string(),
                    old: old.to_string(),
                    new: value.to_string(),
                })
            }
            None if variable.frozen => {
                return Err(CompileError::ModifiedAfterFreeze {
                    variable: variable.description().to_string(),
                    value: value.to_string(),
                })
            }
            None => {}
        }
        variable.value = Some(value.clone());
        variable.set_at = Some(location.clone());
        variable.frozen = true;
        variable.queued = false;
        self.notify(var)?;
        self.set_counterpart(var, &value, location, recur)
    }

    fn extend_list(
        &mut self,
        var: VarId,
        value: Value,
        high: Option<u32>,
        location: &Location,
        recur: bool,
    ) -> CompileResult<()> {
        match value {
            Value::List(items) if items.is_empty() => {
                // nothing to add, but the list may have become acceptable
                self.queue(var);
                Ok(())
            }
            Value::List(items) => {
                for item in items {
                    self.extend_list(var, item, high, location, recur)?;
                }
                Ok(())
            }
            item => self.append(var, item, high, location, recur),
        }
    }

    fn append(
        &mut self,
        var: VarId,
        item: Value,
        high: Option<u32>,
        location: &Location,
        recur: bool,
    ) -> CompileResult<()> {
        self.check_type(var, &item)?;
        let variable = self.var_mut(var)?;
        // both ends of a relation write the same element, so a repeat is
        // not a modification, even after the list froze
        if variable.items.contains(&item) {
            return Ok(());
        }
        let at_capacity = high.is_some_and(|high| variable.items.len() >= high as usize);
        if variable.frozen || at_capacity {
            return Err(match high {
                Some(high) if at_capacity => CompileError::ListOverfull {
                    variable: variable.description().to_string(),
                    high,
                    content: variable.partial().to_string(),
                },
                _ => CompileError::ModifiedAfterFreeze {
                    variable: variable.description().to_string(),
                    value: item.to_string(),
                },
            });
        }
        variable.items.push(item.clone());
        variable.set_at = Some(location.clone());
        let full = high.is_some_and(|high| variable.items.len() == high as usize);

        let forwards: Vec<(VarId, Location)> = variable
            .listeners
            .iter()
            .filter_map(|listener| match listener {
                Listener::Forward { target, location } => Some((*target, location.clone())),
                Listener::Waiter(_) => None,
            })
            .collect();
        let mut errors = Vec::new();
        for (target, at) in forwards {
            if let Err(e) = self.set_value(target, item.clone(), &at, true) {
                if e.is_fatal() {
                    return Err(e);
                }
                errors.push(self.forward_error(var, target, &at, e));
            }
        }

        self.set_counterpart(var, &item, location, recur)?;
        if full {
            self.freeze(var)?;
        } else {
            self.queue(var);
        }
        CompileError::collect(errors).map_or(Ok(()), Err)
    }

    fn set_counterpart(&mut self, var: VarId, value: &Value, location: &Location, recur: bool) -> CompileResult<()> {
        if !recur {
            return Ok(());
        }
        let Value::Instance(other) = value else {
            return Ok(());
        };
        let Some(owner) = self.var(var)?.owner() else {
            return Ok(());
        };
        let Some(counterpart) = owner.attribute.counterpart.clone() else {
            return Ok(());
        };
        let this = Value::Instance(owner.instance);
        self.set_attribute(*other, &counterpart, this, location, false)
    }

    /// Wake everything listening on a variable that just became ready
    fn notify(&mut self, var: VarId) -> CompileResult<()> {
        let listeners = std::mem::take(&mut self.var_mut(var)?.listeners);
        // one failing forward must not keep the other listeners waiting
        let mut errors = Vec::new();
        for listener in listeners {
            let result = match listener {
                Listener::Waiter(waiter) => self.ready(waiter),
                Listener::Forward { target, location } => self.complete_forward(var, target, &location),
            };
            if let Err(e) = result {
                if e.is_fatal() {
                    return Err(e);
                }
                errors.push(e);
            }
        }
        CompileError::collect(errors).map_or(Ok(()), Err)
    }

    /// The source of a forward is ready: deliver its value and release the
    /// promise on the target. The promise is released even when delivery
    /// fails.
    fn complete_forward(&mut self, source: VarId, target: VarId, location: &Location) -> CompileResult<()> {
        let variable = self.var(source)?;
        // list elements were delivered one by one as they arrived
        let delivered = if matches!(variable.kind(), VariableKind::List { .. }) {
            Ok(())
        } else {
            let value = variable.get_value()?;
            self.set_value(target, value, location, true)
                .map_err(|e| self.forward_error(source, target, location, e))
        };
        self.fulfil(target)?;
        delivered
    }

    /// Annotate a failed forward with the assignment that set it up
    fn forward_error(&self, source: VarId, target: VarId, location: &Location, error: CompileError) -> CompileError {
        let describe = |var: VarId| {
            self.var(var)
                .map_or_else(|_| var.to_string(), |v| v.description().to_string())
        };
        error.at(location, format!("{} = {}", describe(target), describe(source)))
    }

    /// Register a listener. A waiter is readied at once when the variable
    /// already has its value. A forward promises its target, receives the
    /// elements delivered so far and completes at once when the source is
    /// ready.
    ///
    /// # Errors
    ///
    /// Returns error if delivering a value to the forward target fails
    pub fn listen(&mut self, var: VarId, listener: Listener) -> CompileResult<()> {
        match listener {
            Listener::Waiter(waiter) => {
                if self.is_ready(var) {
                    self.ready(waiter)
                } else {
                    self.var_mut(var)?.listeners.push(Listener::Waiter(waiter));
                    Ok(())
                }
            }
            Listener::Forward { target, location } => {
                self.promise(target)?;
                let delivered = self.var(var)?.items.clone();
                for item in delivered {
                    self.set_value(target, item, &location, true)
                        .map_err(|e| self.forward_error(var, target, &location, e))?;
                }
                if self.is_ready(var) {
                    self.complete_forward(var, target, &location)
                } else {
                    self.var_mut(var)?.listeners.push(Listener::Forward { target, location });
                    Ok(())
                }
            }
        }
    }

    /// Make `waiter` wait for `var` as well
    ///
    /// # Errors
    ///
    /// Returns a fatal error for unknown handles
    pub fn await_variable(&mut self, waiter: WaiterId, var: VarId) -> CompileResult<()> {
        self.scheduler.waiter_mut(waiter)?.await_one();
        self.listen(var, Listener::Waiter(waiter))
    }

    /// One dependency of `waiter` is satisfied; queue it when none remain
    ///
    /// # Errors
    ///
    /// Returns a fatal error if the waiter was readied too often
    pub fn ready(&mut self, waiter: WaiterId) -> CompileResult<()> {
        if self.scheduler.waiter_mut(waiter)?.ready()? {
            self.scheduler.add_running(waiter);
        }
        Ok(())
    }

    /// Announce a producer for `var`
    ///
    /// # Errors
    ///
    /// Returns a fatal error for an unknown handle
    pub fn promise(&mut self, var: VarId) -> CompileResult<()> {
        self.var_mut(var)?.providers += 1;
        Ok(())
    }

    /// A producer of `var` is done
    ///
    /// # Errors
    ///
    /// Returns a fatal error if more producers finished than were announced
    pub fn fulfil(&mut self, var: VarId) -> CompileResult<()> {
        let variable = self.var_mut(var)?;
        variable.providers -= 1;
        if variable.providers < 0 {
            return Err(CompileError::invariant(format!(
                "provide count negative on {}",
                variable.description()
            )));
        }
        if variable.providers == 0 {
            self.queue(var);
        }
        Ok(())
    }

    /// Offer a delayed variable to the driver for freezing, if it could be
    /// frozen now
    pub fn queue(&mut self, var: VarId) {
        let Some(variable) = self.variables.get_mut(var.index()) else {
            return;
        };
        if !variable.kind().is_delayed() || variable.queued || variable.is_ready() || !variable.can_get() {
            return;
        }
        variable.queued = true;
        self.scheduler.add_possible(var);
    }

    /// Forget that a variable taken off the pending set was queued, so it
    /// is offered again on its next change
    pub fn unqueue(&mut self, var: VarId) {
        if let Some(variable) = self.variables.get_mut(var.index()) {
            variable.queued = false;
        }
    }

    /// Declare a delayed variable final and wake its listeners. No effect on
    /// plain variables or on variables that are already ready.
    ///
    /// # Errors
    ///
    /// Returns error if a listener fails
    pub fn freeze(&mut self, var: VarId) -> CompileResult<()> {
        let variable = self.var_mut(var)?;
        if !variable.kind().is_delayed() || variable.is_ready() {
            return Ok(());
        }
        variable.frozen = true;
        variable.queued = false;
        trace!(variable = %variable.description(), "freezing");
        self.notify(var)
    }

    // ---- units ----

    /// Register a unit, promise its target and wait for its inputs
    ///
    /// # Errors
    ///
    /// Returns a fatal error for unknown handles
    pub fn spawn(&mut self, unit: Unit) -> CompileResult<WaiterId> {
        let provides = unit.provides();
        let requires = unit.requires();
        let waiter = self.scheduler.register(unit);
        if let Some(target) = provides {
            self.promise(target)?;
        }
        for var in requires {
            self.await_variable(waiter, var)?;
        }
        // release the initial count held during registration
        self.ready(waiter)?;
        Ok(waiter)
    }

    /// Execute a runnable unit
    ///
    /// # Errors
    ///
    /// Returns the unit's error; the unit is marked failed
    pub fn run_unit(&mut self, waiter: WaiterId) -> CompileResult<()> {
        let mut unit = self.scheduler.take_unit(waiter)?;
        self.metrics.record_execution();
        trace!(unit = %unit, "executing");
        match unit.execute(self) {
            Ok(Step::Done) => {
                self.scheduler.complete(waiter);
                self.metrics.record_completion();
                Ok(())
            }
            Ok(Step::Reschedule(var)) => {
                self.scheduler.restore(waiter, unit);
                self.metrics.record_reschedule();
                self.await_variable(waiter, var)
            }
            Err(e) => {
                self.scheduler.fail(waiter);
                self.metrics.record_failure();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::ExecutionUnit;
    use crate::resolver::Resolver;
    use indexmap::IndexMap;
    use keystone_core::ErrorKind;
    use keystone_model::{Expr, Literal};
    use proptest::prelude::*;

    fn runtime() -> Runtime {
        Runtime::new(Arc::new(TypeRegistry::new()), Arc::new(Registry::with_builtins()))
    }

    fn here() -> Location {
        Location::new("main.ks", 1)
    }

    #[test]
    fn test_plain_single_assignment() {
        let mut rt = runtime();
        let x = rt.new_variable(VariableKind::Plain, "x");
        assert_eq!(rt.try_get(x).unwrap(), Outcome::Pending(x));

        rt.set_value(x, Value::Int(1), &here(), true).unwrap();
        assert_eq!(rt.try_get(x).unwrap(), Outcome::Ready(Value::Int(1)));
        assert_eq!(rt.variable(x).set_at(), Some(&here()));

        // even an equal value is rejected
        let err = rt.set_value(x, Value::Int(1), &here(), true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DoubleSet);
        let err = rt.set_value(x, Value::Int(2), &here(), true).unwrap_err();
        assert_eq!(err.to_string(), "value set twice on x: new 2, old 1");
        assert_eq!(rt.get_value(x).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_list_bounds() {
        let mut rt = runtime();
        let l = rt.new_variable(VariableKind::List { low: 2, high: Some(4) }, "l");
        assert!(!rt.scheduler().is_pending(l));

        rt.set_value(l, Value::Int(1), &here(), true).unwrap();
        assert!(!rt.can_get(l));
        rt.set_value(l, Value::Int(1), &here(), true).unwrap();
        assert_eq!(rt.variable(l).partial(), Value::List(vec![Value::Int(1)]));

        rt.set_value(l, Value::List(vec![Value::Int(2), Value::List(vec![Value::Int(3)])]), &here(), true)
            .unwrap();
        assert!(rt.can_get(l));
        assert!(!rt.is_ready(l));
        assert!(rt.scheduler().is_pending(l));

        rt.set_value(l, Value::Int(4), &here(), true).unwrap();
        assert!(rt.is_ready(l));
        assert_eq!(
            rt.get_value(l).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)])
        );

        // a duplicate is still accepted after the list is full
        rt.set_value(l, Value::Int(2), &here(), true).unwrap();
        let err = rt.set_value(l, Value::Int(5), &here(), true).unwrap_err();
        assert!(matches!(err, CompileError::ListOverfull { high: 4, .. }));
    }

    #[test]
    fn test_list_frozen_below_high() {
        let mut rt = runtime();
        let l = rt.new_variable(VariableKind::List { low: 2, high: Some(4) }, "l");
        for i in 1..=3 {
            rt.set_value(l, Value::Int(i), &here(), true).unwrap();
        }
        rt.freeze(l).unwrap();
        assert!(rt.is_ready(l));
        let err = rt.set_value(l, Value::Int(4), &here(), true).unwrap_err();
        assert!(matches!(err, CompileError::ModifiedAfterFreeze { .. }));
        assert_eq!(rt.get_value(l).unwrap(), Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
    }

    #[test]
    fn test_list_without_capacity_rejects_append() {
        let mut rt = runtime();
        let l = rt.new_variable(VariableKind::List { low: 0, high: Some(0) }, "l");
        let err = rt.set_value(l, Value::Int(1), &here(), true).unwrap_err();
        assert!(matches!(err, CompileError::ListOverfull { high: 0, .. }));
        assert_eq!(rt.variable(l).partial(), Value::List(Vec::new()));
    }

    #[test]
    fn test_list_modified_after_freeze() {
        let mut rt = runtime();
        let l = rt.new_variable(VariableKind::List { low: 0, high: None }, "l");
        assert!(rt.scheduler().is_pending(l));
        rt.set_value(l, Value::from("a"), &here(), true).unwrap();
        rt.freeze(l).unwrap();
        let err = rt.set_value(l, Value::from("b"), &here(), true).unwrap_err();
        assert!(matches!(err, CompileError::ModifiedAfterFreeze { .. }));
    }

    #[test]
    fn test_empty_list_requeues() {
        let mut rt = runtime();
        let l = rt.new_variable(VariableKind::List { low: 0, high: None }, "l");
        assert_eq!(rt.scheduler_mut().pop_pending(), Some(l));
        rt.unqueue(l);

        rt.set_value(l, Value::List(Vec::new()), &here(), true).unwrap();
        assert!(rt.scheduler().is_pending(l));
        assert!(!rt.is_ready(l));
    }

    #[test]
    fn test_option_reads_null_when_frozen_empty() {
        let mut rt = runtime();
        let o = rt.new_variable(VariableKind::Option, "o");
        assert!(rt.can_get(o));
        assert!(!rt.is_ready(o));
        rt.freeze(o).unwrap();
        assert_eq!(rt.get_value(o).unwrap(), Value::Null);

        let err = rt.set_value(o, Value::Int(1), &here(), true).unwrap_err();
        assert!(matches!(err, CompileError::ModifiedAfterFreeze { .. }));
    }

    #[test]
    fn test_option_set_freezes() {
        let mut rt = runtime();
        let o = rt.new_variable(VariableKind::Option, "o");
        rt.set_value(o, Value::Int(1), &here(), true).unwrap();
        assert!(rt.is_ready(o));
        rt.set_value(o, Value::Int(1), &here(), true).unwrap();
        assert_eq!(
            rt.set_value(o, Value::Int(2), &here(), true).unwrap_err().kind(),
            ErrorKind::DoubleSet
        );
    }

    #[test]
    fn test_freeze_ignores_plain() {
        let mut rt = runtime();
        let x = rt.new_variable(VariableKind::Plain, "x");
        rt.freeze(x).unwrap();
        assert!(!rt.is_ready(x));
    }

    #[test]
    fn test_fulfil_without_promise_is_fatal() {
        let mut rt = runtime();
        let l = rt.new_variable(VariableKind::List { low: 0, high: None }, "l");
        rt.promise(l).unwrap();
        rt.fulfil(l).unwrap();
        assert!(rt.fulfil(l).unwrap_err().is_fatal());
    }

    #[test]
    fn test_forward_delivers_and_releases() {
        let mut rt = runtime();
        let source = rt.new_variable(VariableKind::List { low: 0, high: None }, "src");
        let target = rt.new_variable(VariableKind::List { low: 0, high: None }, "dst");
        rt.set_value(source, Value::Int(1), &here(), true).unwrap();

        rt.listen(source, Listener::Forward { target, location: here() }).unwrap();
        assert_eq!(rt.variable(target).partial(), Value::List(vec![Value::Int(1)]));
        assert_eq!(rt.variable(target).providers(), 1);

        rt.set_value(source, Value::Int(2), &here(), true).unwrap();
        rt.freeze(source).unwrap();
        assert_eq!(rt.variable(target).providers(), 0);
        assert_eq!(rt.variable(target).partial(), Value::List(vec![Value::Int(1), Value::Int(2)]));
        assert!(!rt.is_ready(target));
    }

    #[test]
    fn test_forward_from_scalar() {
        let mut rt = runtime();
        let source = rt.new_variable(VariableKind::Plain, "src");
        let target = rt.new_variable(VariableKind::List { low: 0, high: None }, "dst");
        rt.listen(source, Listener::Forward { target, location: here() }).unwrap();
        rt.set_value(source, Value::from("x"), &here(), true).unwrap();
        assert_eq!(rt.variable(target).partial(), Value::List(vec![Value::from("x")]));
        assert_eq!(rt.variable(target).providers(), 0);
    }

    #[test]
    fn test_failed_forward_is_located_and_released() {
        let mut rt = runtime();
        let source = rt.new_variable(VariableKind::Plain, "src");
        let target = rt.new_variable(VariableKind::Plain, "dst");
        let other = rt.new_variable(VariableKind::List { low: 0, high: None }, "other");
        rt.set_value(target, Value::Int(2), &here(), true).unwrap();

        let at = Location::new("main.ks", 4);
        rt.listen(source, Listener::Forward { target, location: at.clone() }).unwrap();
        rt.listen(source, Listener::Forward { target: other, location: here() }).unwrap();

        let err = rt.set_value(source, Value::Int(1), &here(), true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DoubleSet);
        assert_eq!(err.location(), Some(&at));
        assert!(err.to_string().contains("reported in dst = src at main.ks:4"));

        // the failing forward still released its target and did not starve the next one
        assert_eq!(rt.variable(target).providers(), 0);
        assert_eq!(rt.variable(other).partial(), Value::List(vec![Value::Int(1)]));
        assert_eq!(rt.variable(other).providers(), 0);
    }

    fn spawn_sum(rt: &mut Runtime, inputs: &[VarId], out: VarId) -> WaiterId {
        let mut requires = IndexMap::new();
        let mut args = Vec::new();
        for (i, var) in inputs.iter().enumerate() {
            let name = format!("v{i}");
            requires.insert(name.clone(), *var);
            args.push(Expr::reference(name));
        }
        let expr = args
            .into_iter()
            .reduce(|acc, e| Expr::operator("+", vec![acc, e]))
            .unwrap_or_else(|| Expr::literal(Literal::Int(0)));
        let unit = ExecutionUnit::new(out, requires, expr, Resolver::new(IndexMap::new()), here());
        rt.spawn(Unit::Execution(unit)).unwrap()
    }

    proptest! {
        #[test]
        fn test_waiter_runs_after_last_input(values in proptest::collection::vec(0i64..100, 0..8), order in any::<u64>()) {
            let mut rt = runtime();
            let inputs: Vec<VarId> = (0..values.len())
                .map(|i| rt.new_variable(VariableKind::Plain, format!("in{i}")))
                .collect();
            let out = rt.new_variable(VariableKind::Plain, "out");
            spawn_sum(&mut rt, &inputs, out);

            // assign in a scrambled order
            let mut indices: Vec<usize> = (0..values.len()).collect();
            if !indices.is_empty() {
                let shift = (order % indices.len() as u64) as usize;
                indices.rotate_left(shift);
            }
            for (n, i) in indices.iter().enumerate() {
                prop_assert_eq!(rt.scheduler().runnable_len(), 0);
                rt.set_value(inputs[*i], Value::Int(values[*i]), &here(), true).unwrap();
                if n + 1 < indices.len() {
                    prop_assert!(!rt.scheduler().has_runnable());
                }
            }
            prop_assert_eq!(rt.scheduler().runnable_len(), 1);

            let waiter = rt.scheduler_mut().pop_runnable().unwrap();
            rt.run_unit(waiter).unwrap();
            prop_assert_eq!(rt.get_value(out).unwrap(), Value::Int(values.iter().sum()));
            prop_assert_eq!(rt.variable(out).providers(), 0);
        }
    }
}
