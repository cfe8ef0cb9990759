//! Work units.
//!
//! A work unit is a statement (or part of one) waiting for its inputs.
//! All of them count their dependencies with a [`crate::Waiter`] held by
//! the scheduler and run once the count reaches zero. Running may find a
//! dependency that was not known up front; the unit then returns
//! [`Step::Reschedule`] and is put back to wait on it.

use crate::call::FunctionUnit;
use crate::emit;
use crate::resolver::Resolver;
use crate::runtime::Runtime;
use indexmap::IndexMap;
use keystone_core::{ready, CompileResult, Location, Outcome, Value, VarId};
use keystone_model::Expr;
use std::rc::Rc;

/// What happened when a unit ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The unit finished
    Done,
    /// The unit needs this variable first
    Reschedule(VarId),
}

/// Continuation of a statement whose dependencies are now available
pub trait Resume: std::fmt::Display {
    /// Continue with the values of the awaited variables.
    ///
    /// `target` is the variable a multi-step lookup eventually writes to.
    ///
    /// # Errors
    ///
    /// Returns error if the statement fails
    fn resume(
        &self,
        rt: &mut Runtime,
        values: &IndexMap<String, Value>,
        resolver: &Resolver,
        target: Option<VarId>,
    ) -> CompileResult<Outcome<()>>;

    /// Where the statement was written
    fn location(&self) -> &Location;
}

/// Read the values of all required variables
pub(crate) fn gather(
    rt: &Runtime,
    requires: &IndexMap<String, VarId>,
) -> CompileResult<Outcome<IndexMap<String, Value>>> {
    let mut values = IndexMap::with_capacity(requires.len());
    for (key, var) in requires {
        let value = ready!(rt.try_get(*var));
        values.insert(key.clone(), value);
    }
    Ok(Outcome::Ready(values))
}

/// Evaluates an expression and stores the result in its target
#[derive(Debug)]
pub struct ExecutionUnit {
    target: VarId,
    requires: IndexMap<String, VarId>,
    expr: Expr,
    resolver: Resolver,
    location: Location,
}

impl ExecutionUnit {
    /// Create a new execution unit
    #[must_use]
    pub fn new(
        target: VarId,
        requires: IndexMap<String, VarId>,
        expr: Expr,
        resolver: Resolver,
        location: Location,
    ) -> Self {
        Self {
            target,
            requires,
            expr,
            resolver,
            location,
        }
    }

    fn execute(&mut self, rt: &mut Runtime) -> CompileResult<Step> {
        let values = match gather(rt, &self.requires)? {
            Outcome::Ready(values) => values,
            Outcome::Pending(var) => return Ok(Step::Reschedule(var)),
        };
        emit::eval(rt, &self.expr, &values, &self.resolver, &self.location)
            .and_then(|value| rt.set_value(self.target, value, &self.location, true))
            .map_err(|e| e.at(&self.location, &self.expr))?;
        rt.fulfil(self.target)?;
        Ok(Step::Done)
    }
}

/// Waits for a set of variables, then hands their values to a resumer
pub struct WaitUnit {
    requires: IndexMap<String, VarId>,
    resumer: Rc<dyn Resume>,
    resolver: Resolver,
}

impl WaitUnit {
    /// Wait for a map of variables
    #[must_use]
    pub fn new(requires: IndexMap<String, VarId>, resumer: Rc<dyn Resume>, resolver: Resolver) -> Self {
        Self {
            requires,
            resumer,
            resolver,
        }
    }

    /// Wait for a single variable, passed to the resumer under `key`
    #[must_use]
    pub fn single(key: impl Into<String>, var: VarId, resumer: Rc<dyn Resume>, resolver: Resolver) -> Self {
        Self::new(IndexMap::from([(key.into(), var)]), resumer, resolver)
    }

    fn execute(&mut self, rt: &mut Runtime) -> CompileResult<Step> {
        let values = match gather(rt, &self.requires)? {
            Outcome::Ready(values) => values,
            Outcome::Pending(var) => return Ok(Step::Reschedule(var)),
        };
        let outcome = self
            .resumer
            .resume(rt, &values, &self.resolver, None)
            .map_err(|e| e.at(self.resumer.location(), &self.resumer))?;
        Ok(match outcome {
            Outcome::Ready(()) => Step::Done,
            Outcome::Pending(var) => Step::Reschedule(var),
        })
    }
}

/// Like [`WaitUnit`], but threads a target variable through to the resumer
pub struct HangUnit {
    requires: IndexMap<String, VarId>,
    target: Option<VarId>,
    resumer: Rc<dyn Resume>,
    resolver: Resolver,
}

impl HangUnit {
    /// Create a new hang unit
    #[must_use]
    pub fn new(
        requires: IndexMap<String, VarId>,
        target: Option<VarId>,
        resumer: Rc<dyn Resume>,
        resolver: Resolver,
    ) -> Self {
        Self {
            requires,
            target,
            resumer,
            resolver,
        }
    }

    fn execute(&mut self, rt: &mut Runtime) -> CompileResult<Step> {
        let values = match gather(rt, &self.requires)? {
            Outcome::Ready(values) => values,
            Outcome::Pending(var) => return Ok(Step::Reschedule(var)),
        };
        let outcome = self
            .resumer
            .resume(rt, &values, &self.resolver, self.target)
            .map_err(|e| e.at(self.resumer.location(), &self.resumer))?;
        match outcome {
            Outcome::Ready(()) => {
                if let Some(target) = self.target {
                    rt.fulfil(target)?;
                }
                Ok(Step::Done)
            }
            Outcome::Pending(var) => Ok(Step::Reschedule(var)),
        }
    }
}

/// Any work unit
pub enum Unit {
    /// See [`ExecutionUnit`]
    Execution(ExecutionUnit),
    /// See [`WaitUnit`]
    Wait(WaitUnit),
    /// See [`HangUnit`]
    Hang(HangUnit),
    /// See [`FunctionUnit`]
    Function(FunctionUnit),
}

impl Unit {
    /// Run the unit
    ///
    /// # Errors
    ///
    /// Returns the statement's error, annotated with its location
    pub fn execute(&mut self, rt: &mut Runtime) -> CompileResult<Step> {
        match self {
            Self::Execution(unit) => unit.execute(rt),
            Self::Wait(unit) => unit.execute(rt),
            Self::Hang(unit) => unit.execute(rt),
            Self::Function(unit) => unit.execute(rt),
        }
    }

    /// Variables the unit waits for before its first run
    #[must_use]
    pub fn requires(&self) -> Vec<VarId> {
        let requires = match self {
            Self::Execution(unit) => &unit.requires,
            Self::Wait(unit) => &unit.requires,
            Self::Hang(unit) => &unit.requires,
            Self::Function(unit) => unit.requires(),
        };
        requires.values().copied().collect()
    }

    /// Variable the unit promises to write, if any
    #[must_use]
    pub fn provides(&self) -> Option<VarId> {
        match self {
            Self::Execution(unit) => Some(unit.target),
            Self::Wait(_) => None,
            Self::Hang(unit) => unit.target,
            Self::Function(unit) => Some(unit.result()),
        }
    }

    /// Where the statement was written
    #[must_use]
    pub fn location(&self) -> &Location {
        match self {
            Self::Execution(unit) => &unit.location,
            Self::Wait(unit) => unit.resumer.location(),
            Self::Hang(unit) => unit.resumer.location(),
            Self::Function(unit) => unit.location(),
        }
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Execution(unit) => write!(f, "{}", unit.expr),
            Self::Wait(unit) => write!(f, "{}", unit.resumer),
            Self::Hang(unit) => write!(f, "{}", unit.resumer),
            Self::Function(unit) => write!(f, "{unit}"),
        }
    }
}
