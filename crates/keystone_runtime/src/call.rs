//! Plugin calls.
//!
//! A call runs in two phases. The argument phase evaluates the argument
//! expressions once and caches the result. The call phase invokes the
//! plugin and may run several times: a plugin that reads a value that is
//! not there yet returns `Pending`, and the unit is retried with the cached
//! arguments once that value exists. Argument expressions are never
//! evaluated twice.

use crate::emit;
use crate::resolver::Resolver;
use crate::runtime::Runtime;
use crate::units::{gather, Step};
use indexmap::IndexMap;
use keystone_core::{CompileResult, InstanceId, Location, Outcome, Value, VarId};
use keystone_model::{Expr, Statement};
use tracing::debug;

/// Handle given to plugins while they run
pub struct PluginContext<'a> {
    rt: &'a mut Runtime,
    resolver: &'a Resolver,
    result: VarId,
    location: &'a Location,
}

impl<'a> PluginContext<'a> {
    /// Create a context for one plugin invocation
    #[must_use]
    pub fn new(rt: &'a mut Runtime, resolver: &'a Resolver, result: VarId, location: &'a Location) -> Self {
        Self {
            rt,
            resolver,
            result,
            location,
        }
    }

    /// Read an instance attribute, or learn which variable to wait for
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the instance has no such attribute
    pub fn get_attribute(&self, instance: InstanceId, name: &str) -> CompileResult<Outcome<Value>> {
        let var = self.rt.get_attribute(instance, name)?;
        self.rt.try_get(var)
    }

    /// Set an instance attribute
    ///
    /// # Errors
    ///
    /// Returns error if the attribute does not exist or is already set
    pub fn set_attribute(&mut self, instance: InstanceId, name: &str, value: Value) -> CompileResult<()> {
        self.rt.set_attribute(instance, name, value, self.location, true)
    }

    /// Read a variable by name in the caller's scope
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the name does not resolve
    pub fn lookup(&self, name: &str) -> CompileResult<Outcome<Value>> {
        let var = self.resolver.lookup(name)?;
        self.rt.try_get(var)
    }

    /// Emit a statement in the caller's scope
    ///
    /// # Errors
    ///
    /// Returns error if the statement cannot be emitted
    pub fn emit(&mut self, statement: &Statement) -> CompileResult<()> {
        emit::emit_statement(self.rt, statement, self.resolver)
    }

    /// Entity name of an instance
    ///
    /// # Errors
    ///
    /// Returns a fatal error for an unknown handle
    pub fn entity_of(&self, instance: InstanceId) -> CompileResult<&str> {
        Ok(self.rt.instance(instance)?.entity())
    }

    /// Variable the call result goes to
    #[must_use]
    pub const fn result(&self) -> VarId {
        self.result
    }

    /// Location of the call
    #[must_use]
    pub fn location(&self) -> &Location {
        self.location
    }
}

/// Evaluated arguments, kept between call attempts
type Arguments = (Vec<Value>, IndexMap<String, Value>);

/// Work unit for a plugin call
pub struct FunctionUnit {
    result: VarId,
    requires: IndexMap<String, VarId>,
    function: String,
    args: Vec<Expr>,
    kwargs: IndexMap<String, Expr>,
    resolver: Resolver,
    location: Location,
    cached: Option<Arguments>,
}

impl FunctionUnit {
    /// Create a unit calling `function`; `requires` are the variables the
    /// argument expressions read
    #[must_use]
    pub fn new(
        result: VarId,
        requires: IndexMap<String, VarId>,
        function: impl Into<String>,
        args: Vec<Expr>,
        kwargs: IndexMap<String, Expr>,
        resolver: Resolver,
        location: Location,
    ) -> Self {
        Self {
            result,
            requires,
            function: function.into(),
            args,
            kwargs,
            resolver,
            location,
            cached: None,
        }
    }

    /// Variables the arguments read
    #[must_use]
    pub fn requires(&self) -> &IndexMap<String, VarId> {
        &self.requires
    }

    /// Variable receiving the call result
    #[must_use]
    pub const fn result(&self) -> VarId {
        self.result
    }

    /// Where the call was written
    #[must_use]
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Whether evaluated arguments are being held for a retry
    #[must_use]
    pub const fn has_cached_arguments(&self) -> bool {
        self.cached.is_some()
    }

    fn evaluate_arguments(&self, rt: &mut Runtime) -> CompileResult<Outcome<Arguments>> {
        let values = match gather(rt, &self.requires)? {
            Outcome::Ready(values) => values,
            Outcome::Pending(var) => return Ok(Outcome::Pending(var)),
        };

        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            let value = emit::eval(rt, arg, &values, &self.resolver, &self.location)
                .map_err(|e| e.at(&self.location, arg))?;
            args.push(value);
        }
        let mut kwargs = IndexMap::with_capacity(self.kwargs.len());
        for (name, arg) in &self.kwargs {
            let value = emit::eval(rt, arg, &values, &self.resolver, &self.location)
                .map_err(|e| e.at(&self.location, arg))?;
            kwargs.insert(name.clone(), value);
        }
        Ok(Outcome::Ready((args, kwargs)))
    }

    pub(crate) fn execute(&mut self, rt: &mut Runtime) -> CompileResult<Step> {
        let (args, kwargs) = match self.cached.take() {
            Some(arguments) => arguments,
            None => match self.evaluate_arguments(rt)? {
                Outcome::Ready(arguments) => arguments,
                Outcome::Pending(var) => return Ok(Step::Reschedule(var)),
            },
        };

        let unknown = args.iter().chain(kwargs.values()).any(Value::is_unknown);
        let value = if unknown {
            Value::Unknown
        } else {
            let plugin = rt.registry().plugin(&self.function).map_err(|e| e.at(&self.location, &*self))?;
            let mut ctx = PluginContext::new(rt, &self.resolver, self.result, &self.location);
            match plugin.call(&mut ctx, &args, &kwargs).map_err(|e| e.at(&self.location, &*self))? {
                Outcome::Ready(value) => value,
                Outcome::Pending(var) => {
                    debug!(plugin = %self.function, waiting_on = %var, "Unset value in plugin, rescheduling");
                    self.cached = Some((args, kwargs));
                    return Ok(Step::Reschedule(var));
                }
            }
        };

        rt.set_value(self.result, value, &self.location, true)
            .map_err(|e| e.at(&self.location, &*self))?;
        rt.fulfil(self.result)?;
        Ok(Step::Done)
    }
}

impl std::fmt::Display for FunctionUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let call = Expr::Call {
            function: self.function.clone(),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
        };
        write!(f, "{call}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FnOperator, FnPlugin, Registry};
    use crate::units::Unit;
    use crate::variable::VariableKind;
    use keystone_core::{ready, ErrorKind};
    use keystone_model::{AttributeDef, AttributeType, EntityDef, Literal, TypeRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn types() -> Arc<TypeRegistry> {
        Arc::new(
            TypeRegistry::from_entities([
                EntityDef::new("A").with_attribute(AttributeDef::scalar("name", AttributeType::String))
            ])
            .unwrap(),
        )
    }

    fn drain(rt: &mut Runtime) {
        while let Some(waiter) = rt.scheduler_mut().pop_runnable() {
            rt.run_unit(waiter).unwrap();
        }
    }

    #[test]
    fn test_arguments_not_reevaluated_on_retry() {
        let evaluations = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut registry = Registry::with_builtins();
        let counter = Arc::clone(&evaluations);
        registry
            .register_operator(Arc::new(FnOperator::new("count", move |args: &[Value]| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(args.first().cloned().unwrap_or(Value::Null))
            })))
            .unwrap();
        let seen = Arc::clone(&calls);
        registry
            .register_plugin(Arc::new(FnPlugin::new(
                "name_of",
                move |ctx: &mut PluginContext<'_>, args: &[Value], _kwargs: &IndexMap<String, Value>| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    let instance = args[1].as_instance().unwrap();
                    let name = ready!(ctx.get_attribute(instance, "name"));
                    Ok(Outcome::Ready(name))
                },
            )))
            .unwrap();

        let mut rt = Runtime::new(types(), Arc::new(registry));
        let a = rt.new_instance("A", &Location::internal()).unwrap();
        let holder = rt.new_variable(VariableKind::Plain, "a");
        rt.set_value(holder, Value::Instance(a), &Location::internal(), true).unwrap();
        let result = rt.new_variable(VariableKind::Plain, "result");

        let unit = FunctionUnit::new(
            result,
            IndexMap::from([("a".to_string(), holder)]),
            "name_of",
            vec![
                Expr::operator("count", vec![Expr::literal(Literal::Int(1))]),
                Expr::reference("a"),
            ],
            IndexMap::new(),
            Resolver::new(IndexMap::new()),
            Location::new("main.ks", 3),
        );
        rt.spawn(Unit::Function(unit)).unwrap();
        drain(&mut rt);

        // the plugin ran once and is now waiting for a.name
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!rt.is_ready(result));
        assert_eq!(rt.metrics().reschedules, 1);

        rt.set_attribute(a, "name", Value::from("web"), &Location::internal(), true).unwrap();
        drain(&mut rt);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(evaluations.load(Ordering::SeqCst), 1);
        assert_eq!(rt.get_value(result).unwrap(), Value::from("web"));
        assert!(rt.scheduler().unfinished().is_empty());
    }

    #[test]
    fn test_unknown_argument_skips_plugin() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::with_builtins();
        let seen = Arc::clone(&calls);
        registry
            .register_plugin(Arc::new(FnPlugin::new(
                "probe",
                move |_ctx: &mut PluginContext<'_>, _args: &[Value], _kwargs: &IndexMap<String, Value>| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(Outcome::Ready(Value::Int(1)))
                },
            )))
            .unwrap();

        let mut rt = Runtime::new(types(), Arc::new(registry));
        let input = rt.new_variable(VariableKind::Plain, "x");
        rt.set_value(input, Value::Unknown, &Location::internal(), true).unwrap();
        let result = rt.new_variable(VariableKind::Plain, "result");

        let unit = FunctionUnit::new(
            result,
            IndexMap::from([("x".to_string(), input)]),
            "probe",
            Vec::new(),
            IndexMap::from([("value".to_string(), Expr::reference("x"))]),
            Resolver::new(IndexMap::new()),
            Location::internal(),
        );
        rt.spawn(Unit::Function(unit)).unwrap();
        drain(&mut rt);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(rt.get_value(result).unwrap(), Value::Unknown);
    }

    #[test]
    fn test_argument_error_names_argument() {
        let mut rt = Runtime::new(types(), Arc::new(Registry::with_builtins()));
        let result = rt.new_variable(VariableKind::Plain, "result");
        let bad = Expr::operator("+", vec![Expr::literal(Literal::Int(1)), Expr::literal(Literal::Bool(true))]);

        let unit = FunctionUnit::new(
            result,
            IndexMap::new(),
            "len",
            vec![bad],
            IndexMap::new(),
            Resolver::new(IndexMap::new()),
            Location::new("main.ks", 9),
        );
        rt.spawn(Unit::Function(unit)).unwrap();
        let waiter = rt.scheduler_mut().pop_runnable().unwrap();
        let err = rt.run_unit(waiter).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Type);
        assert!(err.to_string().contains("reported in +(1, true)"));
    }

    #[test]
    fn test_missing_plugin() {
        let mut rt = Runtime::new(types(), Arc::new(Registry::new()));
        let result = rt.new_variable(VariableKind::Plain, "result");
        let unit = FunctionUnit::new(
            result,
            IndexMap::new(),
            "nope",
            Vec::new(),
            IndexMap::new(),
            Resolver::new(IndexMap::new()),
            Location::internal(),
        );
        rt.spawn(Unit::Function(unit)).unwrap();
        let waiter = rt.scheduler_mut().pop_runnable().unwrap();
        assert_eq!(rt.run_unit(waiter).unwrap_err().kind(), ErrorKind::NotFound);
    }
}
