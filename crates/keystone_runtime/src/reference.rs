//! Attribute references (`a.b`).
//!
//! Reading an attribute takes two steps: first the instance expression has
//! to produce an instance, then the attribute variable on that instance
//! has to get a value. Neither is known when the statement is emitted, so
//! the reference introduces a temporary variable and a hang unit that
//! waits for the instance, looks up the attribute and copies its value
//! into the temporary once it exists.
//!
//! Assigning one list attribute to another is done gradually instead:
//! every element is forwarded as soon as it arrives.

use crate::emit;
use crate::resolver::Resolver;
use crate::runtime::Runtime;
use crate::units::{ExecutionUnit, HangUnit, Resume, Unit};
use crate::variable::{Listener, VariableKind};
use indexmap::IndexMap;
use keystone_core::{CompileError, CompileResult, InstanceId, Location, Outcome, Value, VarId};
use keystone_model::Expr;
use std::rc::Rc;

/// Evaluate the instance expression to an instance handle
fn resolve_instance(
    rt: &mut Runtime,
    instance: &Expr,
    attribute: &str,
    values: &IndexMap<String, Value>,
    resolver: &Resolver,
    location: &Location,
) -> CompileResult<InstanceId> {
    match emit::eval(rt, instance, values, resolver, location)? {
        Value::Instance(id) => Ok(id),
        other => Err(CompileError::NotAnInstance {
            attribute: attribute.to_string(),
            value: other.to_string(),
        }),
    }
}

/// Resumes an attribute read once the instance is known
pub struct AttributeReferenceHelper {
    instance: Expr,
    attribute: String,
    location: Location,
}

impl AttributeReferenceHelper {
    /// Create a helper for `instance.attribute`
    #[must_use]
    pub fn new(instance: Expr, attribute: impl Into<String>, location: Location) -> Self {
        Self {
            instance,
            attribute: attribute.into(),
            location,
        }
    }
}

impl std::fmt::Display for AttributeReferenceHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.instance, self.attribute)
    }
}

impl Resume for AttributeReferenceHelper {
    fn resume(
        &self,
        rt: &mut Runtime,
        values: &IndexMap<String, Value>,
        resolver: &Resolver,
        target: Option<VarId>,
    ) -> CompileResult<Outcome<()>> {
        let target = target.ok_or_else(|| CompileError::invariant(format!("no target for {self}")))?;
        let instance = resolve_instance(rt, &self.instance, &self.attribute, values, resolver, &self.location)?;
        let var = rt.get_attribute(instance, &self.attribute)?;

        if rt.is_ready(var) {
            let value = rt.get_value(var)?;
            rt.set_value(target, value, &self.location, true)?;
        } else {
            // wait on the attribute itself; the copy is a plain reference
            let key = self.to_string();
            let unit = ExecutionUnit::new(
                target,
                IndexMap::from([(key.clone(), var)]),
                Expr::reference(key),
                resolver.clone(),
                self.location.clone(),
            );
            rt.spawn(Unit::Execution(unit))?;
        }
        Ok(Outcome::Ready(()))
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

/// Forwards the values of `instance.attribute` into a target as they arrive
pub struct GradualHelper {
    instance: Expr,
    attribute: String,
    location: Location,
}

impl GradualHelper {
    /// Create a helper forwarding `instance.attribute`
    #[must_use]
    pub fn new(instance: Expr, attribute: impl Into<String>, location: Location) -> Self {
        Self {
            instance,
            attribute: attribute.into(),
            location,
        }
    }
}

impl std::fmt::Display for GradualHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.instance, self.attribute)
    }
}

impl Resume for GradualHelper {
    fn resume(
        &self,
        rt: &mut Runtime,
        values: &IndexMap<String, Value>,
        resolver: &Resolver,
        target: Option<VarId>,
    ) -> CompileResult<Outcome<()>> {
        let target = target.ok_or_else(|| CompileError::invariant(format!("no target for {self}")))?;
        let instance = resolve_instance(rt, &self.instance, &self.attribute, values, resolver, &self.location)?;
        let source = rt.get_attribute(instance, &self.attribute)?;
        rt.listen(
            source,
            Listener::Forward {
                target,
                location: self.location.clone(),
            },
        )?;
        Ok(Outcome::Ready(()))
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

/// Emit the lookup of `instance.attribute`; returns the requirement map
/// holding the temporary the value will land in
///
/// # Errors
///
/// Returns error if the instance expression cannot be emitted
pub fn emit(
    rt: &mut Runtime,
    expr: &Expr,
    instance: &Expr,
    attribute: &str,
    resolver: &Resolver,
    location: &Location,
) -> CompileResult<IndexMap<String, VarId>> {
    let key = expr.to_string();
    let temp = rt.new_variable(VariableKind::Plain, key.clone());
    let requires = emit::requires_emit(rt, instance, resolver, location)?;
    let helper = AttributeReferenceHelper::new(instance.clone(), attribute, location.clone());
    rt.spawn(Unit::Hang(HangUnit::new(
        requires,
        Some(temp),
        Rc::new(helper),
        resolver.clone(),
    )))?;
    Ok(IndexMap::from([(key, temp)]))
}

/// Emit the gradual copy of `instance.attribute` into `target`
///
/// # Errors
///
/// Returns error if the instance expression cannot be emitted
pub fn emit_gradual(
    rt: &mut Runtime,
    target: VarId,
    instance: &Expr,
    attribute: &str,
    resolver: &Resolver,
    location: &Location,
) -> CompileResult<()> {
    let requires = emit::requires_emit(rt, instance, resolver, location)?;
    let helper = GradualHelper::new(instance.clone(), attribute, location.clone());
    rt.spawn(Unit::Hang(HangUnit::new(
        requires,
        Some(target),
        Rc::new(helper),
        resolver.clone(),
    )))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use keystone_model::{AttributeDef, AttributeType, EntityDef, TypeRegistry};
    use std::sync::Arc;

    fn runtime() -> Runtime {
        let types = TypeRegistry::from_entities([EntityDef::new("Host")
            .with_attribute(AttributeDef::scalar("name", AttributeType::String))
            .with_attribute(AttributeDef::bounded("tags", AttributeType::String, 0, None))])
        .unwrap();
        Runtime::new(Arc::new(types), Arc::new(Registry::with_builtins()))
    }

    fn drain(rt: &mut Runtime) {
        while let Some(waiter) = rt.scheduler_mut().pop_runnable() {
            rt.run_unit(waiter).unwrap();
        }
    }

    fn holder(rt: &mut Runtime, instance: InstanceId) -> (Resolver, VarId) {
        let var = rt.new_variable(VariableKind::Plain, "h");
        rt.set_value(var, Value::Instance(instance), &Location::internal(), true).unwrap();
        let resolver = Resolver::new(IndexMap::from([(
            "__config__".to_string(),
            IndexMap::from([("h".to_string(), var)]),
        )]))
        .for_namespace("__config__")
        .unwrap();
        (resolver, var)
    }

    #[test]
    fn test_reference_waits_for_attribute() {
        let mut rt = runtime();
        let host = rt.new_instance("Host", &Location::internal()).unwrap();
        let (resolver, _) = holder(&mut rt, host);

        let expr = Expr::attribute(Expr::reference("h"), "name");
        let requires = emit(&mut rt, &expr, &Expr::reference("h"), "name", &resolver, &Location::internal()).unwrap();
        let temp = requires["h.name"];
        drain(&mut rt);
        assert!(!rt.is_ready(temp));

        rt.set_attribute(host, "name", Value::from("web"), &Location::internal(), true).unwrap();
        drain(&mut rt);
        assert_eq!(rt.get_value(temp).unwrap(), Value::from("web"));
    }

    #[test]
    fn test_reference_on_value_is_type_error() {
        let mut rt = runtime();
        let var = rt.new_variable(VariableKind::Plain, "n");
        rt.set_value(var, Value::Int(3), &Location::internal(), true).unwrap();
        let resolver = Resolver::new(IndexMap::from([(
            "__config__".to_string(),
            IndexMap::from([("n".to_string(), var)]),
        )]))
        .for_namespace("__config__")
        .unwrap();

        let expr = Expr::attribute(Expr::reference("n"), "name");
        emit(&mut rt, &expr, &Expr::reference("n"), "name", &resolver, &Location::internal()).unwrap();
        let waiter = rt.scheduler_mut().pop_runnable().unwrap();
        let err = rt.run_unit(waiter).unwrap_err();
        assert!(matches!(err.root_cause(), CompileError::NotAnInstance { .. }));
    }

    #[test]
    fn test_gradual_forwards_each_element() {
        let mut rt = runtime();
        let source = rt.new_instance("Host", &Location::internal()).unwrap();
        let dest = rt.new_instance("Host", &Location::internal()).unwrap();
        let (resolver, _) = holder(&mut rt, source);
        let target = rt.get_attribute(dest, "tags").unwrap();

        emit_gradual(&mut rt, target, &Expr::reference("h"), "tags", &resolver, &Location::internal()).unwrap();
        drain(&mut rt);

        rt.set_attribute(source, "tags", Value::from("a"), &Location::internal(), true).unwrap();
        assert_eq!(rt.variable(target).partial(), Value::List(vec![Value::from("a")]));
        // the target cannot be frozen while the source is still open
        assert_eq!(rt.variable(target).providers(), 1);

        rt.set_attribute(source, "tags", Value::from("b"), &Location::internal(), true).unwrap();
        let source_tags = rt.get_attribute(source, "tags").unwrap();
        rt.freeze(source_tags).unwrap();
        assert_eq!(rt.variable(target).providers(), 0);
        assert_eq!(
            rt.variable(target).partial(),
            Value::List(vec![Value::from("a"), Value::from("b")])
        );
    }
}
