//! Statement emission and expression evaluation.
//!
//! Emitting a statement never evaluates anything. It works out which
//! variables the statement reads (`requires_emit`), spawns whatever helper
//! units are needed to produce the intermediate ones (attribute lookups,
//! plugin calls) and spawns the unit that will run the statement once all
//! of them exist. Evaluation (`eval`) happens later, inside that unit,
//! with the values already gathered.

use crate::call::FunctionUnit;
use crate::instance::SELF_SLOT;
use crate::reference;
use crate::resolver::Resolver;
use crate::runtime::Runtime;
use crate::units::{ExecutionUnit, Resume, Unit, WaitUnit};
use crate::variable::VariableKind;
use indexmap::IndexMap;
use keystone_core::{CompileError, CompileResult, InstanceId, Location, Outcome, Value, VarId};
use keystone_model::{Expr, Statement, StatementKind};
use std::rc::Rc;
use std::sync::Arc;

/// Emit a statement in the scope of `resolver`
///
/// # Errors
///
/// Returns error if a name does not resolve; annotated with the statement
pub fn emit_statement(rt: &mut Runtime, statement: &Statement, resolver: &Resolver) -> CompileResult<()> {
    emit_kind(rt, statement, resolver).map_err(|e| e.at(&statement.location, statement))
}

fn emit_kind(rt: &mut Runtime, statement: &Statement, resolver: &Resolver) -> CompileResult<()> {
    let location = &statement.location;
    match &statement.kind {
        StatementKind::Assign { name, value } => {
            let target = resolver.lookup(name)?;
            let requires = requires_emit(rt, value, resolver, location)?;
            let unit = ExecutionUnit::new(target, requires, value.clone(), resolver.clone(), location.clone());
            rt.spawn(Unit::Execution(unit))?;
        }
        StatementKind::SetAttribute {
            instance,
            attribute,
            value,
        } => {
            let requires = requires_emit(rt, instance, resolver, location)?;
            let resumer = SetAttribute {
                instance: instance.clone(),
                attribute: attribute.clone(),
                value: value.clone(),
                location: location.clone(),
            };
            rt.spawn(Unit::Wait(WaitUnit::new(requires, Rc::new(resumer), resolver.clone())))?;
        }
        StatementKind::Evaluate { expr } => {
            let target = rt.new_variable(VariableKind::Plain, expr.to_string());
            let requires = requires_emit(rt, expr, resolver, location)?;
            let unit = ExecutionUnit::new(target, requires, expr.clone(), resolver.clone(), location.clone());
            rt.spawn(Unit::Execution(unit))?;
        }
    }
    Ok(())
}

/// Work out the variables an expression reads, emitting helper units for
/// the ones that do not exist yet. Keys are the names [`eval`] looks the
/// values up by.
///
/// # Errors
///
/// Returns `NotFound` if a referenced name does not resolve
pub fn requires_emit(
    rt: &mut Runtime,
    expr: &Expr,
    resolver: &Resolver,
    location: &Location,
) -> CompileResult<IndexMap<String, VarId>> {
    match expr {
        Expr::Literal { .. } => Ok(IndexMap::new()),
        Expr::Reference { name } => Ok(IndexMap::from([(name.clone(), resolver.lookup(name)?)])),
        Expr::Attribute { instance, attribute } => {
            reference::emit(rt, expr, instance, attribute, resolver, location)
        }
        Expr::Operator { args, .. } => requires_all(rt, args, resolver, location),
        Expr::List { items } => requires_all(rt, items, resolver, location),
        Expr::Constructor { attributes, .. } => requires_all(rt, attributes.values(), resolver, location),
        Expr::Call {
            function,
            args,
            kwargs,
        } => {
            let key = expr.to_string();
            let result = rt.new_variable(VariableKind::Plain, key.clone());
            let requires = requires_all(rt, args.iter().chain(kwargs.values()), resolver, location)?;
            let unit = FunctionUnit::new(
                result,
                requires,
                function.clone(),
                args.clone(),
                kwargs.clone(),
                resolver.clone(),
                location.clone(),
            );
            rt.spawn(Unit::Function(unit))?;
            Ok(IndexMap::from([(key, result)]))
        }
    }
}

fn requires_all<'e>(
    rt: &mut Runtime,
    exprs: impl IntoIterator<Item = &'e Expr>,
    resolver: &Resolver,
    location: &Location,
) -> CompileResult<IndexMap<String, VarId>> {
    let mut requires = IndexMap::new();
    for expr in exprs {
        requires.extend(requires_emit(rt, expr, resolver, location)?);
    }
    Ok(requires)
}

fn gathered(values: &IndexMap<String, Value>, key: &str) -> CompileResult<Value> {
    values
        .get(key)
        .cloned()
        .ok_or_else(|| CompileError::invariant(format!("{key} evaluated before it was gathered")))
}

/// Evaluate an expression with the values gathered for it
///
/// # Errors
///
/// Returns error if an operator fails or a constructor assignment is
/// rejected
pub fn eval(
    rt: &mut Runtime,
    expr: &Expr,
    values: &IndexMap<String, Value>,
    resolver: &Resolver,
    location: &Location,
) -> CompileResult<Value> {
    match expr {
        Expr::Literal { value } => Ok(value.to_value()),
        Expr::Reference { name } => gathered(values, name),
        Expr::Attribute { .. } | Expr::Call { .. } => gathered(values, &expr.to_string()),
        Expr::Operator { op, args } => {
            let mut operands = Vec::with_capacity(args.len());
            for arg in args {
                operands.push(eval(rt, arg, values, resolver, location)?);
            }
            if operands.iter().any(Value::is_unknown) {
                return Ok(Value::Unknown);
            }
            let operator = rt.registry().operator(op)?;
            operator.apply(&operands)
        }
        Expr::List { items } => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval(rt, item, values, resolver, location)?);
            }
            Ok(Value::List(out))
        }
        Expr::Constructor { entity, attributes } => {
            let id = rt.new_instance(entity, location)?;
            for (name, attribute) in attributes {
                let value = eval(rt, attribute, values, resolver, location)?;
                rt.set_attribute(id, name, value, location, true)?;
            }
            emit_implementation(rt, id, resolver)?;
            Ok(Value::Instance(id))
        }
    }
}

/// Emit the implementation block of an instance's entity, if it has one.
///
/// Names in the block resolve to the block's own variables first, then to
/// the instance's slots, then to the entity's namespace.
///
/// # Errors
///
/// Returns error if the block's namespace does not exist or a statement
/// cannot be emitted
pub fn emit_implementation(rt: &mut Runtime, instance: InstanceId, resolver: &Resolver) -> CompileResult<()> {
    let types = Arc::clone(rt.types());
    let (entity, slots) = {
        let instance = rt.instance(instance)?;
        (instance.entity().to_string(), Rc::clone(instance.slots()))
    };
    let Some(block) = &types.entity(&entity)?.implementation else {
        return Ok(());
    };

    let mut locals = IndexMap::new();
    for name in block.variables() {
        // assigning to a slot name writes the slot
        if slots.contains_key(&name) {
            continue;
        }
        let var = rt.new_variable(VariableKind::Plain, format!("{entity} {instance}::{name}"));
        locals.insert(name, var);
    }
    let scope = resolver
        .for_namespace(&block.namespace)?
        .for_instance(&slots)
        .with_locals(Rc::new(locals));

    for statement in &block.statements {
        emit_statement(rt, statement, &scope)?;
    }
    Ok(())
}

/// Second half of `instance.attribute = value`, run once the instance is
/// known
struct SetAttribute {
    instance: Expr,
    attribute: String,
    value: Expr,
    location: Location,
}

impl std::fmt::Display for SetAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{} = {}", self.instance, self.attribute, self.value)
    }
}

impl Resume for SetAttribute {
    fn resume(
        &self,
        rt: &mut Runtime,
        values: &IndexMap<String, Value>,
        resolver: &Resolver,
        _target: Option<VarId>,
    ) -> CompileResult<Outcome<()>> {
        let instance = match eval(rt, &self.instance, values, resolver, &self.location)? {
            Value::Instance(id) => id,
            other => {
                return Err(CompileError::NotAnInstance {
                    attribute: self.attribute.clone(),
                    value: other.to_string(),
                })
            }
        };
        let target = rt.get_attribute(instance, &self.attribute)?;
        if self.attribute == SELF_SLOT {
            return Err(CompileError::not_found(SELF_SLOT, format!("{SELF_SLOT} can not be assigned")));
        }

        let is_list = matches!(rt.var(target)?.kind(), VariableKind::List { .. });
        if let (true, Expr::Attribute { instance, attribute }) = (is_list, &self.value) {
            reference::emit_gradual(rt, target, instance, attribute, resolver, &self.location)?;
        } else {
            let requires = requires_emit(rt, &self.value, resolver, &self.location)?;
            let unit = ExecutionUnit::new(
                target,
                requires,
                self.value.clone(),
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
