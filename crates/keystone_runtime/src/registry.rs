//! Plugin and operator registry.
//!
//! Built once before a compile and shared through an `Arc`; nothing
//! registers itself globally.

use crate::call::PluginContext;
use indexmap::IndexMap;
use keystone_core::{CompileError, CompileResult, Outcome, Value};
use std::sync::Arc;

/// A function callable from the model.
///
/// Calls may return `Pending` when they need a value that is not there yet
/// (typically an attribute read through the context); the call is then
/// repeated with the same arguments once that value exists.
pub trait Plugin: Send + Sync {
    /// Name used in calls
    fn name(&self) -> &str;

    /// Invoke the plugin
    ///
    /// # Errors
    ///
    /// Returns error if the plugin fails
    fn call(
        &self,
        ctx: &mut PluginContext<'_>,
        args: &[Value],
        kwargs: &IndexMap<String, Value>,
    ) -> CompileResult<Outcome<Value>>;
}

/// A pure operator over already evaluated operands
pub trait Operator: Send + Sync {
    /// Operator symbol
    fn name(&self) -> &str;

    /// Apply the operator
    ///
    /// # Errors
    ///
    /// Returns error if the operands have the wrong shape
    fn apply(&self, args: &[Value]) -> CompileResult<Value>;
}

/// Plugin backed by a closure
pub struct FnPlugin<F> {
    name: String,
    f: F,
}

impl<F> FnPlugin<F>
where
    F: Fn(&mut PluginContext<'_>, &[Value], &IndexMap<String, Value>) -> CompileResult<Outcome<Value>>
        + Send
        + Sync,
{
    /// Wrap a closure
    #[must_use]
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> Plugin for FnPlugin<F>
where
    F: Fn(&mut PluginContext<'_>, &[Value], &IndexMap<String, Value>) -> CompileResult<Outcome<Value>>
        + Send
        + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(
        &self,
        ctx: &mut PluginContext<'_>,
        args: &[Value],
        kwargs: &IndexMap<String, Value>,
    ) -> CompileResult<Outcome<Value>> {
        (self.f)(ctx, args, kwargs)
    }
}

/// Operator backed by a closure
pub struct FnOperator<F> {
    name: String,
    f: F,
}

impl<F> FnOperator<F>
where
    F: Fn(&[Value]) -> CompileResult<Value> + Send + Sync,
{
    /// Wrap a closure
    #[must_use]
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> Operator for FnOperator<F>
where
    F: Fn(&[Value]) -> CompileResult<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, args: &[Value]) -> CompileResult<Value> {
        (self.f)(args)
    }
}

/// Error from registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Plugin name already taken
    PluginAlreadyRegistered { name: String },
    /// Operator symbol already taken
    OperatorAlreadyRegistered { name: String },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PluginAlreadyRegistered { name } => write!(f, "Plugin already registered: {}", name),
            Self::OperatorAlreadyRegistered { name } => {
                write!(f, "Operator already registered: {}", name)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Registry of plugins and operators
#[derive(Clone, Default)]
pub struct Registry {
    plugins: IndexMap<String, Arc<dyn Plugin>>,
    operators: IndexMap<String, Arc<dyn Operator>>,
}

impl Registry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the builtin operators and plugins
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for op in builtin_operators() {
            registry.operators.insert(op.name().to_string(), op);
        }
        for plugin in builtin_plugins() {
            registry.plugins.insert(plugin.name().to_string(), plugin);
        }
        registry
    }

    /// Register a plugin
    ///
    /// # Errors
    ///
    /// Returns error if the name is already taken
    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), RegistryError> {
        let name = plugin.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(RegistryError::PluginAlreadyRegistered { name });
        }
        self.plugins.insert(name, plugin);
        Ok(())
    }

    /// Register an operator
    ///
    /// # Errors
    ///
    /// Returns error if the symbol is already taken
    pub fn register_operator(&mut self, operator: Arc<dyn Operator>) -> Result<(), RegistryError> {
        let name = operator.name().to_string();
        if self.operators.contains_key(&name) {
            return Err(RegistryError::OperatorAlreadyRegistered { name });
        }
        self.operators.insert(name, operator);
        Ok(())
    }

    /// Get a plugin by name
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such plugin exists
    pub fn plugin(&self, name: &str) -> CompileResult<Arc<dyn Plugin>> {
        self.plugins
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| CompileError::not_found(name, format!("plugin {name} not found")))
    }

    /// Get an operator by symbol
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such operator exists
    pub fn operator(&self, name: &str) -> CompileResult<Arc<dyn Operator>> {
        self.operators
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| CompileError::not_found(name, format!("operator {name} not found")))
    }

    /// Registered plugin names
    pub fn plugin_names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    /// Registered operator symbols
    pub fn operator_names(&self) -> impl Iterator<Item = &str> {
        self.operators.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .field("operators", &self.operators.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn arity(name: &str, args: &[Value], expected: usize) -> CompileResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(CompileError::TypeMismatch {
            expected: format!("{expected} operands for {name}"),
            value: format!("{} operands", args.len()),
        })
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn builtin_operators() -> Vec<Arc<dyn Operator>> {
    vec![
        Arc::new(FnOperator::new("==", |args: &[Value]| {
            arity("==", args, 2)?;
            Ok(Value::Bool(args[0] == args[1]))
        })),
        Arc::new(FnOperator::new("!=", |args: &[Value]| {
            arity("!=", args, 2)?;
            Ok(Value::Bool(args[0] != args[1]))
        })),
        Arc::new(FnOperator::new("+", |args: &[Value]| {
            arity("+", args, 2)?;
            match (&args[0], &args[1]) {
                (Value::Int(a), Value::Int(b)) => a.checked_add(*b).map(Value::Int).ok_or_else(|| {
                    CompileError::TypeMismatch {
                        expected: "int within range".to_string(),
                        value: format!("{a} + {b}"),
                    }
                }),
                (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
                (Value::List(a), Value::List(b)) => Ok(Value::List(a.iter().chain(b).cloned().collect())),
                (a, b) => Err(CompileError::TypeMismatch {
                    expected: "two ints, strings or lists".to_string(),
                    value: format!("{a} + {b}"),
                }),
            }
        })),
        Arc::new(FnOperator::new("-", |args: &[Value]| {
            arity("-", args, 2)?;
            match (&args[0], &args[1]) {
                (Value::Int(a), Value::Int(b)) => a.checked_sub(*b).map(Value::Int).ok_or_else(|| {
                    CompileError::TypeMismatch {
                        expected: "int within range".to_string(),
                        value: format!("{a} - {b}"),
                    }
                }),
                (a, b) => Err(CompileError::TypeMismatch {
                    expected: "two ints".to_string(),
                    value: format!("{a} - {b}"),
                }),
            }
        })),
        Arc::new(FnOperator::new("and", |args: &[Value]| {
            Ok(Value::Bool(args.iter().all(Value::is_truthy)))
        })),
        Arc::new(FnOperator::new("or", |args: &[Value]| {
            Ok(Value::Bool(args.iter().any(Value::is_truthy)))
        })),
        Arc::new(FnOperator::new("not", |args: &[Value]| {
            arity("not", args, 1)?;
            Ok(Value::Bool(!args[0].is_truthy()))
        })),
        Arc::new(FnOperator::new("in", |args: &[Value]| {
            arity("in", args, 2)?;
            match &args[1] {
                Value::List(items) => Ok(Value::Bool(items.contains(&args[0]))),
                other => Err(CompileError::TypeMismatch {
                    expected: "list".to_string(),
                    value: other.to_string(),
                }),
            }
        })),
        Arc::new(FnOperator::new("concat", |args: &[Value]| {
            Ok(Value::String(args.iter().map(text).collect()))
        })),
    ]
}

fn builtin_plugins() -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(FnPlugin::new(
            "len",
            |_ctx: &mut PluginContext<'_>, args: &[Value], _kwargs: &IndexMap<String, Value>| {
                arity("len", args, 1)?;
                let len = match &args[0] {
                    Value::List(items) => items.len(),
                    Value::String(s) => s.chars().count(),
                    other => {
                        return Err(CompileError::Plugin {
                            plugin: "len".to_string(),
                            message: format!("{} has no length", other.kind_name()),
                        });
                    }
                };
                let len = i64::try_from(len).map_err(|_| CompileError::Plugin {
                    plugin: "len".to_string(),
                    message: "length out of range".to_string(),
                })?;
                Ok(Outcome::Ready(Value::Int(len)))
            },
        )),
        Arc::new(FnPlugin::new(
            "upper",
            |_ctx: &mut PluginContext<'_>, args: &[Value], _kwargs: &IndexMap<String, Value>| {
                arity("upper", args, 1)?;
                match &args[0] {
                    Value::String(s) => Ok(Outcome::Ready(Value::String(s.to_uppercase()))),
                    other => Err(CompileError::Plugin {
                        plugin: "upper".to_string(),
                        message: format!("expected a string, got {}", other.kind_name()),
                    }),
                }
            },
        )),
        // attr(instance, "name"): reads an attribute, waiting for it if needed
        Arc::new(FnPlugin::new(
            "attr",
            |ctx: &mut PluginContext<'_>, args: &[Value], _kwargs: &IndexMap<String, Value>| {
                arity("attr", args, 2)?;
                let (Some(instance), Value::String(name)) = (args[0].as_instance(), &args[1]) else {
                    return Err(CompileError::Plugin {
                        plugin: "attr".to_string(),
                        message: format!("expected an instance and a name, got {}, {}", args[0], args[1]),
                    });
                };
                ctx.get_attribute(instance, name)
            },
        )),
        Arc::new(FnPlugin::new(
            "unknown",
            |_ctx: &mut PluginContext<'_>, _args: &[Value], _kwargs: &IndexMap<String, Value>| {
                Ok(Outcome::Ready(Value::Unknown))
            },
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_operators() {
        let registry = Registry::with_builtins();
        let plus = registry.operator("+").unwrap();
        assert_eq!(plus.apply(&[Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(5));
        assert_eq!(
            plus.apply(&[Value::from("a"), Value::from("b")]).unwrap(),
            Value::from("ab")
        );
        assert!(plus.apply(&[Value::Int(2), Value::from("b")]).is_err());

        let concat = registry.operator("concat").unwrap();
        assert_eq!(
            concat.apply(&[Value::from("x-"), Value::Int(1)]).unwrap(),
            Value::from("x-1")
        );

        let not = registry.operator("not").unwrap();
        assert_eq!(not.apply(&[Value::Bool(false)]).unwrap(), Value::Bool(true));
        assert!(not.apply(&[]).is_err());
    }

    #[test]
    fn test_registry_lookup_missing() {
        let registry = Registry::new();
        let err = registry.plugin("nope").err().unwrap();
        assert_eq!(err.kind(), keystone_core::ErrorKind::NotFound);
        assert!(registry.operator("+").is_err());
    }

    #[test]
    fn test_registry_duplicate_plugin() {
        let mut registry = Registry::with_builtins();
        let dup = Arc::new(FnPlugin::new(
            "len",
            |_ctx: &mut PluginContext<'_>, _args: &[Value], _kwargs: &IndexMap<String, Value>| {
                Ok(Outcome::Ready(Value::Null))
            },
        ));
        assert_eq!(
            registry.register_plugin(dup),
            Err(RegistryError::PluginAlreadyRegistered {
                name: "len".to_string()
            })
        );
        assert!(registry.plugin_names().any(|n| n == "attr"));
    }

    #[test]
    fn test_register_operator() {
        let mut registry = Registry::new();
        registry
            .register_operator(Arc::new(FnOperator::new("double", |args: &[Value]| match args {
                [Value::Int(i)] => Ok(Value::Int(i * 2)),
                _ => Ok(Value::Null),
            })))
            .unwrap();
        let op = registry.operator("double").unwrap();
        assert_eq!(op.apply(&[Value::Int(4)]).unwrap(), Value::Int(8));
        assert_eq!(registry.operator_names().collect::<Vec<_>>(), vec!["double"]);
    }
}
