//! Name resolution.
//!
//! A resolver maps a name to a variable handle. It never waits: whether
//! the variable has a value is the caller's concern.
//!
//! Unqualified names are looked up in the local scopes first (block
//! variables, then instance slots), innermost first, then in the
//! resolver's namespace. Qualified names (`ns::name`) always go straight
//! to the named namespace.

use indexmap::IndexMap;
use keystone_core::{CompileError, CompileResult, VarId};
use keystone_model::ast::NAMESPACE_SEPARATOR;
use std::rc::Rc;

/// A lexical scope: name to variable
pub type Scope = Rc<IndexMap<String, VarId>>;

/// Immutable view over the namespace scopes, with an optional default
/// namespace and local scopes
#[derive(Debug, Clone)]
pub struct Resolver {
    scopes: Rc<IndexMap<String, Scope>>,
    namespace: Option<String>,
    locals: Vec<Scope>,
}

impl Resolver {
    /// Root resolver over the given namespace scopes; only qualified names
    /// resolve through it
    #[must_use]
    pub fn new(scopes: IndexMap<String, IndexMap<String, VarId>>) -> Self {
        Self {
            scopes: Rc::new(scopes.into_iter().map(|(ns, scope)| (ns, Rc::new(scope))).collect()),
            namespace: None,
            locals: Vec::new(),
        }
    }

    /// Look up a variable
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the name or its namespace does not exist
    pub fn lookup(&self, name: &str) -> CompileResult<VarId> {
        if let Some((ns, local)) = name.rsplit_once(NAMESPACE_SEPARATOR) {
            let scope = self.scopes.get(ns).ok_or_else(|| {
                CompileError::not_found(name, format!("namespace {ns} not found"))
            })?;
            return scope.get(local).copied().ok_or_else(|| {
                CompileError::not_found(name, format!("variable {local} not found in namespace {ns}"))
            });
        }

        for scope in self.locals.iter().rev() {
            if let Some(var) = scope.get(name) {
                return Ok(*var);
            }
        }

        let Some(ns) = &self.namespace else {
            return Err(CompileError::not_found(name, "unqualified name outside of any namespace"));
        };
        self.scopes
            .get(ns)
            .and_then(|scope| scope.get(name))
            .copied()
            .ok_or_else(|| CompileError::not_found(name, format!("variable {name} not found")))
    }

    /// Resolver rooted in another namespace. Local scopes are dropped, the
    /// namespace table is kept.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the namespace does not exist
    pub fn for_namespace(&self, namespace: &str) -> CompileResult<Self> {
        if !self.scopes.contains_key(namespace) {
            return Err(CompileError::not_found(
                namespace,
                format!("namespace {namespace} not found"),
            ));
        }
        Ok(Self {
            scopes: Rc::clone(&self.scopes),
            namespace: Some(namespace.to_string()),
            locals: Vec::new(),
        })
    }

    /// Resolver that sees an instance's slots before anything else it sees
    #[must_use]
    pub fn for_instance(&self, slots: &Scope) -> Self {
        self.with_locals(Rc::clone(slots))
    }

    /// Resolver with one more local scope, searched first
    #[must_use]
    pub fn with_locals(&self, locals: Scope) -> Self {
        let mut out = self.clone();
        out.locals.push(locals);
        out
    }

    /// Default namespace, if any
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Whether a namespace exists
    #[must_use]
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.scopes.contains_key(namespace)
    }
}
