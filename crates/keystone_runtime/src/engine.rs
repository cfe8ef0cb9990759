//! Fixpoint driver.
//!
//! Runs a model to completion:
//! 1. Emit every top-level statement
//! 2. Drain the runnable queue
//! 3. When nothing is runnable, freeze one pending variable that somebody
//!    waits for and go back to 2
//! 4. When no such variable exists, freeze the ones nobody waits for
//! 5. When nothing is left to freeze, close every instance
//!
//! Freezing one variable at a time keeps lists open as long as possible:
//! the work it unblocks may still append to other pending lists.

use crate::emit;
use crate::monitor::Metrics;
use crate::registry::Registry;
use crate::resolver::Resolver;
use crate::runtime::Runtime;
use crate::variable::VariableKind;
use indexmap::IndexMap;
use keystone_core::{CompileError, CompileId, CompileResult, InstanceId, Location, Value, VarId};
use keystone_model::ast::NAMESPACE_SEPARATOR;
use keystone_model::{Model, TypeRegistry, Validator, MAIN_NAMESPACE};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum driver rounds before giving up
    pub max_iterations: usize,
    /// Whether statements that never ran fail the compile
    pub fail_on_unexecuted: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            fail_on_unexecuted: true,
        }
    }
}

impl EngineConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the iteration limit
    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set whether unexecuted statements are an error
    #[must_use]
    pub const fn with_fail_on_unexecuted(mut self, fail: bool) -> Self {
        self.fail_on_unexecuted = fail;
        self
    }
}

/// Final state of one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceReport {
    /// Instance handle
    pub handle: String,
    /// Entity name
    pub entity: String,
    /// Where it was constructed
    pub location: Location,
    /// Attribute values
    pub attributes: IndexMap<String, Value>,
}

/// Result of a successful compile
#[derive(Debug, Clone, Serialize)]
pub struct CompileReport {
    /// Compile identifier
    pub compile_id: CompileId,
    /// Driver rounds
    pub iterations: usize,
    /// Counters
    pub metrics: Metrics,
    /// Every instance, in creation order
    pub instances: Vec<InstanceReport>,
    /// Top-level variables that received a value, by qualified name
    pub variables: IndexMap<String, Value>,
    /// Statements that never ran (only when allowed by the configuration)
    pub unfinished: Vec<String>,
}

impl CompileReport {
    /// Value of a top-level variable, by qualified name
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Instance by handle
    #[must_use]
    pub fn instance(&self, handle: &str) -> Option<&InstanceReport> {
        self.instances.iter().find(|i| i.handle == handle)
    }

    /// Render as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// The outer resolution loop
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    /// Create an engine
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compile a model
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` for inconsistent declarations, then every
    /// statement error, or the incomplete instances, or the statements that
    /// never ran
    pub fn compile(&self, model: &Model, registry: Arc<Registry>) -> CompileResult<CompileReport> {
        let compile_id = CompileId::new();
        let started = Instant::now();
        validate(model, &registry)?;
        let types = Arc::new(TypeRegistry::from_entities(model.entities.iter().cloned())?);
        info!(%compile_id, entities = types.len(), blocks = model.blocks.len(), "starting compile");

        let mut rt = Runtime::new(Arc::clone(&types), registry);
        let (resolver, globals) = namespace_scopes(&mut rt, model, &types);

        let mut errors = Vec::new();
        for block in &model.blocks {
            let scope = resolver.for_namespace(&block.namespace)?;
            for statement in &block.statements {
                if let Err(e) = emit::emit_statement(&mut rt, statement, &scope) {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    errors.push(e);
                }
            }
        }

        let iterations = self.resolve(&mut rt, &mut errors)?;

        if let Some(e) = CompileError::collect(errors) {
            return Err(e);
        }

        let ids: Vec<InstanceId> = rt.instances().map(|i| i.id()).collect();
        let mut incomplete = Vec::new();
        for id in &ids {
            incomplete.extend(rt.finalize(*id));
        }
        if let Some(e) = CompileError::collect(incomplete) {
            return Err(e);
        }

        let unfinished = rt.scheduler().unfinished();
        if !unfinished.is_empty() {
            if self.config.fail_on_unexecuted {
                return Err(CompileError::Stuck { statements: unfinished });
            }
            warn!(count = unfinished.len(), "statements never executed");
        }

        let mut instances = Vec::with_capacity(ids.len());
        for id in ids {
            let instance = rt.instance(id)?;
            instances.push(InstanceReport {
                handle: id.to_string(),
                entity: instance.entity().to_string(),
                location: instance.location().clone(),
                attributes: rt.attribute_values(id)?,
            });
        }
        let mut variables = IndexMap::new();
        for (name, var) in globals {
            if rt.is_ready(var) {
                variables.insert(name, rt.get_value(var)?);
            }
        }

        info!(
            %compile_id,
            iterations,
            instances = instances.len(),
            elapsed = ?started.elapsed(),
            "compile finished"
        );
        Ok(CompileReport {
            compile_id,
            iterations,
            metrics: rt.metrics().clone(),
            instances,
            variables,
            unfinished,
        })
    }

    /// Run the driver loop until nothing changes. Returns the number of
    /// rounds; statement errors are collected, fatal ones abort.
    fn resolve(&self, rt: &mut Runtime, errors: &mut Vec<CompileError>) -> CompileResult<usize> {
        let mut zero_waiters: Vec<VarId> = Vec::new();
        let mut iteration = 0;

        loop {
            let scheduler = rt.scheduler();
            if !scheduler.has_runnable() && scheduler.pending_len() == 0 && zero_waiters.is_empty() {
                break;
            }
            if iteration >= self.config.max_iterations {
                warn!(iterations = iteration, "iteration limit reached");
                return Err(CompileError::IterationLimit { iterations: iteration });
            }
            iteration += 1;
            rt.metrics_mut().record_iteration();
            let round = Instant::now();
            debug!(
                iteration,
                runnable = rt.scheduler().runnable_len(),
                pending = rt.scheduler().pending_len(),
                zero_waiters = zero_waiters.len(),
                done = rt.scheduler().completed_count(),
                "driver round"
            );

            while let Some(waiter) = rt.scheduler_mut().pop_runnable() {
                if let Err(e) = rt.run_unit(waiter) {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    errors.push(e);
                }
            }

            let mut progress = false;
            while !progress {
                let Some(var) = rt.scheduler_mut().pop_pending() else {
                    break;
                };
                progress = collect_freeze_error(freeze_awaited(rt, var, &mut zero_waiters), errors)?;
            }

            if !progress {
                // set-aside variables somebody started waiting for since
                let (awaited, idle): (Vec<VarId>, Vec<VarId>) = std::mem::take(&mut zero_waiters)
                    .into_iter()
                    .filter(|var| !rt.is_ready(*var))
                    .partition(|var| rt.var(*var).is_ok_and(|v| v.waiter_count() > 0));
                zero_waiters = idle;
                for var in awaited {
                    if progress {
                        rt.scheduler_mut().add_possible(var);
                    } else {
                        progress = collect_freeze_error(freeze_awaited(rt, var, &mut zero_waiters), errors)?;
                    }
                }
            }

            if !progress {
                for var in std::mem::take(&mut zero_waiters) {
                    if rt.is_ready(var) {
                        continue;
                    }
                    if rt.var(var)?.providers() > 0 {
                        rt.unqueue(var);
                        continue;
                    }
                    collect_freeze_error(rt.freeze(var).map(|()| true), errors)?;
                    rt.metrics_mut().record_freeze(false);
                }
            }
            trace!(iteration, elapsed = ?round.elapsed(), "round finished");
        }
        Ok(iteration)
    }
}

/// Static checks the runtime relies on: sane bounds, symmetric relations,
/// known entities and plugins
fn validate(model: &Model, registry: &Registry) -> CompileResult<()> {
    Validator::new()
        .with_functions(registry.plugin_names())
        .validate(model)
        .map_err(|errors| {
            warn!(count = errors.len(), "model rejected by validation");
            let errors = errors
                .into_iter()
                .map(|e| CompileError::InvalidModel { message: e.to_string() })
                .collect();
            CompileError::collect(errors).unwrap_or_else(|| CompileError::invariant("validation failed without errors"))
        })
}

/// Freeze a pending variable if somebody waits for it and no producer is
/// still outstanding. Returns whether it was frozen.
fn freeze_awaited(rt: &mut Runtime, var: VarId, zero_waiters: &mut Vec<VarId>) -> CompileResult<bool> {
    if rt.is_ready(var) {
        return Ok(false);
    }
    let (providers, waiters) = {
        let variable = rt.var(var)?;
        (variable.providers(), variable.waiter_count())
    };
    if providers > 0 {
        rt.unqueue(var);
        return Ok(false);
    }
    if waiters == 0 {
        zero_waiters.push(var);
        return Ok(false);
    }
    rt.metrics_mut().record_freeze(true);
    rt.freeze(var)?;
    Ok(true)
}

/// A listener woken by a freeze may fail on a user error. The variable is
/// frozen regardless, so the error is collected and the round counts as
/// progress; fatal errors still abort.
fn collect_freeze_error(result: CompileResult<bool>, errors: &mut Vec<CompileError>) -> CompileResult<bool> {
    match result {
        Err(e) if !e.is_fatal() => {
            errors.push(e);
            Ok(true)
        }
        other => other,
    }
}

/// Create a variable for every name assigned at the top level of each
/// namespace. Returns the root resolver and the variables by qualified
/// name.
fn namespace_scopes(rt: &mut Runtime, model: &Model, types: &TypeRegistry) -> (Resolver, IndexMap<String, VarId>) {
    let mut scopes: IndexMap<String, IndexMap<String, VarId>> = IndexMap::new();
    scopes.insert(MAIN_NAMESPACE.to_string(), IndexMap::new());
    for entity in types.entities() {
        scopes.entry(entity.namespace.clone()).or_default();
        if let Some(block) = &entity.implementation {
            scopes.entry(block.namespace.clone()).or_default();
        }
    }

    let mut globals = IndexMap::new();
    for block in &model.blocks {
        let scope = scopes.entry(block.namespace.clone()).or_default();
        for name in block.variables() {
            if scope.contains_key(&name) {
                continue;
            }
            let qualified = format!("{}{NAMESPACE_SEPARATOR}{name}", block.namespace);
            let var = rt.new_variable(VariableKind::Plain, qualified.clone());
            scope.insert(name, var);
            globals.insert(qualified, var);
        }
    }
    (Resolver::new(scopes), globals)
}
