//! Keystone Runtime
//!
//! Dataflow resolution for declarative configuration models.
//! Statements become work units that wait on single-assignment variables;
//! a fixpoint driver runs them and freezes lists and optional attributes
//! once no other progress is possible.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod call;
pub mod emit;
pub mod engine;
pub mod instance;
pub mod monitor;
pub mod reference;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod scheduler;
pub mod units;
pub mod variable;
pub mod waiter;

pub use call::{FunctionUnit, PluginContext};
pub use engine::{CompileReport, Engine, EngineConfig, InstanceReport};
pub use instance::{Instance, SELF_SLOT};
pub use monitor::Metrics;
pub use reference::{AttributeReferenceHelper, GradualHelper};
pub use registry::{FnOperator, FnPlugin, Operator, Plugin, Registry, RegistryError};
pub use resolver::{Resolver, Scope};
pub use runtime::Runtime;
pub use scheduler::{QueueScheduler, UnitState};
pub use units::{ExecutionUnit, HangUnit, Resume, Step, Unit, WaitUnit};
pub use variable::{Listener, Owner, Variable, VariableKind};
pub use waiter::Waiter;
