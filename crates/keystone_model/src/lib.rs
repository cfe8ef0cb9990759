//! Keystone Model
//!
//! The declarations the resolution runtime consumes: entity and attribute
//! metadata (cardinality bounds, relation counterparts) and the tree of
//! statements to evaluate. Models can be loaded from JSON.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod entity;
pub mod validate;

pub use ast::{Block, Expr, Literal, Model, Statement, StatementKind, MAIN_NAMESPACE};
pub use entity::{AttributeDef, AttributeType, EntityDef, SlotKind, TypeRegistry};
pub use validate::{ValidationError, Validator};
