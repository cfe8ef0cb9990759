//! Keystone Core Types
//!
//! Pure types shared by the model and the resolution runtime.
//! Nothing in this crate performs I/O or holds engine state.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;
pub mod location;
pub mod outcome;
pub mod value;

// Re-exports
pub use error::{CompileError, CompileResult, ErrorKind};
pub use id::{CompileId, InstanceId, VarId, WaiterId};
pub use location::Location;
pub use outcome::Outcome;
pub use value::Value;
