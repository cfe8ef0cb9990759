//! Ready-or-pending results of evaluation.
//!
//! Reading a value that does not exist yet is not an error while the
//! model is still resolving: the reader gets `Pending` with the variable
//! it has to wait for, and the work unit that asked re-awaits on it.

use crate::id::VarId;

/// Result of an evaluation that may have to wait for a variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The value is available
    Ready(T),
    /// The value depends on a variable that has no value yet
    Pending(VarId),
}

impl<T> Outcome<T> {
    /// Whether the value is available
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Map the ready value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Ready(value) => Outcome::Ready(f(value)),
            Self::Pending(var) => Outcome::Pending(var),
        }
    }

    /// Get the ready value, if any
    #[must_use]
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Pending(_) => None,
        }
    }

    /// Get the variable being waited on, if any
    #[must_use]
    pub const fn pending(&self) -> Option<VarId> {
        match self {
            Self::Ready(_) => None,
            Self::Pending(var) => Some(*var),
        }
    }
}

/// Unwrap a `CompileResult<Outcome<T>>`, returning early with the error or
/// with `Ok(Outcome::Pending(_))` from the enclosing function.
#[macro_export]
macro_rules! ready {
    ($e:expr) => {
        match $e? {
            $crate::Outcome::Ready(value) => value,
            $crate::Outcome::Pending(var) => return Ok($crate::Outcome::Pending(var)),
        }
    };
}
