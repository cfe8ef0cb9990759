//! Dependency counter shared by all work units.

use keystone_core::{CompileError, CompileResult};

/// Counts outstanding dependencies of a work unit.
///
/// The count starts at one: a placeholder for the unit itself, released
/// once it has registered all its dependencies. The unit becomes runnable
/// exactly when the count drops back to zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Waiter {
    waitcount: i64,
}

impl Waiter {
    /// Create a waiter holding only its own placeholder
    #[must_use]
    pub const fn new() -> Self {
        Self { waitcount: 1 }
    }

    /// Register one more dependency
    pub fn await_one(&mut self) {
        self.waitcount += 1;
    }

    /// Release one dependency; returns true when the unit became runnable
    ///
    /// # Errors
    ///
    /// Returns a fatal invariant error if released more often than awaited
    pub fn ready(&mut self) -> CompileResult<bool> {
        self.waitcount -= 1;
        if self.waitcount < 0 {
            return Err(CompileError::invariant("waitcount negative"));
        }
        Ok(self.waitcount == 0)
    }

    /// Outstanding dependencies
    #[must_use]
    pub const fn waitcount(&self) -> i64 {
        self.waitcount
    }
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}
