//! Identifiers for keystone entities.
//!
//! Arena handles are plain indices into the runtime's arenas. They are
//! `Copy` so that instances and variables can refer to each other in
//! cycles without owning one another.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Compile identifier - identifies a single compile run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompileId(Uuid);

impl CompileId {
    /// Create a new random CompileId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CompileId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CompileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "compile_{}", self.0)
    }
}

/// Instance handle - index into the instance arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(u32);

impl InstanceId {
    /// Create from an arena index
    ///
    /// # Panics
    ///
    /// Panics if the arena grows beyond `u32::MAX` entries.
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("instance arena overflow"))
    }

    /// Get the arena index
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "instance_{:02x}", self.0)
    }
}

/// Variable handle - index into the variable arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(u32);

impl VarId {
    /// Create from an arena index
    ///
    /// # Panics
    ///
    /// Panics if the arena grows beyond `u32::MAX` entries.
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("variable arena overflow"))
    }

    /// Get the arena index
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for VarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "var_{}", self.0)
    }
}

/// Waiter handle - index into the scheduler's unit arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WaiterId(u32);

impl WaiterId {
    /// Create from an arena index
    ///
    /// # Panics
    ///
    /// Panics if the arena grows beyond `u32::MAX` entries.
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("waiter arena overflow"))
    }

    /// Get the arena index
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for WaiterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "waiter_{}", self.0)
    }
}
