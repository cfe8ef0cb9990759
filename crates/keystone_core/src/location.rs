//! Source locations attached to statements, attributes and errors.

use serde::{Deserialize, Serialize};

/// A position in a model source file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// File the statement was read from
    pub file: String,
    /// 1-based line number
    pub line: u32,
}

impl Location {
    /// Create a new location
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// Location for things the compiler itself creates
    #[must_use]
    pub fn internal() -> Self {
        Self::new("<internal>", 0)
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::internal()
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        assert_eq!(Location::new("main.ks", 12).to_string(), "main.ks:12");
    }

    #[test]
    fn test_location_default_is_internal() {
        assert_eq!(Location::default(), Location::internal());
    }
}
