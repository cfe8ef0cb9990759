//! Compile error taxonomy.
//!
//! Every failure the resolution core can report is a [`CompileError`].
//! Waiting for a value is not a failure and never shows up here; see
//! [`crate::Outcome`].

use crate::location::Location;

/// Compile result type
pub type CompileResult<T> = Result<T, CompileError>;

/// Classification of compile errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A value was read before it was available
    Unset,
    /// A variable was written beyond its contract
    DoubleSet,
    /// A name could not be resolved
    NotFound,
    /// An object never received a required attribute
    Incomplete,
    /// A value did not match the declared type
    Type,
    /// A plugin reported a failure
    Plugin,
    /// Resolution stopped without reaching a fixpoint
    Stuck,
    /// The model declarations are inconsistent
    Invalid,
    /// Internal consistency violation; the compile must abort
    Fatal,
    /// Several independent errors
    Multi,
}

/// Compile error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// Read before a value was set
    #[error("value not available: {variable}")]
    Unset {
        /// Description of the variable that was read
        variable: String,
    },

    /// Second write to a single-assignment variable
    #[error("value set twice on {variable}: new {new}, old {old}")]
    DoubleSet {
        /// Description of the variable
        variable: String,
        /// Value already stored
        old: String,
        /// Rejected value
        new: String,
    },

    /// Append beyond the upper cardinality bound
    #[error("list over full on {variable}: max nr of items is {high}, content is {content}")]
    ListOverfull {
        /// Description of the variable
        variable: String,
        /// Declared upper bound
        high: u32,
        /// Content at the time of the rejected append
        content: String,
    },

    /// Write to a list or option that is already final
    #[error("{variable} modified after freeze: rejected {value}")]
    ModifiedAfterFreeze {
        /// Description of the variable
        variable: String,
        /// Rejected value
        value: String,
    },

    /// Name resolution failure
    #[error("could not find {name}: {reason}")]
    NotFound {
        /// Name that was looked up
        name: String,
        /// Why it was not found
        reason: String,
    },

    /// Required attribute never set
    #[error("the object {instance} is not complete: attribute {attribute} ({declared_at}) is not set")]
    Incomplete {
        /// Description of the instance
        instance: String,
        /// Attribute name
        attribute: String,
        /// Where the attribute was declared
        declared_at: Location,
    },

    /// Type validation failure
    #[error("invalid value {value}, expected {expected}")]
    TypeMismatch {
        /// Expected type
        expected: String,
        /// Rejected value
        value: String,
    },

    /// Attribute access on something that is not an instance
    #[error("can not get attribute {attribute}, {value} is not an entity")]
    NotAnInstance {
        /// Attribute that was requested
        attribute: String,
        /// Value the attribute was requested on
        value: String,
    },

    /// Plugin failure
    #[error("plugin {plugin} failed: {message}")]
    Plugin {
        /// Plugin name
        plugin: String,
        /// Error message
        message: String,
    },

    /// The driver gave up after too many rounds
    #[error("could not complete model after {iterations} iterations")]
    IterationLimit {
        /// Rounds performed
        iterations: usize,
    },

    /// Statements that never executed
    #[error("not all statements executed: {}", .statements.join(", "))]
    Stuck {
        /// Descriptions of the waiting statements
        statements: Vec<String>,
    },

    /// The model failed static validation before resolution started
    #[error("invalid model: {message}")]
    InvalidModel {
        /// What the validator reported
        message: String,
    },

    /// Internal consistency violation
    #[error("SEVERE: COMPILER STATE CORRUPT: {message}")]
    Invariant {
        /// What went wrong
        message: String,
    },

    /// An error annotated with the statement it was raised in
    #[error("{cause} (reported in {statement} at {location})")]
    Located {
        /// Location of the statement
        location: Location,
        /// The statement or expression being evaluated
        statement: String,
        /// Underlying error
        cause: Box<CompileError>,
    },

    /// Several independent errors
    #[error("{} errors:\n{}", .0.len(), render_all(.0))]
    Multi(Vec<CompileError>),
}

fn render_all(errors: &[CompileError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl CompileError {
    /// Annotate with the statement being evaluated.
    ///
    /// An error that already carries a location keeps its innermost one,
    /// fatal errors are never wrapped.
    #[must_use]
    pub fn at(self, location: &Location, statement: impl std::fmt::Display) -> Self {
        match self {
            Self::Located { .. } | Self::Invariant { .. } | Self::Multi(_) => self,
            other => Self::Located {
                location: location.clone(),
                statement: statement.to_string(),
                cause: Box::new(other),
            },
        }
    }

    /// Error kind, looking through location annotations
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self.root_cause() {
            Self::Unset { .. } => ErrorKind::Unset,
            Self::DoubleSet { .. } | Self::ListOverfull { .. } | Self::ModifiedAfterFreeze { .. } => {
                ErrorKind::DoubleSet
            }
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Incomplete { .. } => ErrorKind::Incomplete,
            Self::TypeMismatch { .. } | Self::NotAnInstance { .. } => ErrorKind::Type,
            Self::Plugin { .. } => ErrorKind::Plugin,
            Self::IterationLimit { .. } | Self::Stuck { .. } => ErrorKind::Stuck,
            Self::InvalidModel { .. } => ErrorKind::Invalid,
            Self::Invariant { .. } => ErrorKind::Fatal,
            Self::Multi(_) => ErrorKind::Multi,
            Self::Located { .. } => unreachable!("root_cause strips annotations"),
        }
    }

    /// The error without location annotations
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Located { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Location of the outermost annotation, if any
    #[must_use]
    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::Located { location, .. } => Some(location),
            _ => None,
        }
    }

    /// Whether the compile must abort immediately
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// Collapse a list of errors: none, one, or `Multi`
    #[must_use]
    pub fn collect(mut errors: Vec<CompileError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multi(errors)),
        }
    }

    /// Shorthand for an invariant violation
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    /// Shorthand for a lookup failure
    #[must_use]
    pub fn not_found(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotFound {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
