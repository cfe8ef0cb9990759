//! Runtime values stored in variables.

use crate::id::InstanceId;
use serde::ser::{Serialize, SerializeSeq, Serializer};

/// A value produced during resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// Absent value; what an unset optional attribute resolves to
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// String
    String(String),
    /// Ordered list
    List(Vec<Value>),
    /// Reference to an entity instance
    Instance(InstanceId),
    /// A value that cannot be determined during this compile
    Unknown,
}

impl Value {
    /// Whether this is the `Unknown` sentinel
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Get the instance handle, if this is an instance
    #[must_use]
    pub const fn as_instance(&self) -> Option<InstanceId> {
        match self {
            Self::Instance(id) => Some(*id),
            _ => None,
        }
    }

    /// Name of the value's kind, for error messages
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Instance(_) => "instance",
            Self::Unknown => "unknown",
        }
    }

    /// Truthiness used by boolean operators
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null | Self::Unknown => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::String(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Instance(_) => true,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Instance(id) => write!(f, "{id}"),
            Self::Unknown => write!(f, "<unknown>"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<InstanceId> for Value {
    fn from(value: InstanceId) -> Self {
        Self::Instance(value)
    }
}

// Instances serialize as their display handle so reports stay readable.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Instance(id) => serializer.collect_str(id),
            Self::Unknown => serializer.serialize_str("<unknown>"),
        }
    }
}
