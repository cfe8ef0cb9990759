//! Entity and attribute metadata.
//!
//! This is the slice of the type system the runtime needs: per attribute
//! its cardinality bounds, declared type and relation counterpart, and per
//! entity the set of attribute names that make up an instance's slots.

use crate::ast::{Block, MAIN_NAMESPACE};
use keystone_core::{CompileError, CompileResult, Location};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Declared type of an attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// No validation
    Any,
    /// Boolean
    Bool,
    /// Integer
    Int,
    /// String
    String,
    /// Instance of the named entity
    Entity(String),
}

impl std::fmt::Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::String => write!(f, "string"),
            Self::Entity(name) => write!(f, "{name}"),
        }
    }
}

/// Which kind of variable backs an attribute slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Exactly one value (`[1:1]`)
    Single,
    /// Zero or one value (`[0:1]`)
    Optional,
    /// Any other bounds; accumulates values until frozen
    List,
}

/// A single attribute or relation end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDef {
    /// Attribute name
    pub name: String,
    /// Declared type
    #[serde(rename = "type")]
    pub ty: AttributeType,
    /// Lower cardinality bound
    #[serde(default = "default_low")]
    pub low: u32,
    /// Upper cardinality bound, `None` for unbounded
    #[serde(default = "default_high")]
    pub high: Option<u32>,
    /// Name of the attribute at the other end of a bidirectional relation
    #[serde(default)]
    pub counterpart: Option<String>,
    /// Where the attribute was declared
    #[serde(default)]
    pub location: Location,
}

fn default_low() -> u32 {
    1
}

#[allow(clippy::unnecessary_wraps)]
fn default_high() -> Option<u32> {
    Some(1)
}

impl AttributeDef {
    /// Single-valued attribute (`[1:1]`)
    #[must_use]
    pub fn scalar(name: impl Into<String>, ty: AttributeType) -> Self {
        Self {
            name: name.into(),
            ty,
            low: 1,
            high: Some(1),
            counterpart: None,
            location: Location::internal(),
        }
    }

    /// Optional attribute (`[0:1]`)
    #[must_use]
    pub fn optional(name: impl Into<String>, ty: AttributeType) -> Self {
        Self {
            low: 0,
            ..Self::scalar(name, ty)
        }
    }

    /// Attribute with explicit bounds
    #[must_use]
    pub fn bounded(name: impl Into<String>, ty: AttributeType, low: u32, high: Option<u32>) -> Self {
        Self {
            low,
            high,
            ..Self::scalar(name, ty)
        }
    }

    /// Set the relation counterpart
    #[must_use]
    pub fn with_counterpart(mut self, counterpart: impl Into<String>) -> Self {
        self.counterpart = Some(counterpart.into());
        self
    }

    /// Set the declaration location
    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    /// Pick the variable kind from the cardinality bounds
    #[must_use]
    pub fn slot_kind(&self) -> SlotKind {
        match (self.low, self.high) {
            (1, Some(1)) => SlotKind::Single,
            (0, Some(1)) => SlotKind::Optional,
            _ => SlotKind::List,
        }
    }

    /// Whether this attribute is one end of a bidirectional relation
    #[must_use]
    pub fn is_relation(&self) -> bool {
        self.counterpart.is_some()
    }
}

/// An entity definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Entity name
    pub name: String,
    /// Namespace the entity is defined in
    #[serde(default = "main_namespace")]
    pub namespace: String,
    /// Attributes, in declaration order
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
    /// Statements emitted once for every instance
    #[serde(default)]
    pub implementation: Option<Block>,
    /// Where the entity was declared
    #[serde(default)]
    pub location: Location,
}

fn main_namespace() -> String {
    MAIN_NAMESPACE.to_string()
}

impl EntityDef {
    /// Create an entity with no attributes in the main namespace
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: main_namespace(),
            attributes: Vec::new(),
            implementation: None,
            location: Location::internal(),
        }
    }

    /// Add an attribute
    #[must_use]
    pub fn with_attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Set the implementation block
    #[must_use]
    pub fn with_implementation(mut self, block: Block) -> Self {
        self.implementation = Some(block);
        self
    }

    /// Look up an attribute by name
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// All attribute names, in declaration order
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|a| a.name.as_str())
    }
}

/// Registry of all entity definitions, built once before resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeRegistry {
    entities: IndexMap<String, EntityDef>,
}

impl TypeRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of entities
    ///
    /// # Errors
    ///
    /// Returns error if two entities share a name
    pub fn from_entities(entities: impl IntoIterator<Item = EntityDef>) -> CompileResult<Self> {
        let mut registry = Self::new();
        for entity in entities {
            registry.register(entity)?;
        }
        Ok(registry)
    }

    /// Register an entity
    ///
    /// # Errors
    ///
    /// Returns error if the name is already taken
    pub fn register(&mut self, entity: EntityDef) -> CompileResult<()> {
        if self.entities.contains_key(&entity.name) {
            return Err(CompileError::TypeMismatch {
                expected: "unique entity name".to_string(),
                value: format!("{} (duplicate at {})", entity.name, entity.location),
            });
        }
        self.entities.insert(entity.name.clone(), entity);
        Ok(())
    }

    /// Get an entity by name
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the entity does not exist
    pub fn entity(&self, name: &str) -> CompileResult<&EntityDef> {
        self.entities
            .get(name)
            .ok_or_else(|| CompileError::not_found(name, format!("entity type {name} not found")))
    }

    /// Check whether an entity exists
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Iterate over all entities
    pub fn entities(&self) -> impl Iterator<Item = &EntityDef> {
        self.entities.values()
    }

    /// Number of entities
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
