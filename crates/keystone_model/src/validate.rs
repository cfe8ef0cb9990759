//! Static model validator.
//!
//! Catches declaration mistakes before resolution starts, so that the
//! runtime only ever sees relation ends that point back at each other.

use crate::ast::{Expr, Model, Statement};
use crate::entity::{AttributeType, EntityDef, TypeRegistry};
use indexmap::IndexSet;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Lower bound above upper bound
    InvalidBounds { entity: String, attribute: String, low: u32, high: u32 },
    /// Attribute declared twice on one entity
    DuplicateAttribute { entity: String, attribute: String },
    /// Entity name used twice
    DuplicateEntity { entity: String },
    /// Attribute type names an entity that does not exist
    UnknownEntity { context: String, entity: String },
    /// Counterpart attribute does not exist on the related entity
    MissingCounterpart { entity: String, attribute: String, counterpart: String },
    /// Counterpart exists but does not point back
    AsymmetricRelation { entity: String, attribute: String, counterpart: String },
    /// Counterpart declared on a non-entity attribute
    CounterpartOnValue { entity: String, attribute: String },
    /// Constructor assigns an attribute the entity does not have
    UnknownAttribute { context: String, entity: String, attribute: String },
    /// Call to a plugin that is not registered
    UnknownFunction { context: String, function: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBounds { entity, attribute, low, high } => {
                write!(f, "Invalid bounds on {}.{}: [{}:{}]", entity, attribute, low, high)
            }
            Self::DuplicateAttribute { entity, attribute } => {
                write!(f, "Attribute {} defined twice on {}", attribute, entity)
            }
            Self::DuplicateEntity { entity } => write!(f, "Entity {} defined twice", entity),
            Self::UnknownEntity { context, entity } => {
                write!(f, "Unknown entity {} referenced in {}", entity, context)
            }
            Self::MissingCounterpart { entity, attribute, counterpart } => write!(
                f,
                "Relation {}.{} names counterpart {} which does not exist",
                entity, attribute, counterpart
            ),
            Self::AsymmetricRelation { entity, attribute, counterpart } => write!(
                f,
                "Relation {}.{} and its counterpart {} do not point at each other",
                entity, attribute, counterpart
            ),
            Self::CounterpartOnValue { entity, attribute } => {
                write!(f, "Attribute {}.{} has a counterpart but is not a relation", entity, attribute)
            }
            Self::UnknownAttribute { context, entity, attribute } => {
                write!(f, "Entity {} has no attribute {} (in {})", entity, attribute, context)
            }
            Self::UnknownFunction { context, function } => {
                write!(f, "Unknown function {} called in {}", function, context)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validator for model declarations
pub struct Validator {
    /// Plugin names that calls may refer to; `None` skips the check
    pub functions: Option<IndexSet<String>>,
}

impl Validator {
    /// Create a new validator
    #[must_use]
    pub fn new() -> Self {
        Self { functions: None }
    }

    /// Also check calls against these plugin names
    #[must_use]
    pub fn with_functions<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.functions = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Validate a model
    ///
    /// # Errors
    ///
    /// Returns every problem found
    pub fn validate(&self, model: &Model) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let mut registry = TypeRegistry::new();
        for entity in &model.entities {
            if registry.register(entity.clone()).is_err() {
                errors.push(ValidationError::DuplicateEntity {
                    entity: entity.name.clone(),
                });
            }
        }

        for entity in registry.entities() {
            self.check_entity(entity, &registry, &mut errors);
            if let Some(block) = &entity.implementation {
                for statement in &block.statements {
                    self.check_statement(statement, &registry, &mut errors);
                }
            }
        }

        for block in &model.blocks {
            for statement in &block.statements {
                self.check_statement(statement, &registry, &mut errors);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Check bounds, duplicates and relation symmetry of one entity
    fn check_entity(&self, entity: &EntityDef, registry: &TypeRegistry, errors: &mut Vec<ValidationError>) {
        let mut seen = IndexSet::new();
        for attr in &entity.attributes {
            if !seen.insert(attr.name.as_str()) {
                errors.push(ValidationError::DuplicateAttribute {
                    entity: entity.name.clone(),
                    attribute: attr.name.clone(),
                });
            }

            if let Some(high) = attr.high {
                if attr.low > high || high == 0 {
                    errors.push(ValidationError::InvalidBounds {
                        entity: entity.name.clone(),
                        attribute: attr.name.clone(),
                        low: attr.low,
                        high,
                    });
                }
            }

            let target = match &attr.ty {
                AttributeType::Entity(target) => target,
                _ => {
                    if attr.counterpart.is_some() {
                        errors.push(ValidationError::CounterpartOnValue {
                            entity: entity.name.clone(),
                            attribute: attr.name.clone(),
                        });
                    }
                    continue;
                }
            };

            let Ok(other) = registry.entity(target) else {
                errors.push(ValidationError::UnknownEntity {
                    context: format!("{}.{}", entity.name, attr.name),
                    entity: target.clone(),
                });
                continue;
            };

            let Some(counterpart) = &attr.counterpart else {
                continue;
            };

            match other.attribute(counterpart) {
                None => errors.push(ValidationError::MissingCounterpart {
                    entity: entity.name.clone(),
                    attribute: attr.name.clone(),
                    counterpart: format!("{}.{}", other.name, counterpart),
                }),
                Some(back) => {
                    let points_back = back.counterpart.as_deref() == Some(attr.name.as_str())
                        && back.ty == AttributeType::Entity(entity.name.clone());
                    if !points_back {
                        errors.push(ValidationError::AsymmetricRelation {
                            entity: entity.name.clone(),
                            attribute: attr.name.clone(),
                            counterpart: format!("{}.{}", other.name, counterpart),
                        });
                    }
                }
            }
        }
    }

    /// Check constructors and calls inside a statement
    fn check_statement(&self, statement: &Statement, registry: &TypeRegistry, errors: &mut Vec<ValidationError>) {
        let context = format!("{} ({})", statement, statement.location);
        for expr in statement.expressions() {
            self.check_expr(expr, &context, registry, errors);
        }
    }

    fn check_expr(&self, expr: &Expr, context: &str, registry: &TypeRegistry, errors: &mut Vec<ValidationError>) {
        for name in expr.constructed_entities() {
            if !registry.contains(name) {
                errors.push(ValidationError::UnknownEntity {
                    context: context.to_string(),
                    entity: name.to_string(),
                });
            }
        }

        if let Some(functions) = &self.functions {
            for function in expr.called_functions() {
                if !functions.contains(function) {
                    errors.push(ValidationError::UnknownFunction {
                        context: context.to_string(),
                        function: function.to_string(),
                    });
                }
            }
        }

        self.check_constructor_attributes(expr, context, registry, errors);
    }

    fn check_constructor_attributes(
        &self,
        expr: &Expr,
        context: &str,
        registry: &TypeRegistry,
        errors: &mut Vec<ValidationError>,
    ) {
        match expr {
            Expr::Constructor { entity, attributes } => {
                if let Ok(def) = registry.entity(entity) {
                    for name in attributes.keys() {
                        if def.attribute(name).is_none() {
                            errors.push(ValidationError::UnknownAttribute {
                                context: context.to_string(),
                                entity: entity.clone(),
                                attribute: name.clone(),
                            });
                        }
                    }
                }
                for value in attributes.values() {
                    self.check_constructor_attributes(value, context, registry, errors);
                }
            }
            Expr::Attribute { instance, .. } => {
                self.check_constructor_attributes(instance, context, registry, errors);
            }
            Expr::Operator { args, .. } | Expr::List { items: args } => {
                for arg in args {
                    self.check_constructor_attributes(arg, context, registry, errors);
                }
            }
            Expr::Call { args, kwargs, .. } => {
                for arg in args.iter().chain(kwargs.values()) {
                    self.check_constructor_attributes(arg, context, registry, errors);
                }
            }
            Expr::Literal { .. } | Expr::Reference { .. } => {}
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Block, Literal, MAIN_NAMESPACE};
    use crate::entity::AttributeDef;

    fn relation_model() -> Model {
        Model {
            entities: vec![
                EntityDef::new("A").with_attribute(
                    AttributeDef::bounded("requires", AttributeType::Entity("B".into()), 0, None)
                        .with_counterpart("provides"),
                ),
                EntityDef::new("B").with_attribute(
                    AttributeDef::bounded("provides", AttributeType::Entity("A".into()), 0, None)
                        .with_counterpart("requires"),
                ),
            ],
            blocks: Vec::new(),
        }
    }

    #[test]
    fn test_validate_symmetric_relation() {
        assert!(Validator::new().validate(&relation_model()).is_ok());
    }

    #[test]
    fn test_validate_missing_counterpart() {
        let mut model = relation_model();
        model.entities[1].attributes.clear();
        let errors = Validator::new().validate(&model).unwrap_err();
        assert!(matches!(errors[0], ValidationError::MissingCounterpart { .. }));
    }

    #[test]
    fn test_validate_asymmetric_relation() {
        let mut model = relation_model();
        model.entities[1].attributes[0].counterpart = Some("other".to_string());
        let errors = Validator::new().validate(&model).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::AsymmetricRelation { .. })));
    }

    #[test]
    fn test_validate_bounds() {
        let model = Model {
            entities: vec![EntityDef::new("A").with_attribute(AttributeDef::bounded(
                "l",
                AttributeType::Int,
                3,
                Some(2),
            ))],
            blocks: Vec::new(),
        };
        let errors = Validator::new().validate(&model).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("[3:2]"));
    }

    #[test]
    fn test_validate_unknown_entity_and_function() {
        let model = Model {
            entities: vec![EntityDef::new("A")],
            blocks: vec![Block::new(MAIN_NAMESPACE)
                .with_statement(Statement::assign("x", Expr::construct("Missing", Vec::<(String, Expr)>::new())))
                .with_statement(Statement::evaluate(Expr::call("nope", vec![])))
                .with_statement(Statement::assign(
                    "y",
                    Expr::construct("A", [("ghost", Expr::literal(Literal::Int(1)))]),
                ))],
        };
        let errors = Validator::new()
            .with_functions(["print"])
            .validate(&model)
            .unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownEntity { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownFunction { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownAttribute { .. })));
    }

    #[test]
    fn test_validate_duplicate_entity() {
        let model = Model {
            entities: vec![EntityDef::new("A"), EntityDef::new("A")],
            blocks: Vec::new(),
        };
        let errors = Validator::new().validate(&model).unwrap_err();
        assert_eq!(errors, vec![ValidationError::DuplicateEntity { entity: "A".to_string() }]);
    }
}
