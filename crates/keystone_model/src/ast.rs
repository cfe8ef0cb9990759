//! Statement and expression tree.
//!
//! Statements are declarative: their textual order carries no meaning.
//! The runtime turns each statement into work units that run once the
//! values they need exist.

use crate::entity::EntityDef;
use keystone_core::{Location, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Namespace of statements that are not inside a module
pub const MAIN_NAMESPACE: &str = "__config__";

/// Separator between namespace and name in qualified names
pub const NAMESPACE_SEPARATOR: &str = "::";

/// Literal value as written in a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// String
    String(String),
    /// List of literals
    List(Vec<Literal>),
}

impl Literal {
    /// Convert to a runtime value
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::String(s) => Value::String(s.clone()),
            Self::List(items) => Value::List(items.iter().map(Literal::to_value).collect()),
        }
    }
}

/// Expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    /// Constant
    Literal {
        /// The value
        value: Literal,
    },
    /// Reference to a named variable, possibly namespace-qualified
    Reference {
        /// Name to resolve
        name: String,
    },
    /// `instance.attribute`
    Attribute {
        /// Expression producing the instance
        instance: Box<Expr>,
        /// Attribute name
        attribute: String,
    },
    /// Registered operator applied to operands
    Operator {
        /// Operator name
        op: String,
        /// Operands
        args: Vec<Expr>,
    },
    /// Plugin call
    Call {
        /// Plugin name
        function: String,
        /// Positional arguments
        #[serde(default)]
        args: Vec<Expr>,
        /// Keyword arguments
        #[serde(default)]
        kwargs: IndexMap<String, Expr>,
    },
    /// List built from expressions
    List {
        /// Elements
        items: Vec<Expr>,
    },
    /// Entity instantiation
    Constructor {
        /// Entity name
        entity: String,
        /// Attributes assigned at construction
        #[serde(default)]
        attributes: IndexMap<String, Expr>,
    },
}

impl Expr {
    /// Literal expression
    #[must_use]
    pub fn literal(value: Literal) -> Self {
        Self::Literal { value }
    }

    /// Reference expression
    #[must_use]
    pub fn reference(name: impl Into<String>) -> Self {
        Self::Reference { name: name.into() }
    }

    /// Attribute access
    #[must_use]
    pub fn attribute(instance: Expr, attribute: impl Into<String>) -> Self {
        Self::Attribute {
            instance: Box::new(instance),
            attribute: attribute.into(),
        }
    }

    /// Operator application
    #[must_use]
    pub fn operator(op: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::Operator { op: op.into(), args }
    }

    /// Plugin call with positional arguments
    #[must_use]
    pub fn call(function: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::Call {
            function: function.into(),
            args,
            kwargs: IndexMap::new(),
        }
    }

    /// Constructor
    #[must_use]
    pub fn construct<K: Into<String>>(
        entity: impl Into<String>,
        attributes: impl IntoIterator<Item = (K, Expr)>,
    ) -> Self {
        Self::Constructor {
            entity: entity.into(),
            attributes: attributes.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Names this expression reads, in evaluation order
    #[must_use]
    pub fn requires(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_requires(&mut out);
        out
    }

    fn collect_requires(&self, out: &mut Vec<String>) {
        match self {
            Self::Literal { .. } => {}
            Self::Reference { name } => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Self::Attribute { instance, .. } => instance.collect_requires(out),
            Self::Operator { args, .. } | Self::List { items: args } => {
                for arg in args {
                    arg.collect_requires(out);
                }
            }
            Self::Call { args, kwargs, .. } => {
                for arg in args.iter().chain(kwargs.values()) {
                    arg.collect_requires(out);
                }
            }
            Self::Constructor { attributes, .. } => {
                for value in attributes.values() {
                    value.collect_requires(out);
                }
            }
        }
    }

    /// Entity names this expression instantiates
    #[must_use]
    pub fn constructed_entities(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if let Self::Constructor { entity, .. } = e {
                out.push(entity.as_str());
            }
        });
        out
    }

    /// Plugin names this expression calls
    #[must_use]
    pub fn called_functions(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if let Self::Call { function, .. } = e {
                out.push(function.as_str());
            }
        });
        out
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Self::Literal { .. } | Self::Reference { .. } => {}
            Self::Attribute { instance, .. } => instance.visit(f),
            Self::Operator { args, .. } | Self::List { items: args } => {
                for arg in args {
                    arg.visit(f);
                }
            }
            Self::Call { args, kwargs, .. } => {
                for arg in args.iter().chain(kwargs.values()) {
                    arg.visit(f);
                }
            }
            Self::Constructor { attributes, .. } => {
                for value in attributes.values() {
                    value.visit(f);
                }
            }
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn join(f: &mut std::fmt::Formatter<'_>, items: &[Expr]) -> std::fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }

        match self {
            Self::Literal { value } => write!(f, "{}", value.to_value()),
            Self::Reference { name } => write!(f, "{name}"),
            Self::Attribute { instance, attribute } => write!(f, "{instance}.{attribute}"),
            Self::Operator { op, args } => {
                write!(f, "{op}(")?;
                join(f, args)?;
                write!(f, ")")
            }
            Self::Call { function, args, kwargs } => {
                write!(f, "{function}(")?;
                join(f, args)?;
                for (i, (k, v)) in kwargs.iter().enumerate() {
                    if i > 0 || !args.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                write!(f, ")")
            }
            Self::List { items } => {
                write!(f, "[")?;
                join(f, items)?;
                write!(f, "]")
            }
            Self::Constructor { entity, attributes } => {
                write!(f, "{entity}(")?;
                for (i, (k, v)) in attributes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Statement kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatementKind {
    /// `name = value`
    Assign {
        /// Variable name in the enclosing block
        name: String,
        /// Value expression
        value: Expr,
    },
    /// `instance.attribute = value`
    SetAttribute {
        /// Expression producing the instance
        instance: Expr,
        /// Attribute name
        attribute: String,
        /// Value expression
        value: Expr,
    },
    /// Expression evaluated for its effect (constructors, plugin calls)
    Evaluate {
        /// The expression
        expr: Expr,
    },
}

/// A located statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    /// What the statement does
    #[serde(flatten)]
    pub kind: StatementKind,
    /// Where it was written
    #[serde(default)]
    pub location: Location,
}

impl Statement {
    /// `name = value`
    #[must_use]
    pub fn assign(name: impl Into<String>, value: Expr) -> Self {
        Self::from(StatementKind::Assign {
            name: name.into(),
            value,
        })
    }

    /// `instance.attribute = value`
    #[must_use]
    pub fn set_attribute(instance: Expr, attribute: impl Into<String>, value: Expr) -> Self {
        Self::from(StatementKind::SetAttribute {
            instance,
            attribute: attribute.into(),
            value,
        })
    }

    /// Bare expression statement
    #[must_use]
    pub fn evaluate(expr: Expr) -> Self {
        Self::from(StatementKind::Evaluate { expr })
    }

    /// Set the location
    #[must_use]
    pub fn at(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    /// Every expression in this statement
    #[must_use]
    pub fn expressions(&self) -> Vec<&Expr> {
        match &self.kind {
            StatementKind::Assign { value, .. } => vec![value],
            StatementKind::SetAttribute { instance, value, .. } => vec![instance, value],
            StatementKind::Evaluate { expr } => vec![expr],
        }
    }
}

impl From<StatementKind> for Statement {
    fn from(kind: StatementKind) -> Self {
        Self {
            kind,
            location: Location::internal(),
        }
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            StatementKind::Assign { name, value } => write!(f, "{name} = {value}"),
            StatementKind::SetAttribute {
                instance,
                attribute,
                value,
            } => write!(f, "{instance}.{attribute} = {value}"),
            StatementKind::Evaluate { expr } => write!(f, "{expr}"),
        }
    }
}

/// A block of statements sharing one lexical scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Namespace the block belongs to
    #[serde(default = "main_namespace")]
    pub namespace: String,
    /// Statements
    #[serde(default)]
    pub statements: Vec<Statement>,
}

fn main_namespace() -> String {
    MAIN_NAMESPACE.to_string()
}

impl Block {
    /// Create an empty block
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            statements: Vec::new(),
        }
    }

    /// Add a statement
    #[must_use]
    pub fn with_statement(mut self, statement: Statement) -> Self {
        self.statements.push(statement);
        self
    }

    /// Names assigned in this block; each gets a slot in the block's scope
    #[must_use]
    pub fn variables(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for statement in &self.statements {
            if let StatementKind::Assign { name, .. } = &statement.kind {
                if !name.contains(NAMESPACE_SEPARATOR) && !out.contains(name) {
                    out.push(name.clone());
                }
            }
        }
        out
    }
}

/// A complete model: entity declarations plus top-level blocks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Entity declarations
    #[serde(default)]
    pub entities: Vec<EntityDef>,
    /// Top-level blocks, at most one per namespace
    #[serde(default)]
    pub blocks: Vec<Block>,
}

impl Model {
    /// Create an empty model
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the JSON does not describe a model
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_dedup_in_order() {
        let e = Expr::operator(
            "+",
            vec![
                Expr::reference("a"),
                Expr::attribute(Expr::reference("b"), "x"),
                Expr::reference("a"),
            ],
        );
        assert_eq!(e.requires(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_expr_display() {
        let e = Expr::call(
            "concat",
            vec![Expr::attribute(Expr::reference("a"), "name"), Expr::literal(Literal::Int(1))],
        );
        assert_eq!(e.to_string(), "concat(a.name, 1)");
    }

    #[test]
    fn test_block_variables() {
        let block = Block::new(MAIN_NAMESPACE)
            .with_statement(Statement::assign("a", Expr::literal(Literal::Int(1))))
            .with_statement(Statement::assign("other::b", Expr::literal(Literal::Int(1))))
            .with_statement(Statement::set_attribute(
                Expr::reference("a"),
                "x",
                Expr::literal(Literal::Null),
            ));
        assert_eq!(block.variables(), vec!["a".to_string()]);
    }

    #[test]
    fn test_literal_to_value() {
        let lit = Literal::List(vec![Literal::Int(1), Literal::String("x".to_string())]);
        assert_eq!(lit.to_value(), Value::List(vec![Value::Int(1), Value::from("x")]));
    }

    #[test]
    fn test_model_from_json() {
        let json = r#"{
            "entities": [{"name": "A", "attributes": [{"name": "n", "type": "int"}]}],
            "blocks": [{"statements": [
                {"kind": "assign", "name": "a", "value": {"kind": "constructor", "entity": "A",
                    "attributes": {"n": {"kind": "literal", "value": 3}}}},
                {"kind": "evaluate", "expr": {"kind": "call", "function": "print", "args": [{"kind": "reference", "name": "a"}]},
                 "location": {"file": "main.ks", "line": 2}}
            ]}]
        }"#;
        let model = Model::from_json(json).unwrap();
        assert_eq!(model.entities.len(), 1);
        assert_eq!(model.blocks[0].namespace, MAIN_NAMESPACE);
        assert_eq!(model.blocks[0].statements.len(), 2);
        assert_eq!(model.blocks[0].statements[1].location.line, 2);
        assert_eq!(
            model.blocks[0].statements[0].expressions()[0].constructed_entities(),
            vec!["A"]
        );
    }
}
