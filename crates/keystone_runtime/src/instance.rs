//! Entity instances.
//!
//! An instance is a set of attribute slots, one variable per declared
//! attribute, plus a `self` variable holding the instance itself. The
//! slot kind follows the cardinality: `[1:1]` is a single-valued
//! attribute, `[0:1]` an option, anything else a list.

use crate::resolver::Scope;
use crate::runtime::Runtime;
use crate::variable::{Owner, Variable, VariableKind};
use indexmap::IndexMap;
use keystone_core::{CompileError, CompileResult, InstanceId, Location, Value, VarId};
use keystone_model::{AttributeDef, AttributeType, SlotKind};
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

/// Name of the slot holding the instance itself
pub const SELF_SLOT: &str = "self";

/// An instance of an entity
#[derive(Debug, Clone)]
pub struct Instance {
    id: InstanceId,
    entity: String,
    location: Location,
    slots: Scope,
}

impl Instance {
    /// Handle
    #[must_use]
    pub const fn id(&self) -> InstanceId {
        self.id
    }

    /// Entity name
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Where the instance was constructed
    #[must_use]
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Attribute slots, including `self`
    #[must_use]
    pub fn slots(&self) -> &Scope {
        &self.slots
    }

    /// Attribute slots, without `self`
    pub fn attributes(&self) -> impl Iterator<Item = (&str, VarId)> {
        self.slots
            .iter()
            .filter(|(name, _)| name.as_str() != SELF_SLOT)
            .map(|(name, var)| (name.as_str(), *var))
    }
}

impl std::fmt::Display for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.entity, self.id)
    }
}

fn slot_variable(kind: SlotKind, attribute: &AttributeDef) -> VariableKind {
    match kind {
        SlotKind::Single => VariableKind::Attribute,
        SlotKind::Optional => VariableKind::Option,
        SlotKind::List => VariableKind::List {
            low: attribute.low,
            high: attribute.high,
        },
    }
}

impl Runtime {
    /// Create an instance of `entity` with empty slots
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the entity does not exist
    pub fn new_instance(&mut self, entity: &str, location: &Location) -> CompileResult<InstanceId> {
        let types = Arc::clone(self.types());
        let def = types.entity(entity)?;
        let id = InstanceId::from_index(self.instances.len());

        let mut slots = IndexMap::with_capacity(def.attributes.len() + 1);
        for attribute in &def.attributes {
            let kind = slot_variable(attribute.slot_kind(), attribute);
            let variable = Variable::new(kind, format!("{entity} {id}.{}", attribute.name)).with_owner(Owner {
                instance: id,
                attribute: attribute.clone(),
            });
            slots.insert(attribute.name.clone(), self.add_variable(variable));
        }
        let this = self.new_variable(VariableKind::Plain, format!("{entity} {id}.{SELF_SLOT}"));
        self.set_value(this, Value::Instance(id), location, false)?;
        slots.insert(SELF_SLOT.to_string(), this);

        self.instances.push(Instance {
            id,
            entity: entity.to_string(),
            location: location.clone(),
            slots: Rc::new(slots),
        });
        self.metrics_mut().record_instance();
        debug!(instance = %id, entity, "created instance");
        Ok(id)
    }

    /// Look up an instance
    ///
    /// # Errors
    ///
    /// Returns a fatal error for an unknown handle
    pub fn instance(&self, id: InstanceId) -> CompileResult<&Instance> {
        self.instances
            .get(id.index())
            .ok_or_else(|| CompileError::invariant(format!("unknown instance {id}")))
    }

    /// Iterate over all instances, in creation order
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter()
    }

    /// Variable backing an attribute
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the entity has no such attribute
    pub fn get_attribute(&self, id: InstanceId, name: &str) -> CompileResult<VarId> {
        let instance = self.instance(id)?;
        instance.slots.get(name).copied().ok_or_else(|| {
            CompileError::not_found(name, format!("attribute {name} not found on {instance}"))
        })
    }

    /// Assign an attribute
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown attribute, or the assignment error
    pub fn set_attribute(
        &mut self,
        id: InstanceId,
        name: &str,
        value: Value,
        location: &Location,
        recur: bool,
    ) -> CompileResult<()> {
        let var = self.get_attribute(id, name)?;
        self.set_value(var, value, location, recur)
    }

    /// Human readable description of an instance
    ///
    /// # Errors
    ///
    /// Returns a fatal error for an unknown handle
    pub fn describe_instance(&self, id: InstanceId) -> CompileResult<String> {
        let instance = self.instance(id)?;
        Ok(format!("{instance} (created at {})", instance.location))
    }

    /// Close an instance: freeze every slot that can be frozen and report
    /// the ones that never got an acceptable value
    pub fn finalize(&mut self, id: InstanceId) -> Vec<CompileError> {
        let (description, slots) = match self.instance(id) {
            Ok(instance) => (instance.to_string(), Rc::clone(&instance.slots)),
            Err(e) => return vec![e],
        };
        let mut errors = Vec::new();
        for (name, var) in slots.iter() {
            if name == SELF_SLOT || self.is_ready(*var) {
                continue;
            }
            if self.can_get(*var) {
                if let Err(e) = self.freeze(*var) {
                    errors.push(e);
                }
                continue;
            }
            let declared_at = self
                .var(*var)
                .ok()
                .and_then(|variable| variable.owner())
                .map(|owner| owner.attribute.location.clone())
                .unwrap_or_default();
            errors.push(CompileError::Incomplete {
                instance: description.clone(),
                attribute: name.clone(),
                declared_at,
            });
        }
        errors
    }

    /// Whether every slot has its final value
    #[must_use]
    pub fn verify_done(&self, id: InstanceId) -> bool {
        self.instance(id)
            .is_ok_and(|instance| instance.slots.values().all(|var| self.is_ready(*var)))
    }

    /// Current value of every attribute; slots that never became ready
    /// show what they hold so far
    ///
    /// # Errors
    ///
    /// Returns a fatal error for an unknown handle
    pub fn attribute_values(&self, id: InstanceId) -> CompileResult<IndexMap<String, Value>> {
        let instance = self.instance(id)?;
        let mut out = IndexMap::new();
        for (name, var) in instance.attributes() {
            out.insert(name.to_string(), self.var(var)?.partial());
        }
        Ok(out)
    }

    /// Check a value against the declared type of the slot it is written to
    pub(crate) fn check_type(&self, var: VarId, value: &Value) -> CompileResult<()> {
        let variable = self.var(var)?;
        let Some(owner) = variable.owner() else {
            return Ok(());
        };
        let mismatch = || CompileError::TypeMismatch {
            expected: format!("{} for {}", owner.attribute.ty, variable.description()),
            value: value.to_string(),
        };
        match (&owner.attribute.ty, value) {
            (_, Value::Unknown) => Ok(()),
            (_, Value::Null) if variable.kind() == VariableKind::Option => Ok(()),
            (_, Value::Null) => Err(mismatch()),
            (AttributeType::Any, _)
            | (AttributeType::Bool, Value::Bool(_))
            | (AttributeType::Int, Value::Int(_))
            | (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Entity(name), Value::Instance(other)) => {
                let other = self.instance(*other)?;
                if other.entity() == name {
                    Ok(())
                } else {
                    Err(CompileError::TypeMismatch {
                        expected: format!("{name} for {}", variable.description()),
                        value: other.to_string(),
                    })
                }
            }
            _ => Err(mismatch()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use keystone_core::ErrorKind;
    use keystone_model::{EntityDef, TypeRegistry};

    fn runtime() -> Runtime {
        let types = TypeRegistry::from_entities([
            EntityDef::new("Host")
                .with_attribute(AttributeDef::scalar("name", AttributeType::String))
                .with_attribute(AttributeDef::optional("os", AttributeType::Entity("OS".to_string())))
                .with_attribute(
                    AttributeDef::bounded("files", AttributeType::Entity("File".to_string()), 0, None)
                        .with_counterpart("host"),
                )
                .with_attribute(
                    AttributeDef::bounded("ips", AttributeType::String, 1, Some(2))
                        .with_location(Location::new("model.ks", 5)),
                ),
            EntityDef::new("File").with_attribute(
                AttributeDef::scalar("host", AttributeType::Entity("Host".to_string())).with_counterpart("files"),
            ),
            EntityDef::new("OS"),
            EntityDef::new("Rack").with_attribute(
                AttributeDef::bounded("servers", AttributeType::Entity("Server".to_string()), 0, Some(2))
                    .with_counterpart("rack"),
            ),
            EntityDef::new("Server").with_attribute(
                AttributeDef::scalar("rack", AttributeType::Entity("Rack".to_string())).with_counterpart("servers"),
            ),
        ])
        .unwrap();
        Runtime::new(Arc::new(types), Arc::new(Registry::new()))
    }

    fn here() -> Location {
        Location::new("main.ks", 3)
    }

    #[test]
    fn test_slots_follow_bounds() {
        let mut rt = runtime();
        let host = rt.new_instance("Host", &here()).unwrap();
        let kind = |rt: &Runtime, name: &str| rt.variable(rt.get_attribute(host, name).unwrap()).kind();

        assert_eq!(kind(&rt, "name"), VariableKind::Attribute);
        assert_eq!(kind(&rt, "os"), VariableKind::Option);
        assert_eq!(kind(&rt, "files"), VariableKind::List { low: 0, high: None });
        assert_eq!(
            rt.get_value(rt.get_attribute(host, SELF_SLOT).unwrap()).unwrap(),
            Value::Instance(host)
        );
        assert_eq!(rt.metrics().instances_created, 1);
        assert_eq!(rt.get_attribute(host, "nope").unwrap_err().kind(), ErrorKind::NotFound);
        assert!(rt.new_instance("Nope", &here()).is_err());
    }

    #[test]
    fn test_relation_sets_counterpart() {
        let mut rt = runtime();
        let host = rt.new_instance("Host", &here()).unwrap();
        let file = rt.new_instance("File", &here()).unwrap();

        rt.set_attribute(file, "host", Value::Instance(host), &here(), true).unwrap();
        let files = rt.get_attribute(host, "files").unwrap();
        assert_eq!(rt.variable(files).partial(), Value::List(vec![Value::Instance(file)]));

        // assigning the other end explicitly as well is fine
        rt.set_attribute(host, "files", Value::Instance(file), &here(), true).unwrap();
        assert_eq!(rt.variable(files).partial(), Value::List(vec![Value::Instance(file)]));
    }

    #[test]
    fn test_full_relation_accepts_the_list_end() {
        let mut rt = runtime();
        let rack = rt.new_instance("Rack", &here()).unwrap();
        let a = rt.new_instance("Server", &here()).unwrap();
        let b = rt.new_instance("Server", &here()).unwrap();

        // the single ends fill the list and freeze it
        rt.set_attribute(a, "rack", Value::Instance(rack), &here(), true).unwrap();
        rt.set_attribute(b, "rack", Value::Instance(rack), &here(), true).unwrap();
        let servers = rt.get_attribute(rack, "servers").unwrap();
        assert!(rt.is_ready(servers));

        // writing the list end afterwards repeats what it holds
        let both = Value::List(vec![Value::Instance(a), Value::Instance(b)]);
        rt.set_attribute(rack, "servers", both.clone(), &here(), true).unwrap();
        assert_eq!(rt.get_value(servers).unwrap(), both);

        let c = rt.new_instance("Server", &here()).unwrap();
        let err = rt.set_attribute(c, "rack", Value::Instance(rack), &here(), true).unwrap_err();
        assert!(matches!(err.root_cause(), CompileError::ListOverfull { high: 2, .. }));
    }

    #[test]
    fn test_type_checks() {
        let mut rt = runtime();
        let host = rt.new_instance("Host", &here()).unwrap();
        let os = rt.new_instance("OS", &here()).unwrap();

        let err = rt.set_attribute(host, "name", Value::Int(1), &here(), true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        let err = rt.set_attribute(host, "name", Value::Null, &here(), true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        let err = rt.set_attribute(host, "files", Value::Instance(os), &here(), true).unwrap_err();
        assert!(err.to_string().contains("expected File"));

        rt.set_attribute(host, "name", Value::Unknown, &here(), true).unwrap();
        rt.set_attribute(host, "os", Value::Null, &here(), true).unwrap();
        assert_eq!(rt.get_value(rt.get_attribute(host, "os").unwrap()).unwrap(), Value::Null);
    }

    #[test]
    fn test_finalize_reports_missing() {
        let mut rt = runtime();
        let host = rt.new_instance("Host", &Location::new("main.ks", 9)).unwrap();
        rt.set_attribute(host, "name", Value::from("web"), &here(), true).unwrap();
        assert!(!rt.verify_done(host));

        let errors = rt.finalize(host);
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            CompileError::Incomplete {
                instance,
                attribute,
                declared_at,
            } => {
                assert_eq!(instance, "Host instance_00");
                assert_eq!(attribute, "ips");
                assert_eq!(declared_at, &Location::new("model.ks", 5));
            }
            other => panic!("unexpected error {other}"),
        }

        // the option and the empty list were frozen
        assert!(rt.is_ready(rt.get_attribute(host, "os").unwrap()));
        assert!(rt.is_ready(rt.get_attribute(host, "files").unwrap()));

        rt.set_attribute(host, "ips", Value::from("10.0.0.1"), &here(), true).unwrap();
        assert!(rt.finalize(host).is_empty());
        assert!(rt.verify_done(host));
        assert_eq!(
            rt.describe_instance(host).unwrap(),
            "Host instance_00 (created at main.ks:9)"
        );
    }
}
