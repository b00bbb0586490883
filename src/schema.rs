//! Object type declarations.
//!
//! A [`Schema`] lists every object type a store can hold. Tables are laid
//! out from it: one table per [`ObjectSchema`], one field per [`Property`].

use crate::error::{Result, StoreError};
use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Storage type of a property or list element.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyType {
    Bool,
    Int,
    Double,
    String,
    /// Link to an object of the named type.
    Object(String),
}

impl PropertyType {
    /// Name used in error messages.
    pub fn name(&self) -> String {
        match self {
            PropertyType::Bool => "bool".into(),
            PropertyType::Int => "int".into(),
            PropertyType::Double => "double".into(),
            PropertyType::String => "string".into(),
            PropertyType::Object(target) => format!("link<{}>", target),
        }
    }

    fn zero(&self) -> Value {
        match self {
            PropertyType::Bool => Value::Bool(false),
            PropertyType::Int => Value::Int(0),
            PropertyType::Double => Value::Double(0.0),
            PropertyType::String => Value::String(String::new()),
            PropertyType::Object(_) => Value::Null,
        }
    }
}

/// One declared property of an object type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub ty: PropertyType,
    /// Whether `Null` is accepted. Single links are always optional.
    pub optional: bool,
    /// Whether this property is an ordered list of `ty`.
    pub list: bool,
    /// Value for newly created objects (`None` = zero value of `ty`).
    #[serde(default)]
    pub default: Option<Value>,
}

impl Property {
    /// A required scalar property.
    pub fn new(name: impl Into<String>, ty: PropertyType) -> Self {
        let optional = matches!(ty, PropertyType::Object(_));
        Self {
            name: name.into(),
            ty,
            optional,
            list: false,
            default: None,
        }
    }

    /// An optional scalar property.
    pub fn optional(name: impl Into<String>, ty: PropertyType) -> Self {
        Self {
            optional: true,
            ..Self::new(name, ty)
        }
    }

    /// A single link to another object type.
    pub fn link(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Object(target.into()))
    }

    /// An ordered list property.
    pub fn list(name: impl Into<String>, ty: PropertyType) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: false,
            list: true,
            default: None,
        }
    }

    /// Set the default value for new objects.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Value a freshly created object gets for this property.
    pub(crate) fn initial_value(&self) -> Value {
        match &self.default {
            Some(v) => v.clone(),
            None if self.optional => Value::Null,
            None => self.ty.zero(),
        }
    }

    /// Check a value against this property's element type.
    ///
    /// For list properties this validates a single element. Link targets
    /// are checked by the caller, which knows the tables.
    pub(crate) fn check(&self, value: &Value) -> Result<()> {
        let ok = match (&self.ty, value) {
            (_, Value::Null) => self.optional && !self.list,
            (PropertyType::Bool, Value::Bool(_)) => true,
            (PropertyType::Int, Value::Int(_)) => true,
            (PropertyType::Double, Value::Double(_)) => true,
            (PropertyType::String, Value::String(_)) => true,
            (PropertyType::Object(_), Value::Link(_)) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(StoreError::TypeMismatch {
                property: self.name.clone(),
                expected: self.type_description(),
                got: value.kind_name().to_string(),
            })
        }
    }

    fn type_description(&self) -> String {
        let base = self.ty.name();
        match (self.list, self.optional) {
            (true, _) => format!("list<{}>", base),
            (false, true) => format!("{}?", base),
            (false, false) => base,
        }
    }

    /// Target type name when this property holds links.
    pub fn link_target(&self) -> Option<&str> {
        match &self.ty {
            PropertyType::Object(target) => Some(target),
            _ => None,
        }
    }
}

/// Declaration of one object type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectSchema {
    pub name: String,
    pub properties: Vec<Property>,
}

impl ObjectSchema {
    pub fn new(name: impl Into<String>, properties: Vec<Property>) -> Self {
        Self {
            name: name.into(),
            properties,
        }
    }

    /// Position of a property by name.
    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    pub(crate) fn property_or_err(&self, name: &str) -> Result<(usize, &Property)> {
        self.property_index(name)
            .map(|i| (i, &self.properties[i]))
            .ok_or_else(|| StoreError::UnknownProperty {
                object_type: self.name.clone(),
                property: name.to_string(),
            })
    }
}

/// The full set of object types in a store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub objects: Vec<ObjectSchema>,
}

impl Schema {
    pub fn new(objects: Vec<ObjectSchema>) -> Self {
        Self { objects }
    }

    /// Position of an object type by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.objects.iter().position(|o| o.name == name)
    }

    /// Reject duplicate names, dangling link targets and ill-typed defaults.
    pub fn validate(&self) -> Result<()> {
        let mut type_names = HashSet::new();
        for object in &self.objects {
            if !type_names.insert(object.name.as_str()) {
                return Err(StoreError::InvalidSchema(format!(
                    "duplicate object type '{}'",
                    object.name
                )));
            }
        }

        for object in &self.objects {
            let mut prop_names = HashSet::new();
            for prop in &object.properties {
                if !prop_names.insert(prop.name.as_str()) {
                    return Err(StoreError::InvalidSchema(format!(
                        "duplicate property '{}.{}'",
                        object.name, prop.name
                    )));
                }
                if let Some(target) = prop.link_target() {
                    if !type_names.contains(target) {
                        return Err(StoreError::InvalidSchema(format!(
                            "'{}.{}' links to unknown type '{}'",
                            object.name, prop.name, target
                        )));
                    }
                }
                if let Some(default) = &prop.default {
                    if prop.list || prop.link_target().is_some() {
                        return Err(StoreError::InvalidSchema(format!(
                            "'{}.{}' cannot have a default value",
                            object.name, prop.name
                        )));
                    }
                    prop.check(default)
                        .map_err(|e| StoreError::InvalidSchema(e.to_string()))?;
                }
            }
        }

        Ok(())
    }
}
