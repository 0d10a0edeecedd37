//! Schema definitions for fact types.
//!
//! A schema declares how facts of a type are identified, which supertypes
//! they are visible under, and (optionally) which fields they carry.

use std::fmt;
use std::sync::Arc;

use kestrel_foundation::{Error, Result, Type, Value};

use crate::fact::FactType;

/// Caller-supplied identity extractor.
#[derive(Clone)]
pub struct KeyFn {
    name: Arc<str>,
    func: Arc<dyn Fn(&Value) -> Value + Send + Sync>,
}

impl KeyFn {
    /// Wraps a closure computing the identity of a fact value.
    pub fn new(
        name: impl Into<Arc<str>>,
        func: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Applies the extractor.
    #[must_use]
    pub fn call(&self, value: &Value) -> Value {
        (self.func)(value)
    }
}

impl fmt::Debug for KeyFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyFn({})", self.name)
    }
}

/// How two facts of the same type are recognised as the same fact.
#[derive(Clone, Debug, Default)]
pub enum Identity {
    /// The whole value is the identity.
    #[default]
    Value,
    /// A single field of a record value is the identity.
    Field(Arc<str>),
    /// A caller-supplied extractor computes the identity.
    Key(KeyFn),
}

/// Schema definition for a fact type.
#[derive(Clone, Debug)]
pub struct FactSchema {
    /// Type name.
    pub name: FactType,
    /// Identity policy.
    pub identity: Identity,
    /// Declared supertypes. Facts of this type also match patterns over these.
    pub supertypes: Vec<FactType>,
    /// Field definitions. Empty means the value is not validated.
    pub fields: Vec<FieldSchema>,
}

impl FactSchema {
    /// Creates a schema with whole-value identity and no fields.
    #[must_use]
    pub fn new(name: impl Into<FactType>) -> Self {
        Self {
            name: name.into(),
            identity: Identity::Value,
            supertypes: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Sets the identity policy.
    #[must_use]
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    /// Identifies facts by a single field.
    #[must_use]
    pub fn with_identity_field(self, field: impl Into<Arc<str>>) -> Self {
        self.with_identity(Identity::Field(field.into()))
    }

    /// Adds a supertype.
    #[must_use]
    pub fn with_supertype(mut self, supertype: impl Into<FactType>) -> Self {
        self.supertypes.push(supertype.into());
        self
    }

    /// Adds a field to the schema.
    #[must_use]
    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Returns the field schema by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| &*f.name == name)
    }

    /// Computes the identity of a value under this schema.
    ///
    /// # Errors
    ///
    /// Returns `AttributeNotFound` when the identity field is missing.
    pub fn identity_of(&self, value: &Value) -> Result<Value> {
        match &self.identity {
            Identity::Value => Ok(value.clone()),
            Identity::Field(field) => value
                .get(field)
                .cloned()
                .ok_or_else(|| Error::attribute_not_found(&**field, self.name.name())),
            Identity::Key(key) => Ok(key.call(value)),
        }
    }

    /// Validates a value against the declared fields.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` when the value is not a record or a field has
    /// the wrong type, and `AttributeNotFound` when a required field is absent.
    pub fn validate(&self, value: &Value) -> Result<()> {
        if self.fields.is_empty() {
            return Ok(());
        }
        if value.as_map().is_none() {
            return Err(Error::type_mismatch(
                Type::map(Type::String, Type::Any),
                value.value_type(),
            ));
        }
        for field in &self.fields {
            match value.get(&field.name) {
                Some(v) if !field.ty.accepts_value(v) => {
                    return Err(Error::type_mismatch(field.ty.clone(), v.value_type()));
                }
                None if field.required => {
                    return Err(Error::attribute_not_found(&*field.name, self.name.name()));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Schema definition for a fact field.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSchema {
    /// Field name.
    pub name: Arc<str>,
    /// Field type.
    pub ty: Type,
    /// Whether the field must be present.
    pub required: bool,
}

impl FieldSchema {
    /// Creates a required field.
    #[must_use]
    pub fn required(name: impl Into<Arc<str>>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
        }
    }

    /// Creates an optional field.
    #[must_use]
    pub fn optional(name: impl Into<Arc<str>>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
        }
    }
}
