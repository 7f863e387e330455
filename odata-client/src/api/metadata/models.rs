//! EDM type models used to classify property accesses
//!
//! Parsing a `$metadata` document is out of scope; callers either implement
//! [`EdmProvider`] over their own schema source or fill an [`EdmModel`]
//! by hand (or from [`ODataEntity`](crate::api::ODataEntity) impls).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Primitive EDM types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EdmType {
    String,
    Int32,
    Int64,
    Decimal,
    Double,
    Boolean,
    DateTimeOffset,
    Date,
    Guid,
    Enum(String),
    Other(String),
}

/// What a single property hop refers to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PropertyKind {
    /// Single primitive value
    Scalar(EdmType),
    /// Collection of primitives (`Collection(Edm.String)`)
    ScalarCollection(EdmType),
    /// Structured value without identity; members are addressed with `/`
    Complex(String),
    /// Reference to another entity type
    Navigation {
        /// Qualified or simple name of the target entity type
        target: String,
        /// `true` for `Collection(...)` navigations
        collection: bool,
    },
}

impl PropertyKind {
    /// Navigation properties fold into `$expand`
    pub fn is_navigation(&self) -> bool {
        matches!(self, PropertyKind::Navigation { .. })
    }

    /// Whether lambda operators (`any`/`all`) can range over this property
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            PropertyKind::ScalarCollection(_) | PropertyKind::Navigation { collection: true, .. }
        )
    }

    /// Type name to continue resolving from after this hop
    pub fn target_type(&self) -> Option<&str> {
        match self {
            PropertyKind::Complex(t) => Some(t),
            PropertyKind::Navigation { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// A declared property on an entity or complex type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub kind: PropertyKind,
}

/// Entity (or complex) type declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    /// Entity set name for URLs (e.g., "Products")
    #[serde(default)]
    pub entity_set_name: Option<String>,
    /// Key property names in declaration order
    #[serde(default)]
    pub keys: Vec<String>,
    pub properties: Vec<PropertyDef>,
}

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn entity_set(mut self, name: impl Into<String>) -> Self {
        self.entity_set_name = Some(name.into());
        self
    }

    pub fn key(mut self, name: impl Into<String>) -> Self {
        self.keys.push(name.into());
        self
    }

    pub fn scalar(mut self, name: impl Into<String>, ty: EdmType) -> Self {
        self.properties.push(PropertyDef {
            name: name.into(),
            kind: PropertyKind::Scalar(ty),
        });
        self
    }

    pub fn scalar_collection(mut self, name: impl Into<String>, ty: EdmType) -> Self {
        self.properties.push(PropertyDef {
            name: name.into(),
            kind: PropertyKind::ScalarCollection(ty),
        });
        self
    }

    pub fn complex(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.properties.push(PropertyDef {
            name: name.into(),
            kind: PropertyKind::Complex(type_name.into()),
        });
        self
    }

    /// Single-valued navigation
    pub fn reference(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.properties.push(PropertyDef {
            name: name.into(),
            kind: PropertyKind::Navigation {
                target: target.into(),
                collection: false,
            },
        });
        self
    }

    /// Collection-valued navigation
    pub fn collection(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.properties.push(PropertyDef {
            name: name.into(),
            kind: PropertyKind::Navigation {
                target: target.into(),
                collection: true,
            },
        });
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// Source of type information for structural classification
pub trait EdmProvider: Send + Sync {
    /// Look up a property declared on `type_name`
    fn property(&self, type_name: &str, property: &str) -> Option<PropertyKind>;

    /// Resolve the entity type behind an entity set name
    fn entity_type_for_set(&self, entity_set: &str) -> Option<String>;
}

/// In-memory EDM model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdmModel {
    types: HashMap<String, EntityType>,
}

impl EdmModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type; a later registration with the same name replaces it
    pub fn with_type(mut self, entity: EntityType) -> Self {
        self.add_type(entity);
        self
    }

    pub fn add_type(&mut self, entity: EntityType) {
        self.types.insert(entity.name.clone(), entity);
    }

    pub fn get(&self, type_name: &str) -> Option<&EntityType> {
        self.types
            .get(type_name)
            .or_else(|| self.types.get(unqualified(type_name)))
    }
}

impl EdmProvider for EdmModel {
    fn property(&self, type_name: &str, property: &str) -> Option<PropertyKind> {
        self.get(type_name)?
            .property(property)
            .map(|p| p.kind.clone())
    }

    fn entity_type_for_set(&self, entity_set: &str) -> Option<String> {
        self.types
            .values()
            .find(|t| t.entity_set_name.as_deref() == Some(entity_set))
            .map(|t| t.name.clone())
    }
}

/// Strip a namespace qualifier: `Sales.Order` → `Order`
fn unqualified(type_name: &str) -> &str {
    type_name.rsplit('.').next().unwrap_or(type_name)
}
