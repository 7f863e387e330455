//! EDM type information

pub mod models;

pub use models::{EdmModel, EdmProvider, EdmType, EntityType, PropertyDef, PropertyKind};
