//! Declared shapes for entity types.
//!
//! A schema only pre-populates property containers when an entity of a known
//! type is created. It never validates later operations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Whether a property holds plain values or references to other entities.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    #[default]
    Primitive,
    Reference,
}

/// Descriptive collection shape of a property. Not enforced: every
/// container exposes all four facets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    #[default]
    Scalar,
    List,
    Set,
    Map,
}

/// Declaration of one property on an element type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropertyDefinition {
    pub name: String,
    #[serde(default)]
    pub kind: PropertyKind,
    #[serde(default)]
    pub collection: CollectionKind,
    /// Target type name for reference properties.
    #[serde(default)]
    pub reference_type: Option<String>,
}

impl PropertyDefinition {
    pub fn new(name: impl Into<String>, kind: PropertyKind, collection: CollectionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            collection,
            reference_type: None,
        }
    }

    pub fn with_reference_type(mut self, type_name: impl Into<String>) -> Self {
        self.reference_type = Some(type_name.into());
        self
    }
}

/// A named entity type and its property declarations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ElementType {
    pub name: String,
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
}

impl ElementType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    /// Add or replace a property declaration (names match case-insensitively).
    pub fn add_property(&mut self, definition: PropertyDefinition) {
        match self
            .properties
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(&definition.name))
        {
            Some(existing) => *existing = definition,
            None => self.properties.push(definition),
        }
    }

    pub fn with_property(mut self, definition: PropertyDefinition) -> Self {
        self.add_property(definition);
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

/// Registry of element types keyed case-insensitively by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRegistry {
    types: BTreeMap<String, ElementType>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, element_type: ElementType) {
        self.types
            .insert(element_type.name.to_ascii_lowercase(), element_type);
    }

    pub fn get(&self, name: &str) -> Option<&ElementType> {
        self.types.get(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FromIterator<ElementType> for SchemaRegistry {
    fn from_iter<I: IntoIterator<Item = ElementType>>(iter: I) -> Self {
        let mut registry = Self::new();
        for element_type in iter {
            registry.register(element_type);
        }
        registry
    }
}
