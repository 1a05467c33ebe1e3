//! Entities and their property containers.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::schema::{CollectionKind, PropertyDefinition, PropertyKind};
use crate::operation::PropertyValue;

/// One entry of a list facet.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ListEntry {
    /// Opaque position id assigned at insertion.
    pub item_id: String,
    pub value: PropertyValue,
}

/// One entry of a map facet. `key` keeps the spelling it was first written
/// with; lookups ignore case.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MapEntry {
    pub key: String,
    pub value: PropertyValue,
}

// ---------------------------------------------------------------------------
// Property container
// ---------------------------------------------------------------------------

/// Storage for one property. All four facets exist side by side; each
/// operation kind addresses the facet it implies.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PropertyContainer {
    definition: PropertyDefinition,
    scalar: Option<PropertyValue>,
    list: Vec<ListEntry>,
    set: BTreeSet<PropertyValue>,
    map: BTreeMap<String, MapEntry>,
}

impl PropertyContainer {
    pub fn new(definition: PropertyDefinition) -> Self {
        Self {
            definition,
            scalar: None,
            list: Vec::new(),
            set: BTreeSet::new(),
            map: BTreeMap::new(),
        }
    }

    pub fn definition(&self) -> &PropertyDefinition {
        &self.definition
    }

    // -----------------------------------------------------------------------
    // Scalar
    // -----------------------------------------------------------------------

    pub fn scalar(&self) -> Option<&PropertyValue> {
        self.scalar.as_ref()
    }

    /// Last write wins.
    pub fn set(&mut self, value: PropertyValue) {
        self.scalar = Some(value);
    }

    // -----------------------------------------------------------------------
    // List
    // -----------------------------------------------------------------------

    pub fn list(&self) -> &[ListEntry] {
        &self.list
    }

    /// Insert a new entry and return the index it landed at.
    ///
    /// With no `after_item_id` the entry goes to the head. With an
    /// `after_item_id` that is not present it goes to the tail.
    pub fn add_to_list(
        &mut self,
        item_id: String,
        value: PropertyValue,
        after_item_id: Option<&str>,
    ) -> usize {
        let index = match after_item_id {
            None => 0,
            Some(after) => self
                .list
                .iter()
                .position(|entry| entry.item_id == after)
                .map_or(self.list.len(), |i| i + 1),
        };
        self.list.insert(index, ListEntry { item_id, value });
        index
    }

    /// Remove the entry with `item_id`. Returns whether anything was removed.
    pub fn remove_from_list(&mut self, item_id: &str) -> bool {
        match self.list.iter().position(|entry| entry.item_id == item_id) {
            Some(index) => {
                self.list.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn last_list_item_id(&self) -> Option<&str> {
        self.list.last().map(|entry| entry.item_id.as_str())
    }

    // -----------------------------------------------------------------------
    // Set
    // -----------------------------------------------------------------------

    pub fn set_values(&self) -> impl Iterator<Item = &PropertyValue> {
        self.set.iter()
    }

    pub fn set_contains(&self, value: &PropertyValue) -> bool {
        self.set.contains(value)
    }

    /// Returns whether the value was newly added.
    pub fn add_to_set(&mut self, value: PropertyValue) -> bool {
        self.set.insert(value)
    }

    /// Returns whether the value was present.
    pub fn remove_from_set(&mut self, value: &PropertyValue) -> bool {
        self.set.remove(value)
    }

    // -----------------------------------------------------------------------
    // Map
    // -----------------------------------------------------------------------

    pub fn map_entries(&self) -> impl Iterator<Item = &MapEntry> {
        self.map.values()
    }

    pub fn map_entry(&self, key: &str) -> Option<&PropertyValue> {
        self.map
            .get(&key.to_ascii_lowercase())
            .map(|entry| &entry.value)
    }

    /// Last write wins; keys compare case-insensitively.
    pub fn update_map(&mut self, key: &str, value: PropertyValue) {
        match self.map.entry(key.to_ascii_lowercase()) {
            Entry::Occupied(mut occupied) => occupied.get_mut().value = value,
            Entry::Vacant(vacant) => {
                vacant.insert(MapEntry {
                    key: key.to_string(),
                    value,
                });
            }
        }
    }

    /// Returns whether the key was present.
    pub fn remove_map_entry(&mut self, key: &str) -> bool {
        self.map.remove(&key.to_ascii_lowercase()).is_some()
    }
}

// ---------------------------------------------------------------------------
// Element
// ---------------------------------------------------------------------------

/// A materialized entity.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Element {
    pub id: String,
    pub element_type: Option<String>,
    /// Keyed by lowercased property name.
    properties: BTreeMap<String, PropertyContainer>,
}

impl Element {
    pub fn new(id: impl Into<String>, element_type: Option<String>) -> Self {
        Self {
            id: id.into(),
            element_type,
            properties: BTreeMap::new(),
        }
    }

    /// Install an empty container for `definition`, replacing any existing one.
    pub fn add_property(&mut self, definition: PropertyDefinition) {
        self.properties.insert(
            definition.name.to_ascii_lowercase(),
            PropertyContainer::new(definition),
        );
    }

    pub fn property(&self, name: &str) -> Option<&PropertyContainer> {
        self.properties.get(&name.to_ascii_lowercase())
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyContainer> {
        self.properties.values()
    }

    /// The container for `name`, created with an undeclared primitive
    /// definition of the given collection shape if missing.
    pub fn container_mut(&mut self, name: &str, collection: CollectionKind) -> &mut PropertyContainer {
        self.properties
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| {
                PropertyContainer::new(PropertyDefinition::new(
                    name,
                    PropertyKind::Primitive,
                    collection,
                ))
            })
    }
}
