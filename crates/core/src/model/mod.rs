//! Materialized per-branch state.
//!
//! A [`Model`] is a disposable cache of a branch's entities, rebuilt by
//! replaying the branch's operation history in order. Replay is
//! deterministic: the same ordered operations applied to an empty model
//! always yield the same state.
//!
//! Replay is forgiving. An operation addressed to an entity or property that
//! does not exist yet creates it on the fly instead of failing.

pub mod element;
pub mod schema;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

pub use element::{Element, ListEntry, MapEntry, PropertyContainer};
pub use schema::{CollectionKind, ElementType, PropertyDefinition, PropertyKind, SchemaRegistry};

use crate::errors::LogError;
use crate::operation::{Operation, OperationKind};
use crate::oplog::OperationLog;

/// How an operation reaches a model.
#[derive(Debug)]
pub enum ApplyMode<'a> {
    /// Record the operation on the model's branch in the log, then mutate state.
    Committing(&'a mut OperationLog),
    /// Mutate state only. Used for history replay and for absorbing another
    /// branch's changes without re-recording them.
    Replaying,
}

/// Entities of one branch.
#[derive(Debug, Clone, Serialize)]
pub struct Model {
    name: String,
    elements: BTreeMap<String, Element>,
    #[serde(skip)]
    schema: SchemaRegistry,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_schema(name, SchemaRegistry::new())
    }

    pub fn with_schema(name: impl Into<String>, schema: SchemaRegistry) -> Self {
        Self {
            name: name.into(),
            elements: BTreeMap::new(),
            schema,
        }
    }

    /// Branch this model materializes.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn register_type(&mut self, element_type: ElementType) {
        self.schema.register(element_type);
    }

    pub fn element(&self, id: &str) -> Option<&Element> {
        self.elements.get(id)
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Entity state keyed by id, for comparing two materializations.
    pub fn state(&self) -> &BTreeMap<String, Element> {
        &self.elements
    }

    /// Drop all entities, keeping registered types.
    pub fn reset(&mut self) {
        self.elements.clear();
    }

    // -----------------------------------------------------------------------
    // Applying operations
    // -----------------------------------------------------------------------

    /// Apply one operation. In committing mode the operation is appended to
    /// this model's branch first; if that fails, state is left untouched.
    pub fn apply(&mut self, op: &Operation, mode: ApplyMode<'_>) -> Result<(), LogError> {
        if let ApplyMode::Committing(log) = mode {
            log.append(&self.name, op.clone())?;
        }
        self.execute(op);
        Ok(())
    }

    /// Apply a sequence of operations in order.
    pub fn apply_all(&mut self, ops: &[Operation], mode: ApplyMode<'_>) -> Result<(), LogError> {
        match mode {
            ApplyMode::Committing(log) => {
                for op in ops {
                    self.apply(op, ApplyMode::Committing(&mut *log))?;
                }
            }
            ApplyMode::Replaying => {
                for op in ops {
                    self.execute(op);
                }
            }
        }
        Ok(())
    }

    fn execute(&mut self, op: &Operation) {
        debug!(
            model = %self.name,
            op = %op.id,
            kind = %op.operation_type(),
            element = %op.element_id,
            "executing operation"
        );

        match &op.kind {
            OperationKind::None => {}
            OperationKind::CreateElement { element_type } => {
                self.create_element(&op.element_id, element_type.as_deref());
            }
            OperationKind::DeleteElement => {
                self.elements.remove(&op.element_id);
            }
            OperationKind::SetProperty { property, value } => {
                self.container(&op.element_id, property, CollectionKind::Scalar)
                    .set(value.clone());
            }
            OperationKind::AddToListProperty {
                property,
                value,
                after_item_id,
            } => {
                self.container(&op.element_id, property, CollectionKind::List)
                    .add_to_list(op.position_id(), value.clone(), after_item_id.as_deref());
            }
            OperationKind::RemoveFromListProperty { property, item_id } => {
                self.container(&op.element_id, property, CollectionKind::List)
                    .remove_from_list(item_id);
            }
            OperationKind::AddToSetProperty { property, value } => {
                self.container(&op.element_id, property, CollectionKind::Set)
                    .add_to_set(value.clone());
            }
            OperationKind::RemoveFromSetProperty { property, value } => {
                self.container(&op.element_id, property, CollectionKind::Set)
                    .remove_from_set(value);
            }
            OperationKind::UpdateMapEntry {
                property,
                key,
                value,
            } => {
                self.container(&op.element_id, property, CollectionKind::Map)
                    .update_map(key, value.clone());
            }
            OperationKind::RemoveMapEntry { property, key } => {
                self.container(&op.element_id, property, CollectionKind::Map)
                    .remove_map_entry(key);
            }
        }
    }

    fn create_element(&mut self, id: &str, element_type: Option<&str>) {
        let mut element = Element::new(id, element_type.map(str::to_string));
        if let Some(declared) = element_type.and_then(|name| self.schema.get(name)) {
            for definition in &declared.properties {
                element.add_property(definition.clone());
            }
        }
        self.elements.insert(id.to_string(), element);
    }

    fn container(
        &mut self,
        element_id: &str,
        property: &str,
        collection: CollectionKind,
    ) -> &mut PropertyContainer {
        self.elements
            .entry(element_id.to_string())
            .or_insert_with(|| Element::new(element_id, None))
            .container_mut(property, collection)
    }
}
