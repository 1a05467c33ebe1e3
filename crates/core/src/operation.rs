//! Operations: the immutable records of state-change intent.
//!
//! Every change to a model is expressed as an [`Operation`]. The payload of
//! each kind lives in the matching [`OperationKind`] variant, so an operation
//! only ever carries the fields its kind actually uses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// The declared type of a [`PropertyValue`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueKind {
    #[default]
    String,
    Integer,
    Double,
    Boolean,
    Reference,
    Json,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
            Self::Double => write!(f, "double"),
            Self::Boolean => write!(f, "boolean"),
            Self::Reference => write!(f, "reference"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// A typed value carried by an operation.
///
/// The content is kept in its raw textual form; two values are equal when
/// both kind and raw content are equal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropertyValue {
    pub kind: ValueKind,
    pub content: Option<String>,
}

impl PropertyValue {
    pub fn new(kind: ValueKind, content: Option<String>) -> Self {
        Self { kind, content }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ValueKind::String, Some(value.into()))
    }

    pub fn integer(value: i64) -> Self {
        Self::new(ValueKind::Integer, Some(value.to_string()))
    }

    pub fn double(value: f64) -> Self {
        Self::new(ValueKind::Double, Some(value.to_string()))
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(ValueKind::Boolean, Some(value.to_string()))
    }

    /// A reference to another entity by id.
    pub fn reference(element_id: impl Into<String>) -> Self {
        Self::new(ValueKind::Reference, Some(element_id.into()))
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(ValueKind::Json, Some(value.to_string()))
    }

    /// Raw content, if any.
    pub fn as_str(&self) -> Option<&str> {
        self.content.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Operation kinds
// ---------------------------------------------------------------------------

/// Flat discriminant of an [`OperationKind`], shared with the wire format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OperationType {
    #[default]
    None,
    CreateElement,
    DeleteElement,
    SetProperty,
    AddToListProperty,
    RemoveFromListProperty,
    AddToSetProperty,
    RemoveFromSetProperty,
    UpdateMapEntry,
    RemoveMapEntry,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::CreateElement => "CreateElement",
            Self::DeleteElement => "DeleteElement",
            Self::SetProperty => "SetProperty",
            Self::AddToListProperty => "AddToListProperty",
            Self::RemoveFromListProperty => "RemoveFromListProperty",
            Self::AddToSetProperty => "AddToSetProperty",
            Self::RemoveFromSetProperty => "RemoveFromSetProperty",
            Self::UpdateMapEntry => "UpdateMapEntry",
            Self::RemoveMapEntry => "RemoveMapEntry",
        };
        f.write_str(name)
    }
}

/// What an operation does, with exactly the payload that kind needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    /// Root sentinel of the log. Never applied to a model.
    None,
    CreateElement {
        element_type: Option<String>,
    },
    DeleteElement,
    SetProperty {
        property: String,
        value: PropertyValue,
    },
    AddToListProperty {
        property: String,
        value: PropertyValue,
        /// Insert after this position id; `None` inserts at the head.
        after_item_id: Option<String>,
    },
    RemoveFromListProperty {
        property: String,
        item_id: String,
    },
    AddToSetProperty {
        property: String,
        value: PropertyValue,
    },
    RemoveFromSetProperty {
        property: String,
        value: PropertyValue,
    },
    UpdateMapEntry {
        property: String,
        key: String,
        value: PropertyValue,
    },
    RemoveMapEntry {
        property: String,
        key: String,
    },
}

impl OperationKind {
    pub fn operation_type(&self) -> OperationType {
        match self {
            Self::None => OperationType::None,
            Self::CreateElement { .. } => OperationType::CreateElement,
            Self::DeleteElement => OperationType::DeleteElement,
            Self::SetProperty { .. } => OperationType::SetProperty,
            Self::AddToListProperty { .. } => OperationType::AddToListProperty,
            Self::RemoveFromListProperty { .. } => OperationType::RemoveFromListProperty,
            Self::AddToSetProperty { .. } => OperationType::AddToSetProperty,
            Self::RemoveFromSetProperty { .. } => OperationType::RemoveFromSetProperty,
            Self::UpdateMapEntry { .. } => OperationType::UpdateMapEntry,
            Self::RemoveMapEntry { .. } => OperationType::RemoveMapEntry,
        }
    }

    /// The property this operation addresses, if it addresses one.
    pub fn property_name(&self) -> Option<&str> {
        match self {
            Self::SetProperty { property, .. }
            | Self::AddToListProperty { property, .. }
            | Self::RemoveFromListProperty { property, .. }
            | Self::AddToSetProperty { property, .. }
            | Self::RemoveFromSetProperty { property, .. }
            | Self::UpdateMapEntry { property, .. }
            | Self::RemoveMapEntry { property, .. } => Some(property),
            Self::None | Self::CreateElement { .. } | Self::DeleteElement => None,
        }
    }

    /// The value carried by this operation, if any.
    pub fn value(&self) -> Option<&PropertyValue> {
        match self {
            Self::SetProperty { value, .. }
            | Self::AddToListProperty { value, .. }
            | Self::AddToSetProperty { value, .. }
            | Self::RemoveFromSetProperty { value, .. }
            | Self::UpdateMapEntry { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::DeleteElement)
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// One recorded intent to change a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operation {
    /// Globally unique across the whole log.
    pub id: Uuid,
    /// Branch that owned the operation when it was created.
    pub branch: String,
    /// Target entity.
    pub element_id: String,
    pub kind: OperationKind,
    pub timestamp: DateTime<Utc>,
}

impl Operation {
    /// Create a new operation with a fresh UUID, stamped now.
    pub fn new(branch: impl Into<String>, element_id: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            branch: branch.into(),
            element_id: element_id.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    /// The root sentinel of a log, owned by `branch`.
    pub fn root(branch: impl Into<String>) -> Self {
        Self::new(branch, String::new(), OperationKind::None)
    }

    pub fn create_element(element_id: impl Into<String>, element_type: Option<&str>) -> Self {
        Self::new(
            String::new(),
            element_id,
            OperationKind::CreateElement {
                element_type: element_type.map(str::to_string),
            },
        )
    }

    pub fn delete_element(element_id: impl Into<String>) -> Self {
        Self::new(String::new(), element_id, OperationKind::DeleteElement)
    }

    pub fn set_property(
        element_id: impl Into<String>,
        property: impl Into<String>,
        value: PropertyValue,
    ) -> Self {
        Self::new(
            String::new(),
            element_id,
            OperationKind::SetProperty {
                property: property.into(),
                value,
            },
        )
    }

    pub fn add_to_list(
        element_id: impl Into<String>,
        property: impl Into<String>,
        value: PropertyValue,
        after_item_id: Option<&str>,
    ) -> Self {
        Self::new(
            String::new(),
            element_id,
            OperationKind::AddToListProperty {
                property: property.into(),
                value,
                after_item_id: after_item_id.map(str::to_string),
            },
        )
    }

    pub fn remove_from_list(
        element_id: impl Into<String>,
        property: impl Into<String>,
        item_id: impl Into<String>,
    ) -> Self {
        Self::new(
            String::new(),
            element_id,
            OperationKind::RemoveFromListProperty {
                property: property.into(),
                item_id: item_id.into(),
            },
        )
    }

    pub fn add_to_set(
        element_id: impl Into<String>,
        property: impl Into<String>,
        value: PropertyValue,
    ) -> Self {
        Self::new(
            String::new(),
            element_id,
            OperationKind::AddToSetProperty {
                property: property.into(),
                value,
            },
        )
    }

    pub fn remove_from_set(
        element_id: impl Into<String>,
        property: impl Into<String>,
        value: PropertyValue,
    ) -> Self {
        Self::new(
            String::new(),
            element_id,
            OperationKind::RemoveFromSetProperty {
                property: property.into(),
                value,
            },
        )
    }

    pub fn update_map_entry(
        element_id: impl Into<String>,
        property: impl Into<String>,
        key: impl Into<String>,
        value: PropertyValue,
    ) -> Self {
        Self::new(
            String::new(),
            element_id,
            OperationKind::UpdateMapEntry {
                property: property.into(),
                key: key.into(),
                value,
            },
        )
    }

    pub fn remove_map_entry(
        element_id: impl Into<String>,
        property: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::new(
            String::new(),
            element_id,
            OperationKind::RemoveMapEntry {
                property: property.into(),
                key: key.into(),
            },
        )
    }

    /// Set the owning branch.
    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Copy of this operation under a fresh id. Every other field is kept.
    pub fn with_fresh_id(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            ..self.clone()
        }
    }

    pub fn operation_type(&self) -> OperationType {
        self.kind.operation_type()
    }

    pub fn property_name(&self) -> Option<&str> {
        self.kind.property_name()
    }

    /// Position id given to the list entry this operation inserts.
    ///
    /// Derived from the operation id so replays of the same history always
    /// produce the same list.
    pub fn position_id(&self) -> String {
        self.id.simple().to_string()
    }
}
