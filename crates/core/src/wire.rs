//! Flat wire representation of operations.
//!
//! Transports exchange [`OperationMessage`]s: every payload field is optional
//! and the `type` tag says which ones matter. Converting into an
//! [`Operation`] checks that the fields the kind needs are present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::WireError;
use crate::operation::{Operation, OperationKind, OperationType, PropertyValue, ValueKind};

/// One operation as exchanged with clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OperationMessage {
    /// UUID string. Empty or unparseable ids are replaced with a fresh one.
    pub id: String,
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    pub model_name: String,
    pub element_id: String,
    pub element_type: Option<String>,
    pub property_name: Option<String>,
    pub value: Option<String>,
    pub value_kind: ValueKind,
    pub after_item_id: Option<String>,
    pub item_id: Option<String>,
    pub map_key: Option<String>,
    /// Milliseconds since the Unix epoch; `0` means "now".
    pub timestamp_unix_ms: i64,
}

/// Treat empty and whitespace-only strings as absent.
fn present(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

impl OperationMessage {
    fn require(&self, field: &Option<String>, name: &'static str) -> Result<String, WireError> {
        present(field).ok_or_else(|| WireError::MissingField {
            kind: self.operation_type.to_string(),
            field: name,
        })
    }

    fn property(&self) -> Result<String, WireError> {
        self.require(&self.property_name, "property_name")
    }

    fn property_value(&self) -> PropertyValue {
        PropertyValue::new(
            self.value_kind,
            self.value.clone().filter(|v| !v.is_empty()),
        )
    }

    fn timestamp(&self) -> Result<DateTime<Utc>, WireError> {
        if self.timestamp_unix_ms == 0 {
            return Ok(Utc::now());
        }
        DateTime::from_timestamp_millis(self.timestamp_unix_ms)
            .ok_or(WireError::InvalidTimestamp(self.timestamp_unix_ms))
    }

    /// Convert into an operation owned by `branch`.
    pub fn into_operation(self, branch: &str) -> Result<Operation, WireError> {
        let kind = match self.operation_type {
            OperationType::None => {
                return Err(WireError::UnsupportedOperationType(
                    self.operation_type.to_string(),
                ))
            }
            OperationType::CreateElement => OperationKind::CreateElement {
                element_type: present(&self.element_type),
            },
            OperationType::DeleteElement => OperationKind::DeleteElement,
            OperationType::SetProperty => OperationKind::SetProperty {
                property: self.property()?,
                value: self.property_value(),
            },
            OperationType::AddToListProperty => OperationKind::AddToListProperty {
                property: self.property()?,
                value: self.property_value(),
                after_item_id: present(&self.after_item_id),
            },
            OperationType::RemoveFromListProperty => OperationKind::RemoveFromListProperty {
                property: self.property()?,
                item_id: self.require(&self.item_id, "item_id")?,
            },
            OperationType::AddToSetProperty => OperationKind::AddToSetProperty {
                property: self.property()?,
                value: self.property_value(),
            },
            OperationType::RemoveFromSetProperty => OperationKind::RemoveFromSetProperty {
                property: self.property()?,
                value: self.property_value(),
            },
            OperationType::UpdateMapEntry => OperationKind::UpdateMapEntry {
                property: self.property()?,
                key: self.require(&self.map_key, "map_key")?,
                value: self.property_value(),
            },
            OperationType::RemoveMapEntry => OperationKind::RemoveMapEntry {
                property: self.property()?,
                key: self.require(&self.map_key, "map_key")?,
            },
        };

        Ok(Operation {
            id: Uuid::parse_str(self.id.trim()).unwrap_or_else(|_| Uuid::new_v4()),
            branch: branch.to_string(),
            element_id: self.element_id.clone(),
            timestamp: self.timestamp()?,
            kind,
        })
    }
}

impl From<&Operation> for OperationMessage {
    fn from(op: &Operation) -> Self {
        let mut message = Self {
            id: op.id.to_string(),
            operation_type: op.operation_type(),
            model_name: op.branch.clone(),
            element_id: op.element_id.clone(),
            property_name: op.property_name().map(str::to_string),
            timestamp_unix_ms: op.timestamp.timestamp_millis(),
            ..Self::default()
        };

        if let Some(value) = op.kind.value() {
            message.value = value.content.clone();
            message.value_kind = value.kind;
        }

        match &op.kind {
            OperationKind::CreateElement { element_type } => {
                message.element_type = element_type.clone();
            }
            OperationKind::AddToListProperty { after_item_id, .. } => {
                message.after_item_id = after_item_id.clone();
            }
            OperationKind::RemoveFromListProperty { item_id, .. } => {
                message.item_id = Some(item_id.clone());
            }
            OperationKind::UpdateMapEntry { key, .. } | OperationKind::RemoveMapEntry { key, .. } => {
                message.map_key = Some(key.clone());
            }
            _ => {}
        }

        message
    }
}
