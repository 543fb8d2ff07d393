use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use fieldsync_core::{CoreError, EntityRecord, EntityType, FieldValue, RecordId, RequestId};

/// One call to the mutation endpoint: replace the named fields of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationRequest {
    pub id: RequestId,
    pub entity_type: EntityType,
    pub record_id: RecordId,
    pub fields: BTreeMap<String, FieldValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    /// The server refused the value. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Network unreachable, fetch failure, or offline mid-flight.
    #[error("connection failed: {0}")]
    Connectivity(String),
    #[error("server error: {0}")]
    Server(String),
}

impl MutationError {
    /// Server actions report transport failures as plain error strings; this
    /// picks those out.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_connectivity_message(&message) {
            Self::Connectivity(message)
        } else {
            Self::Server(message)
        }
    }

    pub(crate) fn reclassified(self) -> Self {
        match self {
            Self::Server(message) => Self::classify(message),
            other => other,
        }
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

fn is_connectivity_message(message: &str) -> bool {
    message.contains("fetch") || message.contains("network") || message.contains("Failed to fetch")
}

/// Row-level security denials read as "... violates row-level security policy ...".
pub(crate) fn is_policy_denial(message: &str) -> bool {
    message.contains("policy")
}

/// The persisted record on success.
pub type MutationResponse = Result<EntityRecord, MutationError>;

/// The hosted database as the engine sees it.
pub trait RemoteStore {
    fn read(&self, entity_type: &EntityType, record_id: &RecordId) -> Option<EntityRecord>;

    fn mutate(&mut self, request: &MutationRequest) -> MutationResponse;
}

/// One notification from the change stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert {
        entity_type: EntityType,
        record: EntityRecord,
    },
    Update {
        entity_type: EntityType,
        record: EntityRecord,
    },
    Delete {
        entity_type: EntityType,
        record_id: RecordId,
    },
}

impl ChangeEvent {
    pub fn entity_type(&self) -> &EntityType {
        match self {
            Self::Insert { entity_type, .. }
            | Self::Update { entity_type, .. }
            | Self::Delete { entity_type, .. } => entity_type,
        }
    }

    pub fn record_id(&self) -> &RecordId {
        match self {
            Self::Insert { record, .. } | Self::Update { record, .. } => &record.id,
            Self::Delete { record_id, .. } => record_id,
        }
    }

    /// Decode a postgres-changes payload: `{"eventType", "new", "old"}`.
    /// Unknown event types and payloads without the needed row decode to
    /// `None`.
    pub fn from_payload(
        entity_type: EntityType,
        payload: serde_json::Value,
    ) -> Result<Option<Self>, CoreError> {
        let serde_json::Value::Object(mut payload) = payload else {
            return Err(CoreError::InvalidData("change payload is not an object".into()));
        };
        let event_type = payload
            .get("eventType")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let new_row = payload.remove("new").filter(|v| v.is_object());
        let old_row = payload.remove("old").filter(|v| v.is_object());

        let event = match (event_type.as_str(), new_row, old_row) {
            ("INSERT", Some(row), _) => Self::Insert {
                entity_type,
                record: EntityRecord::from_json(row)?,
            },
            ("UPDATE", Some(row), _) => Self::Update {
                entity_type,
                record: EntityRecord::from_json(row)?,
            },
            ("DELETE", _, Some(old)) => match old.get("id") {
                Some(serde_json::Value::String(id)) => Self::Delete {
                    entity_type,
                    record_id: RecordId::new(id.as_str()),
                },
                _ => return Ok(None),
            },
            (other, _, _) => {
                tracing::warn!(entity_type = %entity_type, event_type = other, "ignoring change payload");
                return Ok(None);
            }
        };
        Ok(Some(event))
    }
}
