use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::field_value::FieldValue;
use crate::ids::RecordId;
use crate::timestamp::Timestamp;
use crate::CoreError;

pub const ID_FIELD: &str = "id";
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// One row of an entity table. `id` and `updated_at` are kept out of `fields`
/// so neither can be clobbered by a field write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: RecordId,
    pub updated_at: Timestamp,
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl EntityRecord {
    pub fn new(id: impl Into<RecordId>, updated_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            updated_at,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn is_reserved(field: &str) -> bool {
        field == ID_FIELD || field == UPDATED_AT_FIELD
    }

    /// Build a record from a JSON row as delivered by the remote store.
    pub fn from_json(row: serde_json::Value) -> Result<Self, CoreError> {
        let serde_json::Value::Object(mut map) = row else {
            return Err(CoreError::InvalidRecord("row is not an object".into()));
        };
        let id = match map.remove(ID_FIELD) {
            Some(serde_json::Value::String(s)) => RecordId::new(s),
            Some(serde_json::Value::Number(n)) => RecordId::new(n.to_string()),
            _ => return Err(CoreError::InvalidRecord("missing id".into())),
        };
        let updated_at = match map.remove(UPDATED_AT_FIELD) {
            Some(serde_json::Value::String(s)) => Timestamp::parse(&s)?,
            _ => {
                return Err(CoreError::InvalidRecord(format!(
                    "{id}: missing updated_at"
                )));
            }
        };
        let fields = map
            .into_iter()
            .map(|(k, v)| FieldValue::from_json(v).map(|v| (k, v)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(Self {
            id,
            updated_at,
            fields,
        })
    }

    pub fn to_json(&self) -> Result<serde_json::Value, CoreError> {
        serde_json::to_value(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}
