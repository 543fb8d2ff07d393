use std::collections::BTreeMap;

use fieldsync_core::{EntityRecord, EntityType, FieldValue};

/// Restricts a channel to rows where `column` equals `value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFilter {
    pub column: String,
    pub value: String,
}

impl ChannelFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    fn matches(&self, record: &EntityRecord) -> bool {
        if self.column == "id" {
            return record.id.as_str() == self.value;
        }
        match record.get(&self.column) {
            Some(FieldValue::Text(s)) => *s == self.value,
            Some(FieldValue::Integer(n)) => n.to_string() == self.value,
            Some(FieldValue::Boolean(b)) => b.to_string() == self.value,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
struct Channel {
    entity_type: EntityType,
    filter: Option<ChannelFilter>,
}

/// Which change streams the host has asked for. Channel keys are
/// `entity` or `entity:column:value`.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    channels: BTreeMap<String, Channel>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel_key(entity_type: &EntityType, filter: Option<&ChannelFilter>) -> String {
        match filter {
            Some(f) => format!("{entity_type}:{}:{}", f.column, f.value),
            None => entity_type.to_string(),
        }
    }

    /// Idempotent: subscribing twice to the same channel keeps one channel.
    pub fn subscribe(&mut self, entity_type: EntityType, filter: Option<ChannelFilter>) -> String {
        let key = Self::channel_key(&entity_type, filter.as_ref());
        if self.channels.contains_key(&key) {
            tracing::debug!(channel = %key, "already subscribed");
        } else {
            tracing::debug!(channel = %key, "subscribed");
            self.channels.insert(key.clone(), Channel { entity_type, filter });
        }
        key
    }

    pub fn unsubscribe(&mut self, channel_key: &str) -> bool {
        self.channels.remove(channel_key).is_some()
    }

    pub fn unsubscribe_all(&mut self) -> usize {
        let n = self.channels.len();
        self.channels.clear();
        n
    }

    pub fn active(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    pub fn is_subscribed(&self, entity_type: &EntityType) -> bool {
        self.channels.values().any(|c| &c.entity_type == entity_type)
    }

    /// Whether some channel would have delivered a change to this row. Without
    /// the row (deletes carry only the id) any channel on the type admits it.
    pub fn admits(&self, entity_type: &EntityType, record: Option<&EntityRecord>) -> bool {
        self.channels.values().any(|c| {
            &c.entity_type == entity_type
                && match (&c.filter, record) {
                    (None, _) | (Some(_), None) => true,
                    (Some(filter), Some(record)) => filter.matches(record),
                }
        })
    }
}
