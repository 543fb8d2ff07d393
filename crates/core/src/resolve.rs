use crate::field_value::FieldValue;
use crate::ids::{EntityType, FieldKey, RecordId};

/// Answers "which input has focus right now" from UI state, synchronously.
pub trait FocusQuery {
    /// The field currently accepting keystrokes, if any.
    fn focused_field(&self) -> Option<FieldKey>;

    fn is_focused(&self, key: &FieldKey) -> bool {
        self.focused_field().as_ref() == Some(key)
    }

    /// True when any field of the given record has focus.
    fn is_entity_being_edited(&self, entity_type: &EntityType, record_id: &RecordId) -> bool {
        self.focused_field()
            .is_some_and(|key| key.is_on(entity_type, record_id))
    }
}

/// What to do with one field of an inbound remote update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the local value now, apply the remote one when focus leaves.
    Defer,
    RemoteWins,
    /// Values already agree; nothing to write.
    LocalWins,
}

/// Focus is the only protected state: a focused field defers, everything else
/// converges on the remote value.
pub fn resolve(
    focus: &dyn FocusQuery,
    key: &FieldKey,
    remote: &FieldValue,
    local: Option<&FieldValue>,
) -> Resolution {
    if focus.is_focused(key) {
        Resolution::Defer
    } else if local == Some(remote) {
        Resolution::LocalWins
    } else {
        Resolution::RemoteWins
    }
}
