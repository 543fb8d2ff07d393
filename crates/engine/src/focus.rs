use std::cell::RefCell;
use std::rc::Rc;

use fieldsync_core::{FieldKey, FocusQuery};

/// Holds the currently focused field. The UI layer keeps one clone and
/// updates it from its focus/blur handlers; the engine queries another.
#[derive(Debug, Clone, Default)]
pub struct FocusTracker {
    current: Rc<RefCell<Option<FieldKey>>>,
}

impl FocusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn focus(&self, key: FieldKey) {
        *self.current.borrow_mut() = Some(key);
    }

    /// Clears focus and returns the field that had it.
    pub fn blur(&self) -> Option<FieldKey> {
        self.current.borrow_mut().take()
    }
}

impl FocusQuery for FocusTracker {
    fn focused_field(&self) -> Option<FieldKey> {
        self.current.borrow().clone()
    }
}
