use std::collections::BTreeMap;

use fieldsync_core::{FieldKey, Timestamp};

#[derive(Debug)]
struct Timer<T> {
    deadline: Timestamp,
    payload: T,
}

/// Outstanding debounce timers, at most one per field key. Scheduling a key
/// that already has a timer replaces it.
#[derive(Debug)]
pub struct DebounceScheduler<T> {
    timers: BTreeMap<FieldKey, Timer<T>>,
}

impl<T> Default for DebounceScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DebounceScheduler<T> {
    pub fn new() -> Self {
        Self {
            timers: BTreeMap::new(),
        }
    }

    /// Arm a timer for `key`, returning the payload of the timer it replaced.
    pub fn schedule(&mut self, key: FieldKey, deadline: Timestamp, payload: T) -> Option<T> {
        self.timers
            .insert(key, Timer { deadline, payload })
            .map(|old| old.payload)
    }

    pub fn cancel(&mut self, key: &FieldKey) -> Option<T> {
        self.timers.remove(key).map(|t| t.payload)
    }

    pub fn is_pending(&self, key: &FieldKey) -> bool {
        self.timers.contains_key(key)
    }

    pub fn payload_mut(&mut self, key: &FieldKey) -> Option<&mut T> {
        self.timers.get_mut(key).map(|t| &mut t.payload)
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.timers.values().map(|t| t.deadline).min()
    }

    /// Remove and return every timer whose deadline is at or before `now`,
    /// earliest first.
    pub fn take_due(&mut self, now: Timestamp) -> Vec<(FieldKey, T)> {
        let due_keys: Vec<FieldKey> = self
            .timers
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(k, _)| k.clone())
            .collect();
        let mut due: Vec<(Timestamp, FieldKey, T)> = due_keys
            .into_iter()
            .filter_map(|key| {
                self.timers
                    .remove(&key)
                    .map(|t| (t.deadline, key, t.payload))
            })
            .collect();
        due.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        due.into_iter().map(|(_, key, payload)| (key, payload)).collect()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn clear(&mut self) -> usize {
        let n = self.timers.len();
        self.timers.clear();
        n
    }
}
