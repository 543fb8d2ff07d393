use crate::error::StorageError;

/// Persisted key to JSON-blob storage. Callers load everything on start and
/// rewrite the whole blob on every change, so implementations only need
/// whole-value get and put.
pub trait DurableStore {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn save(&mut self, key: &str, json: &str) -> Result<(), StorageError>;

    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}
