use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{DbError, KvStore};

/// In-memory backend. The ordered map makes prefix listings sorted without
/// extra work.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DbError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| DbError::Io("lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), DbError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| DbError::Io("lock poisoned".into()))?;
        entries.insert(key.into(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), DbError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| DbError::Io("lock poisoned".into()))?;
        entries.remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, DbError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| DbError::Io("lock poisoned".into()))?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
