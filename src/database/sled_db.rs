use std::path::Path;

use super::{DbError, KvStore};

/// Sled-backed store. Logical keys map straight onto sled keys; every write
/// is flushed so a crash never loses an acknowledged append.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let db = sled::open(path).map_err(|e| DbError::Io(e.to_string()))?;
        Ok(Self { db })
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DbError> {
        self.db
            .get(key.as_bytes())
            .map(|v| v.map(|ivec| ivec.to_vec()))
            .map_err(|e| DbError::Io(e.to_string()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), DbError> {
        self.db
            .insert(key.as_bytes(), value)
            .map_err(|e| DbError::Io(e.to_string()))?;
        self.db.flush().map_err(|e| DbError::Io(e.to_string()))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), DbError> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| DbError::Io(e.to_string()))?;
        self.db.flush().map_err(|e| DbError::Io(e.to_string()))?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, DbError> {
        self.db
            .scan_prefix(prefix.as_bytes())
            .map(|item| {
                let (key, _) = item.map_err(|e| DbError::Io(e.to_string()))?;
                String::from_utf8(key.to_vec())
                    .map_err(|_| DbError::Serde("non-utf8 key".into()))
            })
            .collect()
    }
}
