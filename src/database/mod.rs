use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    envelope::Envelope,
    error::Error,
    event::KeyEvent,
    prefix::{BasicPrefix, IdentifierPrefix, Prefix, SelfAddressingPrefix},
};

pub mod memory;
#[cfg(feature = "sled-db")]
pub mod sled_db;

pub use memory::MemoryStore;
#[cfg(feature = "sled-db")]
pub use sled_db::SledStore;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("storage error: {0}")]
    Io(String),
    #[error("serde error: {0}")]
    Serde(String),
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serde(e.to_string())
    }
}

/// The key-value contract every storage backend satisfies. Keys are logical
/// paths namespaced by colon-separated prefixes.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DbError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), DbError>;
    fn delete(&self, key: &str) -> Result<(), DbError>;
    /// All keys under the given prefix, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, DbError>;
}

pub const ALIAS_MAPPING_KEY: &str = "alias:kel:mapping";
pub const KEL_EVENT_NS: &str = "kel:events:";
pub const KEL_CESR_NS: &str = "kel:cesr:";
pub const KEL_CHAIN_NS: &str = "kel:meta:chain:";
pub const VAULT_NS: &str = "vault:keys:";
pub const ROTATION_NS: &str = "rotation:";

fn get_json<T: serde::de::DeserializeOwned>(
    db: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, DbError> {
    match db.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn put_json<T: Serialize>(db: &dyn KvStore, key: &str, value: &T) -> Result<(), DbError> {
    db.put(key, &serde_json::to_vec(value)?)
}

/// Per-AID chain metadata. The `chain` array is the source of truth for
/// which events exist on an AID; readers must tolerate events present in
/// the event store that the chain does not yet reference.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChainMetadata {
    pub aid: IdentifierPrefix,
    pub chain: Vec<SelfAddressingPrefix>,
    pub sequence: u64,
    #[serde(rename = "latestEvent")]
    pub latest_event: SelfAddressingPrefix,
}

impl ChainMetadata {
    pub fn new(aid: IdentifierPrefix, inception: SelfAddressingPrefix) -> Self {
        Self {
            aid,
            chain: vec![inception.clone()],
            sequence: 0,
            latest_event: inception,
        }
    }

    /// Appends the next event digest; `chain` and `latestEvent` move
    /// together.
    pub fn append(&mut self, digest: SelfAddressingPrefix) {
        self.chain.push(digest.clone());
        self.sequence = (self.chain.len() - 1) as u64;
        self.latest_event = digest;
    }
}

/// One side of a vault keyset: public prefix plus the seed when the vault
/// is permitted to hold it (base64url).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VaultKeyEntry {
    pub public: BasicPrefix,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VaultKeyset {
    pub current: VaultKeyEntry,
    pub next: VaultKeyEntry,
}

/// Bidirectional alias map. Lookup keys are lowercased; the display form is
/// preserved.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
struct AliasMapping {
    aliases: BTreeMap<String, AliasTarget>,
    aids: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct AliasTarget {
    display: String,
    aid: IdentifierPrefix,
}

#[derive(Clone)]
pub struct AliasRepo {
    db: Arc<dyn KvStore>,
}

impl AliasRepo {
    pub fn new(db: Arc<dyn KvStore>) -> Self {
        Self { db }
    }

    fn load(&self) -> Result<AliasMapping, DbError> {
        Ok(get_json(self.db.as_ref(), ALIAS_MAPPING_KEY)?.unwrap_or_default())
    }

    pub fn get(&self, alias: &str) -> Result<Option<IdentifierPrefix>, Error> {
        let mapping = self.load()?;
        Ok(mapping
            .aliases
            .get(&alias.to_lowercase())
            .map(|t| t.aid.clone()))
    }

    pub fn reverse(&self, aid: &IdentifierPrefix) -> Result<Option<String>, Error> {
        let mapping = self.load()?;
        Ok(mapping.aids.get(&aid.to_str()).and_then(|lower| {
            mapping.aliases.get(lower).map(|t| t.display.clone())
        }))
    }

    /// Binds an alias to an AID. The map stays bijective: a taken alias or
    /// an already-aliased AID is rejected.
    pub fn set(&self, alias: &str, aid: &IdentifierPrefix) -> Result<(), Error> {
        let mut mapping = self.load()?;
        let lower = alias.to_lowercase();
        if mapping.aliases.contains_key(&lower) {
            return Err(Error::AliasExists(alias.into()));
        }
        if mapping.aids.contains_key(&aid.to_str()) {
            return Err(Error::AliasExists(alias.into()));
        }
        mapping.aliases.insert(
            lower.clone(),
            AliasTarget {
                display: alias.into(),
                aid: aid.clone(),
            },
        );
        mapping.aids.insert(aid.to_str(), lower);
        put_json(self.db.as_ref(), ALIAS_MAPPING_KEY, &mapping)?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<(String, IdentifierPrefix)>, Error> {
        let mapping = self.load()?;
        Ok(mapping
            .aliases
            .values()
            .map(|t| (t.display.clone(), t.aid.clone()))
            .collect())
    }
}

/// Event, envelope, and chain stores.
#[derive(Clone)]
pub struct KelRepo {
    db: Arc<dyn KvStore>,
}

impl KelRepo {
    pub fn new(db: Arc<dyn KvStore>) -> Self {
        Self { db }
    }

    pub fn get_event(&self, said: &SelfAddressingPrefix) -> Result<Option<KeyEvent>, Error> {
        Ok(get_json(
            self.db.as_ref(),
            &[KEL_EVENT_NS, &said.to_str()].join(""),
        )?)
    }

    /// Idempotent by SAID: a second put of the same event is a no-op.
    pub fn put_event(&self, event: &KeyEvent) -> Result<(), Error> {
        let key = [KEL_EVENT_NS, &event.digest.to_str()].join("");
        if self.db.get(&key)?.is_none() {
            put_json(self.db.as_ref(), &key, event)?;
        }
        Ok(())
    }

    pub fn get_envelope(&self, said: &SelfAddressingPrefix) -> Result<Option<Envelope>, Error> {
        Ok(get_json(
            self.db.as_ref(),
            &[KEL_CESR_NS, &said.to_str()].join(""),
        )?)
    }

    pub fn put_envelope(&self, envelope: &Envelope) -> Result<(), Error> {
        let key = [KEL_CESR_NS, &envelope.event.digest.to_str()].join("");
        if self.db.get(&key)?.is_none() {
            put_json(self.db.as_ref(), &key, envelope)?;
        }
        Ok(())
    }

    pub fn get_chain(&self, aid: &IdentifierPrefix) -> Result<Option<ChainMetadata>, Error> {
        Ok(get_json(
            self.db.as_ref(),
            &[KEL_CHAIN_NS, &aid.to_str()].join(""),
        )?)
    }

    pub fn put_chain(&self, chain: &ChainMetadata) -> Result<(), Error> {
        put_json(
            self.db.as_ref(),
            &[KEL_CHAIN_NS, &chain.aid.to_str()].join(""),
            chain,
        )?;
        Ok(())
    }
}

/// Keypair material per AID.
#[derive(Clone)]
pub struct VaultRepo {
    db: Arc<dyn KvStore>,
}

impl VaultRepo {
    pub fn new(db: Arc<dyn KvStore>) -> Self {
        Self { db }
    }

    pub fn get_keyset(&self, aid: &IdentifierPrefix) -> Result<Option<VaultKeyset>, Error> {
        Ok(get_json(
            self.db.as_ref(),
            &[VAULT_NS, &aid.to_str()].join(""),
        )?)
    }

    pub fn set_keyset(&self, aid: &IdentifierPrefix, keyset: &VaultKeyset) -> Result<(), Error> {
        put_json(
            self.db.as_ref(),
            &[VAULT_NS, &aid.to_str()].join(""),
            keyset,
        )?;
        Ok(())
    }
}
