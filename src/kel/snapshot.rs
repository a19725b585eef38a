//! Deterministic state snapshots with an embedded integrity digest.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    database::{
        ChainMetadata, VaultKeyset, ALIAS_MAPPING_KEY, KEL_CESR_NS, KEL_CHAIN_NS, KEL_EVENT_NS,
        VAULT_NS,
    },
    envelope::Envelope,
    error::Error,
    event::KeyEvent,
    prefix::SelfAddressingPrefix,
    said::{canonicalize, compute_said},
};

use super::KelStore;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SnapshotStores {
    pub aliases: Value,

    #[serde(rename = "kelEvents")]
    pub kel_events: BTreeMap<String, KeyEvent>,

    #[serde(rename = "kelCesr")]
    pub kel_cesr: BTreeMap<String, Envelope>,

    #[serde(rename = "kelMetadata")]
    pub kel_metadata: BTreeMap<String, ChainMetadata>,

    pub vault: BTreeMap<String, VaultKeyset>,
}

/// Version-tagged state dump. `digest` covers the canonical bytes of
/// `stores` only, so two dumps of identical state are digest-equal
/// regardless of when they were taken.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub version: u32,

    #[serde(rename = "createdAt")]
    pub created_at: String,

    pub digest: SelfAddressingPrefix,

    pub stores: SnapshotStores,
}

#[derive(Default)]
pub struct DumpOptions {
    pub include_secrets: bool,
    pub timestamp: Option<String>,
}

#[derive(Default)]
pub struct LoadOptions {
    pub allow_secrets: bool,
    pub truncate_existing: bool,
}

fn strip_seeds(keyset: &mut VaultKeyset) {
    keyset.current.seed = None;
    keyset.next.seed = None;
}

pub fn stores_digest(stores: &SnapshotStores) -> Result<SelfAddressingPrefix, Error> {
    Ok(compute_said(&canonicalize(stores)?))
}

impl KelStore {
    pub fn dump_state(&self, opts: DumpOptions) -> Result<Snapshot, Error> {
        let aliases = match self.db.get(ALIAS_MAPPING_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => serde_json::json!({ "aliases": {}, "aids": {} }),
        };

        let mut stores = SnapshotStores {
            aliases,
            ..Default::default()
        };

        for key in self.db.list(KEL_EVENT_NS)? {
            let bytes = self.db.get(&key)?.ok_or(Error::MissingEvent)?;
            let event: KeyEvent = serde_json::from_slice(&bytes)?;
            stores
                .kel_events
                .insert(key[KEL_EVENT_NS.len()..].to_string(), event);
        }
        for key in self.db.list(KEL_CESR_NS)? {
            let bytes = self.db.get(&key)?.ok_or(Error::MissingEvent)?;
            let envelope: Envelope = serde_json::from_slice(&bytes)?;
            stores
                .kel_cesr
                .insert(key[KEL_CESR_NS.len()..].to_string(), envelope);
        }
        for key in self.db.list(KEL_CHAIN_NS)? {
            let bytes = self.db.get(&key)?.ok_or(Error::MissingEvent)?;
            let chain: ChainMetadata = serde_json::from_slice(&bytes)?;
            stores
                .kel_metadata
                .insert(key[KEL_CHAIN_NS.len()..].to_string(), chain);
        }
        for key in self.db.list(VAULT_NS)? {
            let bytes = self.db.get(&key)?.ok_or(Error::MissingEvent)?;
            let mut keyset: VaultKeyset = serde_json::from_slice(&bytes)?;
            if !opts.include_secrets {
                strip_seeds(&mut keyset);
            }
            stores
                .vault
                .insert(key[VAULT_NS.len()..].to_string(), keyset);
        }

        Ok(Snapshot {
            version: SNAPSHOT_VERSION,
            created_at: opts.timestamp.unwrap_or_else(|| self.clock.now()),
            digest: stores_digest(&stores)?,
            stores,
        })
    }

    /// Restores a snapshot. The embedded digest is recomputed and must
    /// match; a tampered or truncated snapshot never reaches the stores.
    pub fn load_state(&self, snapshot: &Snapshot, opts: LoadOptions) -> Result<(), Error> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::SemanticError(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        if stores_digest(&snapshot.stores)? != snapshot.digest {
            return Err(Error::SnapshotDigestMismatch);
        }

        if opts.truncate_existing {
            self.db.delete(ALIAS_MAPPING_KEY)?;
            for ns in [KEL_EVENT_NS, KEL_CESR_NS, KEL_CHAIN_NS, VAULT_NS] {
                for key in self.db.list(ns)? {
                    self.db.delete(&key)?;
                }
            }
        }

        self.db
            .put(ALIAS_MAPPING_KEY, &serde_json::to_vec(&snapshot.stores.aliases)?)?;
        for (said, event) in &snapshot.stores.kel_events {
            self.db.put(
                &[KEL_EVENT_NS, said.as_str()].join(""),
                &serde_json::to_vec(event)?,
            )?;
        }
        for (said, envelope) in &snapshot.stores.kel_cesr {
            self.db.put(
                &[KEL_CESR_NS, said.as_str()].join(""),
                &serde_json::to_vec(envelope)?,
            )?;
        }
        for (aid, chain) in &snapshot.stores.kel_metadata {
            self.db.put(
                &[KEL_CHAIN_NS, aid.as_str()].join(""),
                &serde_json::to_vec(chain)?,
            )?;
        }
        for (aid, keyset) in &snapshot.stores.vault {
            let mut keyset = keyset.clone();
            if !opts.allow_secrets {
                strip_seeds(&mut keyset);
            }
            self.db.put(
                &[VAULT_NS, aid.as_str()].join(""),
                &serde_json::to_vec(&keyset)?,
            )?;
        }
        Ok(())
    }
}
