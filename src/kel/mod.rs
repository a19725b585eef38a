//! The KEL store API: accounts, rotation, anchoring, proofs, delegation,
//! and snapshots over injected key-value storage.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::{
    database::{
        AliasRepo, ChainMetadata, KelRepo, KvStore, VaultKeyEntry, VaultKeyset, VaultRepo,
        ROTATION_NS,
    },
    envelope::{
        sign_event, signer_set_for, verify_envelope, Envelope, EventProof, SignerSetRef,
    },
    error::Error,
    event::{seal_of, Anchor, EventBuilder, EventType, KeyEvent, RevocationSeal},
    prefix::{from_qb64, to_qb64, IdentifierPrefix, Prefix, SelfAddressingPrefix},
    rotation::status::{RotationPhase, RotationStatus, SignerRequirement},
    signer::{Clock, KeySpec, Signer, SystemClock},
};

pub mod snapshot;

pub use snapshot::{DumpOptions, LoadOptions, Snapshot};

/// Public view of one stored account.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Account {
    pub aid: IdentifierPrefix,
    pub alias: String,
    pub sequence: u64,
    #[serde(rename = "latestEvent")]
    pub latest_event: SelfAddressingPrefix,
}

#[derive(Default)]
pub struct AccountOptions {
    pub current: KeySpec,
    pub next: KeySpec,
    pub timestamp: Option<String>,
}

pub struct RotateArgs {
    pub aid: IdentifierPrefix,
    pub next: KeySpec,
    pub timestamp: Option<String>,
}

/// Asks the parent controller to anchor a delegated child event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DelegationRequest {
    #[serde(rename = "parentAid")]
    pub parent_aid: IdentifierPrefix,

    #[serde(rename = "childAid")]
    pub child_aid: IdentifierPrefix,

    #[serde(rename = "childEventSaid")]
    pub child_event_said: SelfAddressingPrefix,

    #[serde(rename = "childEventSeq")]
    pub child_event_seq: u64,

    pub seal: crate::event::EventSeal,
}

/// Owns the injected stores and exposes the engine's operations. Chain
/// appends are serialized per store instance; `putChain` is the single
/// linearization point for publication.
pub struct KelStore {
    db: Arc<dyn KvStore>,
    aliases: AliasRepo,
    kel: KelRepo,
    vault: VaultRepo,
    clock: Arc<dyn Clock>,
    append_lock: Mutex<()>,
}

impl KelStore {
    pub fn new(db: Arc<dyn KvStore>) -> Self {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    pub fn with_clock(db: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            aliases: AliasRepo::new(db.clone()),
            kel: KelRepo::new(db.clone()),
            vault: VaultRepo::new(db.clone()),
            clock,
            append_lock: Mutex::new(()),
            db,
        }
    }

    pub fn db(&self) -> Arc<dyn KvStore> {
        self.db.clone()
    }

    pub fn aliases(&self) -> &AliasRepo {
        &self.aliases
    }

    pub fn kel(&self) -> &KelRepo {
        &self.kel
    }

    pub fn vault(&self) -> &VaultRepo {
        &self.vault
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    fn timestamp(&self, supplied: &Option<String>) -> String {
        supplied.clone().unwrap_or_else(|| self.clock.now())
    }

    /// Creates an account: generates or derives keypairs, builds and signs
    /// the inception, and persists event, envelope, vault keyset, chain
    /// head, and alias in that order.
    pub fn create_account(
        &self,
        alias: &str,
        opts: AccountOptions,
    ) -> Result<Account, Error> {
        if self.aliases.get(alias)?.is_some() {
            return Err(Error::AliasExists(alias.into()));
        }
        let current = opts.current.signer()?;
        let next = opts.next.signer()?;
        let timestamp = self.timestamp(&opts.timestamp);

        let event = EventBuilder::new(EventType::Icp)
            .with_keys(vec![current.public_prefix(true)])
            .with_next_keys(vec![next.public_prefix(true)])
            .with_timestamp(&timestamp)
            .build()?;

        let envelope = sign_event(&event, &[(0, &current)], SignerSetRef::Current { sn: 0 })?;
        if !verify_envelope(&envelope, None, None)?.valid {
            return Err(Error::VerificationFailed);
        }

        self.persist_inception(&envelope, &current, &next, alias)?;
        Ok(Account {
            aid: event.prefix.clone(),
            alias: alias.into(),
            sequence: 0,
            latest_event: event.digest,
        })
    }

    fn persist_inception(
        &self,
        envelope: &Envelope,
        current: &Signer,
        next: &Signer,
        alias: &str,
    ) -> Result<(), Error> {
        let event = &envelope.event;
        self.kel.put_event(event)?;
        self.kel.put_envelope(envelope)?;
        self.vault.set_keyset(
            &event.prefix,
            &VaultKeyset {
                current: VaultKeyEntry {
                    public: current.public_prefix(true),
                    seed: Some(to_qb64(&current.seed())),
                },
                next: VaultKeyEntry {
                    public: next.public_prefix(true),
                    seed: Some(to_qb64(&next.seed())),
                },
            },
        )?;
        self.kel
            .put_chain(&ChainMetadata::new(event.prefix.clone(), event.digest.clone()))?;
        self.aliases.set(alias, &event.prefix)?;
        Ok(())
    }

    /// Single-party rotation: the fast path of the coordinator run inline.
    /// Reveals the vault's next key, commits a fresh one, signs with the
    /// prior current key, verifies, appends, and advances the vault.
    pub fn rotate_keys(&self, args: RotateArgs) -> Result<Account, Error> {
        let chain = self
            .kel
            .get_chain(&args.aid)?
            .ok_or_else(|| Error::UnknownAid(args.aid.clone()))?;
        let keyset = self
            .vault
            .get_keyset(&args.aid)?
            .ok_or_else(|| Error::KeysetMissing(args.aid.clone()))?;

        let revealed = signer_from_entry(&keyset.next, &args.aid)?;
        let old_current = signer_from_entry(&keyset.current, &args.aid)?;
        let fresh_next = args.next.signer()?;

        let latest = self.event_at(&chain, chain.sequence)?;
        let prior_est = self.latest_establishment(&chain)?;
        let timestamp = self.timestamp(&args.timestamp);

        let event = EventBuilder::new(EventType::Rot)
            .with_prefix(&args.aid)
            .with_sn(chain.chain.len() as u64)
            .with_previous_event(&latest.digest)
            .with_keys(vec![revealed.public_prefix(true)])
            .with_next_keys(vec![fresh_next.public_prefix(true)])
            .with_timestamp(&timestamp)
            .build()?;

        // Rotations are authorized by the prior establishment event's keys.
        let key_index = index_of(&prior_est, &old_current)?;
        let envelope = sign_event(
            &event,
            &[(key_index, &old_current)],
            signer_set_for(&event, prior_est.sn),
        )?;
        let result = verify_envelope(&envelope, Some(&prior_est), None)?;
        if !result.valid {
            return Err(Error::NotEnoughSignatures {
                collected: result.valid_signatures,
                required: result.required_signatures,
            });
        }

        let new_keyset = VaultKeyset {
            current: keyset.next.clone(),
            next: VaultKeyEntry {
                public: fresh_next.public_prefix(true),
                seed: Some(to_qb64(&fresh_next.seed())),
            },
        };
        let chain = self.append_kel_envelope(&envelope, Some(&new_keyset))?;
        self.record_finalized_rotation(&envelope, &prior_est, &timestamp)?;

        Ok(Account {
            aid: args.aid.clone(),
            alias: self.aliases.reverse(&args.aid)?.unwrap_or_default(),
            sequence: chain.sequence,
            latest_event: chain.latest_event,
        })
    }

    fn record_finalized_rotation(
        &self,
        envelope: &Envelope,
        prior_est: &KeyEvent,
        timestamp: &str,
    ) -> Result<(), Error> {
        let event = &envelope.event;
        let required = prior_est.current_threshold()?.value();
        let signers = prior_est
            .current_keys()?
            .iter()
            .enumerate()
            .map(|(index, _)| SignerRequirement {
                aid: event.prefix.clone(),
                key_index: index as u16,
                required: false,
                signed: true,
                signature: envelope
                    .signatures
                    .iter()
                    .find(|s| s.key_index == index as u16)
                    .map(|s| s.signature.clone()),
                seen_at: Some(timestamp.to_string()),
            })
            .collect::<Vec<_>>();

        let status = RotationStatus {
            id: event.digest.clone(),
            controller: event.prefix.clone(),
            phase: RotationPhase::Finalized,
            created_at: timestamp.to_string(),
            deadline: None,
            required,
            required_external: 0,
            total_keys: prior_est.current_keys()?.len(),
            collected: 0,
            missing: 0,
            signers,
            prior_event: prior_est.digest.clone(),
            reveal_commit: prior_est
                .commitment()
                .map(|(n, _)| n.clone())
                .unwrap_or_default(),
            next_threshold: event.next_threshold.unwrap_or_default(),
            rot_event: event.clone(),
            final_envelope: Some(envelope.clone()),
            final_event_said: Some(event.digest.clone()),
            sig_count: Some(envelope.signatures.len()),
        };
        self.put_rotation_status(&status)
    }

    pub fn put_rotation_status(&self, status: &RotationStatus) -> Result<(), Error> {
        let key = [ROTATION_NS, &status.id.to_str()].join("");
        self.db.put(&key, &serde_json::to_vec(status)?).map_err(Error::from)
    }

    pub fn get_rotation_status(
        &self,
        rotation_id: &SelfAddressingPrefix,
    ) -> Result<Option<RotationStatus>, Error> {
        let key = [ROTATION_NS, &rotation_id.to_str()].join("");
        match self.db.get(&key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Builds and publishes an interaction event anchoring the given values
    /// under current signing authority.
    pub fn anchor(
        &self,
        aid: &IdentifierPrefix,
        anchors: Vec<Anchor>,
    ) -> Result<Envelope, Error> {
        self.anchor_at(aid, anchors, None)
    }

    fn anchor_at(
        &self,
        aid: &IdentifierPrefix,
        anchors: Vec<Anchor>,
        timestamp: Option<String>,
    ) -> Result<Envelope, Error> {
        let chain = self
            .kel
            .get_chain(aid)?
            .ok_or_else(|| Error::UnknownAid(aid.clone()))?;
        let keyset = self
            .vault
            .get_keyset(aid)?
            .ok_or_else(|| Error::KeysetMissing(aid.clone()))?;
        let current = signer_from_entry(&keyset.current, aid)?;

        let latest = self.event_at(&chain, chain.sequence)?;
        let prior_est = self.latest_establishment(&chain)?;
        let timestamp = self.timestamp(&timestamp);

        let event = EventBuilder::new(EventType::Ixn)
            .with_prefix(aid)
            .with_sn(chain.chain.len() as u64)
            .with_previous_event(&latest.digest)
            .with_anchors(anchors)
            .with_timestamp(&timestamp)
            .build()?;

        let key_index = index_of(&prior_est, &current)?;
        let envelope = sign_event(
            &event,
            &[(key_index, &current)],
            signer_set_for(&event, prior_est.sn),
        )?;
        let result = verify_envelope(&envelope, Some(&prior_est), None)?;
        if !result.valid {
            return Err(Error::NotEnoughSignatures {
                collected: result.valid_signatures,
                required: result.required_signatures,
            });
        }

        self.append_kel_envelope(&envelope, None)?;
        Ok(envelope)
    }

    /// Appends a verified envelope: event and envelope stores first, then
    /// the vault (when the keyset advances), then the chain head. Readers
    /// treat the chain as the source of truth, so a crash between writes
    /// leaves at worst unreferenced events behind.
    pub fn append_kel_envelope(
        &self,
        envelope: &Envelope,
        new_keyset: Option<&VaultKeyset>,
    ) -> Result<ChainMetadata, Error> {
        let _guard = self
            .append_lock
            .lock()
            .map_err(|_| Error::SemanticError("append lock poisoned".into()))?;

        let event = &envelope.event;
        let mut chain = self
            .kel
            .get_chain(&event.prefix)?
            .ok_or_else(|| Error::UnknownAid(event.prefix.clone()))?;

        if event.sn != chain.chain.len() as u64 {
            return Err(Error::SemanticError(format!(
                "out-of-order append: event sn {} but chain length {}",
                event.sn,
                chain.chain.len()
            )));
        }
        if event.previous.as_ref() != Some(&chain.latest_event) {
            return Err(Error::SemanticError(
                "event does not extend the chain head".into(),
            ));
        }

        self.kel.put_event(event)?;
        self.kel.put_envelope(envelope)?;
        if let Some(keyset) = new_keyset {
            self.vault.set_keyset(&event.prefix, keyset)?;
        }
        chain.append(event.digest.clone());
        self.kel.put_chain(&chain)?;
        Ok(chain)
    }

    /// Self-contained proof over a stored event. Resolves signer keys from
    /// the event itself or, for prior-set signatures, from the referenced
    /// establishment event on the same chain.
    pub fn get_event_proof(
        &self,
        said: &SelfAddressingPrefix,
    ) -> Result<Option<EventProof>, Error> {
        let envelope = match self.kel.get_envelope(said)? {
            Some(env) => env,
            None => return Ok(None),
        };
        let event = &envelope.event;
        let chain = self
            .kel
            .get_chain(&event.prefix)?
            .ok_or_else(|| Error::UnknownAid(event.prefix.clone()))?;

        let required = match event.event_type {
            EventType::Icp | EventType::Dip => event.current_threshold()?.value() as usize,
            _ => {
                let prior_est = self.establishment_before(&chain, event.sn)?;
                prior_est.current_threshold()?.value() as usize
            }
        };

        let mut resolution_error = None;
        let proof = EventProof::from_envelope(&envelope, required, |signer_set, index| {
            let keys = match signer_set {
                SignerSetRef::Current { .. } => event.keys.clone(),
                SignerSetRef::Prior { sn } => match self.event_at(&chain, *sn) {
                    Ok(prior) => prior.keys,
                    Err(e) => {
                        resolution_error = Some(e);
                        None
                    }
                },
                SignerSetRef::Witness { .. } => None,
            };
            keys.and_then(|ks| ks.get(index as usize).cloned())
                .map(|key| (key, Some(event.prefix.clone())))
        });
        if let Some(e) = resolution_error {
            return Err(e);
        }
        proof.map(Some)
    }

    // --- delegation -----------------------------------------------------

    /// Creates a delegated child account. The returned request must be
    /// anchored on the parent's KEL before observers accept the child.
    pub fn create_child_account(
        &self,
        parent_aid: &IdentifierPrefix,
        alias: &str,
        opts: AccountOptions,
    ) -> Result<(Account, DelegationRequest), Error> {
        if self.kel.get_chain(parent_aid)?.is_none() {
            return Err(Error::UnknownAid(parent_aid.clone()));
        }
        if self.aliases.get(alias)?.is_some() {
            return Err(Error::AliasExists(alias.into()));
        }
        let current = opts.current.signer()?;
        let next = opts.next.signer()?;
        let timestamp = self.timestamp(&opts.timestamp);

        let event = EventBuilder::new(EventType::Dip)
            .with_keys(vec![current.public_prefix(true)])
            .with_next_keys(vec![next.public_prefix(true)])
            .with_delegator(parent_aid)
            .with_timestamp(&timestamp)
            .build()?;

        let envelope = sign_event(&event, &[(0, &current)], SignerSetRef::Current { sn: 0 })?;
        if !verify_envelope(&envelope, None, None)?.valid {
            return Err(Error::VerificationFailed);
        }
        self.persist_inception(&envelope, &current, &next, alias)?;

        let request = DelegationRequest {
            parent_aid: parent_aid.clone(),
            child_aid: event.prefix.clone(),
            child_event_said: event.digest.clone(),
            child_event_seq: 0,
            seal: seal_of(&event),
        };
        Ok((
            Account {
                aid: event.prefix.clone(),
                alias: alias.into(),
                sequence: 0,
                latest_event: event.digest,
            },
            request,
        ))
    }

    /// Writes the parent-side `ixn` anchoring a delegated child event.
    pub fn anchor_delegation(&self, request: &DelegationRequest) -> Result<Envelope, Error> {
        self.anchor(
            &request.parent_aid,
            vec![Anchor::Seal(request.seal.clone())],
        )
    }

    /// Delegated rotation: like `rotate_keys` but producing a `drt` plus the
    /// parent anchor request for its seal.
    pub fn rotate_child(
        &self,
        args: RotateArgs,
    ) -> Result<(Account, DelegationRequest), Error> {
        let chain = self
            .kel
            .get_chain(&args.aid)?
            .ok_or_else(|| Error::UnknownAid(args.aid.clone()))?;
        let inception = self.event_at(&chain, 0)?;
        let delegator = inception
            .delegator
            .clone()
            .ok_or_else(|| Error::SemanticError("account is not delegated".into()))?;
        let keyset = self
            .vault
            .get_keyset(&args.aid)?
            .ok_or_else(|| Error::KeysetMissing(args.aid.clone()))?;

        let revealed = signer_from_entry(&keyset.next, &args.aid)?;
        let old_current = signer_from_entry(&keyset.current, &args.aid)?;
        let fresh_next = args.next.signer()?;

        let latest = self.event_at(&chain, chain.sequence)?;
        let prior_est = self.latest_establishment(&chain)?;
        let timestamp = self.timestamp(&args.timestamp);

        let event = EventBuilder::new(EventType::Drt)
            .with_prefix(&args.aid)
            .with_sn(chain.chain.len() as u64)
            .with_previous_event(&latest.digest)
            .with_keys(vec![revealed.public_prefix(true)])
            .with_next_keys(vec![fresh_next.public_prefix(true)])
            .with_delegator(&delegator)
            .with_timestamp(&timestamp)
            .build()?;

        let key_index = index_of(&prior_est, &old_current)?;
        let envelope = sign_event(
            &event,
            &[(key_index, &old_current)],
            signer_set_for(&event, prior_est.sn),
        )?;
        let result = verify_envelope(&envelope, Some(&prior_est), None)?;
        if !result.valid {
            return Err(Error::NotEnoughSignatures {
                collected: result.valid_signatures,
                required: result.required_signatures,
            });
        }

        let new_keyset = VaultKeyset {
            current: keyset.next.clone(),
            next: VaultKeyEntry {
                public: fresh_next.public_prefix(true),
                seed: Some(to_qb64(&fresh_next.seed())),
            },
        };
        let chain = self.append_kel_envelope(&envelope, Some(&new_keyset))?;
        self.record_finalized_rotation(&envelope, &prior_est, &timestamp)?;

        let request = DelegationRequest {
            parent_aid: delegator,
            child_aid: args.aid.clone(),
            child_event_said: event.digest.clone(),
            child_event_seq: event.sn,
            seal: seal_of(&event),
        };
        Ok((
            Account {
                aid: args.aid.clone(),
                alias: self.aliases.reverse(&args.aid)?.unwrap_or_default(),
                sequence: chain.sequence,
                latest_event: chain.latest_event,
            },
            request,
        ))
    }

    /// Publishes a parent `ixn` declining future anchors for the child.
    pub fn revoke_child_delegation(
        &self,
        parent_aid: &IdentifierPrefix,
        child_aid: &IdentifierPrefix,
    ) -> Result<Envelope, Error> {
        let child_chain = self
            .kel
            .get_chain(child_aid)?
            .ok_or_else(|| Error::UnknownAid(child_aid.clone()))?;
        self.anchor(
            parent_aid,
            vec![Anchor::Revocation(RevocationSeal {
                prefix: child_aid.clone(),
                event_digest: child_chain.latest_event,
                revoked: true,
            })],
        )
    }

    /// True when the parent's KEL carries an `ixn` anchoring the given seal.
    pub fn delegation_anchored(
        &self,
        parent_aid: &IdentifierPrefix,
        seal: &crate::event::EventSeal,
    ) -> Result<bool, Error> {
        let chain = match self.kel.get_chain(parent_aid)? {
            Some(chain) => chain,
            None => return Ok(false),
        };
        for said in &chain.chain {
            let event = self.kel.get_event(said)?.ok_or(Error::MissingEvent)?;
            if let Some(anchors) = &event.anchors {
                if anchors
                    .iter()
                    .any(|a| matches!(a, Anchor::Seal(s) if s == seal))
                {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    // --- reads ----------------------------------------------------------

    pub fn get_aid_by_alias(&self, alias: &str) -> Result<Option<IdentifierPrefix>, Error> {
        self.aliases.get(alias)
    }

    pub fn get_account(&self, alias: &str) -> Result<Account, Error> {
        let aid = self
            .aliases
            .get(alias)?
            .ok_or_else(|| Error::AccountNotFound(alias.into()))?;
        self.account_for_aid(&aid)?
            .ok_or_else(|| Error::AccountNotFound(alias.into()))
    }

    pub fn account_for_aid(
        &self,
        aid: &IdentifierPrefix,
    ) -> Result<Option<Account>, Error> {
        let chain = match self.kel.get_chain(aid)? {
            Some(chain) => chain,
            None => return Ok(None),
        };
        Ok(Some(Account {
            aid: aid.clone(),
            alias: self.aliases.reverse(aid)?.unwrap_or_default(),
            sequence: chain.sequence,
            latest_event: chain.latest_event,
        }))
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>, Error> {
        let mut accounts = vec![];
        for (alias, aid) in self.aliases.list()? {
            if let Some(chain) = self.kel.get_chain(&aid)? {
                accounts.push(Account {
                    aid,
                    alias,
                    sequence: chain.sequence,
                    latest_event: chain.latest_event,
                });
            }
        }
        Ok(accounts)
    }

    /// Resolves the full event chain for an AID, in sequence order.
    pub fn get_kel_chain(&self, aid: &IdentifierPrefix) -> Result<Vec<KeyEvent>, Error> {
        let chain = self
            .kel
            .get_chain(aid)?
            .ok_or_else(|| Error::UnknownAid(aid.clone()))?;
        chain
            .chain
            .iter()
            .map(|said| self.kel.get_event(said)?.ok_or(Error::MissingEvent))
            .collect()
    }

    pub fn get_latest_sequence(&self, aid: &IdentifierPrefix) -> Result<Option<u64>, Error> {
        Ok(self.kel.get_chain(aid)?.map(|chain| chain.sequence))
    }

    /// Vault keyset view; seeds are stripped unless explicitly requested.
    pub fn get_keys(
        &self,
        aid: &IdentifierPrefix,
        include_secret: bool,
    ) -> Result<Option<VaultKeyset>, Error> {
        Ok(self.vault.get_keyset(aid)?.map(|mut keyset| {
            if !include_secret {
                keyset.current.seed = None;
                keyset.next.seed = None;
            }
            keyset
        }))
    }

    // --- chain traversal ------------------------------------------------

    pub(crate) fn event_at(&self, chain: &ChainMetadata, sn: u64) -> Result<KeyEvent, Error> {
        let said = chain
            .chain
            .get(sn as usize)
            .ok_or_else(|| Error::SemanticError(format!("no event at sequence {}", sn)))?;
        self.kel.get_event(said)?.ok_or(Error::MissingEvent)
    }

    /// Latest establishment event on the chain.
    pub(crate) fn latest_establishment(
        &self,
        chain: &ChainMetadata,
    ) -> Result<KeyEvent, Error> {
        self.establishment_before(chain, chain.chain.len() as u64)
    }

    /// Latest establishment event strictly before the given sequence.
    pub(crate) fn establishment_before(
        &self,
        chain: &ChainMetadata,
        sn: u64,
    ) -> Result<KeyEvent, Error> {
        for said in chain.chain[..(sn as usize).min(chain.chain.len())]
            .iter()
            .rev()
        {
            let event = self.kel.get_event(said)?.ok_or(Error::MissingEvent)?;
            if event.event_type.is_establishment() {
                return Ok(event);
            }
        }
        Err(Error::SemanticError(
            "chain has no establishment event".into(),
        ))
    }
}

/// Rebuilds a signer from a vault entry's seed.
pub(crate) fn signer_from_entry(
    entry: &VaultKeyEntry,
    aid: &IdentifierPrefix,
) -> Result<Signer, Error> {
    let seed = entry
        .seed
        .as_ref()
        .ok_or_else(|| Error::KeysetMissing(aid.clone()))?;
    let signer = Signer::new_with_seed(&from_qb64(seed)?)?;
    if signer.public_prefix(true) != entry.public {
        return Err(Error::InvalidKey("vault seed does not match public key".into()));
    }
    Ok(signer)
}

/// Index of the signer's public key in the establishment event's key list.
pub(crate) fn index_of(establishment: &KeyEvent, signer: &Signer) -> Result<u16, Error> {
    let target = signer.public_prefix(true);
    establishment
        .current_keys()?
        .iter()
        .position(|k| k == &target)
        .map(|i| i as u16)
        .ok_or_else(|| {
            Error::SemanticError("signer key not present in establishment event".into())
        })
}
