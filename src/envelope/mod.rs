use serde::{Deserialize, Serialize};
use serde_hex::{Compact, SerHex};

use crate::{
    error::Error,
    event::{EventType, KeyEvent},
    prefix::{
        from_qb64, to_qb64, BasicPrefix, IdentifierPrefix, Prefix, SelfSigningPrefix,
    },
    said::compute_said,
    signer::Signer,
};

pub mod proof;

pub use proof::{verify_event_proof, EventProof, ProofSigner, ProofVerifyResult};

/// Which key array a signature's `keyIndex` points into: this event's `k`,
/// the prior establishment event's `k`, or a witness key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SignerSetRef {
    Current {
        #[serde(with = "SerHex::<Compact>")]
        sn: u64,
    },
    Prior {
        #[serde(with = "SerHex::<Compact>")]
        sn: u64,
    },
    Witness {
        aid: IdentifierPrefix,
    },
}

impl SignerSetRef {
    /// Ordering key for deterministic signature storage:
    /// `(kind, sn, keyIndex)`.
    fn sort_key(&self) -> (u8, u64, String) {
        match self {
            SignerSetRef::Current { sn } => (0, *sn, String::new()),
            SignerSetRef::Prior { sn } => (1, *sn, String::new()),
            SignerSetRef::Witness { aid } => (2, 0, aid.to_str()),
        }
    }
}

/// One signature over an event's canonical bytes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SignatureEntry {
    #[serde(rename = "keyIndex")]
    pub key_index: u16,

    #[serde(rename = "sig")]
    pub signature: SelfSigningPrefix,

    #[serde(rename = "signerSet")]
    pub signer_set: SignerSetRef,
}

/// An event plus its canonical bytes (qb64, the portable source of truth)
/// plus an ordered list of signatures.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    pub event: KeyEvent,

    #[serde(rename = "eventCesr")]
    pub event_cesr: String,

    pub signatures: Vec<SignatureEntry>,
}

impl Envelope {
    /// Decodes the canonical bytes this envelope's signatures cover.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(from_qb64(&self.event_cesr)?)
    }
}

/// Sorts signatures by `(signerSet kind, sn, keyIndex)`.
pub fn sort_signatures(signatures: &mut [SignatureEntry]) {
    signatures.sort_by(|a, b| {
        (a.signer_set.sort_key(), a.key_index).cmp(&(b.signer_set.sort_key(), b.key_index))
    });
}

/// The signer set new signatures on this event belong to. Inceptions sign
/// with their own keys; everything else signs with the prior establishment
/// event's keys.
pub fn signer_set_for(event: &KeyEvent, prior_establishment_sn: u64) -> SignerSetRef {
    match event.event_type {
        EventType::Icp | EventType::Dip => SignerSetRef::Current { sn: event.sn },
        _ => SignerSetRef::Prior {
            sn: prior_establishment_sn,
        },
    }
}

/// Signs an event's canonical bytes with the given `(keyIndex, signer)`
/// pairs and assembles the envelope.
pub fn sign_event(
    event: &KeyEvent,
    signers: &[(u16, &Signer)],
    signer_set: SignerSetRef,
) -> Result<Envelope, Error> {
    let bytes = event.canonical_bytes()?;
    let mut signatures = signers
        .iter()
        .map(|(index, signer)| {
            Ok(SignatureEntry {
                key_index: *index,
                signature: SelfSigningPrefix::Ed25519Sha512(signer.sign(&bytes)?),
                signer_set: signer_set.clone(),
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;
    sort_signatures(&mut signatures);

    Ok(Envelope {
        event: event.clone(),
        event_cesr: to_qb64(&bytes),
        signatures,
    })
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SignatureOutcome {
    #[serde(rename = "keyIndex")]
    pub key_index: u16,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct VerifyResult {
    pub valid: bool,
    #[serde(rename = "validSignatures")]
    pub valid_signatures: usize,
    #[serde(rename = "requiredSignatures")]
    pub required_signatures: usize,
    #[serde(rename = "perSignatureResult")]
    pub per_signature: Vec<SignatureOutcome>,
}

/// Verifies an envelope: SAID against canonical bytes, every signature
/// against its signer-set-resolved public key, rotation reveal against the
/// prior commitment, and the signature count against the applicable
/// threshold. `prior` is the prior establishment event, required for
/// everything but inceptions. Witness signatures are counted only when the
/// resolver supplies a key.
pub fn verify_envelope(
    envelope: &Envelope,
    prior: Option<&KeyEvent>,
    witness_resolver: Option<&dyn Fn(&IdentifierPrefix) -> Option<BasicPrefix>>,
) -> Result<VerifyResult, Error> {
    let event = &envelope.event;
    let bytes = envelope.canonical_bytes()?;

    if compute_said(&bytes) != event.digest {
        return Err(Error::SaidMismatch);
    }

    let needs_prior = !matches!(event.event_type, EventType::Icp | EventType::Dip);
    let prior = match (needs_prior, prior) {
        (true, None) => return Err(Error::MissingPriorEvent),
        (true, Some(p)) => Some(p),
        (false, p) => p,
    };

    if matches!(event.event_type, EventType::Rot | EventType::Drt) {
        // prior is always present here
        event.verify_reveal_against(prior.ok_or(Error::MissingPriorEvent)?)?;
    }

    // Rotations and interactions are authorized by the prior establishment
    // event's keys and threshold; inceptions by their own.
    let (threshold, applicable_current) = match event.event_type {
        EventType::Icp | EventType::Dip => (event.current_threshold()?, true),
        _ => (
            prior.ok_or(Error::MissingPriorEvent)?.current_threshold()?,
            false,
        ),
    };

    let applicable_keys = if applicable_current {
        event.current_keys()?.len()
    } else {
        prior.ok_or(Error::MissingPriorEvent)?.current_keys()?.len()
    };
    let applicable_entries = envelope
        .signatures
        .iter()
        .filter(|entry| counts_toward_threshold(&entry.signer_set, applicable_current))
        .count();
    if applicable_entries > applicable_keys {
        return Err(Error::TooManySignatures);
    }

    let mut per_signature = Vec::with_capacity(envelope.signatures.len());
    let mut valid_count = 0usize;
    let mut seen: Vec<(&SignerSetRef, u16)> = vec![];

    for entry in &envelope.signatures {
        let outcome = verify_entry(entry, &bytes, event, prior, witness_resolver, &mut seen);
        if outcome.valid && counts_toward_threshold(&entry.signer_set, applicable_current) {
            valid_count += 1;
        }
        per_signature.push(outcome);
    }

    Ok(VerifyResult {
        valid: threshold.enough_signatures(valid_count),
        valid_signatures: valid_count,
        required_signatures: threshold.value() as usize,
        per_signature,
    })
}

fn counts_toward_threshold(signer_set: &SignerSetRef, applicable_current: bool) -> bool {
    match signer_set {
        SignerSetRef::Current { .. } => applicable_current,
        SignerSetRef::Prior { .. } => !applicable_current,
        SignerSetRef::Witness { .. } => false,
    }
}

fn verify_entry<'a>(
    entry: &'a SignatureEntry,
    bytes: &[u8],
    event: &KeyEvent,
    prior: Option<&KeyEvent>,
    witness_resolver: Option<&dyn Fn(&IdentifierPrefix) -> Option<BasicPrefix>>,
    seen: &mut Vec<(&'a SignerSetRef, u16)>,
) -> SignatureOutcome {
    let fail = |reason: &str| SignatureOutcome {
        key_index: entry.key_index,
        valid: false,
        reason: Some(reason.into()),
    };

    if seen.contains(&(&entry.signer_set, entry.key_index)) {
        return fail("duplicate signature");
    }
    seen.push((&entry.signer_set, entry.key_index));

    let key = match &entry.signer_set {
        SignerSetRef::Current { .. } => event
            .keys
            .as_ref()
            .and_then(|ks| ks.get(entry.key_index as usize))
            .cloned(),
        SignerSetRef::Prior { .. } => prior
            .and_then(|p| p.keys.as_ref())
            .and_then(|ks| ks.get(entry.key_index as usize))
            .cloned(),
        SignerSetRef::Witness { aid } => witness_resolver.and_then(|r| r(aid)),
    };

    let key = match key {
        Some(k) => k,
        None => return fail("no key for index"),
    };

    if key.verify(bytes, &entry.signature) {
        SignatureOutcome {
            key_index: entry.key_index,
            valid: true,
            reason: None,
        }
    } else {
        fail("signature does not verify")
    }
}
