use serde::{Deserialize, Serialize};
use serde_hex::{Compact, SerHex};

use crate::{
    error::Error,
    prefix::{BasicPrefix, IdentifierPrefix, SelfAddressingPrefix},
    said::{canonicalize, compute_said, derive_said},
};

pub mod builder;
pub mod seal;
pub mod threshold;

pub use builder::EventBuilder;
pub use seal::{Anchor, EventSeal, RevocationSeal};
pub use threshold::SignatureThreshold;

/// Fixed version tag carried in every event's `v` field.
pub const VERSION_TAG: &str = "KERI10JSON0001aa_";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    #[serde(rename = "icp")]
    Icp,
    #[serde(rename = "rot")]
    Rot,
    #[serde(rename = "ixn")]
    Ixn,
    #[serde(rename = "dip")]
    Dip,
    #[serde(rename = "drt")]
    Drt,
}

impl EventType {
    /// Establishment events change signing authority.
    pub fn is_establishment(&self) -> bool {
        matches!(self, EventType::Icp | EventType::Rot | EventType::Dip | EventType::Drt)
    }

    pub fn is_delegated(&self) -> bool {
        matches!(self, EventType::Dip | EventType::Drt)
    }
}

/// A key event. Field tags follow the KERI single-letter convention;
/// canonical bytes are the sorted-key compact JSON of this structure.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KeyEvent {
    #[serde(rename = "v")]
    pub version: String,

    #[serde(rename = "t")]
    pub event_type: EventType,

    #[serde(rename = "d")]
    pub digest: SelfAddressingPrefix,

    #[serde(rename = "i")]
    pub prefix: IdentifierPrefix,

    #[serde(rename = "s", with = "SerHex::<Compact>")]
    pub sn: u64,

    #[serde(rename = "p", skip_serializing_if = "Option::is_none")]
    pub previous: Option<SelfAddressingPrefix>,

    #[serde(rename = "k", skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<BasicPrefix>>,

    #[serde(rename = "kt", skip_serializing_if = "Option::is_none")]
    pub key_threshold: Option<SignatureThreshold>,

    #[serde(rename = "n", skip_serializing_if = "Option::is_none")]
    pub next_commitment: Option<SelfAddressingPrefix>,

    #[serde(rename = "nt", skip_serializing_if = "Option::is_none")]
    pub next_threshold: Option<SignatureThreshold>,

    #[serde(rename = "w", skip_serializing_if = "Option::is_none")]
    pub witnesses: Option<Vec<BasicPrefix>>,

    #[serde(rename = "wt", skip_serializing_if = "Option::is_none")]
    pub witness_threshold: Option<SignatureThreshold>,

    #[serde(rename = "a", skip_serializing_if = "Option::is_none")]
    pub anchors: Option<Vec<Anchor>>,

    #[serde(rename = "di", skip_serializing_if = "Option::is_none")]
    pub delegator: Option<IdentifierPrefix>,

    #[serde(rename = "dt")]
    pub timestamp: String,
}

impl KeyEvent {
    /// Canonical bytes of the sealed event (final `d` in place).
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, Error> {
        canonicalize(self)
    }

    /// Fields replaced by the placeholder during SAID derivation. Delegated
    /// inception derives its identifier from the event bytes, so `i` is
    /// placeholdered along with `d`.
    fn placeholder_fields(&self) -> &'static [&'static str] {
        match self.event_type {
            EventType::Dip => &["d", "i"],
            _ => &["d"],
        }
    }

    /// Recomputes this event's SAID using the placeholder technique.
    pub fn derive_digest(&self) -> Result<SelfAddressingPrefix, Error> {
        derive_said(self, self.placeholder_fields())
    }

    /// Checks the self-reference: recomputed SAID must equal `d`.
    pub fn check_digest(&self) -> Result<(), Error> {
        if self.derive_digest()? == self.digest {
            Ok(())
        } else {
            Err(Error::SaidMismatch)
        }
    }

    /// Decoded current keys of an establishment event.
    pub fn current_keys(&self) -> Result<&[BasicPrefix], Error> {
        self.keys
            .as_deref()
            .ok_or_else(|| Error::SemanticError("event carries no key section".into()))
    }

    pub fn current_threshold(&self) -> Result<SignatureThreshold, Error> {
        self.key_threshold
            .ok_or_else(|| Error::SemanticError("event carries no threshold".into()))
    }

    /// The next-key commitment this event made, if any.
    pub fn commitment(&self) -> Option<(&SelfAddressingPrefix, SignatureThreshold)> {
        match (&self.next_commitment, self.next_threshold) {
            (Some(n), Some(nt)) => Some((n, nt)),
            _ => None,
        }
    }

    /// Verifies a rotation's reveal against the prior establishment event:
    /// commitment over `{k, kt}` must equal prior `n`, and `kt` must equal
    /// prior `nt`.
    pub fn verify_reveal_against(&self, prior: &KeyEvent) -> Result<(), Error> {
        let (prior_n, prior_nt) = prior
            .commitment()
            .ok_or_else(|| Error::SemanticError("prior event made no commitment".into()))?;
        let kt = self.current_threshold()?;
        if kt != prior_nt {
            return Err(Error::CommitmentMismatch);
        }
        let revealed = nxt_commitment(self.current_keys()?, &kt)?;
        if &revealed != prior_n {
            return Err(Error::CommitmentMismatch);
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct CommitmentData<'a> {
    k: &'a [BasicPrefix],
    kt: &'a SignatureThreshold,
}

/// Next-key commitment: digest of the canonical `{k, kt}` document, hiding
/// the next keys until a rotation reveals them.
pub fn nxt_commitment(
    keys: &[BasicPrefix],
    threshold: &SignatureThreshold,
) -> Result<SelfAddressingPrefix, Error> {
    let data = CommitmentData {
        k: keys,
        kt: threshold,
    };
    Ok(compute_said(&canonicalize(&data)?))
}

/// Seal identifying an event, for anchoring into another AID's KEL.
pub fn seal_of(event: &KeyEvent) -> EventSeal {
    EventSeal::new(event.prefix.clone(), event.sn, event.digest.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefix::Prefix;

    fn key(byte: u8) -> BasicPrefix {
        BasicPrefix::Ed25519(crate::keys::PublicKey::new(vec![byte; 32]))
    }

    #[test]
    fn commitment_is_order_sensitive_over_keys() {
        let t = SignatureThreshold::new(2);
        let a = nxt_commitment(&[key(1), key(2)], &t).unwrap();
        let b = nxt_commitment(&[key(2), key(1)], &t).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, nxt_commitment(&[key(1), key(2)], &t).unwrap());
    }

    #[test]
    fn commitment_canonical_shape() {
        let t = SignatureThreshold::new(1);
        let keys = [key(3)];
        let expected = compute_said(
            format!(r#"{{"k":["{}"],"kt":"1"}}"#, keys[0].to_str()).as_bytes(),
        );
        assert_eq!(nxt_commitment(&keys, &t).unwrap(), expected);
    }
}
