use serde::{Deserialize, Serialize};
use serde_hex::{Compact, SerHex};

use crate::prefix::{IdentifierPrefix, SelfAddressingPrefix};

/// A value anchored in an interaction event's `a` field: a delegation seal,
/// a revocation seal, or a bare SAID.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Anchor {
    Revocation(RevocationSeal),
    Seal(EventSeal),
    Said(SelfAddressingPrefix),
}

/// Identifies one event of another AID: `{i, s, d}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventSeal {
    #[serde(rename = "i")]
    pub prefix: IdentifierPrefix,

    #[serde(rename = "s", with = "SerHex::<Compact>")]
    pub sn: u64,

    #[serde(rename = "d")]
    pub event_digest: SelfAddressingPrefix,
}

impl EventSeal {
    pub fn new(
        prefix: IdentifierPrefix,
        sn: u64,
        event_digest: SelfAddressingPrefix,
    ) -> Self {
        Self {
            prefix,
            sn,
            event_digest,
        }
    }
}

/// Declines future delegation anchors for a child AID. Revocation is a
/// convention carried on an ordinary `ixn`, not a distinct event type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RevocationSeal {
    #[serde(rename = "i")]
    pub prefix: IdentifierPrefix,

    #[serde(rename = "d")]
    pub event_digest: SelfAddressingPrefix,

    #[serde(rename = "rv")]
    pub revoked: bool,
}
