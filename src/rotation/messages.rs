use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    event::{KeyEvent, SignatureThreshold},
    prefix::{BasicPrefix, IdentifierPrefix, SelfAddressingPrefix, SelfSigningPrefix},
    transport::BusMessage,
};

pub const PROPOSAL_TYP: &str = "keri.rot.proposal.v1";
pub const SIGN_TYP: &str = "keri.rot.sign.v1";
pub const FINALIZE_TYP: &str = "keri.rot.finalize.v1";
pub const ABORT_TYP: &str = "keri.rot.abort.v1";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NextCommit {
    pub n: SelfAddressingPrefix,
    pub nt: SignatureThreshold,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RevealSection {
    #[serde(rename = "newKeys")]
    pub new_keys: Vec<BasicPrefix>,

    #[serde(rename = "newThreshold")]
    pub new_threshold: SignatureThreshold,

    #[serde(rename = "nextCommit")]
    pub next_commit: NextCommit,
}

/// The canonical proposal, persisted at `rotation:{id}:proposal` and sent to
/// every required cosigner.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProposalBody {
    #[serde(rename = "rotationId")]
    pub rotation_id: SelfAddressingPrefix,

    pub controller: IdentifierPrefix,

    #[serde(rename = "priorEvent")]
    pub prior_event: KeyEvent,

    #[serde(rename = "priorKeys")]
    pub prior_keys: Vec<BasicPrefix>,

    #[serde(rename = "priorThreshold")]
    pub prior_threshold: SignatureThreshold,

    pub reveal: RevealSection,

    /// SAID of the rotation event; cosigners echo it so a stale or altered
    /// body cannot be signed unnoticed.
    #[serde(rename = "canonicalDigest")]
    pub canonical_digest: SelfAddressingPrefix,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SignBody {
    #[serde(rename = "rotationId")]
    pub rotation_id: SelfAddressingPrefix,

    pub signer: IdentifierPrefix,

    #[serde(rename = "keyIndex")]
    pub key_index: u16,

    pub sig: SelfSigningPrefix,

    pub ok: bool,

    #[serde(rename = "canonicalDigest", skip_serializing_if = "Option::is_none")]
    pub canonical_digest: Option<SelfAddressingPrefix>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FinalizeBody {
    #[serde(rename = "rotationId")]
    pub rotation_id: SelfAddressingPrefix,

    #[serde(rename = "rotEventSaid")]
    pub rot_event_said: SelfAddressingPrefix,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AbortBody {
    #[serde(rename = "rotationId")]
    pub rotation_id: SelfAddressingPrefix,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Wraps a typed body into a bus message with a fresh id.
pub fn bus_message<T: Serialize>(
    from: &IdentifierPrefix,
    typ: &str,
    body: &T,
) -> Result<BusMessage, crate::error::Error> {
    Ok(BusMessage {
        id: Some(Uuid::new_v4()),
        from: from.clone(),
        typ: typ.into(),
        body: serde_json::to_value(body)?,
    })
}
