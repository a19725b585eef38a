use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    event::KeyEvent,
    prefix::{BasicPrefix, IdentifierPrefix, Prefix, SelfAddressingPrefix, SelfSigningPrefix},
    said::compute_said,
};

use super::{Envelope, SignerSetRef};

/// One signer of a proven event, with its public key resolved so receivers
/// can verify without access to the producer's stores.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProofSigner {
    #[serde(rename = "keyIndex")]
    pub key_index: u16,

    #[serde(rename = "signerSet")]
    pub signer_set: SignerSetRef,

    #[serde(rename = "sig")]
    pub signature: SelfSigningPrefix,

    #[serde(rename = "publicKey")]
    pub public_key: BasicPrefix,

    #[serde(rename = "signerAid", skip_serializing_if = "Option::is_none")]
    pub signer_aid: Option<IdentifierPrefix>,
}

/// A self-contained verification record over one stored event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventProof {
    pub said: SelfAddressingPrefix,

    #[serde(rename = "eventCesr")]
    pub event_cesr: String,

    pub event: KeyEvent,

    pub signers: Vec<ProofSigner>,

    /// Applicable signature threshold, carried so receivers need not read
    /// the prior establishment event.
    pub required: usize,
}

impl EventProof {
    /// Enriches an envelope with resolved keys. `resolve` maps a signature's
    /// signer-set reference and index to `(publicKey, signerAid)`.
    pub fn from_envelope(
        envelope: &Envelope,
        required: usize,
        mut resolve: impl FnMut(&SignerSetRef, u16) -> Option<(BasicPrefix, Option<IdentifierPrefix>)>,
    ) -> Result<Self, Error> {
        let signers = envelope
            .signatures
            .iter()
            .map(|entry| {
                let (public_key, signer_aid) = resolve(&entry.signer_set, entry.key_index)
                    .ok_or_else(|| {
                        Error::SemanticError(format!(
                            "no public key for signature at index {}",
                            entry.key_index
                        ))
                    })?;
                Ok(ProofSigner {
                    key_index: entry.key_index,
                    signer_set: entry.signer_set.clone(),
                    signature: entry.signature.clone(),
                    public_key,
                    signer_aid,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(EventProof {
            said: envelope.event.digest.clone(),
            event_cesr: envelope.event_cesr.clone(),
            event: envelope.event.clone(),
            signers,
            required,
        })
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ProofVerifyResult {
    pub valid: bool,
    pub reasons: Vec<String>,
}

/// Verifies a proof using only its own contents: SAID binding, every
/// carried signature against its carried public key, and the threshold.
pub fn verify_event_proof(proof: &EventProof) -> Result<ProofVerifyResult, Error> {
    let mut reasons = vec![];
    let bytes = crate::prefix::from_qb64(&proof.event_cesr)?;

    if compute_said(&bytes) != proof.said {
        reasons.push("SAID does not match canonical bytes".to_string());
    }
    if proof.event.digest != proof.said {
        reasons.push("event digest does not match proof SAID".to_string());
    }

    let mut valid_count = 0usize;
    for (position, signer) in proof.signers.iter().enumerate() {
        if signer.public_key.verify(&bytes, &signer.signature) {
            valid_count += 1;
        } else {
            let who = signer
                .signer_aid
                .as_ref()
                .map(|aid| aid.to_str())
                .unwrap_or_else(|| signer.public_key.to_str());
            reasons.push(format!("bad sig @{} ({})", position, who));
        }
    }

    if valid_count < proof.required {
        reasons.push(format!(
            "Insufficient signatures: {}/{}",
            valid_count, proof.required
        ));
    }

    Ok(ProofVerifyResult {
        valid: reasons.is_empty(),
        reasons,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        envelope::{sign_event, SignerSetRef},
        event::{EventBuilder, EventType},
        signer::Signer,
    };

    fn proven_icp() -> (EventProof, Signer) {
        let current = Signer::new_with_number(7).unwrap();
        let next = Signer::new_with_number(8).unwrap();
        let event = EventBuilder::new(EventType::Icp)
            .with_keys(vec![current.public_prefix(true)])
            .with_next_keys(vec![next.public_prefix(true)])
            .with_timestamp("2024-01-01T00:00:00.000Z")
            .build()
            .unwrap();
        let envelope =
            sign_event(&event, &[(0, &current)], SignerSetRef::Current { sn: 0 }).unwrap();
        let aid = event.prefix.clone();
        let proof = EventProof::from_envelope(&envelope, 1, |_, index| {
            event
                .keys
                .as_ref()
                .and_then(|ks| ks.get(index as usize))
                .map(|k| (k.clone(), Some(aid.clone())))
        })
        .unwrap();
        (proof, current)
    }

    #[test]
    fn proof_verifies_standalone() {
        let (proof, _) = proven_icp();
        let result = verify_event_proof(&proof).unwrap();
        assert!(result.valid, "{:?}", result.reasons);
    }

    #[test]
    fn wrong_key_is_reported_with_position() {
        let (mut proof, _) = proven_icp();
        let stranger = Signer::new_with_number(9).unwrap();
        proof.signers[0].public_key = stranger.public_prefix(true);

        let result = verify_event_proof(&proof).unwrap();
        assert!(!result.valid);
        assert!(result.reasons[0].starts_with("bad sig @0"));
        assert!(result
            .reasons
            .iter()
            .any(|r| r.starts_with("Insufficient signatures: 0/1")));
    }

    #[test]
    fn proof_survives_serde() {
        let (proof, _) = proven_icp();
        let json = serde_json::to_string(&proof).unwrap();
        let back: EventProof = serde_json::from_str(&json).unwrap();
        assert_eq!(back, proof);
        assert!(verify_event_proof(&back).unwrap().valid);
    }
}
