use serde::{Deserialize, Serialize};

use crate::{
    envelope::Envelope,
    event::{KeyEvent, SignatureThreshold},
    prefix::{IdentifierPrefix, SelfAddressingPrefix, SelfSigningPrefix},
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPhase {
    Proposed,
    Collecting,
    Finalizable,
    Finalized,
    Aborted,
    Failed,
}

impl RotationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RotationPhase::Finalized | RotationPhase::Aborted | RotationPhase::Failed
        )
    }
}

/// One prior-key index and the AID responsible for it. `required` is true
/// exactly when the initiator does not control the index; initiator-held
/// indices are satisfied by the self-signing step at finalize time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SignerRequirement {
    pub aid: IdentifierPrefix,

    #[serde(rename = "keyIndex")]
    pub key_index: u16,

    pub required: bool,

    pub signed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SelfSigningPrefix>,

    #[serde(rename = "seenAt", skip_serializing_if = "Option::is_none")]
    pub seen_at: Option<String>,
}

/// Durable per-rotation state. Persisted at `rotation:{rotationId}` after
/// every mutation, so signer-level duplicate checks survive a crash.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RotationStatus {
    pub id: SelfAddressingPrefix,

    pub controller: IdentifierPrefix,

    pub phase: RotationPhase,

    #[serde(rename = "createdAt")]
    pub created_at: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,

    /// Applicable threshold: the prior establishment event's `kt`.
    pub required: u64,

    /// Signatures still needed from non-initiator signers.
    #[serde(rename = "requiredExternal")]
    pub required_external: u64,

    #[serde(rename = "totalKeys")]
    pub total_keys: usize,

    pub collected: u64,

    pub missing: u64,

    pub signers: Vec<SignerRequirement>,

    #[serde(rename = "priorEvent")]
    pub prior_event: SelfAddressingPrefix,

    #[serde(rename = "revealCommit")]
    pub reveal_commit: SelfAddressingPrefix,

    #[serde(rename = "nextThreshold")]
    pub next_threshold: SignatureThreshold,

    #[serde(rename = "rotEvent")]
    pub rot_event: KeyEvent,

    #[serde(rename = "finalEnvelope", skip_serializing_if = "Option::is_none")]
    pub final_envelope: Option<Envelope>,

    #[serde(rename = "finalEventSaid", skip_serializing_if = "Option::is_none")]
    pub final_event_said: Option<SelfAddressingPrefix>,

    #[serde(rename = "sigCount", skip_serializing_if = "Option::is_none")]
    pub sig_count: Option<usize>,
}

impl RotationStatus {
    /// Recounts collected required signatures and recomputes the phase.
    /// Returns true when the status just became finalizable.
    pub fn recount(&mut self) -> bool {
        self.collected = self
            .signers
            .iter()
            .filter(|s| s.signed && s.required)
            .count() as u64;
        self.missing = self.required_external.saturating_sub(self.collected);
        if self.phase == RotationPhase::Collecting && self.collected >= self.required_external {
            self.phase = RotationPhase::Finalizable;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_terminality() {
        assert!(!RotationPhase::Collecting.is_terminal());
        assert!(!RotationPhase::Finalizable.is_terminal());
        assert!(RotationPhase::Finalized.is_terminal());
        assert!(RotationPhase::Aborted.is_terminal());
        assert!(RotationPhase::Failed.is_terminal());
    }

    #[test]
    fn phase_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&RotationPhase::Finalizable).unwrap(),
            "\"finalizable\""
        );
    }
}
