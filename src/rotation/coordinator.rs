use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    database::ROTATION_NS,
    envelope::{
        sign_event, sort_signatures, verify_envelope, Envelope, SignatureEntry, SignerSetRef,
    },
    error::Error,
    event::{EventBuilder, EventType, KeyEvent, SignatureThreshold},
    kel::KelStore,
    prefix::{BasicPrefix, IdentifierPrefix, Prefix, SelfAddressingPrefix},
    signer::Signer,
    transport::{BusMessage, MessageBus},
};

use super::messages::{
    bus_message, AbortBody, FinalizeBody, NextCommit, ProposalBody, RevealSection, SignBody,
    ABORT_TYP, FINALIZE_TYP, PROPOSAL_TYP, SIGN_TYP,
};
use super::replay::ReplayCache;
use super::status::{RotationPhase, RotationStatus, SignerRequirement};

/// Linear backoff for `await_all`: start, step, cap.
const POLL_START_MS: u64 = 800;
const POLL_STEP_MS: u64 = 400;
const POLL_CAP_MS: u64 = 5_000;

/// Default `await_all` timeout: 7 days.
const DEFAULT_TIMEOUT_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Warn once when within 24 hours of the proposal deadline.
const DEADLINE_NEAR_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    #[serde(rename = "signature:accepted")]
    SignatureAccepted,
    #[serde(rename = "signature:rejected")]
    SignatureRejected,
    #[serde(rename = "signature:stored_nonrequired")]
    SignatureStoredNonRequired,
    #[serde(rename = "status:phase")]
    StatusPhase,
    #[serde(rename = "deadline:near")]
    DeadlineNear,
    #[serde(rename = "finalized")]
    Finalized,
    #[serde(rename = "aborted")]
    Aborted,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "resend:proposal")]
    ResendProposal,
    #[serde(rename = "send:error")]
    SendError,
    #[serde(rename = "send:ok")]
    SendOk,
    #[serde(rename = "finalize:invalid")]
    FinalizeInvalid,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub kind: ProgressKind,

    #[serde(rename = "rotationId")]
    pub rotation_id: SelfAddressingPrefix,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Listener callbacks must not block the ingest loop; heavy work belongs on
/// the listener's own queue.
pub type ProgressListener = Box<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Maps one prior-key index to the external AID responsible for it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CosignerEntry {
    pub aid: IdentifierPrefix,

    #[serde(rename = "keyIndex")]
    pub key_index: u16,

    #[serde(rename = "publicKey")]
    pub public_key: BasicPrefix,
}

pub struct ProposeArgs {
    pub controller: IdentifierPrefix,
    /// The reveal: must hash to the prior establishment event's `n`.
    pub new_keys: Vec<BasicPrefix>,
    pub new_threshold: SignatureThreshold,
    pub next_keys: Vec<BasicPrefix>,
    pub next_threshold: SignatureThreshold,
    /// External signers, one per prior-key index the initiator does not
    /// control.
    pub cosigners: Vec<CosignerEntry>,
    /// Seed-held signers for the initiator's own prior-key indices.
    pub initiator_signers: Vec<Signer>,
    pub deadline: Option<String>,
    pub note: Option<String>,
    pub timestamp: Option<String>,
    pub progress: Vec<ProgressListener>,
}

/// Coordinates collection of cosigner signatures on one proposed rotation,
/// durably, and publishes exactly one finalized envelope. One coordinator
/// per rotation id; the listener set and replay cache live and die with it.
pub struct RotationCoordinator {
    kel: Arc<KelStore>,
    bus: Arc<dyn MessageBus>,
    rotation_id: SelfAddressingPrefix,
    controller: IdentifierPrefix,
    rot_event: KeyEvent,
    prior_event: KeyEvent,
    prior_keys: Vec<BasicPrefix>,
    initiator_signers: Vec<(u16, Signer)>,
    listeners: Mutex<Vec<ProgressListener>>,
    replay: Mutex<ReplayCache>,
    ingest_lock: async_std::sync::Mutex<()>,
    subscription: Mutex<Option<u64>>,
    deadline_warned: AtomicBool,
}

impl RotationCoordinator {
    /// Runs preflight, then either finalizes on the spot (the initiator
    /// alone meets the prior threshold) or persists the proposal, broadcasts
    /// it to required signers, and starts consuming the controller channel.
    pub async fn propose(
        kel: Arc<KelStore>,
        bus: Arc<dyn MessageBus>,
        args: ProposeArgs,
    ) -> Result<Arc<Self>, Error> {
        let ProposeArgs {
            controller,
            new_keys,
            new_threshold,
            next_keys,
            next_threshold,
            cosigners,
            initiator_signers,
            deadline,
            note,
            timestamp,
            progress,
        } = args;

        let chain = kel
            .kel()
            .get_chain(&controller)?
            .ok_or_else(|| Error::UnknownAid(controller.clone()))?;
        let latest = kel.event_at(&chain, chain.sequence)?;
        let prior_event = kel.latest_establishment(&chain)?;
        let prior_keys = prior_event.current_keys()?.to_vec();
        let prior_kt = prior_event.current_threshold()?;
        let timestamp = timestamp.unwrap_or_else(|| kel.clock().now());

        // Threshold ranges are enforced by the builder; the reveal and its
        // threshold are checked against the prior commitment right after.
        let rot_event = EventBuilder::new(EventType::Rot)
            .with_prefix(&controller)
            .with_sn(chain.chain.len() as u64)
            .with_previous_event(&latest.digest)
            .with_keys(new_keys)
            .with_threshold(new_threshold)
            .with_next_keys(next_keys)
            .with_next_threshold(next_threshold)
            .with_timestamp(&timestamp)
            .build()?;
        rot_event.verify_reveal_against(&prior_event)?;

        let initiator_signers = resolve_initiator_indices(&prior_keys, &initiator_signers)?;
        let cosigner_rows = resolve_cosigners(&prior_keys, &cosigners, &initiator_signers)?;
        let initiator_share = initiator_signers.len() as u64;

        let coordinator = Arc::new(RotationCoordinator {
            rotation_id: rot_event.digest.clone(),
            controller,
            rot_event,
            prior_event,
            prior_keys,
            initiator_signers,
            listeners: Mutex::new(progress),
            replay: Mutex::new(ReplayCache::default()),
            ingest_lock: async_std::sync::Mutex::new(()),
            subscription: Mutex::new(None),
            deadline_warned: AtomicBool::new(false),
            kel,
            bus,
        });

        let cosigner_rows: Vec<SignerRequirement> = cosigner_rows.into_values().collect();
        if initiator_share >= prior_kt.value() {
            // Fast path: no network round trips required.
            coordinator.finalize_fast_path(&cosigner_rows, &timestamp).await?;
            return Ok(coordinator);
        }

        let required_external = prior_kt.value() - initiator_share;
        coordinator
            .start_collecting(&cosigner_rows, required_external, &timestamp, deadline, note)
            .await?;
        Ok(coordinator)
    }

    pub fn rotation_id(&self) -> &SelfAddressingPrefix {
        &self.rotation_id
    }

    pub fn on_progress(&self, listener: ProgressListener) {
        self.listeners
            .lock()
            .map(|mut listeners| listeners.push(listener))
            .unwrap_or_else(|_| warn!("progress listener registry poisoned"));
    }

    pub fn status(&self) -> Result<RotationStatus, Error> {
        self.kel
            .get_rotation_status(&self.rotation_id)?
            .ok_or(Error::RotationNotFinalizable)
    }

    fn emit(&self, kind: ProgressKind, detail: Option<String>) {
        let event = ProgressEvent {
            kind,
            rotation_id: self.rotation_id.clone(),
            detail,
        };
        debug!("rotation {}: {:?}", self.rotation_id.to_str(), event.kind);
        if let Ok(listeners) = self.listeners.lock() {
            for listener in listeners.iter() {
                listener(&event);
            }
        }
    }

    fn emit_error(&self, detail: &str) {
        self.emit(ProgressKind::Error, Some(detail.into()));
    }

    // --- fast path ------------------------------------------------------

    async fn finalize_fast_path(
        &self,
        cosigner_rows: &[SignerRequirement],
        timestamp: &str,
    ) -> Result<(), Error> {
        let envelope = self.assemble_envelope(vec![])?;
        let result = verify_envelope(&envelope, Some(&self.prior_event), None)?;
        if !result.valid {
            self.emit(ProgressKind::FinalizeInvalid, None);
            return Err(Error::NotEnoughSignatures {
                collected: result.valid_signatures,
                required: result.required_signatures,
            });
        }
        self.kel.append_kel_envelope(&envelope, None)?;

        let mut status = self.initial_status(cosigner_rows, 0, timestamp, None);
        status.phase = RotationPhase::Finalized;
        status.final_event_said = Some(envelope.event.digest.clone());
        status.sig_count = Some(envelope.signatures.len());
        for signer in &mut status.signers {
            if !signer.required {
                signer.signed = true;
                signer.seen_at = Some(timestamp.to_string());
                signer.signature = envelope
                    .signatures
                    .iter()
                    .find(|e| e.key_index == signer.key_index)
                    .map(|e| e.signature.clone());
            }
        }
        status.final_envelope = Some(envelope);
        self.kel.put_rotation_status(&status)?;
        self.emit(ProgressKind::Finalized, None);
        Ok(())
    }

    // --- slow path ------------------------------------------------------

    async fn start_collecting(
        self: &Arc<Self>,
        cosigner_rows: &[SignerRequirement],
        required_external: u64,
        timestamp: &str,
        deadline: Option<String>,
        note: Option<String>,
    ) -> Result<(), Error> {
        let proposal = ProposalBody {
            rotation_id: self.rotation_id.clone(),
            controller: self.controller.clone(),
            prior_event: self.prior_event.clone(),
            prior_keys: self.prior_keys.clone(),
            prior_threshold: self.prior_event.current_threshold()?,
            reveal: RevealSection {
                new_keys: self.rot_event.current_keys()?.to_vec(),
                new_threshold: self.rot_event.current_threshold()?,
                next_commit: NextCommit {
                    n: self
                        .rot_event
                        .commitment()
                        .map(|(n, _)| n.clone())
                        .unwrap_or_default(),
                    nt: self.rot_event.next_threshold.unwrap_or_default(),
                },
            },
            canonical_digest: self.rot_event.digest.clone(),
            deadline: deadline.clone(),
            note,
        };
        self.put_proposal(&proposal)?;

        let mut status =
            self.initial_status(cosigner_rows, required_external, timestamp, deadline);
        self.kel.put_rotation_status(&status)?;

        // Listen before broadcasting so no response can slip past.
        let subscription = self.bus.subscribe(&self.controller.to_str()).await?;
        *self
            .subscription
            .lock()
            .map_err(|_| Error::SemanticError("subscription lock poisoned".into()))? =
            Some(subscription.id);

        let pump = self.clone();
        let receiver = subscription.receiver;
        async_std::task::spawn(async move {
            while let Ok(message) = receiver.recv().await {
                pump.ingest(message).await;
            }
        });

        let proposal_msg = bus_message(&self.controller, PROPOSAL_TYP, &proposal)?;
        let targets: HashSet<String> = cosigner_rows
            .iter()
            .map(|entry| entry.aid.to_str())
            .collect();
        for target in targets {
            match self.bus.send(&target, proposal_msg.clone()).await {
                Ok(()) => self.emit(ProgressKind::SendOk, Some(target)),
                Err(e) => self.emit(ProgressKind::SendError, Some(format!("{}: {}", target, e))),
            }
        }

        // The proposal is out; collection is open.
        status.phase = RotationPhase::Collecting;
        self.kel.put_rotation_status(&status)?;
        self.emit(ProgressKind::StatusPhase, Some("collecting".into()));
        Ok(())
    }

    fn initial_status(
        &self,
        cosigner_rows: &[SignerRequirement],
        required_external: u64,
        timestamp: &str,
        deadline: Option<String>,
    ) -> RotationStatus {
        let mut signers: Vec<SignerRequirement> = self
            .initiator_signers
            .iter()
            .map(|(index, _)| SignerRequirement {
                aid: self.controller.clone(),
                key_index: *index,
                required: false,
                signed: false,
                signature: None,
                seen_at: None,
            })
            .chain(cosigner_rows.iter().cloned())
            .collect();
        signers.sort_by_key(|s| s.key_index);

        RotationStatus {
            id: self.rotation_id.clone(),
            controller: self.controller.clone(),
            phase: RotationPhase::Proposed,
            created_at: timestamp.to_string(),
            deadline,
            required: self
                .prior_event
                .current_threshold()
                .map(|t| t.value())
                .unwrap_or(0),
            required_external,
            total_keys: self.prior_keys.len(),
            collected: 0,
            missing: required_external,
            signers,
            prior_event: self.prior_event.digest.clone(),
            reveal_commit: self
                .prior_event
                .commitment()
                .map(|(n, _)| n.clone())
                .unwrap_or_default(),
            next_threshold: self.rot_event.next_threshold.unwrap_or_default(),
            rot_event: self.rot_event.clone(),
            final_envelope: None,
            final_event_said: None,
            sig_count: None,
        }
    }

    // --- ingest ---------------------------------------------------------

    /// Handles one incoming message. Failures never escape: they surface as
    /// `error` progress events and leave the status untouched.
    pub async fn ingest(&self, message: BusMessage) {
        let _serial = self.ingest_lock.lock().await;

        // Replay guard on message identity. Replayed messages are dropped
        // without a progress event; the durable signer-level checks below
        // cover anything the ephemeral cache forgets.
        if let Err(e) = self.guard_replay(&message) {
            debug!("rotation {}: {}", self.rotation_id.to_str(), e);
            return;
        }

        if message.typ != SIGN_TYP {
            return;
        }
        let body: SignBody = match serde_json::from_value(message.body.clone()) {
            Ok(body) => body,
            Err(e) => {
                self.emit_error(&format!("malformed sign message: {}", e));
                return;
            }
        };

        match self.ingest_signature(&message.from, &body) {
            Ok(true) => {
                self.emit(ProgressKind::StatusPhase, Some("finalizable".into()));
                if let Err(e) = self.try_finalize().await {
                    self.emit_error(&format!("finalize failed: {}", e));
                }
            }
            Ok(false) => {}
            Err(e) => self.emit_error(&e.to_string()),
        }
    }

    fn guard_replay(&self, message: &BusMessage) -> Result<(), Error> {
        let key = ReplayCache::message_key(message);
        let fresh = self
            .replay
            .lock()
            .map(|mut cache| cache.insert(key))
            .unwrap_or(true);
        if fresh {
            Ok(())
        } else {
            Err(Error::DuplicateMessage)
        }
    }

    /// The acceptance checks, in order. Returns whether the status just
    /// became finalizable; rejections are typed errors whose Display form
    /// becomes the progress-event detail.
    fn ingest_signature(
        &self,
        from: &IdentifierPrefix,
        body: &SignBody,
    ) -> Result<bool, Error> {
        if body.rotation_id != self.rotation_id {
            return Err(Error::SemanticError("rotation id mismatch".into()));
        }

        let mut status = self.status()?;
        if !matches!(
            status.phase,
            RotationPhase::Collecting | RotationPhase::Finalizable
        ) {
            return Err(Error::SemanticError(format!(
                "rotation not accepting signatures in phase {:?}",
                status.phase
            )));
        }

        if body.key_index as usize >= self.prior_keys.len() {
            return Err(Error::InvalidKeyIndex(body.key_index));
        }

        let proposal = self.get_proposal()?;
        if proposal.canonical_digest != self.rot_event.digest {
            return Err(Error::StaleProposalDigest);
        }

        let position = status
            .signers
            .iter()
            .position(|s| s.key_index == body.key_index)
            .ok_or(Error::InvalidKeyIndex(body.key_index))?;
        if status.signers[position].signed {
            return Err(Error::DuplicateSignature);
        }

        // Authentication is by AID equality.
        if *from != status.signers[position].aid || body.signer != status.signers[position].aid {
            return Err(Error::SignerAidMismatch);
        }

        if !body.ok {
            self.emit(
                ProgressKind::SignatureRejected,
                body.reason.clone().or_else(|| Some("declined".into())),
            );
            return Ok(false);
        }

        // A signature over some other body must not be recorded, even if it
        // would verify.
        if let Some(digest) = &body.canonical_digest {
            if digest != &proposal.canonical_digest {
                return Err(Error::StaleProposalDigest);
            }
        }

        let bytes = self.rot_event.canonical_bytes()?;
        if !self.prior_keys[body.key_index as usize].verify(&bytes, &body.sig) {
            return Err(Error::VerificationFailed);
        }

        if status
            .signers
            .iter()
            .any(|s| s.signature.as_ref() == Some(&body.sig))
        {
            return Err(Error::DuplicateSignature);
        }

        let now = self.kel.clock().now();
        let was_required = status.signers[position].required;
        {
            let signer = &mut status.signers[position];
            signer.signed = true;
            signer.signature = Some(body.sig.clone());
            signer.seen_at = Some(now);
        }

        if was_required {
            let became_finalizable = status.recount();
            self.kel.put_rotation_status(&status)?;
            self.emit(
                ProgressKind::SignatureAccepted,
                Some(format!("keyIndex {}", body.key_index)),
            );
            Ok(became_finalizable)
        } else {
            self.kel.put_rotation_status(&status)?;
            self.emit(
                ProgressKind::SignatureStoredNonRequired,
                Some(format!("keyIndex {}", body.key_index)),
            );
            Ok(false)
        }
    }

    // --- finalize -------------------------------------------------------

    /// Cosigner signatures plus the self-signing step, merged by key index
    /// (self-signed entries win) and sorted.
    fn assemble_envelope(
        &self,
        cosigner_signatures: Vec<SignatureEntry>,
    ) -> Result<Envelope, Error> {
        let signer_refs: Vec<(u16, &Signer)> = self
            .initiator_signers
            .iter()
            .map(|(index, signer)| (*index, signer))
            .collect();
        let self_signed = sign_event(
            &self.rot_event,
            &signer_refs,
            SignerSetRef::Prior {
                sn: self.prior_event.sn,
            },
        )?;

        let mut merged: BTreeMap<u16, SignatureEntry> = cosigner_signatures
            .into_iter()
            .map(|entry| (entry.key_index, entry))
            .collect();
        for entry in self_signed.signatures {
            merged.insert(entry.key_index, entry);
        }
        let mut signatures: Vec<SignatureEntry> = merged.into_values().collect();
        sort_signatures(&mut signatures);

        Ok(Envelope {
            event: self.rot_event.clone(),
            event_cesr: self_signed.event_cesr,
            signatures,
        })
    }

    /// Re-reads the status and, when it is finalizable, assembles the final
    /// envelope, verifies it end to end, appends it through the KEL store,
    /// and notifies observers. Never finalizes twice.
    pub async fn try_finalize(&self) -> Result<(), Error> {
        let mut status = self.status()?;
        if status.phase != RotationPhase::Finalizable {
            return Ok(());
        }

        let cosigner_signatures: Vec<SignatureEntry> = status
            .signers
            .iter()
            .filter(|s| s.signed && s.required)
            .filter_map(|s| {
                s.signature.as_ref().map(|sig| SignatureEntry {
                    key_index: s.key_index,
                    signature: sig.clone(),
                    signer_set: SignerSetRef::Prior {
                        sn: self.prior_event.sn,
                    },
                })
            })
            .collect();

        let envelope = self.assemble_envelope(cosigner_signatures)?;
        let result = verify_envelope(&envelope, Some(&self.prior_event), None)?;
        if !result.valid {
            self.emit(
                ProgressKind::FinalizeInvalid,
                Some(serde_json::to_string(&result.per_signature).unwrap_or_default()),
            );
            return Err(Error::NotEnoughSignatures {
                collected: result.valid_signatures,
                required: result.required_signatures,
            });
        }

        self.kel.append_kel_envelope(&envelope, None)?;

        status.phase = RotationPhase::Finalized;
        for (index, _) in &self.initiator_signers {
            if let Some(signer) = status.signers.iter_mut().find(|s| s.key_index == *index) {
                signer.signed = true;
                if signer.signature.is_none() {
                    signer.signature = envelope
                        .signatures
                        .iter()
                        .find(|e| e.key_index == *index)
                        .map(|e| e.signature.clone());
                }
            }
        }
        status.final_event_said = Some(envelope.event.digest.clone());
        status.sig_count = Some(envelope.signatures.len());
        status.final_envelope = Some(envelope.clone());
        self.kel.put_rotation_status(&status)?;
        self.emit(ProgressKind::Finalized, None);

        // Observers learn of the finalized envelope; a lost notification is
        // not a protocol failure.
        let finalize_body = FinalizeBody {
            rotation_id: self.rotation_id.clone(),
            rot_event_said: envelope.event.digest.clone(),
        };
        match bus_message(&self.controller, FINALIZE_TYP, &finalize_body) {
            Ok(msg) => match self.bus.send(&self.controller.to_str(), msg).await {
                Ok(()) => self.emit(ProgressKind::SendOk, Some(self.controller.to_str())),
                Err(e) => self.emit(ProgressKind::SendError, Some(e.to_string())),
            },
            Err(e) => self.emit(ProgressKind::SendError, Some(e.to_string())),
        }

        self.unsubscribe().await;
        Ok(())
    }

    async fn unsubscribe(&self) {
        let id = self.subscription.lock().ok().and_then(|mut s| s.take());
        if let Some(id) = id {
            let _ = self
                .bus
                .unsubscribe(&self.controller.to_str(), id)
                .await;
        }
    }

    // --- lifecycle ------------------------------------------------------

    /// Polls with linear backoff until the rotation reaches a terminal
    /// phase. On timeout the status transitions to `failed` and the call
    /// returns `RotationTimedOut`.
    pub async fn await_all(&self, timeout_ms: Option<u64>) -> Result<RotationStatus, Error> {
        let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        let started = Instant::now();
        let mut backoff = POLL_START_MS;

        loop {
            let status = self.status()?;
            if status.phase.is_terminal() {
                return Ok(status);
            }

            self.check_deadline_near(&status);

            if started.elapsed() >= timeout {
                let mut failed = status;
                failed.phase = RotationPhase::Failed;
                self.kel.put_rotation_status(&failed)?;
                self.emit(ProgressKind::StatusPhase, Some("failed".into()));
                self.unsubscribe().await;
                return Err(Error::RotationTimedOut);
            }

            async_std::task::sleep(Duration::from_millis(backoff)).await;
            backoff = (backoff + POLL_STEP_MS).min(POLL_CAP_MS);
        }
    }

    fn check_deadline_near(&self, status: &RotationStatus) {
        let deadline = match &status.deadline {
            Some(deadline) => deadline,
            None => return,
        };
        if self.deadline_warned.load(Ordering::SeqCst) {
            return;
        }
        let (deadline, now) = match (
            chrono::DateTime::parse_from_rfc3339(deadline),
            chrono::DateTime::parse_from_rfc3339(&self.kel.clock().now()),
        ) {
            (Ok(d), Ok(n)) => (d, n),
            _ => return,
        };
        let remaining = deadline.signed_duration_since(now).num_milliseconds();
        if remaining <= DEADLINE_NEAR_MS
            && self
                .deadline_warned
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.emit(
                ProgressKind::DeadlineNear,
                Some(format!("{} ms remaining", remaining.max(0))),
            );
        }
    }

    /// Marks the rotation aborted and tells the channel. Idempotent once
    /// terminal.
    pub async fn abort(&self, reason: Option<String>) -> Result<(), Error> {
        let _serial = self.ingest_lock.lock().await;
        let mut status = self.status()?;
        if status.phase.is_terminal() {
            return Ok(());
        }
        status.phase = RotationPhase::Aborted;
        self.kel.put_rotation_status(&status)?;

        let body = AbortBody {
            rotation_id: self.rotation_id.clone(),
            reason: reason.clone(),
        };
        match bus_message(&self.controller, ABORT_TYP, &body) {
            Ok(msg) => {
                if let Err(e) = self.bus.send(&self.controller.to_str(), msg).await {
                    self.emit(ProgressKind::SendError, Some(e.to_string()));
                }
            }
            Err(e) => self.emit(ProgressKind::SendError, Some(e.to_string())),
        }
        self.emit(ProgressKind::Aborted, reason);
        self.unsubscribe().await;
        Ok(())
    }

    /// Re-sends the persisted proposal to every required signer that has not
    /// signed yet. Already-signed signers are never contacted again.
    pub async fn resend(&self) -> Result<(), Error> {
        let status = self.status()?;
        if status.phase.is_terminal() {
            return Err(Error::RotationNotFinalizable);
        }
        let proposal = self
            .get_proposal()
            .map_err(|e| Error::SemanticError(format!("no cached proposal: {}", e)))?;
        let msg = bus_message(&self.controller, PROPOSAL_TYP, &proposal)?;

        let targets: HashSet<String> = status
            .signers
            .iter()
            .filter(|s| s.required && !s.signed)
            .map(|s| s.aid.to_str())
            .collect();
        for target in &targets {
            if let Err(e) = self.bus.send(target, msg.clone()).await {
                self.emit(ProgressKind::SendError, Some(format!("{}: {}", target, e)));
            }
        }
        self.emit(
            ProgressKind::ResendProposal,
            Some(format!("{} signer(s)", targets.len())),
        );
        Ok(())
    }

    // --- proposal persistence -------------------------------------------

    fn proposal_key(&self) -> String {
        format!("{}{}:proposal", ROTATION_NS, self.rotation_id.to_str())
    }

    fn put_proposal(&self, proposal: &ProposalBody) -> Result<(), Error> {
        let bytes = serde_json::to_vec(proposal)?;
        self.kel.db().put(&self.proposal_key(), &bytes)?;
        Ok(())
    }

    fn get_proposal(&self) -> Result<ProposalBody, Error> {
        let bytes = self
            .kel
            .db()
            .get(&self.proposal_key())?
            .ok_or(Error::MissingEvent)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn resolve_initiator_indices(
    prior_keys: &[BasicPrefix],
    signers: &[Signer],
) -> Result<Vec<(u16, Signer)>, Error> {
    let mut resolved = vec![];
    for signer in signers {
        let target = signer.public_prefix(true);
        let index = prior_keys
            .iter()
            .position(|k| k == &target)
            .ok_or_else(|| {
                Error::SemanticError("initiator signer not present in prior keys".into())
            })?;
        resolved.push((index as u16, Signer::new_with_seed(&signer.seed())?));
    }
    resolved.sort_by_key(|(index, _)| *index);
    resolved.dedup_by_key(|(index, _)| *index);
    Ok(resolved)
}

/// Validates cosigner completeness: every external prior-key index mapped,
/// no duplicates, and each claimed public key equal to the prior key at its
/// index.
fn resolve_cosigners(
    prior_keys: &[BasicPrefix],
    cosigners: &[CosignerEntry],
    initiator: &[(u16, Signer)],
) -> Result<BTreeMap<u16, SignerRequirement>, Error> {
    let initiator_indices: HashSet<u16> = initiator.iter().map(|(index, _)| *index).collect();

    let mut resolved = BTreeMap::new();
    for entry in cosigners {
        if entry.key_index as usize >= prior_keys.len() {
            return Err(Error::InvalidKeyIndex(entry.key_index));
        }
        if prior_keys[entry.key_index as usize] != entry.public_key {
            return Err(Error::SignerPubMismatch(entry.key_index));
        }
        if resolved.contains_key(&entry.key_index) || initiator_indices.contains(&entry.key_index)
        {
            return Err(Error::SemanticError(format!(
                "duplicate cosigner index {}",
                entry.key_index
            )));
        }
        resolved.insert(
            entry.key_index,
            SignerRequirement {
                aid: entry.aid.clone(),
                key_index: entry.key_index,
                required: true,
                signed: false,
                signature: None,
                seen_at: None,
            },
        );
    }

    for index in 0..prior_keys.len() as u16 {
        if !initiator_indices.contains(&index) && !resolved.contains_key(&index) {
            return Err(Error::SemanticError(format!(
                "no cosigner mapped for external key index {}",
                index
            )));
        }
    }
    Ok(resolved)
}
