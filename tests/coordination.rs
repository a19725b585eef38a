//! Multi-party rotation scenarios: threshold collection, replay and
//! authentication guards, resend, abort, and timeout handling.

use std::sync::{Arc, Mutex};

use kelix::database::{ChainMetadata, MemoryStore};
use kelix::envelope::{sign_event, verify_envelope, SignerSetRef};
use kelix::event::{EventBuilder, EventType, SignatureThreshold};
use kelix::kel::KelStore;
use kelix::prefix::{IdentifierPrefix, Prefix, SelfSigningPrefix};
use kelix::rotation::{
    bus_message, CosignerEntry, ProgressEvent, ProgressKind, ProposeArgs, RotationCoordinator,
    RotationPhase, SignBody, SIGN_TYP,
};
use kelix::said::compute_said;
use kelix::signer::{FixedClock, Signer};
use kelix::transport::{BusMessage, MemoryBus, MessageBus};

const T0: &str = "2024-01-01T00:00:00.000Z";

fn fixed_store() -> Arc<KelStore> {
    Arc::new(KelStore::with_clock(
        Arc::new(MemoryStore::new()),
        Arc::new(FixedClock(T0.into())),
    ))
}

/// Registers a multi-key AID whose inception commits to the same key set,
/// so a rotation can reveal it. Returns the controller AID.
fn multisig_aid(store: &KelStore, signers: &[&Signer], threshold: u64) -> IdentifierPrefix {
    let keys: Vec<_> = signers.iter().map(|s| s.public_prefix(true)).collect();
    let event = EventBuilder::new(EventType::Icp)
        .with_keys(keys.clone())
        .with_threshold(SignatureThreshold::new(threshold))
        .with_next_keys(keys)
        .with_next_threshold(SignatureThreshold::new(threshold))
        .with_timestamp(T0)
        .build()
        .unwrap();

    let signer_refs: Vec<(u16, &Signer)> = signers
        .iter()
        .enumerate()
        .map(|(index, signer)| (index as u16, *signer))
        .collect();
    let envelope = sign_event(&event, &signer_refs, SignerSetRef::Current { sn: 0 }).unwrap();
    assert!(verify_envelope(&envelope, None, None).unwrap().valid);

    store.kel().put_event(&event).unwrap();
    store.kel().put_envelope(&envelope).unwrap();
    store
        .kel()
        .put_chain(&ChainMetadata::new(event.prefix.clone(), event.digest.clone()))
        .unwrap();
    event.prefix
}

fn recorder() -> (Arc<Mutex<Vec<ProgressEvent>>>, Vec<kelix::rotation::ProgressListener>) {
    let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(vec![]));
    let sink = events.clone();
    let listener: kelix::rotation::ProgressListener =
        Box::new(move |event| sink.lock().unwrap().push(event.clone()));
    (events, vec![listener])
}

fn kinds(events: &Arc<Mutex<Vec<ProgressEvent>>>) -> Vec<ProgressKind> {
    events.lock().unwrap().iter().map(|e| e.kind).collect()
}

fn last_error(events: &Arc<Mutex<Vec<ProgressEvent>>>) -> Option<String> {
    events
        .lock()
        .unwrap()
        .iter()
        .rev()
        .find(|e| e.kind == ProgressKind::Error)
        .and_then(|e| e.detail.clone())
}

fn bare_aid(n: u64) -> IdentifierPrefix {
    Signer::new_with_number(n).unwrap().public_prefix(true).into()
}

/// A cosigner's sign message over the proposed rotation.
fn cosign_message(
    coordinator: &RotationCoordinator,
    signer_aid: &IdentifierPrefix,
    key_index: u16,
    signer: &Signer,
) -> BusMessage {
    let status = coordinator.status().unwrap();
    let bytes = status.rot_event.canonical_bytes().unwrap();
    let body = SignBody {
        rotation_id: status.id.clone(),
        signer: signer_aid.clone(),
        key_index,
        sig: SelfSigningPrefix::Ed25519Sha512(signer.sign(&bytes).unwrap()),
        ok: true,
        canonical_digest: Some(status.id.clone()),
        reason: None,
    };
    bus_message(signer_aid, SIGN_TYP, &body).unwrap()
}

fn propose_args(
    controller: &IdentifierPrefix,
    signers: &[&Signer],
    threshold: u64,
    cosigners: Vec<CosignerEntry>,
    initiator: Vec<Signer>,
    progress: Vec<kelix::rotation::ProgressListener>,
) -> ProposeArgs {
    let reveal: Vec<_> = signers.iter().map(|s| s.public_prefix(true)).collect();
    let next: Vec<_> = (0..signers.len())
        .map(|_| Signer::new().public_prefix(true))
        .collect();
    ProposeArgs {
        controller: controller.clone(),
        new_keys: reveal,
        new_threshold: SignatureThreshold::new(threshold),
        next_keys: next,
        next_threshold: SignatureThreshold::new(threshold),
        cosigners,
        initiator_signers: initiator,
        deadline: None,
        note: None,
        timestamp: Some(T0.into()),
        progress,
    }
}

#[async_std::test]
async fn s3_two_of_two_needs_both_signatures() {
    let store = fixed_store();
    let bus = Arc::new(MemoryBus::new());

    let signer_a = Signer::new_with_number(21).unwrap();
    let signer_b = Signer::new_with_number(22).unwrap();
    let controller = multisig_aid(&store, &[&signer_a, &signer_b], 2);
    let aid_b = bare_aid(31);

    let (events, progress) = recorder();
    let coordinator = RotationCoordinator::propose(
        store.clone(),
        bus.clone(),
        propose_args(
            &controller,
            &[&signer_a, &signer_b],
            2,
            vec![CosignerEntry {
                aid: aid_b.clone(),
                key_index: 1,
                public_key: signer_b.public_prefix(true),
            }],
            vec![Signer::new_with_number(21).unwrap()],
            progress,
        ),
    )
    .await
    .unwrap();

    let status = coordinator.status().unwrap();
    assert_eq!(status.phase, RotationPhase::Collecting);
    assert_eq!(status.required, 2);
    assert_eq!(status.required_external, 1);
    assert_eq!(status.collected, 0);
    assert_eq!(status.missing, 1);
    assert_eq!(status.signers.len(), 2);
    assert!(!status.signers[0].required);
    assert!(status.signers[1].required);

    // the external signature arrives over the controller channel
    let msg = cosign_message(&coordinator, &aid_b, 1, &signer_b);
    bus.send(&controller.to_str(), msg).await.unwrap();

    let finished = coordinator.await_all(Some(30_000)).await.unwrap();
    assert_eq!(finished.phase, RotationPhase::Finalized);
    assert_eq!(finished.sig_count, Some(2));

    let envelope = finished.final_envelope.unwrap();
    let indices: Vec<u16> = envelope.signatures.iter().map(|s| s.key_index).collect();
    assert_eq!(indices, vec![0, 1]);

    let chain = store.get_kel_chain(&controller).unwrap();
    assert_eq!(chain.len(), 2);
    let verdict = verify_envelope(&envelope, Some(&chain[0]), None).unwrap();
    assert!(verdict.valid);

    assert!(kinds(&events).contains(&ProgressKind::SignatureAccepted));
    assert!(kinds(&events).contains(&ProgressKind::Finalized));
}

#[async_std::test]
async fn s4_replayed_and_duplicate_signatures_are_rejected() {
    let store = fixed_store();
    let bus = Arc::new(MemoryBus::new());

    let signer_a = Signer::new_with_number(41).unwrap();
    let signer_b = Signer::new_with_number(42).unwrap();
    let signer_c = Signer::new_with_number(43).unwrap();
    let controller = multisig_aid(&store, &[&signer_a, &signer_b, &signer_c], 3);
    let aid_b = bare_aid(51);
    let aid_c = bare_aid(52);

    let (events, progress) = recorder();
    let coordinator = RotationCoordinator::propose(
        store.clone(),
        bus.clone(),
        propose_args(
            &controller,
            &[&signer_a, &signer_b, &signer_c],
            3,
            vec![
                CosignerEntry {
                    aid: aid_b.clone(),
                    key_index: 1,
                    public_key: signer_b.public_prefix(true),
                },
                CosignerEntry {
                    aid: aid_c.clone(),
                    key_index: 2,
                    public_key: signer_c.public_prefix(true),
                },
            ],
            vec![Signer::new_with_number(41).unwrap()],
            progress,
        ),
    )
    .await
    .unwrap();

    let msg = cosign_message(&coordinator, &aid_b, 1, &signer_b);
    coordinator.ingest(msg.clone()).await;
    assert_eq!(coordinator.status().unwrap().collected, 1);
    let progress_len = events.lock().unwrap().len();

    // byte-identical replay: dropped by the message-id guard, no progress
    coordinator.ingest(msg.clone()).await;
    assert_eq!(coordinator.status().unwrap().collected, 1);
    assert_eq!(events.lock().unwrap().len(), progress_len);

    // re-encoded without an id: a new message identity, same signature payload
    let mut replayed = msg;
    replayed.id = None;
    coordinator.ingest(replayed).await;
    assert_eq!(coordinator.status().unwrap().collected, 1);
    assert_eq!(last_error(&events).as_deref(), Some("duplicate signature"));

    // the remaining cosigner completes the threshold
    let msg = cosign_message(&coordinator, &aid_c, 2, &signer_c);
    coordinator.ingest(msg).await;
    let status = coordinator.status().unwrap();
    assert_eq!(status.phase, RotationPhase::Finalized);
    assert_eq!(status.sig_count, Some(3));
}

#[async_std::test]
async fn s5_signer_aid_mismatch_is_rejected() {
    let store = fixed_store();
    let bus = Arc::new(MemoryBus::new());

    let signer_a = Signer::new_with_number(61).unwrap();
    let signer_b = Signer::new_with_number(62).unwrap();
    let controller = multisig_aid(&store, &[&signer_a, &signer_b], 2);
    let aid_b = bare_aid(71);
    let stranger = bare_aid(72);

    let (events, progress) = recorder();
    let coordinator = RotationCoordinator::propose(
        store.clone(),
        bus.clone(),
        propose_args(
            &controller,
            &[&signer_a, &signer_b],
            2,
            vec![CosignerEntry {
                aid: aid_b.clone(),
                key_index: 1,
                public_key: signer_b.public_prefix(true),
            }],
            vec![Signer::new_with_number(61).unwrap()],
            progress,
        ),
    )
    .await
    .unwrap();

    // a stranger claims the cosigner's index with a valid signature
    let msg = cosign_message(&coordinator, &stranger, 1, &signer_b);
    coordinator.ingest(msg).await;

    assert_eq!(last_error(&events).as_deref(), Some("signer AID mismatch"));
    let status = coordinator.status().unwrap();
    assert_eq!(status.phase, RotationPhase::Collecting);
    assert_eq!(status.collected, 0);
    assert!(!status.signers[1].signed);
}

#[async_std::test]
async fn s6_stale_proposal_digest_is_rejected() {
    let store = fixed_store();
    let bus = Arc::new(MemoryBus::new());

    let signer_a = Signer::new_with_number(81).unwrap();
    let signer_b = Signer::new_with_number(82).unwrap();
    let controller = multisig_aid(&store, &[&signer_a, &signer_b], 2);
    let aid_b = bare_aid(91);

    let (events, progress) = recorder();
    let coordinator = RotationCoordinator::propose(
        store.clone(),
        bus.clone(),
        propose_args(
            &controller,
            &[&signer_a, &signer_b],
            2,
            vec![CosignerEntry {
                aid: aid_b.clone(),
                key_index: 1,
                public_key: signer_b.public_prefix(true),
            }],
            vec![Signer::new_with_number(81).unwrap()],
            progress,
        ),
    )
    .await
    .unwrap();

    let mut msg = cosign_message(&coordinator, &aid_b, 1, &signer_b);
    let mut body: SignBody = serde_json::from_value(msg.body.clone()).unwrap();
    body.canonical_digest = Some(compute_said(b"some other event body"));
    msg.body = serde_json::to_value(&body).unwrap();
    coordinator.ingest(msg).await;

    assert_eq!(
        last_error(&events).as_deref(),
        Some("canonical digest mismatch")
    );
    assert_eq!(coordinator.status().unwrap().collected, 0);
}

#[async_std::test]
async fn declined_signature_is_reported_but_not_recorded() {
    let store = fixed_store();
    let bus = Arc::new(MemoryBus::new());

    let signer_a = Signer::new_with_number(101).unwrap();
    let signer_b = Signer::new_with_number(102).unwrap();
    let controller = multisig_aid(&store, &[&signer_a, &signer_b], 2);
    let aid_b = bare_aid(111);

    let (events, progress) = recorder();
    let coordinator = RotationCoordinator::propose(
        store.clone(),
        bus.clone(),
        propose_args(
            &controller,
            &[&signer_a, &signer_b],
            2,
            vec![CosignerEntry {
                aid: aid_b.clone(),
                key_index: 1,
                public_key: signer_b.public_prefix(true),
            }],
            vec![Signer::new_with_number(101).unwrap()],
            progress,
        ),
    )
    .await
    .unwrap();

    let mut msg = cosign_message(&coordinator, &aid_b, 1, &signer_b);
    let mut body: SignBody = serde_json::from_value(msg.body.clone()).unwrap();
    body.ok = false;
    body.reason = Some("hardware wallet unavailable".into());
    msg.body = serde_json::to_value(&body).unwrap();
    coordinator.ingest(msg).await;

    assert!(kinds(&events).contains(&ProgressKind::SignatureRejected));
    assert!(!coordinator.status().unwrap().signers[1].signed);
}

#[async_std::test]
async fn fast_path_finalizes_without_messages() {
    let store = fixed_store();
    let bus = Arc::new(MemoryBus::new());

    let signer_a = Signer::new_with_number(121).unwrap();
    let controller = multisig_aid(&store, &[&signer_a], 1);

    let (events, progress) = recorder();
    let coordinator = RotationCoordinator::propose(
        store.clone(),
        bus.clone(),
        propose_args(
            &controller,
            &[&signer_a],
            1,
            vec![],
            vec![Signer::new_with_number(121).unwrap()],
            progress,
        ),
    )
    .await
    .unwrap();

    let status = coordinator.status().unwrap();
    assert_eq!(status.phase, RotationPhase::Finalized);
    assert!(kinds(&events).contains(&ProgressKind::Finalized));
    assert_eq!(store.get_kel_chain(&controller).unwrap().len(), 2);

    // already terminal, so awaiting returns immediately
    let finished = coordinator.await_all(Some(1)).await.unwrap();
    assert_eq!(finished.phase, RotationPhase::Finalized);
}

#[async_std::test]
async fn resend_targets_only_unsigned_required_signers() {
    let store = fixed_store();
    let bus = Arc::new(MemoryBus::new());

    let signer_a = Signer::new_with_number(131).unwrap();
    let signer_b = Signer::new_with_number(132).unwrap();
    let signer_c = Signer::new_with_number(133).unwrap();
    let controller = multisig_aid(&store, &[&signer_a, &signer_b, &signer_c], 3);
    let aid_b = bare_aid(141);
    let aid_c = bare_aid(142);

    let inbox_b = bus.subscribe(&aid_b.to_str()).await.unwrap();
    let inbox_c = bus.subscribe(&aid_c.to_str()).await.unwrap();

    let (events, progress) = recorder();
    let coordinator = RotationCoordinator::propose(
        store.clone(),
        bus.clone(),
        propose_args(
            &controller,
            &[&signer_a, &signer_b, &signer_c],
            3,
            vec![
                CosignerEntry {
                    aid: aid_b.clone(),
                    key_index: 1,
                    public_key: signer_b.public_prefix(true),
                },
                CosignerEntry {
                    aid: aid_c.clone(),
                    key_index: 2,
                    public_key: signer_c.public_prefix(true),
                },
            ],
            vec![Signer::new_with_number(131).unwrap()],
            progress,
        ),
    )
    .await
    .unwrap();

    // both cosigners got the initial proposal
    assert!(inbox_b.receiver.try_recv().is_ok());
    assert!(inbox_c.receiver.try_recv().is_ok());

    // B signs; a resend must reach only C
    let msg = cosign_message(&coordinator, &aid_b, 1, &signer_b);
    coordinator.ingest(msg).await;
    coordinator.resend().await.unwrap();

    assert!(inbox_b.receiver.try_recv().is_err());
    assert!(inbox_c.receiver.try_recv().is_ok());
    assert!(kinds(&events).contains(&ProgressKind::ResendProposal));
}

#[async_std::test]
async fn send_failures_surface_as_progress_not_errors() {
    let store = fixed_store();
    let bus = Arc::new(MemoryBus::new());

    let signer_a = Signer::new_with_number(151).unwrap();
    let signer_b = Signer::new_with_number(152).unwrap();
    let controller = multisig_aid(&store, &[&signer_a, &signer_b], 2);
    let aid_b = bare_aid(161);

    bus.fail_channel(&aid_b.to_str());

    let (events, progress) = recorder();
    let coordinator = RotationCoordinator::propose(
        store.clone(),
        bus.clone(),
        propose_args(
            &controller,
            &[&signer_a, &signer_b],
            2,
            vec![CosignerEntry {
                aid: aid_b.clone(),
                key_index: 1,
                public_key: signer_b.public_prefix(true),
            }],
            vec![Signer::new_with_number(151).unwrap()],
            progress,
        ),
    )
    .await
    .unwrap();

    // the broadcast failed but the rotation keeps collecting
    assert!(kinds(&events).contains(&ProgressKind::SendError));
    assert_eq!(coordinator.status().unwrap().phase, RotationPhase::Collecting);

    // the transport heals and a resend goes through
    bus.heal_channel(&aid_b.to_str());
    coordinator.resend().await.unwrap();
    assert!(kinds(&events).contains(&ProgressKind::ResendProposal));
}

#[async_std::test]
async fn abort_is_terminal_and_idempotent() {
    let store = fixed_store();
    let bus = Arc::new(MemoryBus::new());

    let signer_a = Signer::new_with_number(171).unwrap();
    let signer_b = Signer::new_with_number(172).unwrap();
    let controller = multisig_aid(&store, &[&signer_a, &signer_b], 2);
    let aid_b = bare_aid(181);

    let (events, progress) = recorder();
    let coordinator = RotationCoordinator::propose(
        store.clone(),
        bus.clone(),
        propose_args(
            &controller,
            &[&signer_a, &signer_b],
            2,
            vec![CosignerEntry {
                aid: aid_b.clone(),
                key_index: 1,
                public_key: signer_b.public_prefix(true),
            }],
            vec![Signer::new_with_number(171).unwrap()],
            progress,
        ),
    )
    .await
    .unwrap();

    coordinator.abort(Some("operator cancelled".into())).await.unwrap();
    assert_eq!(coordinator.status().unwrap().phase, RotationPhase::Aborted);
    assert!(kinds(&events).contains(&ProgressKind::Aborted));

    // a second abort is a no-op
    coordinator.abort(None).await.unwrap();
    assert_eq!(coordinator.status().unwrap().phase, RotationPhase::Aborted);

    // late signatures are rejected, the chain never grew
    let msg = cosign_message(&coordinator, &aid_b, 1, &signer_b);
    coordinator.ingest(msg).await;
    assert!(last_error(&events)
        .unwrap()
        .contains("not accepting signatures"));
    assert_eq!(store.get_kel_chain(&controller).unwrap().len(), 1);
}

#[async_std::test]
async fn timeout_marks_rotation_failed() {
    let store = fixed_store();
    let bus = Arc::new(MemoryBus::new());

    let signer_a = Signer::new_with_number(191).unwrap();
    let signer_b = Signer::new_with_number(192).unwrap();
    let controller = multisig_aid(&store, &[&signer_a, &signer_b], 2);
    let aid_b = bare_aid(201);

    let (events, progress) = recorder();
    let mut args = propose_args(
        &controller,
        &[&signer_a, &signer_b],
        2,
        vec![CosignerEntry {
            aid: aid_b.clone(),
            key_index: 1,
            public_key: signer_b.public_prefix(true),
        }],
        vec![Signer::new_with_number(191).unwrap()],
        progress,
    );
    // deadline is already inside the warning window for the fixed clock
    args.deadline = Some("2024-01-01T06:00:00.000Z".into());

    let coordinator = RotationCoordinator::propose(
        store.clone(),
        bus.clone(),
        args,
    )
    .await
    .unwrap();

    let result = coordinator.await_all(Some(1)).await;
    assert!(matches!(result, Err(kelix::error::Error::RotationTimedOut)));
    assert_eq!(coordinator.status().unwrap().phase, RotationPhase::Failed);
    assert!(kinds(&events).contains(&ProgressKind::DeadlineNear));
}
