//! Multi-party threshold rotation: durable signature collection under loss
//! and replay, converging to exactly one finalized envelope.

pub mod coordinator;
pub mod messages;
pub mod replay;
pub mod status;

pub use coordinator::{
    CosignerEntry, ProgressEvent, ProgressKind, ProgressListener, ProposeArgs,
    RotationCoordinator,
};
pub use messages::{
    bus_message, AbortBody, FinalizeBody, NextCommit, ProposalBody, RevealSection, SignBody,
    ABORT_TYP, FINALIZE_TYP, PROPOSAL_TYP, SIGN_TYP,
};
pub use replay::ReplayCache;
pub use status::{RotationPhase, RotationStatus, SignerRequirement};
