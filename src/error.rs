use thiserror::Error;

use crate::prefix::IdentifierPrefix;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Error during serialization: {0}")]
    SerializationError(String),

    #[error("Invalid qb64 format: {0}")]
    InvalidFormat(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Invalid mnemonic")]
    InvalidMnemonic,

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Recomputed SAID does not match event digest")]
    SaidMismatch,

    #[error("Rotation reveal does not match prior commitment")]
    CommitmentMismatch,

    #[error("Threshold out of range: {0}")]
    ThresholdRange(String),

    #[error("Unknown AID: {0}")]
    UnknownAid(IdentifierPrefix),

    #[error("No keyset in vault for {0}")]
    KeysetMissing(IdentifierPrefix),

    #[error("Alias already in use: {0}")]
    AliasExists(String),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("Not enough signatures: {collected}/{required}")]
    NotEnoughSignatures { collected: usize, required: usize },

    #[error("duplicate signature")]
    DuplicateSignature,

    #[error("too many signatures")]
    TooManySignatures,

    #[error("key index out of range: {0}")]
    InvalidKeyIndex(u16),

    #[error("signer AID mismatch")]
    SignerAidMismatch,

    #[error("Cosigner public key does not match prior key at index {0}")]
    SignerPubMismatch(u16),

    #[error("canonical digest mismatch")]
    StaleProposalDigest,

    #[error("duplicate message")]
    DuplicateMessage,

    #[error("Rotation is not finalizable")]
    RotationNotFinalizable,

    #[error("Rotation timed out")]
    RotationTimedOut,

    #[error("Rotation aborted")]
    RotationAborted,

    #[error("Snapshot digest mismatch")]
    SnapshotDigestMismatch,

    #[error("Event not yet in database")]
    MissingEvent,

    #[error("Missing prior event for verification")]
    MissingPriorEvent,

    #[error("Error while applying event: {0}")]
    SemanticError(String),

    #[error("Event generation error: {0}")]
    EventGenerationError(String),

    #[error(transparent)]
    PrefixError(#[from] crate::prefix::PrefixError),

    #[error(transparent)]
    DbError(#[from] crate::database::DbError),

    #[error(transparent)]
    TransportError(#[from] crate::transport::TransportError),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for Error {
    fn from(e: ed25519_dalek::SignatureError) -> Self {
        Error::InvalidKey(e.to_string())
    }
}
