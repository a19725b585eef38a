use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Serialize, Deserialize, PartialEq)]
pub enum PrefixError {
    #[error("Unknown derivation code: {0}")]
    UnknownCode(String),

    #[error("Incorrect prefix length: {0}")]
    IncorrectLength(String),

    #[error("Base64 decoding error: {0}")]
    Base64Error(String),
}
