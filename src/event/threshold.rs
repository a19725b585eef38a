use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, thiserror::Error, Serialize, Deserialize, PartialEq)]
pub enum ThresholdError {
    #[error("Error parsing numerical value")]
    ParseIntError,
    #[error("Weighted threshold lists are not supported")]
    WeightedNotSupported,
    #[error("Threshold {threshold} out of range for {keys} key(s)")]
    OutOfRange { threshold: u64, keys: usize },
}

/// A signing threshold, carried on the wire as a decimal string.
///
/// Weighted list forms are rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureThreshold(u64);

impl SignatureThreshold {
    pub fn new(t: u64) -> Self {
        Self(t)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn enough_signatures(&self, count: usize) -> bool {
        count as u64 >= self.0
    }

    /// Thresholds must lie in `[1, number of keys]`.
    pub fn validate(&self, key_count: usize) -> Result<(), ThresholdError> {
        if self.0 == 0 || self.0 > key_count as u64 {
            Err(ThresholdError::OutOfRange {
                threshold: self.0,
                keys: key_count,
            })
        } else {
            Ok(())
        }
    }
}

impl Default for SignatureThreshold {
    fn default() -> Self {
        Self(1)
    }
}

impl fmt::Display for SignatureThreshold {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SignatureThreshold {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('[') {
            return Err(ThresholdError::WeightedNotSupported);
        }
        s.parse::<u64>()
            .map(SignatureThreshold)
            .map_err(|_| ThresholdError::ParseIntError)
    }
}

impl Serialize for SignatureThreshold {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SignatureThreshold {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(de::Error::custom)
    }
}
