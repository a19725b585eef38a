use core::str::FromStr;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::keys::PublicKey;

pub mod error;

pub use error::PrefixError;

/// Encode raw bytes as unpadded base64url.
pub fn to_qb64(bytes: &[u8]) -> String {
    base64::encode_config(bytes, base64::URL_SAFE_NO_PAD)
}

/// Decode base64url, tolerating padding and standard-alphabet input.
pub fn from_qb64(s: &str) -> Result<Vec<u8>, PrefixError> {
    let normalized: String = s
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    base64::decode_config(&normalized, base64::URL_SAFE_NO_PAD)
        .map_err(|_| PrefixError::Base64Error(s.into()))
}

/// Common behavior of qb64 self-describing codes: a short code followed by
/// the base64url of the raw derivative.
pub trait Prefix {
    fn derivative(&self) -> Vec<u8>;
    fn derivation_code(&self) -> &'static str;
    fn to_str(&self) -> String {
        [self.derivation_code(), &to_qb64(&self.derivative())].join("")
    }
}

/// Public key codes: `D` transferable Ed25519, `B` non-transferable.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum BasicPrefix {
    Ed25519(PublicKey),
    Ed25519NT(PublicKey),
}

impl BasicPrefix {
    pub fn new(public_key: PublicKey, transferable: bool) -> Self {
        if transferable {
            Self::Ed25519(public_key)
        } else {
            Self::Ed25519NT(public_key)
        }
    }

    /// Non transferable means that the public key is always the current
    /// public key. Transferable keys may have been rotated away, so the KEL
    /// must be consulted for the newest one.
    pub fn is_transferable(&self) -> bool {
        matches!(self, BasicPrefix::Ed25519(_))
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            BasicPrefix::Ed25519(pk) | BasicPrefix::Ed25519NT(pk) => pk.clone(),
        }
    }

    pub fn verify(&self, data: &[u8], signature: &SelfSigningPrefix) -> bool {
        self.public_key().verify_ed(data, &signature.derivative())
    }
}

impl Prefix for BasicPrefix {
    fn derivative(&self) -> Vec<u8> {
        self.public_key().key()
    }

    fn derivation_code(&self) -> &'static str {
        match self {
            BasicPrefix::Ed25519(_) => "D",
            BasicPrefix::Ed25519NT(_) => "B",
        }
    }
}

impl FromStr for BasicPrefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (code, transferable) = match s.get(..1) {
            Some("D") => ("D", true),
            Some("B") => ("B", false),
            _ => return Err(PrefixError::UnknownCode(s.into())),
        };
        if s.len() != 44 {
            return Err(PrefixError::IncorrectLength(s.into()));
        }
        let raw = from_qb64(&s[code.len()..])?;
        if raw.len() != 32 {
            return Err(PrefixError::IncorrectLength(s.into()));
        }
        Ok(BasicPrefix::new(PublicKey::new(raw), transferable))
    }
}

/// Signature codes: `0B` transferable Ed25519, `0A` non-transferable.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum SelfSigningPrefix {
    Ed25519Sha512(Vec<u8>),
    Ed25519Sha512NT(Vec<u8>),
}

impl SelfSigningPrefix {
    pub fn new(signature: Vec<u8>, transferable: bool) -> Self {
        if transferable {
            Self::Ed25519Sha512(signature)
        } else {
            Self::Ed25519Sha512NT(signature)
        }
    }
}

impl Prefix for SelfSigningPrefix {
    fn derivative(&self) -> Vec<u8> {
        match self {
            SelfSigningPrefix::Ed25519Sha512(s) | SelfSigningPrefix::Ed25519Sha512NT(s) => {
                s.clone()
            }
        }
    }

    fn derivation_code(&self) -> &'static str {
        match self {
            SelfSigningPrefix::Ed25519Sha512(_) => "0B",
            SelfSigningPrefix::Ed25519Sha512NT(_) => "0A",
        }
    }
}

impl FromStr for SelfSigningPrefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (code, transferable) = match s.get(..2) {
            Some("0B") => ("0B", true),
            Some("0A") => ("0A", false),
            _ => return Err(PrefixError::UnknownCode(s.into())),
        };
        if s.len() != 88 {
            return Err(PrefixError::IncorrectLength(s.into()));
        }
        let raw = from_qb64(&s[code.len()..])?;
        if raw.len() != 64 {
            return Err(PrefixError::IncorrectLength(s.into()));
        }
        Ok(SelfSigningPrefix::new(raw, transferable))
    }
}

/// SAID code: `E`, a Blake3-256 digest of canonical bytes.
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Default)]
pub struct SelfAddressingPrefix {
    digest: Vec<u8>,
}

impl SelfAddressingPrefix {
    pub fn new(digest: Vec<u8>) -> Self {
        Self { digest }
    }

    /// Checks that this SAID is the digest of the given bytes.
    pub fn verify_binding(&self, data: &[u8]) -> bool {
        blake3::hash(data).as_bytes().as_slice() == self.digest.as_slice()
    }
}

impl Prefix for SelfAddressingPrefix {
    fn derivative(&self) -> Vec<u8> {
        self.digest.clone()
    }

    fn derivation_code(&self) -> &'static str {
        "E"
    }
}

impl FromStr for SelfAddressingPrefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.get(..1) != Some("E") {
            return Err(PrefixError::UnknownCode(s.into()));
        }
        if s.len() != 44 {
            return Err(PrefixError::IncorrectLength(s.into()));
        }
        let raw = from_qb64(&s[1..])?;
        if raw.len() != 32 {
            return Err(PrefixError::IncorrectLength(s.into()));
        }
        Ok(SelfAddressingPrefix::new(raw))
    }
}

/// An AID: either a basic (key-derived, `D`/`B`) or a self-addressing
/// (digest-derived, `E`) identifier.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum IdentifierPrefix {
    Basic(BasicPrefix),
    SelfAddressing(SelfAddressingPrefix),
}

impl IdentifierPrefix {
    pub fn is_transferable(&self) -> bool {
        match self {
            IdentifierPrefix::Basic(bp) => bp.is_transferable(),
            IdentifierPrefix::SelfAddressing(_) => true,
        }
    }
}

impl Prefix for IdentifierPrefix {
    fn derivative(&self) -> Vec<u8> {
        match self {
            IdentifierPrefix::Basic(bp) => bp.derivative(),
            IdentifierPrefix::SelfAddressing(sp) => sp.derivative(),
        }
    }

    fn derivation_code(&self) -> &'static str {
        match self {
            IdentifierPrefix::Basic(bp) => bp.derivation_code(),
            IdentifierPrefix::SelfAddressing(sp) => sp.derivation_code(),
        }
    }
}

impl FromStr for IdentifierPrefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.get(..1) {
            Some("D") | Some("B") => Ok(IdentifierPrefix::Basic(s.parse()?)),
            Some("E") => Ok(IdentifierPrefix::SelfAddressing(s.parse()?)),
            _ => Err(PrefixError::UnknownCode(s.into())),
        }
    }
}

impl From<BasicPrefix> for IdentifierPrefix {
    fn from(bp: BasicPrefix) -> Self {
        IdentifierPrefix::Basic(bp)
    }
}

impl From<SelfAddressingPrefix> for IdentifierPrefix {
    fn from(sp: SelfAddressingPrefix) -> Self {
        IdentifierPrefix::SelfAddressing(sp)
    }
}

macro_rules! string_serde {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_str())
            }
        }

        impl Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.to_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<$ty, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $ty::from_str(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(BasicPrefix);
string_serde!(SelfSigningPrefix);
string_serde!(SelfAddressingPrefix);
string_serde!(IdentifierPrefix);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qb64_roundtrip() {
        let data = vec![7u8; 32];
        let encoded = to_qb64(&data);
        assert_eq!(encoded.len(), 43);
        assert_eq!(from_qb64(&encoded).unwrap(), data);
        // padded and standard-alphabet input is tolerated
        let padded = base64::encode_config(&data, base64::STANDARD);
        assert_eq!(from_qb64(&padded).unwrap(), data);
    }

    #[test]
    fn basic_prefix_roundtrip() {
        use ed25519_dalek::Keypair;
        use rand::rngs::OsRng;

        let kp = Keypair::generate(&mut OsRng);
        let bp = BasicPrefix::Ed25519(PublicKey::new(kp.public.to_bytes().to_vec()));

        let s = bp.to_str();
        assert_eq!(s.len(), 44);
        assert!(s.starts_with('D'));
        assert_eq!(s.parse::<BasicPrefix>().unwrap(), bp);

        let nt = BasicPrefix::Ed25519NT(PublicKey::new(kp.public.to_bytes().to_vec()));
        assert!(nt.to_str().starts_with('B'));
        assert!(!nt.is_transferable());
    }

    #[test]
    fn self_signing_prefix_roundtrip() {
        let sig = SelfSigningPrefix::Ed25519Sha512(vec![3u8; 64]);
        let s = sig.to_str();
        assert_eq!(s.len(), 88);
        assert!(s.starts_with("0B"));
        assert_eq!(s.parse::<SelfSigningPrefix>().unwrap(), sig);
    }

    #[test]
    fn identifier_prefix_discriminates() {
        let said = SelfAddressingPrefix::new(blake3::hash(b"x").as_bytes().to_vec());
        let id: IdentifierPrefix = said.to_str().parse().unwrap();
        assert!(matches!(id, IdentifierPrefix::SelfAddressing(_)));

        assert!("Znonsense".parse::<IdentifierPrefix>().is_err());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!("Dtooshort".parse::<BasicPrefix>().is_err());
        assert!("0Bshort".parse::<SelfSigningPrefix>().is_err());
        assert!("Eshort".parse::<SelfAddressingPrefix>().is_err());
    }

    #[test]
    fn serde_as_string() {
        let said = SelfAddressingPrefix::new(blake3::hash(b"data").as_bytes().to_vec());
        let json = serde_json::to_string(&said).unwrap();
        assert_eq!(json, format!("\"{}\"", said.to_str()));
        let back: SelfAddressingPrefix = serde_json::from_str(&json).unwrap();
        assert_eq!(back, said);
    }
}
