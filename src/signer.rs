use bip39::Mnemonic;
use chrono::Utc;
use rand::rngs::OsRng;

use crate::{
    error::Error,
    keys::{PrivateKey, PublicKey},
    prefix::BasicPrefix,
};

/// How to obtain a keypair: fresh OS randomness, an explicit 32-byte seed,
/// a 24-word BIP-39 mnemonic, or deterministic numeric entropy for
/// reproducible tests.
#[derive(Clone, Debug)]
pub enum KeySpec {
    Random,
    Seed(Vec<u8>),
    Mnemonic(String),
    Number(u64),
}

impl Default for KeySpec {
    fn default() -> Self {
        KeySpec::Random
    }
}

impl KeySpec {
    pub fn signer(&self) -> Result<Signer, Error> {
        match self {
            KeySpec::Random => Ok(Signer::new()),
            KeySpec::Seed(seed) => Signer::new_with_seed(seed),
            KeySpec::Mnemonic(phrase) => Signer::new_with_mnemonic(phrase),
            KeySpec::Number(n) => Signer::new_with_number(*n),
        }
    }
}

/// A seed-held Ed25519 keypair.
pub struct Signer {
    priv_key: PrivateKey,
    pub_key: PublicKey,
}

impl Signer {
    /// Creates a new signer with a random key from the OS CSPRNG.
    pub fn new() -> Self {
        let ed = ed25519_dalek::Keypair::generate(&mut OsRng);
        let pub_key = PublicKey::new(ed.public.to_bytes().to_vec());
        let priv_key = PrivateKey::new(ed.secret.to_bytes().to_vec());

        Signer { pub_key, priv_key }
    }

    pub fn new_with_seed(seed: &[u8]) -> Result<Self, Error> {
        if seed.len() != 32 {
            return Err(Error::InvalidKey(format!(
                "seed must be 32 bytes, got {}",
                seed.len()
            )));
        }
        let sk = ed25519_dalek::SecretKey::from_bytes(seed)?;
        let pk = ed25519_dalek::PublicKey::from(&sk);

        Ok(Signer {
            priv_key: PrivateKey::new(sk.as_bytes().to_vec()),
            pub_key: PublicKey::new(pk.as_bytes().to_vec()),
        })
    }

    /// Derives the keypair from a 24-word mnemonic's 256-bit entropy.
    /// Out-of-wordlist words and bad checksums are rejected.
    pub fn new_with_mnemonic(phrase: &str) -> Result<Self, Error> {
        let mnemonic = Mnemonic::parse_normalized(phrase).map_err(|_| Error::InvalidMnemonic)?;
        let entropy = mnemonic.to_entropy();
        if entropy.len() != 32 {
            return Err(Error::InvalidMnemonic);
        }
        Self::new_with_seed(&entropy)
    }

    /// Deterministic numeric entropy: the seed is the Blake3-256 digest of
    /// the number's decimal representation.
    pub fn new_with_number(n: u64) -> Result<Self, Error> {
        let seed = blake3::hash(n.to_string().as_bytes());
        Self::new_with_seed(seed.as_bytes())
    }

    pub fn sign(&self, msg: impl AsRef<[u8]>) -> Result<Vec<u8>, Error> {
        self.priv_key
            .sign_ed(msg.as_ref())
            .map_err(|e| Error::InvalidKey(e.to_string()))
    }

    pub fn public_key(&self) -> PublicKey {
        self.pub_key.clone()
    }

    pub fn public_prefix(&self, transferable: bool) -> BasicPrefix {
        BasicPrefix::new(self.pub_key.clone(), transferable)
    }

    pub fn seed(&self) -> Vec<u8> {
        self.priv_key.key()
    }
}

impl Default for Signer {
    fn default() -> Self {
        Self::new()
    }
}

/// Generates a fresh 24-word mnemonic from OS randomness.
pub fn generate_mnemonic() -> Result<String, Error> {
    let mnemonic = Mnemonic::generate(24).map_err(|_| Error::InvalidMnemonic)?;
    Ok(mnemonic.to_string())
}

/// Injectable time source, so deterministic tests can pin `dt` fields.
pub trait Clock: Send + Sync {
    fn now(&self) -> String;
}

/// Wall clock, millisecond-precision ISO-8601.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> String {
        Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }
}

/// Always reports the same instant.
pub struct FixedClock(pub String);

impl Clock for FixedClock {
    fn now(&self) -> String {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefix::Prefix;

    #[test]
    fn numeric_spec_is_deterministic() {
        let a = Signer::new_with_number(1234).unwrap();
        let b = Signer::new_with_number(1234).unwrap();
        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(
            a.public_key(),
            Signer::new_with_number(1235).unwrap().public_key()
        );
    }

    #[test]
    fn seed_length_is_validated() {
        assert!(matches!(
            Signer::new_with_seed(&[0u8; 16]),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn mnemonic_roundtrip() {
        let phrase = generate_mnemonic().unwrap();
        assert_eq!(phrase.split_whitespace().count(), 24);
        let a = Signer::new_with_mnemonic(&phrase).unwrap();
        let b = Signer::new_with_mnemonic(&phrase).unwrap();
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn bad_mnemonic_is_rejected() {
        assert!(matches!(
            Signer::new_with_mnemonic("notaword ".repeat(24).trim()),
            Err(Error::InvalidMnemonic)
        ));
        // valid words, broken checksum
        let phrase = ["abandon"; 24].join(" ");
        assert!(Signer::new_with_mnemonic(&phrase).is_err());
    }

    #[test]
    fn sign_verify_through_prefix() {
        let signer = Signer::new_with_number(42).unwrap();
        let msg = b"canonical bytes";
        let sig = signer.sign(msg).unwrap();
        let bp = signer.public_prefix(true);
        assert!(bp.public_key().verify_ed(msg, &sig));
        assert!(bp.to_str().starts_with('D'));
    }
}
