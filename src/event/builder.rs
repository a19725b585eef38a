use crate::{
    error::Error,
    prefix::{BasicPrefix, IdentifierPrefix, SelfAddressingPrefix},
};

use super::{
    nxt_commitment, Anchor, EventType, KeyEvent, SignatureThreshold, VERSION_TAG,
};

/// Pure constructor for key events. Sequence numbers and prior digests are
/// supplied by the caller; the KEL store derives them from chain metadata.
pub struct EventBuilder {
    event_type: EventType,
    prefix: Option<IdentifierPrefix>,
    sn: u64,
    keys: Vec<BasicPrefix>,
    key_threshold: Option<SignatureThreshold>,
    next_keys: Vec<BasicPrefix>,
    next_threshold: Option<SignatureThreshold>,
    previous: Option<SelfAddressingPrefix>,
    witnesses: Option<Vec<BasicPrefix>>,
    witness_threshold: Option<SignatureThreshold>,
    anchors: Option<Vec<Anchor>>,
    delegator: Option<IdentifierPrefix>,
    timestamp: String,
}

impl EventBuilder {
    pub fn new(event_type: EventType) -> Self {
        EventBuilder {
            event_type,
            prefix: None,
            sn: 0,
            keys: vec![],
            key_threshold: None,
            next_keys: vec![],
            next_threshold: None,
            previous: None,
            witnesses: None,
            witness_threshold: None,
            anchors: None,
            delegator: None,
            timestamp: String::new(),
        }
    }

    pub fn with_prefix(self, prefix: &IdentifierPrefix) -> Self {
        EventBuilder {
            prefix: Some(prefix.clone()),
            ..self
        }
    }

    pub fn with_sn(self, sn: u64) -> Self {
        EventBuilder { sn, ..self }
    }

    pub fn with_keys(self, keys: Vec<BasicPrefix>) -> Self {
        EventBuilder { keys, ..self }
    }

    pub fn with_threshold(self, threshold: SignatureThreshold) -> Self {
        EventBuilder {
            key_threshold: Some(threshold),
            ..self
        }
    }

    pub fn with_next_keys(self, next_keys: Vec<BasicPrefix>) -> Self {
        EventBuilder { next_keys, ..self }
    }

    pub fn with_next_threshold(self, threshold: SignatureThreshold) -> Self {
        EventBuilder {
            next_threshold: Some(threshold),
            ..self
        }
    }

    pub fn with_previous_event(self, previous: &SelfAddressingPrefix) -> Self {
        EventBuilder {
            previous: Some(previous.clone()),
            ..self
        }
    }

    pub fn with_witnesses(self, witnesses: &[BasicPrefix]) -> Self {
        EventBuilder {
            witnesses: Some(witnesses.to_vec()),
            ..self
        }
    }

    pub fn with_witness_threshold(self, threshold: SignatureThreshold) -> Self {
        EventBuilder {
            witness_threshold: Some(threshold),
            ..self
        }
    }

    pub fn with_anchors(self, anchors: Vec<Anchor>) -> Self {
        EventBuilder {
            anchors: Some(anchors),
            ..self
        }
    }

    pub fn with_delegator(self, delegator: &IdentifierPrefix) -> Self {
        EventBuilder {
            delegator: Some(delegator.clone()),
            ..self
        }
    }

    pub fn with_timestamp(self, timestamp: &str) -> Self {
        EventBuilder {
            timestamp: timestamp.into(),
            ..self
        }
    }

    pub fn build(self) -> Result<KeyEvent, Error> {
        let is_establishment = self.event_type.is_establishment();

        let (keys, key_threshold, next_commitment, next_threshold) = if is_establishment {
            if self.keys.is_empty() {
                return Err(Error::EventGenerationError(
                    "establishment event needs at least one current key".into(),
                ));
            }
            let kt = self
                .key_threshold
                .unwrap_or_else(|| SignatureThreshold::new(self.keys.len() as u64));
            kt.validate(self.keys.len())
                .map_err(|e| Error::ThresholdRange(e.to_string()))?;

            if self.next_keys.is_empty() {
                return Err(Error::EventGenerationError(
                    "establishment event needs next keys to commit to".into(),
                ));
            }
            let nt = self
                .next_threshold
                .unwrap_or_else(|| SignatureThreshold::new(self.next_keys.len() as u64));
            nt.validate(self.next_keys.len())
                .map_err(|e| Error::ThresholdRange(e.to_string()))?;

            let n = nxt_commitment(&self.next_keys, &nt)?;
            (Some(self.keys), Some(kt), Some(n), Some(nt))
        } else {
            (None, None, None, None)
        };

        let prefix = match self.event_type {
            EventType::Icp => match &keys {
                // The identifier of a plain inception is its first current key.
                Some(ks) => IdentifierPrefix::Basic(ks[0].clone()),
                None => unreachable!(),
            },
            // Self-addressing: overwritten below together with the digest.
            EventType::Dip => IdentifierPrefix::SelfAddressing(SelfAddressingPrefix::default()),
            _ => self.prefix.clone().ok_or_else(|| {
                Error::EventGenerationError("event needs a controller prefix".into())
            })?,
        };

        match self.event_type {
            EventType::Icp | EventType::Dip => {
                if self.previous.is_some() || self.sn != 0 {
                    return Err(Error::EventGenerationError(
                        "inception is always the first event".into(),
                    ));
                }
            }
            EventType::Rot | EventType::Drt | EventType::Ixn => {
                if self.previous.is_none() {
                    return Err(Error::EventGenerationError(
                        "non-inception event needs a previous event digest".into(),
                    ));
                }
                if self.sn == 0 {
                    return Err(Error::EventGenerationError(
                        "non-inception event needs a nonzero sequence number".into(),
                    ));
                }
            }
        }

        if self.event_type.is_delegated() && self.delegator.is_none() {
            return Err(Error::EventGenerationError(
                "delegated event needs a delegator".into(),
            ));
        }

        let mut event = KeyEvent {
            version: VERSION_TAG.into(),
            event_type: self.event_type,
            digest: SelfAddressingPrefix::default(),
            prefix,
            sn: self.sn,
            previous: self.previous,
            keys,
            key_threshold,
            next_commitment,
            next_threshold,
            witnesses: self.witnesses,
            witness_threshold: self.witness_threshold,
            anchors: self.anchors,
            delegator: self.delegator,
            timestamp: self.timestamp,
        };

        let digest = event.derive_digest()?;
        if event.event_type == EventType::Dip {
            event.prefix = IdentifierPrefix::SelfAddressing(digest.clone());
        }
        event.digest = digest;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{keys::PublicKey, prefix::Prefix};

    fn key(byte: u8) -> BasicPrefix {
        BasicPrefix::Ed25519(PublicKey::new(vec![byte; 32]))
    }

    #[test]
    fn inception_identifier_is_first_key() {
        let event = EventBuilder::new(EventType::Icp)
            .with_keys(vec![key(1), key(2)])
            .with_threshold(SignatureThreshold::new(2))
            .with_next_keys(vec![key(3)])
            .with_next_threshold(SignatureThreshold::new(1))
            .with_timestamp("2024-01-01T00:00:00.000Z")
            .build()
            .unwrap();

        assert_eq!(event.prefix, IdentifierPrefix::Basic(key(1)));
        assert_eq!(event.sn, 0);
        assert!(event.previous.is_none());
        event.check_digest().unwrap();
    }

    #[test]
    fn delegated_inception_identifier_is_said() {
        let delegator: IdentifierPrefix = key(9).into();
        let event = EventBuilder::new(EventType::Dip)
            .with_keys(vec![key(1)])
            .with_next_keys(vec![key(2)])
            .with_delegator(&delegator)
            .with_timestamp("2024-01-01T00:00:00.000Z")
            .build()
            .unwrap();

        match &event.prefix {
            IdentifierPrefix::SelfAddressing(said) => assert_eq!(said, &event.digest),
            other => panic!("expected self-addressing identifier, got {}", other.to_str()),
        }
        event.check_digest().unwrap();
    }

    #[test]
    fn rotation_requires_previous() {
        let err = EventBuilder::new(EventType::Rot)
            .with_prefix(&key(1).into())
            .with_sn(1)
            .with_keys(vec![key(2)])
            .with_next_keys(vec![key(3)])
            .with_timestamp("2024-01-01T00:00:00.000Z")
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let err = EventBuilder::new(EventType::Icp)
            .with_keys(vec![key(1)])
            .with_threshold(SignatureThreshold::new(2))
            .with_next_keys(vec![key(2)])
            .with_timestamp("2024-01-01T00:00:00.000Z")
            .build();
        assert!(matches!(err, Err(Error::ThresholdRange(_))));
    }

    #[test]
    fn interaction_carries_no_key_fields() {
        let prev = crate::said::compute_said(b"prior");
        let event = EventBuilder::new(EventType::Ixn)
            .with_prefix(&key(1).into())
            .with_sn(3)
            .with_previous_event(&prev)
            .with_anchors(vec![Anchor::Said(crate::said::compute_said(b"tel"))])
            .with_timestamp("2024-01-01T00:00:00.000Z")
            .build()
            .unwrap();

        assert!(event.keys.is_none());
        assert!(event.next_commitment.is_none());
        event.check_digest().unwrap();
    }

    #[test]
    fn digest_check_detects_tampering() {
        let mut event = EventBuilder::new(EventType::Icp)
            .with_keys(vec![key(1)])
            .with_next_keys(vec![key(2)])
            .with_timestamp("2024-01-01T00:00:00.000Z")
            .build()
            .unwrap();
        event.sn = 5;
        assert!(matches!(event.check_digest(), Err(Error::SaidMismatch)));
    }
}
