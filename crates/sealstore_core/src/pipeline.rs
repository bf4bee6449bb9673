//! The encryption pipeline: codec plus strategy plus provider.
//!
//! Writes go record → codec → strategy transform → envelope. Reads reverse
//! it. Under `Selective` the transform happens per registered field; under
//! `Full` it covers the whole encoded record.

use crate::crypto::{EncryptionKey, EncryptionProvider};
use crate::envelope::Envelope;
use crate::error::{CoreError, CoreResult};
use crate::predicate::Predicate;
use crate::record::{Record, TypeDescriptor};
use crate::strategy::EncryptionStrategy;
use crate::types::{PayloadMode, RecordId};
use bytes::Bytes;
use sealstore_codec::{
    decode, decode_value, encode, encode_value, from_value, to_value, CodecError, FieldMap, Value,
};
use std::sync::Arc;

const AAD_PREFIX: &[u8] = b"sealstore/v1";

/// Associated data binding a whole-record ciphertext to its envelope.
#[must_use]
pub fn record_aad(type_tag: &str, id: &RecordId) -> Vec<u8> {
    let mut aad = Vec::with_capacity(AAD_PREFIX.len() + type_tag.len() + id.as_str().len() + 2);
    aad.extend_from_slice(AAD_PREFIX);
    aad.push(0);
    aad.extend_from_slice(type_tag.as_bytes());
    aad.push(0);
    aad.extend_from_slice(id.as_str().as_bytes());
    aad
}

/// Associated data binding a field ciphertext to its envelope and field.
#[must_use]
pub fn field_aad(type_tag: &str, id: &RecordId, field: &str) -> Vec<u8> {
    let mut aad = record_aad(type_tag, id);
    aad.push(0);
    aad.extend_from_slice(field.as_bytes());
    aad
}

/// Applies a manager's encryption strategy to records.
pub struct Pipeline {
    strategy: EncryptionStrategy,
    provider: Arc<dyn EncryptionProvider>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("strategy", &self.strategy.name())
            .field("provider", &self.provider.name())
            .finish()
    }
}

impl Pipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(strategy: EncryptionStrategy, provider: Arc<dyn EncryptionProvider>) -> Self {
        Self { strategy, provider }
    }

    /// Returns the strategy.
    #[must_use]
    pub fn strategy(&self) -> &EncryptionStrategy {
        &self.strategy
    }

    /// Returns the payload mode this pipeline writes and accepts.
    #[must_use]
    pub fn mode(&self) -> PayloadMode {
        self.strategy.mode()
    }

    /// Applies the whole-payload transform to encoded record bytes.
    ///
    /// Only `Full` changes the bytes; `Selective` seals fields before
    /// encoding instead.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EncryptionFailed`] if sealing fails.
    pub fn transform_on_write(
        &self,
        type_tag: &str,
        id: &RecordId,
        encoded: Vec<u8>,
    ) -> CoreResult<Bytes> {
        match &self.strategy {
            EncryptionStrategy::Full(key) => {
                let sealed = self
                    .provider
                    .seal(key, &encoded, &record_aad(type_tag, id))?;
                Ok(Bytes::from(sealed))
            }
            EncryptionStrategy::None | EncryptionStrategy::Selective(_) => Ok(Bytes::from(encoded)),
        }
    }

    /// Reverses [`transform_on_write`](Self::transform_on_write).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DecryptionFailed`] if the envelope's mode differs
    /// from this pipeline's, or if authentication fails.
    pub fn transform_on_read(&self, envelope: &Envelope) -> CoreResult<Bytes> {
        self.check_mode(envelope)?;
        match &self.strategy {
            EncryptionStrategy::Full(key) => {
                let opened = self.provider.open(
                    key,
                    &envelope.payload,
                    &record_aad(&envelope.type_tag, &envelope.id),
                )?;
                Ok(Bytes::from(opened))
            }
            EncryptionStrategy::None | EncryptionStrategy::Selective(_) => {
                Ok(envelope.payload.clone())
            }
        }
    }

    /// Encodes and protects a record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Serialization`] if encoding fails,
    /// [`CoreError::InvalidSchema`] if a type with encrypted fields does not
    /// serialize as a map, or [`CoreError::EncryptionFailed`].
    pub fn seal_record<T: Record>(
        &self,
        descriptor: &TypeDescriptor,
        record: &T,
    ) -> CoreResult<Envelope> {
        let id = record.record_id();
        match self.field_key(descriptor) {
            Some(key) => {
                let payload = self.seal_fields(descriptor, &id, key, to_value(record)?)?;
                Ok(self.envelope(descriptor, id, payload))
            }
            None => {
                let payload = self.transform_on_write(descriptor.type_tag(), &id, encode(record)?)?;
                Ok(self.envelope(descriptor, id, payload))
            }
        }
    }

    /// Value-level counterpart of [`seal_record`](Self::seal_record).
    ///
    /// # Errors
    ///
    /// Same as [`seal_record`](Self::seal_record).
    pub fn seal_value(
        &self,
        descriptor: &TypeDescriptor,
        id: &RecordId,
        value: Value,
    ) -> CoreResult<Envelope> {
        let payload = match self.field_key(descriptor) {
            Some(key) => self.seal_fields(descriptor, id, key, value)?,
            None => self.transform_on_write(descriptor.type_tag(), id, encode_value(&value)?)?,
        };
        Ok(self.envelope(descriptor, id.clone(), payload))
    }

    /// Opens and decodes an envelope into a record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DecryptionFailed`] on mode mismatch, wrong key or
    /// tampering, and [`CoreError::Serialization`] if decoding fails.
    pub fn open_record<T: Record>(
        &self,
        descriptor: &TypeDescriptor,
        envelope: &Envelope,
    ) -> CoreResult<T> {
        if self.field_key(descriptor).is_some() {
            let value = self.open_value(descriptor, envelope)?;
            return Ok(from_value(&value)?);
        }
        let bytes = self.transform_on_read(envelope)?;
        Ok(decode(&bytes)?)
    }

    /// Opens an envelope into a dynamic value with every field in the clear.
    ///
    /// # Errors
    ///
    /// Same as [`open_record`](Self::open_record).
    pub fn open_value(&self, descriptor: &TypeDescriptor, envelope: &Envelope) -> CoreResult<Value> {
        let clear = self.clear_view(envelope)?;
        match self.field_key(descriptor) {
            Some(key) => self.open_fields(descriptor, envelope, key, clear),
            None => Ok(clear),
        }
    }

    /// Opens an envelope only if its clear view satisfies `predicate`.
    ///
    /// Under `Selective`, encrypted fields are not decrypted for records that
    /// do not match.
    ///
    /// # Errors
    ///
    /// Same as [`open_record`](Self::open_record).
    pub fn open_matching<T: Record>(
        &self,
        descriptor: &TypeDescriptor,
        envelope: &Envelope,
        predicate: &Predicate,
    ) -> CoreResult<Option<T>> {
        let clear = self.clear_view(envelope)?;
        if !predicate.matches(&clear) {
            return Ok(None);
        }
        let value = match self.field_key(descriptor) {
            Some(key) => self.open_fields(descriptor, envelope, key, clear)?,
            None => clear,
        };
        Ok(Some(from_value(&value)?))
    }

    /// Evaluates `predicate` against an envelope without building a record.
    ///
    /// # Errors
    ///
    /// Same as [`open_record`](Self::open_record).
    pub fn matches(&self, envelope: &Envelope, predicate: &Predicate) -> CoreResult<bool> {
        if predicate.clauses().is_empty() {
            self.check_mode(envelope)?;
            return Ok(true);
        }
        Ok(predicate.matches(&self.clear_view(envelope)?))
    }

    /// Rejects predicates that name an encrypted field.
    ///
    /// Only `Selective` stores have fields the predicate cannot see.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedPredicate`] naming the first offending
    /// field.
    pub fn check_predicate(
        &self,
        descriptor: &TypeDescriptor,
        predicate: &Predicate,
    ) -> CoreResult<()> {
        if !matches!(self.strategy, EncryptionStrategy::Selective(_)) {
            return Ok(());
        }
        match predicate.fields().find(|field| descriptor.is_encrypted(field)) {
            Some(field) => Err(CoreError::UnsupportedPredicate {
                field: field.to_owned(),
            }),
            None => Ok(()),
        }
    }

    /// Opens an envelope without knowing its record type.
    ///
    /// Field-sealed envelopes have every byte-string field tried as a
    /// ciphertext; the second value is the number of fields that opened.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DecryptionFailed`] on mode mismatch or a failed
    /// whole-record open, and [`CoreError::Serialization`] if decoding fails.
    pub fn open_untyped(&self, envelope: &Envelope) -> CoreResult<(Value, usize)> {
        let clear = self.clear_view(envelope)?;
        let EncryptionStrategy::Selective(key) = &self.strategy else {
            return Ok((clear, 0));
        };
        let pairs = match clear {
            Value::Map(pairs) => pairs,
            other => return Ok((other, 0)),
        };

        let mut opened = 0;
        let mut out = Vec::with_capacity(pairs.len());
        for (name, value) in pairs {
            let value = match (&name, value) {
                (Value::Text(field), Value::Bytes(sealed)) => {
                    let aad = field_aad(&envelope.type_tag, &envelope.id, field);
                    match self.provider.open(key, &sealed, &aad) {
                        Ok(plain) if plain.is_empty() => {
                            opened += 1;
                            continue;
                        }
                        Ok(plain) => {
                            opened += 1;
                            decode_value(&plain)?
                        }
                        Err(_) => Value::Bytes(sealed),
                    }
                }
                (_, value) => value,
            };
            out.push((name, value));
        }
        Ok((Value::Map(out), opened))
    }

    fn envelope(&self, descriptor: &TypeDescriptor, id: RecordId, payload: Bytes) -> Envelope {
        Envelope::new(id, descriptor.type_tag(), self.mode(), payload)
    }

    /// Key for per-field sealing, if this type is field-sealed.
    fn field_key(&self, descriptor: &TypeDescriptor) -> Option<&EncryptionKey> {
        match &self.strategy {
            EncryptionStrategy::Selective(key) if !descriptor.encrypted_fields().is_empty() => {
                Some(key)
            }
            _ => None,
        }
    }

    fn check_mode(&self, envelope: &Envelope) -> CoreResult<()> {
        if envelope.mode == self.mode() {
            return Ok(());
        }
        Err(CoreError::decryption_failed(format!(
            "{}/{} was written in {} mode but the store reads {} payloads",
            envelope.type_tag,
            envelope.id,
            envelope.mode,
            self.mode()
        )))
    }

    /// The envelope decoded after the whole-payload transform. Under
    /// `Selective` encrypted fields are still sealed byte strings.
    fn clear_view(&self, envelope: &Envelope) -> CoreResult<Value> {
        let bytes = self.transform_on_read(envelope)?;
        Ok(decode_value(&bytes)?)
    }

    fn seal_fields(
        &self,
        descriptor: &TypeDescriptor,
        id: &RecordId,
        key: &EncryptionKey,
        value: Value,
    ) -> CoreResult<Bytes> {
        let type_tag = descriptor.type_tag();
        let mut fields = FieldMap::from_value(value).map_err(|err| match err {
            CodecError::NotAMap { .. } | CodecError::NonTextKey => {
                CoreError::invalid_schema(format!(
                    "`{type_tag}` declares encrypted fields but does not serialize as a map: {err}"
                ))
            }
            other => other.into(),
        })?;

        for &name in descriptor.encrypted_fields() {
            // An absent field (e.g. a skipped `None`) is sealed as empty
            // plaintext, so every declared field is present on disk.
            let plaintext = match fields.get(name) {
                Some(clear) => encode_value(clear)?,
                None => Vec::new(),
            };
            let sealed = self
                .provider
                .seal(key, &plaintext, &field_aad(type_tag, id, name))?;
            fields.insert(name, Value::Bytes(sealed));
        }

        Ok(Bytes::from(encode_value(&fields.into_value())?))
    }

    fn open_fields(
        &self,
        descriptor: &TypeDescriptor,
        envelope: &Envelope,
        key: &EncryptionKey,
        clear: Value,
    ) -> CoreResult<Value> {
        let mut fields = FieldMap::from_value(clear)?;
        for &name in descriptor.encrypted_fields() {
            let plaintext = match fields.get(name) {
                Some(Value::Bytes(sealed)) => {
                    let aad = field_aad(&envelope.type_tag, &envelope.id, name);
                    self.provider.open(key, sealed, &aad)?
                }
                Some(_) => {
                    return Err(CoreError::decryption_failed(format!(
                        "field `{name}` of {}/{} is not sealed",
                        envelope.type_tag, envelope.id
                    )))
                }
                None => {
                    return Err(CoreError::decryption_failed(format!(
                        "sealed field `{name}` of {}/{} is missing",
                        envelope.type_tag, envelope.id
                    )))
                }
            };
            if plaintext.is_empty() {
                fields.remove(name);
            } else {
                fields.insert(name, decode_value(&plaintext)?);
            }
        }
        Ok(fields.into_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AesGcmProvider;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Patient {
        id: String,
        name: String,
        ssn: String,
        age: u32,
    }

    impl Record for Patient {
        const TYPE_NAME: &'static str = "Patient";

        fn record_id(&self) -> RecordId {
            RecordId::new(self.id.clone())
        }

        fn encrypted_fields() -> &'static [&'static str] {
            &["ssn"]
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tally(String, u64);

    impl Record for Tally {
        const TYPE_NAME: &'static str = "Tally";

        fn record_id(&self) -> RecordId {
            RecordId::new(self.0.clone())
        }

        fn encrypted_fields() -> &'static [&'static str] {
            &["count"]
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Referral {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diagnosis: Option<String>,
    }

    impl Record for Referral {
        const TYPE_NAME: &'static str = "Referral";

        fn record_id(&self) -> RecordId {
            RecordId::new(self.id.clone())
        }

        fn encrypted_fields() -> &'static [&'static str] {
            &["diagnosis"]
        }
    }

    fn patient() -> Patient {
        Patient {
            id: "p-1".into(),
            name: "Ada".into(),
            ssn: "123-45-6789".into(),
            age: 36,
        }
    }

    fn pipeline(strategy: EncryptionStrategy) -> Pipeline {
        Pipeline::new(strategy, Arc::new(AesGcmProvider))
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|window| window == needle)
    }

    #[test]
    fn roundtrip_every_strategy() {
        let descriptor = TypeDescriptor::of::<Patient>().unwrap();
        let key = EncryptionKey::generate();
        for strategy in [
            EncryptionStrategy::None,
            EncryptionStrategy::Full(key.clone()),
            EncryptionStrategy::Selective(key.clone()),
        ] {
            let pipeline = pipeline(strategy);
            let envelope = pipeline.seal_record(&descriptor, &patient()).unwrap();
            assert_eq!(envelope.mode, pipeline.mode());
            let back: Patient = pipeline.open_record(&descriptor, &envelope).unwrap();
            assert_eq!(back, patient());
        }
    }

    #[test]
    fn full_hides_everything() {
        let descriptor = TypeDescriptor::of::<Patient>().unwrap();
        let pipeline = pipeline(EncryptionStrategy::Full(EncryptionKey::generate()));
        let envelope = pipeline.seal_record(&descriptor, &patient()).unwrap();
        assert!(!contains(&envelope.payload, b"Ada"));
        assert!(!contains(&envelope.payload, b"123-45-6789"));
    }

    #[test]
    fn selective_hides_only_registered_fields() {
        let descriptor = TypeDescriptor::of::<Patient>().unwrap();
        let pipeline = pipeline(EncryptionStrategy::Selective(EncryptionKey::generate()));
        let envelope = pipeline.seal_record(&descriptor, &patient()).unwrap();
        assert!(contains(&envelope.payload, b"Ada"));
        assert!(!contains(&envelope.payload, b"123-45-6789"));
    }

    #[test]
    fn wrong_key_is_decryption_failure() {
        let descriptor = TypeDescriptor::of::<Patient>().unwrap();
        let writer = pipeline(EncryptionStrategy::Full(EncryptionKey::generate()));
        let reader = pipeline(EncryptionStrategy::Full(EncryptionKey::generate()));
        let envelope = writer.seal_record(&descriptor, &patient()).unwrap();
        assert!(matches!(
            reader.open_record::<Patient>(&descriptor, &envelope),
            Err(CoreError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn mode_mismatch_is_decryption_failure() {
        let descriptor = TypeDescriptor::of::<Patient>().unwrap();
        let key = EncryptionKey::generate();
        let writer = pipeline(EncryptionStrategy::Selective(key.clone()));
        let reader = pipeline(EncryptionStrategy::Full(key));
        let envelope = writer.seal_record(&descriptor, &patient()).unwrap();
        assert!(matches!(
            reader.open_record::<Patient>(&descriptor, &envelope),
            Err(CoreError::DecryptionFailed { .. })
        ));
        assert!(matches!(
            pipeline(EncryptionStrategy::None).open_record::<Patient>(&descriptor, &envelope),
            Err(CoreError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn ciphertext_bound_to_identity() {
        let descriptor = TypeDescriptor::of::<Patient>().unwrap();
        let pipeline = pipeline(EncryptionStrategy::Full(EncryptionKey::generate()));
        let mut envelope = pipeline.seal_record(&descriptor, &patient()).unwrap();
        envelope.id = RecordId::from("p-2");
        assert!(matches!(
            pipeline.open_record::<Patient>(&descriptor, &envelope),
            Err(CoreError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn stripped_sealed_field_is_decryption_failure() {
        let descriptor = TypeDescriptor::of::<Referral>().unwrap();
        let pipeline = pipeline(EncryptionStrategy::Selective(EncryptionKey::generate()));
        let referral = Referral {
            id: "r-1".into(),
            diagnosis: Some("confidential".into()),
        };
        let envelope = pipeline.seal_record(&descriptor, &referral).unwrap();

        let mut fields = FieldMap::from_value(decode_value(&envelope.payload).unwrap()).unwrap();
        fields.remove("diagnosis");
        let stripped = Envelope::new(
            envelope.id.clone(),
            "Referral",
            envelope.mode,
            encode_value(&fields.into_value()).unwrap(),
        );
        assert!(matches!(
            pipeline.open_record::<Referral>(&descriptor, &stripped),
            Err(CoreError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn absent_sealed_field_stays_absent() {
        let descriptor = TypeDescriptor::of::<Referral>().unwrap();
        let pipeline = pipeline(EncryptionStrategy::Selective(EncryptionKey::generate()));
        let referral = Referral {
            id: "r-2".into(),
            diagnosis: None,
        };
        let envelope = pipeline.seal_record(&descriptor, &referral).unwrap();
        let stored = decode_value(&envelope.payload).unwrap();
        assert!(matches!(
            FieldMap::from_value(stored).unwrap().get("diagnosis"),
            Some(Value::Bytes(_))
        ));

        let back: Referral = pipeline.open_record(&descriptor, &envelope).unwrap();
        assert_eq!(back, referral);
        let (value, opened) = pipeline.open_untyped(&envelope).unwrap();
        assert_eq!(opened, 1);
        assert_eq!(from_value::<Referral>(&value).unwrap(), referral);
    }

    #[test]
    fn selective_requires_map_shape() {
        let descriptor = TypeDescriptor::of::<Tally>().unwrap();
        let pipeline = pipeline(EncryptionStrategy::Selective(EncryptionKey::generate()));
        let result = pipeline.seal_record(&descriptor, &Tally("t".into(), 3));
        assert!(matches!(result, Err(CoreError::InvalidSchema { .. })));
    }

    #[test]
    fn predicate_over_encrypted_field_rejected() {
        let descriptor = TypeDescriptor::of::<Patient>().unwrap();
        let selective = pipeline(EncryptionStrategy::Selective(EncryptionKey::generate()));
        let by_ssn = Predicate::field("ssn").eq("123-45-6789");
        match selective.check_predicate(&descriptor, &by_ssn) {
            Err(CoreError::UnsupportedPredicate { field }) => assert_eq!(field, "ssn"),
            other => panic!("expected UnsupportedPredicate, got {other:?}"),
        }
        let full = pipeline(EncryptionStrategy::Full(EncryptionKey::generate()));
        assert!(full.check_predicate(&descriptor, &by_ssn).is_ok());
    }

    #[test]
    fn open_matching_filters_on_clear_fields() {
        let descriptor = TypeDescriptor::of::<Patient>().unwrap();
        let pipeline = pipeline(EncryptionStrategy::Selective(EncryptionKey::generate()));
        let envelope = pipeline.seal_record(&descriptor, &patient()).unwrap();

        let hit = Predicate::field("age").ge(30u32);
        let miss = Predicate::field("name").eq("Bob");
        assert_eq!(
            pipeline
                .open_matching::<Patient>(&descriptor, &envelope, &hit)
                .unwrap(),
            Some(patient())
        );
        assert_eq!(
            pipeline
                .open_matching::<Patient>(&descriptor, &envelope, &miss)
                .unwrap(),
            None
        );
    }

    #[test]
    fn untyped_open_counts_sealed_fields() {
        let descriptor = TypeDescriptor::of::<Patient>().unwrap();
        let pipeline = pipeline(EncryptionStrategy::Selective(EncryptionKey::generate()));
        let envelope = pipeline.seal_record(&descriptor, &patient()).unwrap();
        let (value, opened) = pipeline.open_untyped(&envelope).unwrap();
        assert_eq!(opened, 1);
        assert_eq!(from_value::<Patient>(&value).unwrap(), patient());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn patient_strategy() -> impl Strategy<Value = Patient> {
            ("[a-z0-9-]{1,16}", ".{0,32}", "[0-9-]{0,11}", any::<u32>()).prop_map(
                |(id, name, ssn, age)| Patient { id, name, ssn, age },
            )
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn sealed_records_round_trip(record in patient_strategy(), selective in any::<bool>()) {
                let descriptor = TypeDescriptor::of::<Patient>().unwrap();
                let key = EncryptionKey::generate();
                let strategy = if selective {
                    EncryptionStrategy::Selective(key)
                } else {
                    EncryptionStrategy::Full(key)
                };
                let pipeline = pipeline(strategy);
                let envelope = pipeline.seal_record(&descriptor, &record).unwrap();
                let back: Patient = pipeline.open_record(&descriptor, &envelope).unwrap();
                prop_assert_eq!(back, record);
            }

            #[test]
            fn any_flipped_byte_fails_to_open(record in patient_strategy(), index in any::<prop::sample::Index>()) {
                let descriptor = TypeDescriptor::of::<Patient>().unwrap();
                let pipeline = pipeline(EncryptionStrategy::Full(EncryptionKey::generate()));
                let envelope = pipeline.seal_record(&descriptor, &record).unwrap();

                let mut payload = envelope.payload.to_vec();
                let at = index.index(payload.len());
                payload[at] ^= 0x01;
                let tampered = Envelope::new(envelope.id.clone(), "Patient", envelope.mode, payload);

                let err = pipeline.open_record::<Patient>(&descriptor, &tampered).unwrap_err();
                prop_assert!(matches!(err, CoreError::DecryptionFailed { .. }), "{}", err);
            }
        }
    }
}
