//! Encryption wrapper.
//!
//! Encrypts values with AES-256-GCM before they reach the inner store and
//! decrypts them on the way out. The stored value is a cipher envelope:
//!
//! ```json
//! { "__encrypted_data__": "<base64(nonce || ciphertext)>",
//!   "__encryption_version__": 1 }
//! ```
//!
//! Every record gets a fresh random 12-byte nonce. Values that already
//! look like cipher envelopes are not re-encrypted (idempotence guard),
//! and plaintext values found on read are returned as-is, so the wrapper
//! can be layered over a store with pre-existing data. Decryption
//! failures either raise [`KvError::Decryption`] or read as a miss,
//! per [`DecryptionErrorMode`]. Key rotation: `old_keys` are tried in
//! order when the current key fails; writes always use the current key.

use std::path::PathBuf;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use keygrid_core::{KvError, KvResult, ValueMap};
use rand::RngCore;
use serde_json::Value;
use tracing::warn;

use crate::store::{Capabilities, KeyValueStore};

/// Field holding the base64 ciphertext in the cipher envelope.
pub const ENCRYPTED_DATA_FIELD: &str = "__encrypted_data__";

/// Field holding the cipher envelope version.
pub const ENCRYPTION_VERSION_FIELD: &str = "__encryption_version__";

const ENCRYPTION_VERSION: u64 = 1;
const NONCE_LENGTH: usize = 12;
const KEY_LENGTH: usize = 32;

/// Where key material comes from.
pub enum KeySource {
    /// An injected 256-bit key.
    Bytes([u8; KEY_LENGTH]),
    /// A key file holding the base64 key; generated and persisted on
    /// first use when absent.
    KeyFile(PathBuf),
}

impl KeySource {
    fn resolve(&self) -> KvResult<[u8; KEY_LENGTH]> {
        match self {
            Self::Bytes(key) => Ok(*key),
            Self::KeyFile(path) => match std::fs::read_to_string(path) {
                Ok(encoded) => {
                    let decoded = BASE64.decode(encoded.trim()).map_err(|err| {
                        KvError::Decryption {
                            reason: format!("key file is not valid base64: {err}"),
                        }
                    })?;
                    decoded.try_into().map_err(|_| KvError::Decryption {
                        reason: "key file does not hold a 256-bit key".to_string(),
                    })
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    let mut key = [0u8; KEY_LENGTH];
                    rand::rng().fill_bytes(&mut key);
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent).map_err(anyhow::Error::from)?;
                    }
                    std::fs::write(path, BASE64.encode(key)).map_err(anyhow::Error::from)?;
                    Ok(key)
                }
                Err(err) => Err(KvError::Backend(err.into())),
            },
        }
    }
}

/// What a failed decrypt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecryptionErrorMode {
    /// Surface [`KvError::Decryption`].
    #[default]
    Raise,
    /// Treat the entry as a miss (logged).
    ReturnNone,
}

/// Encrypts values at rest with AES-256-GCM.
pub struct EncryptionWrapper<S> {
    inner: S,
    cipher: Aes256Gcm,
    old_ciphers: Vec<Aes256Gcm>,
    on_error: DecryptionErrorMode,
}

impl<S: KeyValueStore> EncryptionWrapper<S> {
    /// Wraps `inner`, encrypting with the resolved key.
    ///
    /// # Errors
    ///
    /// Key-source resolution failures (unreadable or malformed key file).
    pub fn new(inner: S, source: &KeySource) -> KvResult<Self> {
        let key = source.resolve()?;
        Ok(Self {
            inner,
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
            old_ciphers: Vec::new(),
            on_error: DecryptionErrorMode::default(),
        })
    }

    /// Registers rotated-out keys, tried in order when the current key
    /// cannot decrypt a record.
    ///
    /// # Errors
    ///
    /// Key-source resolution failures.
    pub fn with_old_keys(mut self, sources: &[KeySource]) -> KvResult<Self> {
        for source in sources {
            let key = source.resolve()?;
            self.old_ciphers
                .push(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)));
        }
        Ok(self)
    }

    /// Chooses what decryption failures do.
    #[must_use]
    pub fn with_error_mode(mut self, mode: DecryptionErrorMode) -> Self {
        self.on_error = mode;
        self
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn is_cipher_envelope(value: &ValueMap) -> bool {
        value.contains_key(ENCRYPTED_DATA_FIELD)
    }

    fn encrypt_value(&self, value: &ValueMap) -> KvResult<ValueMap> {
        if Self::is_cipher_envelope(value) {
            // Already encrypted; never double-wrap.
            return Ok(value.clone());
        }

        let plaintext = serde_json::to_vec(value)
            .map_err(|err| KvError::serialization(err.to_string()))?;
        let mut nonce = [0u8; NONCE_LENGTH];
        rand::rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| KvError::serialization("encryption failed"))?;

        let mut payload = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        let mut envelope = ValueMap::new();
        envelope.insert(
            ENCRYPTED_DATA_FIELD.to_string(),
            Value::String(BASE64.encode(payload)),
        );
        envelope.insert(
            ENCRYPTION_VERSION_FIELD.to_string(),
            Value::from(ENCRYPTION_VERSION),
        );
        Ok(envelope)
    }

    fn decrypt_value(&self, value: ValueMap) -> KvResult<Option<ValueMap>> {
        if !Self::is_cipher_envelope(&value) {
            // Plaintext written before the wrapper was introduced.
            return Ok(Some(value));
        }

        let Some(Value::String(encoded)) = value.get(ENCRYPTED_DATA_FIELD) else {
            return self.fail("cipher envelope has a non-string payload");
        };
        let Ok(payload) = BASE64.decode(encoded) else {
            return self.fail("cipher payload is not valid base64");
        };
        if payload.len() <= NONCE_LENGTH {
            return self.fail("cipher payload is too short");
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LENGTH);

        for cipher in std::iter::once(&self.cipher).chain(&self.old_ciphers) {
            if let Ok(plaintext) = cipher.decrypt(Nonce::from_slice(nonce), ciphertext) {
                let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(&plaintext) else {
                    return self.fail("decrypted payload is not a JSON object");
                };
                return Ok(Some(map));
            }
        }
        self.fail("no configured key decrypts this record")
    }

    fn fail(&self, reason: &str) -> KvResult<Option<ValueMap>> {
        match self.on_error {
            DecryptionErrorMode::Raise => Err(KvError::Decryption {
                reason: reason.to_string(),
            }),
            DecryptionErrorMode::ReturnNone => {
                warn!(reason, "decryption failed; treating entry as a miss");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for EncryptionWrapper<S> {
    async fn get(&self, collection: Option<&str>, key: &str) -> KvResult<Option<ValueMap>> {
        match self.inner.get(collection, key).await? {
            Some(value) => self.decrypt_value(value),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        collection: Option<&str>,
        key: &str,
        value: ValueMap,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        let encrypted = self.encrypt_value(&value)?;
        self.inner.put(collection, key, encrypted, ttl).await
    }

    async fn delete(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        self.inner.delete(collection, key).await
    }

    async fn ttl(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
        let (value, remaining) = self.inner.ttl(collection, key).await?;
        match value {
            Some(value) => match self.decrypt_value(value)? {
                Some(plain) => Ok((Some(plain), remaining)),
                None => Ok((None, None)),
            },
            None => Ok((None, None)),
        }
    }

    async fn exists(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        self.inner.exists(collection, key).await
    }

    async fn get_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<Option<ValueMap>>> {
        let values = self.inner.get_many(collection, keys).await?;
        values
            .into_iter()
            .map(|value| match value {
                Some(value) => self.decrypt_value(value),
                None => Ok(None),
            })
            .collect()
    }

    async fn put_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
        values: Vec<ValueMap>,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        let encrypted: Vec<ValueMap> = values
            .iter()
            .map(|value| self.encrypt_value(value))
            .collect::<KvResult<_>>()?;
        self.inner.put_many(collection, keys, encrypted, ttl).await
    }

    async fn delete_many(&self, collection: Option<&str>, keys: &[String]) -> KvResult<usize> {
        self.inner.delete_many(collection, keys).await
    }

    async fn ttl_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<(Option<ValueMap>, Option<f64>)>> {
        let results = self.inner.ttl_many(collection, keys).await?;
        results
            .into_iter()
            .map(|(value, remaining)| match value {
                Some(value) => match self.decrypt_value(value)? {
                    Some(plain) => Ok((Some(plain), remaining)),
                    None => Ok((None, None)),
                },
                None => Ok((None, None)),
            })
            .collect()
    }

    async fn collections(&self, limit: Option<usize>) -> KvResult<Vec<String>> {
        self.inner.collections(limit).await
    }

    async fn keys(&self, collection: Option<&str>, limit: Option<usize>) -> KvResult<Vec<String>> {
        self.inner.keys(collection, limit).await
    }

    async fn destroy_collection(&self, collection: Option<&str>) -> KvResult<bool> {
        self.inner.destroy_collection(collection).await
    }

    async fn destroy_store(&self) -> KvResult<bool> {
        self.inner.destroy_store().await
    }

    async fn cull(&self) -> KvResult<()> {
        self.inner.cull().await
    }

    async fn close(&self) -> KvResult<()> {
        self.inner.close().await
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::stores::MemoryStore;

    fn value(v: serde_json::Value) -> ValueMap {
        let serde_json::Value::Object(map) = v else {
            panic!("expected object")
        };
        map
    }

    fn key_a() -> KeySource {
        KeySource::Bytes([7u8; KEY_LENGTH])
    }

    fn key_b() -> KeySource {
        KeySource::Bytes([42u8; KEY_LENGTH])
    }

    #[tokio::test]
    async fn round_trip_and_no_plaintext_at_rest() {
        let store = EncryptionWrapper::new(MemoryStore::in_memory(), &key_a()).unwrap();
        store
            .put(Some("t"), "k", value(json!({"secret": "abc"})), None)
            .await
            .unwrap();

        assert_eq!(
            store.get(Some("t"), "k").await.unwrap(),
            Some(value(json!({"secret": "abc"})))
        );

        // The inner store holds only the cipher envelope.
        let stored = store.inner().get(Some("t"), "k").await.unwrap().unwrap();
        assert!(stored.contains_key(ENCRYPTED_DATA_FIELD));
        assert_eq!(stored.get(ENCRYPTION_VERSION_FIELD), Some(&json!(1)));
        let raw = serde_json::to_string(&stored).unwrap();
        assert!(!raw.contains("abc"));
        assert!(!raw.contains("secret"));
    }

    #[tokio::test]
    async fn wrong_key_raises_or_misses_per_config() {
        let writer = EncryptionWrapper::new(MemoryStore::in_memory(), &key_a()).unwrap();
        writer
            .put(Some("t"), "k", value(json!({"secret": "abc"})), None)
            .await
            .unwrap();
        let stored = writer.inner().get(Some("t"), "k").await.unwrap().unwrap();

        let raising = EncryptionWrapper::new(MemoryStore::in_memory(), &key_b()).unwrap();
        raising
            .inner()
            .put(Some("t"), "k", stored.clone(), None)
            .await
            .unwrap();
        assert!(matches!(
            raising.get(Some("t"), "k").await,
            Err(KvError::Decryption { .. })
        ));

        let missing = EncryptionWrapper::new(MemoryStore::in_memory(), &key_b())
            .unwrap()
            .with_error_mode(DecryptionErrorMode::ReturnNone);
        missing.inner().put(Some("t"), "k", stored, None).await.unwrap();
        assert!(missing.get(Some("t"), "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn old_keys_decrypt_after_rotation() {
        let old = EncryptionWrapper::new(MemoryStore::in_memory(), &key_a()).unwrap();
        old.put(Some("t"), "k", value(json!({"n": 1})), None).await.unwrap();
        let stored = old.inner().get(Some("t"), "k").await.unwrap().unwrap();

        let rotated = EncryptionWrapper::new(MemoryStore::in_memory(), &key_b())
            .unwrap()
            .with_old_keys(&[key_a()])
            .unwrap();
        rotated.inner().put(Some("t"), "k", stored, None).await.unwrap();

        assert_eq!(
            rotated.get(Some("t"), "k").await.unwrap(),
            Some(value(json!({"n": 1})))
        );

        // New writes use the current key: readable without the old one.
        rotated.put(Some("t"), "fresh", value(json!({"n": 2})), None).await.unwrap();
        let fresh = rotated.inner().get(Some("t"), "fresh").await.unwrap().unwrap();
        let current_only = EncryptionWrapper::new(MemoryStore::in_memory(), &key_b()).unwrap();
        current_only.inner().put(Some("t"), "fresh", fresh, None).await.unwrap();
        assert!(current_only.get(Some("t"), "fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn already_encrypted_values_are_not_double_wrapped() {
        let store = EncryptionWrapper::new(MemoryStore::in_memory(), &key_a()).unwrap();
        store.put(Some("t"), "k", value(json!({"a": 1})), None).await.unwrap();
        let envelope = store.inner().get(Some("t"), "k").await.unwrap().unwrap();

        // Re-putting the envelope stores it verbatim.
        store.put(Some("t"), "copy", envelope.clone(), None).await.unwrap();
        let stored = store.inner().get(Some("t"), "copy").await.unwrap().unwrap();
        assert_eq!(stored, envelope);
        assert_eq!(
            store.get(Some("t"), "copy").await.unwrap(),
            Some(value(json!({"a": 1})))
        );
    }

    #[tokio::test]
    async fn plaintext_values_pass_through_on_read() {
        let store = EncryptionWrapper::new(MemoryStore::in_memory(), &key_a()).unwrap();
        store
            .inner()
            .put(Some("t"), "legacy", value(json!({"plain": true})), None)
            .await
            .unwrap();
        assert_eq!(
            store.get(Some("t"), "legacy").await.unwrap(),
            Some(value(json!({"plain": true})))
        );
    }

    #[tokio::test]
    async fn key_file_is_generated_once_and_shared() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("keys").join("store.key");

        let writer = EncryptionWrapper::new(
            MemoryStore::in_memory(),
            &KeySource::KeyFile(key_path.clone()),
        )
        .unwrap();
        assert!(key_path.exists());
        writer.put(Some("t"), "k", value(json!({"n": 1})), None).await.unwrap();
        let stored = writer.inner().get(Some("t"), "k").await.unwrap().unwrap();

        // A second wrapper resolving the same file shares the key.
        let reader =
            EncryptionWrapper::new(MemoryStore::in_memory(), &KeySource::KeyFile(key_path))
                .unwrap();
        reader.inner().put(Some("t"), "k", stored, None).await.unwrap();
        assert_eq!(
            reader.get(Some("t"), "k").await.unwrap(),
            Some(value(json!({"n": 1})))
        );
    }
}
