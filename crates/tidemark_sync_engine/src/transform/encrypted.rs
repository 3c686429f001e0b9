//! Field encryption using AES-256-GCM.

use super::Transformer;
use crate::error::{EngineResult, SyncError};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use serde_json::Value;
use tidemark_core::Document;
use tidemark_sync_protocol::RemoteRecord;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
const TAG_SIZE: usize = 16;

/// Field holding the encrypted payload remotely.
const CIPHERTEXT_FIELD: &str = "ciphertext";

/// Encryption key for record payloads.
///
/// The key is zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not exactly 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(SyncError::transform(format!(
                "invalid key size: expected {KEY_SIZE}, got {}",
                bytes.len()
            )));
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Derives a key from a passphrase using HKDF-SHA256.
    ///
    /// HKDF does not slow down guessing; the passphrase must already carry
    /// enough entropy.
    pub fn derive_from_password(password: &[u8], salt: &[u8]) -> EngineResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt), password);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(b"tidemark-record-key-v1", &mut bytes)
            .map_err(|_| SyncError::transform("HKDF expand failed"))?;
        Ok(Self { bytes })
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts the fields of outgoing records.
///
/// The remote form of a live record is `{id, last_modified, ciphertext}`,
/// where `ciphertext` is base64 of `nonce || AES-GCM(fields as JSON)`. The
/// record id is authenticated as associated data, so a payload cannot be
/// moved to another record. Tombstones carry no fields and pass through.
pub struct EncryptionTransformer {
    cipher: Aes256Gcm,
}

impl EncryptionTransformer {
    /// Creates a transformer encrypting with `key`.
    #[must_use]
    pub fn new(key: EncryptionKey) -> Self {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&key.bytes));
        Self { cipher }
    }

    fn seal(&self, plaintext: &[u8], aad: &[u8]) -> EngineResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|_| SyncError::transform("encryption error"))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8], aad: &[u8]) -> EngineResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SyncError::transform("ciphertext too short"));
        }
        let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);
        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &sealed[NONCE_SIZE..],
                    aad,
                },
            )
            .map_err(|_| SyncError::transform("decryption error"))
    }
}

impl std::fmt::Debug for EncryptionTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionTransformer").finish_non_exhaustive()
    }
}

impl Transformer for EncryptionTransformer {
    fn encode(&self, mut record: RemoteRecord) -> EngineResult<RemoteRecord> {
        if record.deleted {
            return Ok(record);
        }
        let plaintext = serde_json::to_vec(&record.fields)
            .map_err(|e| SyncError::transform(e.to_string()))?;
        let sealed = self.seal(&plaintext, record.id.as_bytes())?;

        let mut fields = Document::new();
        fields.insert(CIPHERTEXT_FIELD.into(), Value::String(STANDARD.encode(sealed)));
        record.fields = fields;
        Ok(record)
    }

    fn decode(&self, mut record: RemoteRecord) -> EngineResult<RemoteRecord> {
        if record.deleted {
            return Ok(record);
        }
        let encoded = record
            .fields
            .get(CIPHERTEXT_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::transform(format!("record {} is not encrypted", record.id)))?;
        let sealed = STANDARD
            .decode(encoded)
            .map_err(|e| SyncError::transform(e.to_string()))?;
        let plaintext = self.open(&sealed, record.id.as_bytes())?;
        record.fields =
            serde_json::from_slice(&plaintext).map_err(|e| SyncError::transform(e.to_string()))?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str) -> RemoteRecord {
        RemoteRecord::new(
            id,
            Some(3),
            json!({"title": "secret", "n": 1}).as_object().cloned().unwrap(),
        )
    }

    #[test]
    fn encrypt_decrypt_record() {
        let transformer = EncryptionTransformer::new(EncryptionKey::generate());
        let encoded = transformer.encode(record("a")).unwrap();

        assert_eq!(encoded.id, "a");
        assert_eq!(encoded.last_modified, Some(3));
        assert_eq!(encoded.fields.len(), 1);
        assert!(encoded.fields[CIPHERTEXT_FIELD].is_string());

        assert_eq!(transformer.decode(encoded).unwrap(), record("a"));
    }

    #[test]
    fn nonces_differ() {
        let transformer = EncryptionTransformer::new(EncryptionKey::generate());
        let a = transformer.encode(record("a")).unwrap();
        let b = transformer.encode(record("a")).unwrap();
        assert_ne!(a.fields, b.fields);
    }

    #[test]
    fn wrong_key_fails() {
        let encoded = EncryptionTransformer::new(EncryptionKey::generate())
            .encode(record("a"))
            .unwrap();
        let other = EncryptionTransformer::new(EncryptionKey::generate());
        assert!(matches!(other.decode(encoded), Err(SyncError::Transform(_))));
    }

    #[test]
    fn payload_bound_to_id() {
        let transformer = EncryptionTransformer::new(EncryptionKey::generate());
        let mut moved = transformer.encode(record("a")).unwrap();
        moved.id = "b".into();
        assert!(transformer.decode(moved).is_err());
    }

    #[test]
    fn tombstones_pass_through() {
        let transformer = EncryptionTransformer::new(EncryptionKey::generate());
        let tombstone = RemoteRecord::tombstone("a", Some(4));
        assert_eq!(transformer.encode(tombstone.clone()).unwrap(), tombstone);
        assert_eq!(transformer.decode(tombstone.clone()).unwrap(), tombstone);
    }

    #[test]
    fn unencrypted_record_is_rejected() {
        let transformer = EncryptionTransformer::new(EncryptionKey::generate());
        assert!(transformer.decode(record("a")).is_err());
    }

    #[test]
    fn key_from_bytes() {
        assert!(EncryptionKey::from_bytes(&[0u8; 32]).is_ok());
        assert!(EncryptionKey::from_bytes(&[0u8; 16]).is_err());
    }

    #[test]
    fn derived_keys_are_deterministic() {
        let a = EncryptionKey::derive_from_password(b"passphrase", b"salt").unwrap();
        let b = EncryptionKey::derive_from_password(b"passphrase", b"salt").unwrap();
        let encoded = EncryptionTransformer::new(a).encode(record("a")).unwrap();
        assert_eq!(
            EncryptionTransformer::new(b).decode(encoded).unwrap(),
            record("a")
        );
    }

    #[test]
    fn key_debug_is_redacted() {
        let debug = format!("{:?}", EncryptionKey::generate());
        assert!(debug.contains("REDACTED"));
    }
}
