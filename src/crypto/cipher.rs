//! Authenticated PII encryption and searchable hashing
//!
//! Every encrypted field is paired with a deterministic HMAC-SHA-256 search
//! hash of its normalized plaintext, so equality lookups (find a resident by
//! phone number) never decrypt at query time. Range and prefix search over
//! encrypted fields is an accepted limitation: hashes do not preserve order.

use crate::access::Principal;
use crate::audit::{AuditSink, PiiAccessEvent, PiiOperation};
use crate::config::RegistryConfig;
use crate::crypto::keys::KeyHandle;
use crate::error::{RegistryError, Result};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;

/// Wire format of one encrypted PII field.
///
/// Absent or empty plaintext never reaches this type: the field serializes
/// as null instead of an encrypted empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedValue {
    /// Logical name of the key the ciphertext was made under
    pub key_name: String,
    /// Version of that key
    pub key_version: u32,
    /// Verification hash of the key material; checked before decryption
    pub key_hash: String,
    /// Random per-value nonce
    pub nonce_b64: String,
    /// AES-256-GCM ciphertext with authentication tag
    pub ciphertext_b64: String,
}

/// Authenticated symmetric cipher for PII fields.
///
/// Every encrypt and decrypt attempt, successful or not, appends a PII
/// access event before the result propagates; the audit trail is part of the
/// compliance contract, not an optional side effect.
#[derive(Debug, Clone)]
pub struct PiiCipher {
    search_hash_salt: Vec<u8>,
    audit: Arc<dyn AuditSink>,
}

impl PiiCipher {
    /// Create a cipher with the configured search-hash salt and audit sink
    #[must_use]
    pub fn new(config: &RegistryConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            search_hash_salt: config.search_hash_salt.clone(),
            audit,
        }
    }

    /// Encrypt a plaintext under the given key.
    ///
    /// Empty or absent plaintext maps to `Ok(None)`, the explicit no-value
    /// state; an encrypted empty string is never produced.
    pub fn encrypt(
        &self,
        principal: &Principal,
        handle: &KeyHandle,
        plaintext: Option<&str>,
    ) -> Result<Option<EncryptedValue>> {
        let Some(plaintext) = plaintext.filter(|p| !p.is_empty()) else {
            self.record(principal, handle, PiiOperation::Encrypt, 0);
            return Ok(None);
        };

        let cipher = Aes256Gcm::new(handle.material().as_bytes().into());
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        match cipher.encrypt(nonce, plaintext.as_bytes()) {
            Ok(ciphertext) => {
                self.record(principal, handle, PiiOperation::Encrypt, plaintext.len());
                Ok(Some(EncryptedValue {
                    key_name: handle.name().to_string(),
                    key_version: handle.version(),
                    key_hash: handle.key_hash().to_string(),
                    nonce_b64: BASE64.encode(nonce_bytes),
                    ciphertext_b64: BASE64.encode(ciphertext),
                }))
            }
            Err(err) => {
                self.record(principal, handle, PiiOperation::EncryptFailed, plaintext.len());
                Err(RegistryError::EncryptionFailure {
                    key_name: handle.name().to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Decrypt a stored value under the given key.
    ///
    /// Fails when the value was produced under different key material (hash
    /// mismatch) or when the authentication tag does not verify (tamper).
    pub fn decrypt(
        &self,
        principal: &Principal,
        handle: &KeyHandle,
        value: &EncryptedValue,
    ) -> Result<String> {
        match self.try_decrypt(handle, value) {
            Ok(plaintext) => {
                self.record(principal, handle, PiiOperation::Decrypt, plaintext.len());
                Ok(plaintext)
            }
            Err(err) => {
                self.record(principal, handle, PiiOperation::DecryptFailed, 0);
                Err(err)
            }
        }
    }

    fn try_decrypt(&self, handle: &KeyHandle, value: &EncryptedValue) -> Result<String> {
        if value.key_hash != handle.key_hash() {
            return Err(RegistryError::DecryptionFailure(format!(
                "ciphertext under {} v{} does not match the supplied key",
                value.key_name, value.key_version
            )));
        }
        let nonce_bytes = BASE64
            .decode(&value.nonce_b64)
            .map_err(|err| RegistryError::DecryptionFailure(err.to_string()))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(RegistryError::DecryptionFailure(
                "malformed nonce".to_string(),
            ));
        }
        let ciphertext = BASE64
            .decode(&value.ciphertext_b64)
            .map_err(|err| RegistryError::DecryptionFailure(err.to_string()))?;

        let cipher = Aes256Gcm::new(handle.material().as_bytes().into());
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| {
                RegistryError::DecryptionFailure("authentication failed".to_string())
            })?;
        String::from_utf8(plaintext)
            .map_err(|err| RegistryError::DecryptionFailure(err.to_string()))
    }

    /// Deterministic one-way search hash of a PII value.
    ///
    /// HMAC-SHA-256 over the trimmed, case-folded plaintext with the system
    /// salt; lowercase hex, 64 characters. Empty or absent plaintext maps to
    /// `None` so "unknown" and "known-empty" never collide. Side-effect-free:
    /// hashing is not a PII exposure, so no audit event is appended.
    #[must_use]
    pub fn search_hash(&self, plaintext: Option<&str>) -> Option<String> {
        let normalized = plaintext?.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.search_hash_salt)
            .expect("HMAC accepts keys of any length");
        mac.update(normalized.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    fn record(
        &self,
        principal: &Principal,
        handle: &KeyHandle,
        operation: PiiOperation,
        plaintext_len: usize,
    ) {
        self.audit.record_pii_access(PiiAccessEvent {
            key_name: handle.name().to_string(),
            operation,
            principal: principal.id().to_string(),
            plaintext_len,
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Principal;
    use crate::audit::MemoryAuditLog;
    use crate::crypto::keys::{KeyManager, KeyMaterial, KeyPurpose};

    fn fixture() -> (PiiCipher, Arc<MemoryAuditLog>, KeyManager, Principal) {
        let audit = Arc::new(MemoryAuditLog::new());
        let cipher = PiiCipher::new(&RegistryConfig::default(), audit.clone());
        let principal = Principal::national_admin("clerk-1");
        let mut manager = KeyManager::new();
        manager
            .install_key(
                &principal,
                "pii_master_key",
                KeyPurpose::Pii,
                KeyMaterial::generate(),
                true,
            )
            .unwrap();
        (cipher, audit, manager, principal)
    }

    #[test]
    fn test_round_trip() {
        let (cipher, _audit, manager, principal) = fixture();
        let handle = manager.active_key(&principal, "pii_master_key").unwrap();

        let value = cipher
            .encrypt(&principal, &handle, Some("Juan"))
            .unwrap()
            .unwrap();
        assert_eq!(value.key_version, 1);
        assert_eq!(cipher.decrypt(&principal, &handle, &value).unwrap(), "Juan");
    }

    #[test]
    fn test_empty_plaintext_is_no_value() {
        let (cipher, _audit, manager, principal) = fixture();
        let handle = manager.active_key(&principal, "pii_master_key").unwrap();

        assert!(cipher.encrypt(&principal, &handle, None).unwrap().is_none());
        assert!(cipher.encrypt(&principal, &handle, Some("")).unwrap().is_none());
    }

    #[test]
    fn test_decrypt_after_rotation_with_retained_key() {
        let (cipher, _audit, mut manager, principal) = fixture();
        let v1 = manager.active_key(&principal, "pii_master_key").unwrap();
        let value = cipher
            .encrypt(&principal, &v1, Some("Juan"))
            .unwrap()
            .unwrap();

        manager
            .rotate(
                &principal,
                "pii_master_key",
                KeyMaterial::generate(),
                "scheduled rotation",
            )
            .unwrap();

        // the new active key cannot open old ciphertext
        let v2 = manager.active_key(&principal, "pii_master_key").unwrap();
        assert!(matches!(
            cipher.decrypt(&principal, &v2, &value),
            Err(RegistryError::DecryptionFailure(_))
        ));

        // the retained v1 still can
        let retained = manager.key_version("pii_master_key", 1).unwrap();
        assert_eq!(
            cipher.decrypt(&principal, &retained, &value).unwrap(),
            "Juan"
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails_authentication() {
        let (cipher, _audit, manager, principal) = fixture();
        let handle = manager.active_key(&principal, "pii_master_key").unwrap();
        let mut value = cipher
            .encrypt(&principal, &handle, Some("Juan"))
            .unwrap()
            .unwrap();

        let mut raw = BASE64.decode(&value.ciphertext_b64).unwrap();
        raw[0] ^= 0xff;
        value.ciphertext_b64 = BASE64.encode(raw);

        assert!(matches!(
            cipher.decrypt(&principal, &handle, &value),
            Err(RegistryError::DecryptionFailure(_))
        ));
    }

    #[test]
    fn test_every_attempt_is_audited_including_failures() {
        let (cipher, audit, manager, principal) = fixture();
        let handle = manager.active_key(&principal, "pii_master_key").unwrap();
        let mut value = cipher
            .encrypt(&principal, &handle, Some("Juan"))
            .unwrap()
            .unwrap();
        value.ciphertext_b64 = BASE64.encode(b"garbage");
        let _ = cipher.decrypt(&principal, &handle, &value);

        let events = audit.pii_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].operation, PiiOperation::Encrypt);
        assert_eq!(events[0].plaintext_len, 4);
        assert_eq!(events[1].operation, PiiOperation::DecryptFailed);
        assert_eq!(events[1].principal, "clerk-1");
    }

    #[test]
    fn test_search_hash_normalizes_and_maps_empty_to_none() {
        let (cipher, _audit, _manager, _principal) = fixture();

        let reference = cipher.search_hash(Some("juan dela cruz")).unwrap();
        assert_eq!(reference.len(), 64);
        assert_eq!(
            cipher.search_hash(Some("  Juan Dela Cruz ")).unwrap(),
            reference
        );
        assert_eq!(cipher.search_hash(None), None);
        assert_eq!(cipher.search_hash(Some("   ")), None);

        // different salt, different digest
        let other = PiiCipher::new(
            &RegistryConfig::with_salt(b"other-salt".to_vec()),
            Arc::new(MemoryAuditLog::new()),
        );
        assert_ne!(other.search_hash(Some("juan dela cruz")).unwrap(), reference);
    }
}
