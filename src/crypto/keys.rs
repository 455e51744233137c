//! Encryption key lifecycle
//!
//! Keys are named and versioned. At most one version per name is active at
//! any instant; rotation deactivates the current version, installs the next
//! one, and appends an immutable rotation event. Superseded versions are
//! retained forever so historical ciphertexts remain decryptable.
//!
//! Only a verification hash of the key material is part of the stored
//! metadata record; the material itself lives in memory and is zeroized on
//! drop.

use crate::access::Principal;
use crate::error::{RegistryError, Result};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// What a key protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPurpose {
    /// Resident PII fields
    Pii,
    /// Uploaded document payloads
    Documents,
    /// Messages to residents
    Communications,
    /// Internal system secrets
    System,
}

/// 256-bit symmetric key material, zeroized on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial([u8; 32]);

impl KeyMaterial {
    /// Wrap externally provisioned material
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate fresh random material
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw bytes, exposed only to the cipher
    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// SHA-256 verification hash of the material, lowercase hex.
    ///
    /// This is the only representation of the key that is ever stored or
    /// embedded in ciphertext metadata.
    #[must_use]
    pub fn verification_hash(&self) -> String {
        hex::encode(Sha256::digest(self.0))
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

/// Stored metadata record for one key version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    /// Logical key name, e.g. `pii_master_key`
    pub name: String,
    /// Monotonic version within the name
    pub version: u32,
    /// What the key protects
    pub purpose: KeyPurpose,
    /// SHA-256 verification hash of the material
    pub key_hash: String,
    /// Whether this version is the one new ciphertexts are made under
    pub active: bool,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the version became active
    pub activated_at: Option<DateTime<Utc>>,
    /// When the version was superseded by a rotation
    pub rotated_at: Option<DateTime<Utc>>,
    /// Optional hard expiry; an expired key no longer serves as active
    pub expires_at: Option<DateTime<Utc>>,
}

/// A resolved key a cipher operation can run under
#[derive(Debug, Clone)]
pub struct KeyHandle {
    name: String,
    version: u32,
    key_hash: String,
    material: KeyMaterial,
}

impl KeyHandle {
    /// Logical key name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version of the key this handle resolves to
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Verification hash of the underlying material
    #[must_use]
    pub fn key_hash(&self) -> &str {
        &self.key_hash
    }

    pub(crate) fn material(&self) -> &KeyMaterial {
        &self.material
    }
}

/// Immutable audit record of one rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRotationEvent {
    /// Logical key name
    pub key_name: String,
    /// Version that was superseded
    pub old_version: u32,
    /// Version that replaced it
    pub new_version: u32,
    /// Why the rotation happened
    pub reason: String,
    /// Identity of the operator who ran it
    pub operator: String,
    /// Number of stored records re-encrypted under the new version so far
    pub records_migrated: u64,
    /// When the re-encryption migration finished
    pub migration_completed_at: Option<DateTime<Utc>>,
    /// When the rotation itself happened
    pub rotated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct KeyEntry {
    record: EncryptionKey,
    material: KeyMaterial,
}

/// Tracks every version of every named key.
///
/// Rotation is an administrative, serialized operation; the manager is not
/// expected to rotate the same name concurrently with itself.
#[derive(Debug, Default)]
pub struct KeyManager {
    keys: HashMap<String, Vec<KeyEntry>>,
    rotations: Vec<KeyRotationEvent>,
}

impl KeyManager {
    /// Create an empty manager
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the next version of a named key.
    ///
    /// Fails with `DuplicateActiveKey` when `activate` is requested while
    /// another version of the same name is still active: the single-active
    /// invariant is enforced at write time, never repaired after the fact.
    pub fn install_key(
        &mut self,
        principal: &Principal,
        name: &str,
        purpose: KeyPurpose,
        material: KeyMaterial,
        activate: bool,
    ) -> Result<u32> {
        if activate && self.find_active(name).is_some() {
            return Err(RegistryError::DuplicateActiveKey(name.to_string()));
        }
        let now = Utc::now();
        let versions = self.keys.entry(name.to_string()).or_default();
        let version = versions.last().map_or(1, |entry| entry.record.version + 1);
        let record = EncryptionKey {
            name: name.to_string(),
            version,
            purpose,
            key_hash: material.verification_hash(),
            active: activate,
            created_at: now,
            activated_at: activate.then_some(now),
            rotated_at: None,
            expires_at: None,
        };
        versions.push(KeyEntry { record, material });
        log::info!(
            "key {name} v{version} installed by {} (active: {activate})",
            principal.id()
        );
        Ok(version)
    }

    /// Resolve the unique active, non-expired version of a named key
    pub fn active_key(&self, _principal: &Principal, name: &str) -> Result<KeyHandle> {
        self.find_active(name)
            .map(Self::handle_for)
            .ok_or_else(|| RegistryError::NoActiveKey(name.to_string()))
    }

    /// Resolve a retained historical version, for decrypting ciphertexts
    /// produced before a rotation
    pub fn key_version(&self, name: &str, version: u32) -> Result<KeyHandle> {
        self.keys
            .get(name)
            .and_then(|versions| versions.iter().find(|e| e.record.version == version))
            .map(Self::handle_for)
            .ok_or_else(|| {
                RegistryError::DecryptionFailure(format!("key {name} v{version} is not retained"))
            })
    }

    /// Rotate a named key: deactivate the current version, install the next
    /// one active, and append the rotation event.
    pub fn rotate(
        &mut self,
        principal: &Principal,
        name: &str,
        material: KeyMaterial,
        reason: impl Into<String>,
    ) -> Result<KeyHandle> {
        let now = Utc::now();
        let versions = self
            .keys
            .get_mut(name)
            .ok_or_else(|| RegistryError::NoActiveKey(name.to_string()))?;
        let current = versions
            .iter_mut()
            .find(|entry| entry.record.active)
            .ok_or_else(|| RegistryError::NoActiveKey(name.to_string()))?;
        current.record.active = false;
        current.record.rotated_at = Some(now);
        let old_version = current.record.version;
        let purpose = current.record.purpose;

        let new_version = versions
            .last()
            .map_or(1, |entry| entry.record.version + 1);
        let record = EncryptionKey {
            name: name.to_string(),
            version: new_version,
            purpose,
            key_hash: material.verification_hash(),
            active: true,
            created_at: now,
            activated_at: Some(now),
            rotated_at: None,
            expires_at: None,
        };
        versions.push(KeyEntry { record, material });

        self.rotations.push(KeyRotationEvent {
            key_name: name.to_string(),
            old_version,
            new_version,
            reason: reason.into(),
            operator: principal.id().to_string(),
            records_migrated: 0,
            migration_completed_at: None,
            rotated_at: now,
        });
        log::info!(
            "key {name} rotated v{old_version} -> v{new_version} by {}",
            principal.id()
        );
        self.key_version(name, new_version)
    }

    /// Set a hard expiry on one version
    pub fn set_expiry(&mut self, name: &str, version: u32, expires_at: DateTime<Utc>) -> Result<()> {
        let entry = self
            .keys
            .get_mut(name)
            .and_then(|versions| versions.iter_mut().find(|e| e.record.version == version))
            .ok_or_else(|| RegistryError::NoActiveKey(name.to_string()))?;
        entry.record.expires_at = Some(expires_at);
        Ok(())
    }

    /// Advance the migration counters on the latest rotation of a name
    pub fn record_migration_progress(
        &mut self,
        name: &str,
        records_migrated: u64,
        completed: bool,
    ) -> Result<()> {
        let event = self
            .rotations
            .iter_mut()
            .rev()
            .find(|event| event.key_name == name)
            .ok_or_else(|| RegistryError::NoActiveKey(name.to_string()))?;
        event.records_migrated = records_migrated;
        if completed {
            event.migration_completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// All rotation events, oldest first
    #[must_use]
    pub fn rotation_events(&self) -> &[KeyRotationEvent] {
        &self.rotations
    }

    /// Stored metadata records for a name, oldest version first
    #[must_use]
    pub fn key_records(&self, name: &str) -> Vec<&EncryptionKey> {
        self.keys
            .get(name)
            .map(|versions| versions.iter().map(|entry| &entry.record).collect())
            .unwrap_or_default()
    }

    fn find_active(&self, name: &str) -> Option<&KeyEntry> {
        let now = Utc::now();
        self.keys.get(name)?.iter().find(|entry| {
            entry.record.active && entry.record.expires_at.is_none_or(|at| at > now)
        })
    }

    fn handle_for(entry: &KeyEntry) -> KeyHandle {
        KeyHandle {
            name: entry.record.name.clone(),
            version: entry.record.version,
            key_hash: entry.record.key_hash.clone(),
            material: entry.material.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Principal;

    fn operator() -> Principal {
        Principal::national_admin("keyops-1")
    }

    #[test]
    fn test_install_and_resolve_active_key() {
        let mut manager = KeyManager::new();
        let version = manager
            .install_key(
                &operator(),
                "pii_master_key",
                KeyPurpose::Pii,
                KeyMaterial::generate(),
                true,
            )
            .unwrap();
        assert_eq!(version, 1);

        let handle = manager.active_key(&operator(), "pii_master_key").unwrap();
        assert_eq!(handle.name(), "pii_master_key");
        assert_eq!(handle.version(), 1);
    }

    #[test]
    fn test_second_active_key_is_rejected() {
        let mut manager = KeyManager::new();
        manager
            .install_key(
                &operator(),
                "pii_master_key",
                KeyPurpose::Pii,
                KeyMaterial::generate(),
                true,
            )
            .unwrap();
        let err = manager
            .install_key(
                &operator(),
                "pii_master_key",
                KeyPurpose::Pii,
                KeyMaterial::generate(),
                true,
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateActiveKey(_)));
    }

    #[test]
    fn test_rotation_retains_old_version() {
        let mut manager = KeyManager::new();
        let old_material = KeyMaterial::generate();
        let old_hash = old_material.verification_hash();
        manager
            .install_key(
                &operator(),
                "pii_master_key",
                KeyPurpose::Pii,
                old_material,
                true,
            )
            .unwrap();

        let new_handle = manager
            .rotate(
                &operator(),
                "pii_master_key",
                KeyMaterial::generate(),
                "scheduled rotation",
            )
            .unwrap();
        assert_eq!(new_handle.version(), 2);

        // v1 stays resolvable for historical decryption
        let old_handle = manager.key_version("pii_master_key", 1).unwrap();
        assert_eq!(old_handle.key_hash(), old_hash);

        // and only one version is active
        let records = manager.key_records("pii_master_key");
        assert_eq!(records.iter().filter(|r| r.active).count(), 1);
        assert!(records[0].rotated_at.is_some());

        let events = manager.rotation_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].old_version, 1);
        assert_eq!(events[0].new_version, 2);
        assert_eq!(events[0].operator, "keyops-1");
    }

    #[test]
    fn test_missing_and_expired_keys() {
        let mut manager = KeyManager::new();
        assert!(matches!(
            manager.active_key(&operator(), "absent"),
            Err(RegistryError::NoActiveKey(_))
        ));

        manager
            .install_key(
                &operator(),
                "pii_master_key",
                KeyPurpose::Pii,
                KeyMaterial::generate(),
                true,
            )
            .unwrap();
        manager
            .set_expiry("pii_master_key", 1, Utc::now() - chrono::Duration::hours(1))
            .unwrap();
        assert!(matches!(
            manager.active_key(&operator(), "pii_master_key"),
            Err(RegistryError::NoActiveKey(_))
        ));
    }

    #[test]
    fn test_migration_progress_counters() {
        let mut manager = KeyManager::new();
        manager
            .install_key(
                &operator(),
                "pii_master_key",
                KeyPurpose::Pii,
                KeyMaterial::generate(),
                true,
            )
            .unwrap();
        manager
            .rotate(
                &operator(),
                "pii_master_key",
                KeyMaterial::generate(),
                "compromise drill",
            )
            .unwrap();
        manager
            .record_migration_progress("pii_master_key", 42, true)
            .unwrap();

        let event = &manager.rotation_events()[0];
        assert_eq!(event.records_migrated, 42);
        assert!(event.migration_completed_at.is_some());
    }
}
