//! Key lifecycle and PII-cipher behavior across rotation, exercised through
//! the public crypto surface with the in-memory audit sink.

use std::sync::Arc;

use rbi_core::audit::MemoryAuditLog;
use rbi_core::{
    KeyManager, KeyMaterial, KeyPurpose, PiiCipher, PiiOperation, Principal, RegistryConfig,
    RegistryError,
};

fn setup() -> (KeyManager, PiiCipher, Arc<MemoryAuditLog>, Principal) {
    let _ = env_logger::builder().is_test(true).try_init();
    let audit = Arc::new(MemoryAuditLog::new());
    let cipher = PiiCipher::new(&RegistryConfig::default(), audit.clone());
    let admin = Principal::national_admin("keymaster");
    let mut keys = KeyManager::new();
    keys.install_key(&admin, "pii_master_key", KeyPurpose::Pii, KeyMaterial::generate(), true)
        .unwrap();
    (keys, cipher, audit, admin)
}

#[test]
fn test_old_ciphertexts_survive_rotation() {
    let (mut keys, cipher, _audit, admin) = setup();
    let v1 = keys.active_key(&admin, "pii_master_key").unwrap();
    let stored = cipher.encrypt(&admin, &v1, Some("Juan")).unwrap().unwrap();
    assert_eq!(stored.key_version, 1);

    keys.rotate(&admin, "pii_master_key", KeyMaterial::generate(), "compromise drill")
        .unwrap();
    let active = keys.active_key(&admin, "pii_master_key").unwrap();
    assert_eq!(active.version(), 2);

    // the stored value still names v1 and the retained version opens it
    let retained = keys
        .key_version(&stored.key_name, stored.key_version)
        .unwrap();
    assert_eq!(cipher.decrypt(&admin, &retained, &stored).unwrap(), "Juan");

    // decrypting v1 ciphertext with the v2 key is refused before AEAD runs
    let err = cipher.decrypt(&admin, &active, &stored).unwrap_err();
    assert!(matches!(err, RegistryError::DecryptionFailure(_)));
}

#[test]
fn test_second_active_key_is_rejected() {
    let (mut keys, _cipher, _audit, admin) = setup();
    let err = keys
        .install_key(&admin, "pii_master_key", KeyPurpose::Pii, KeyMaterial::generate(), true)
        .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateActiveKey(_)));

    // installing inactive versions of the same name is allowed
    keys.install_key(&admin, "pii_master_key", KeyPurpose::Pii, KeyMaterial::generate(), false)
        .unwrap();
}

#[test]
fn test_every_decrypt_attempt_is_audited() {
    let (keys, cipher, audit, admin) = setup();
    let handle = keys.active_key(&admin, "pii_master_key").unwrap();
    let stored = cipher.encrypt(&admin, &handle, Some("Maria")).unwrap().unwrap();
    cipher.decrypt(&admin, &handle, &stored).unwrap();

    let mut tampered = stored.clone();
    tampered.ciphertext_b64 = stored.nonce_b64.clone();
    assert!(cipher.decrypt(&admin, &handle, &tampered).is_err());

    let operations: Vec<PiiOperation> = audit
        .pii_events()
        .iter()
        .map(|event| event.operation)
        .collect();
    assert_eq!(
        operations,
        vec![
            PiiOperation::Encrypt,
            PiiOperation::Decrypt,
            PiiOperation::DecryptFailed
        ]
    );
    assert!(audit.pii_events().iter().all(|e| e.principal == "keymaster"));
}

#[test]
fn test_search_hash_is_deterministic_and_normalized() {
    let (_keys, cipher, audit, _admin) = setup();
    let a = cipher.search_hash(Some("0917-555-0001")).unwrap();
    let b = cipher.search_hash(Some("  0917-555-0001 ")).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
    assert!(cipher.search_hash(Some("   ")).is_none());
    assert!(cipher.search_hash(None).is_none());
    // hashing is not a PII access
    assert!(audit.pii_events().is_empty());

    // a different salt produces a disjoint hash space
    let other = PiiCipher::new(
        &RegistryConfig::with_salt(b"other-deployment".to_vec()),
        Arc::new(MemoryAuditLog::new()),
    );
    assert_ne!(other.search_hash(Some("0917-555-0001")).unwrap(), a);
}

#[test]
fn test_expired_key_stops_encrypting() {
    let (mut keys, _cipher, _audit, admin) = setup();
    keys.set_expiry(
        "pii_master_key",
        1,
        chrono::Utc::now() - chrono::Duration::hours(1),
    )
    .unwrap();
    let err = keys.active_key(&admin, "pii_master_key").unwrap_err();
    assert!(matches!(err, RegistryError::NoActiveKey(_)));
}
