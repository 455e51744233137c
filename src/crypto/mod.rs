//! PII protection
//!
//! Key lifecycle management and the authenticated cipher used for every
//! personally identifiable field. Ciphertexts record the name, version and
//! verification hash of the key that produced them, so values encrypted
//! before a rotation stay decryptable under the retained old version.

pub mod cipher;
pub mod keys;

pub use cipher::{EncryptedValue, PiiCipher};
pub use keys::{EncryptionKey, KeyHandle, KeyManager, KeyMaterial, KeyPurpose, KeyRotationEvent};
