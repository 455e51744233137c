//! Error handling for the registry core.

use thiserror::Error;

/// Specialized error type for registry-core operations
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A geographic code does not exist or refers to an inactive unit
    #[error("unknown geographic code: {0}")]
    UnknownGeographicCode(String),

    /// No active, non-expired encryption key exists under the given name
    #[error("no active encryption key named {0}")]
    NoActiveKey(String),

    /// Installing a second active key under a name that already has one
    #[error("an active encryption key named {0} already exists")]
    DuplicateActiveKey(String),

    /// Encryption of a PII value failed
    #[error("encryption failed under key {key_name}: {reason}")]
    EncryptionFailure {
        /// Logical name of the key the operation ran under
        key_name: String,
        /// Failure detail (never includes plaintext)
        reason: String,
    },

    /// Ciphertext could not be decrypted: tampered, or produced under a key
    /// that is no longer resolvable
    #[error("decryption failed: {0}")]
    DecryptionFailure(String),

    /// A barangay code could not be parsed into a household-code prefix
    #[error("invalid identifier input: {0}")]
    InvalidIdentifierInput(String),

    /// Two identifier generations raced to the same sequence slot; the caller
    /// should retry generation
    #[error("household code sequence collision in scope {scope}")]
    SequenceCollision {
        /// The (barangay, subdivision, street) scope the collision occurred in
        scope: String,
    },

    /// The caller's effective scope does not cover the record, or the record
    /// does not exist. The two cases are deliberately indistinguishable.
    #[error("record not found or outside the caller's geographic scope")]
    UnauthorizedAccess,

    /// A derivation rule was asked to run but a required source field is null
    #[error("derivation rule {rule} is missing required input {field}")]
    DerivationInputMissing {
        /// Name of the derivation rule
        rule: &'static str,
        /// The absent source field
        field: &'static str,
    },

    /// A household already has a resident marked as head
    #[error("household {0} already has a head resident")]
    DuplicateHouseholdHead(String),
}

/// Result type for registry-core operations
pub type Result<T> = std::result::Result<T, RegistryError>;
