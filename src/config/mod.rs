//! Configuration for the registry core.

/// Configuration shared by the registry subsystems
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// System-wide salt mixed into every search hash. Changing it invalidates
    /// all stored hash columns, so it is fixed for the lifetime of a deployment.
    pub search_hash_salt: Vec<u8>,
    /// Upper bound on retries when an auto-allocated house sequence collides
    pub max_sequence_retries: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            search_hash_salt: b"rbi-search-hash-v1".to_vec(),
            max_sequence_retries: 5,
        }
    }
}

impl RegistryConfig {
    /// Create a configuration with a deployment-specific search-hash salt
    #[must_use]
    pub fn with_salt(salt: impl Into<Vec<u8>>) -> Self {
        Self {
            search_hash_salt: salt.into(),
            ..Self::default()
        }
    }
}
