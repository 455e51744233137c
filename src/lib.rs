//! Data-integrity core of a barangay civil registry: authenticated PII
//! encryption with searchable hashing and key rotation, deterministic
//! hierarchical household identifiers, a dependency-ordered field-derivation
//! pipeline, and a multi-level geographic access-scope evaluator.

pub mod access;
pub mod audit;
pub mod config;
pub mod crypto;
pub mod derivation;
pub mod error;
pub mod geo;
pub mod identifier;
pub mod models;
pub mod occupation;
pub mod registry;

// Re-export the most common types for easier use
// Core types
pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use registry::{NewHousehold, NewResident, RegistryStore, PII_KEY_NAME};

// Geography and occupation reference data
pub use geo::{GeoChain, GeoHierarchy, GeoLevel, GeoResolver, GeographicUnit};
pub use occupation::{OccupationCatalog, OccupationLevel};

// Encryption
pub use crypto::{EncryptedValue, KeyManager, KeyMaterial, KeyPurpose, PiiCipher};

// Identifiers
pub use identifier::{HouseholdCode, IdentifierGenerator, StreetDirectory};

// Derivation
pub use derivation::{ChangeSet, DerivationPipeline, RuleId};

// Access scoping
pub use access::{AccessAssignment, AccessScopeEvaluator, EffectiveScope, Principal, Role, ScopeLevel};

// Audit
pub use audit::{AuditSink, ChangeEvent, MemoryAuditLog, PiiAccessEvent, PiiOperation};

// Models
pub use models::{Household, Resident, ResidentId, SectoralClassification};
