//! Domain models
//!
//! Core records owned by the registry: households keyed by their
//! hierarchical code, residents keyed by a surrogate identifier, and the
//! fully derived sectoral-classification record that hangs 1:1 off each
//! resident.

pub mod household;
pub mod resident;
pub mod traits;
pub mod types;

pub use household::Household;
pub use resident::{EncryptionMetadata, PiiField, Resident, ResidentId, SectoralClassification};
pub use traits::{EntityModel, Locatable};
pub use types::{
    CivilStatus, EducationLevel, EmploymentStatus, HouseholdRole, IncomeClass, Sex,
};
