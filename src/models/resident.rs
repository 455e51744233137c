//! Resident record
//!
//! Residents are keyed by a surrogate identifier. Every PII field is stored
//! as an authenticated ciphertext paired with a deterministic search hash;
//! the plaintext never touches the record. The sectoral-classification
//! record hangs 1:1 off the resident and is entirely derived.

use crate::crypto::EncryptedValue;
use crate::geo::{GeoChain, GeoLevel};
use crate::identifier::HouseholdCode;
use crate::models::traits::{EntityModel, Locatable};
use crate::models::types::{CivilStatus, EducationLevel, EmploymentStatus, HouseholdRole, Sex};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Surrogate primary key of a resident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResidentId(pub u64);

impl std::fmt::Display for ResidentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One encrypted PII field with its paired search hash
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiField {
    /// Authenticated ciphertext; null when the value is absent
    pub value: Option<EncryptedValue>,
    /// Deterministic search hash; null when the value is absent
    pub hash: Option<String>,
}

impl PiiField {
    /// Whether the field holds a value
    #[must_use]
    pub const fn is_present(&self) -> bool {
        self.value.is_some()
    }
}

/// How and when a resident's PII was encrypted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    /// Version of the PII key the fields were encrypted under
    pub key_version: u32,
    /// When the encryption ran
    pub encrypted_at: DateTime<Utc>,
    /// Operator who ran it
    pub encrypted_by: String,
}

/// A registered resident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resident {
    /// Surrogate primary key
    pub id: ResidentId,
    /// Household the resident belongs to, when household-linked
    pub household_code: Option<HouseholdCode>,
    /// Role within the household
    pub role: HouseholdRole,

    /// First name
    pub first_name: PiiField,
    /// Middle name
    pub middle_name: PiiField,
    /// Last name
    pub last_name: PiiField,
    /// Name extension (Jr., III, …)
    pub extension_name: PiiField,
    /// Derived: full name, re-encrypted after concatenation
    pub full_name: PiiField,
    /// Contact number
    pub contact_number: PiiField,
    /// Email address
    pub email: PiiField,
    /// Mother's maiden name
    pub mother_maiden_name: PiiField,

    /// Sex
    pub sex: Sex,
    /// Date of birth
    pub birthdate: NaiveDate,
    /// Civil status
    pub civil_status: CivilStatus,
    /// Highest education level reached or enrolled in
    pub education_level: EducationLevel,
    /// Whether that level has been completed
    pub education_completed: bool,
    /// Employment status
    pub employment_status: EmploymentStatus,
    /// PSOC occupation code, 1–5 digits
    pub occupation_code: Option<String>,
    /// Derived: standardized occupation title
    pub occupation_name: Option<String>,
    /// PSGC birth-place code at any of the four levels
    pub birth_place_code: Option<String>,
    /// Level of the birth-place code
    pub birth_place_level: Option<GeoLevel>,
    /// Derived: human-readable birth place
    pub birth_place_name: Option<String>,
    /// Citizenship
    pub citizenship: Option<String>,
    /// Religion
    pub religion: Option<String>,
    /// Ethnicity
    pub ethnicity: Option<String>,
    /// Registered-voter flag
    pub registered_voter: bool,
    /// Whether the resident migrated into the barangay
    pub is_migrant: bool,

    /// Denormalized geographic chain; equals the household's when linked
    pub chain: GeoChain,
    /// How the PII fields were encrypted
    pub encryption: Option<EncryptionMetadata>,
    /// Soft-delete flag
    pub active: bool,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record last changed
    pub updated_at: DateTime<Utc>,
}

impl Resident {
    /// Create a resident with the minimum required information
    #[must_use]
    pub fn new(id: ResidentId, birthdate: NaiveDate, sex: Sex, chain: GeoChain) -> Self {
        let now = Utc::now();
        Self {
            id,
            household_code: None,
            role: HouseholdRole::NonRelative,
            first_name: PiiField::default(),
            middle_name: PiiField::default(),
            last_name: PiiField::default(),
            extension_name: PiiField::default(),
            full_name: PiiField::default(),
            contact_number: PiiField::default(),
            email: PiiField::default(),
            mother_maiden_name: PiiField::default(),
            sex,
            birthdate,
            civil_status: CivilStatus::Single,
            education_level: EducationLevel::None,
            education_completed: false,
            employment_status: EmploymentStatus::NotInLaborForce,
            occupation_code: None,
            occupation_name: None,
            birth_place_code: None,
            birth_place_level: None,
            birth_place_name: None,
            citizenship: None,
            religion: None,
            ethnicity: None,
            registered_voter: false,
            is_migrant: false,
            chain,
            encryption: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Age in completed years at a reference date, `None` before birth
    #[must_use]
    pub fn age_at(&self, date: NaiveDate) -> Option<u32> {
        date.years_since(self.birthdate)
    }

    /// Whether the resident is marked head of their household
    #[must_use]
    pub fn is_head(&self) -> bool {
        self.role == HouseholdRole::Head
    }
}

impl EntityModel for Resident {
    type Id = ResidentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn key(&self) -> String {
        self.id.to_string()
    }
}

impl Locatable for Resident {
    fn geo_chain(&self) -> &GeoChain {
        &self.chain
    }
}

/// Derived eligibility flags, never independently authored.
///
/// Recomputed from the post-write resident record on every qualifying
/// change; given the same resident and evaluation date the output is
/// byte-identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectoralClassification {
    /// Resident this record belongs to, 1:1
    pub resident_id: ResidentId,
    /// Age ≥ 60
    pub is_senior: bool,
    /// Age in [6, 14] and current education level not completed
    pub is_out_of_school_child: bool,
    /// Age in [15, 24], level not completed, and not employed
    pub is_out_of_school_youth: bool,
    /// Mirrors the resident's migrant status for household aggregates
    pub is_migrant: bool,
    /// Date the ages were evaluated against
    pub as_of: NaiveDate,
}

impl SectoralClassification {
    /// Evaluate the flags for a resident at a reference date. Pure.
    #[must_use]
    pub fn evaluate(resident: &Resident, as_of: NaiveDate) -> Self {
        let age = resident.age_at(as_of);
        let in_range = |lo: u32, hi: u32| age.is_some_and(|a| a >= lo && a <= hi);
        let not_completed = !resident.education_completed;
        Self {
            resident_id: resident.id,
            is_senior: age.is_some_and(|a| a >= 60),
            is_out_of_school_child: in_range(6, 14) && not_completed,
            is_out_of_school_youth: in_range(15, 24)
                && not_completed
                && !resident.employment_status.is_employed(),
            is_migrant: resident.is_migrant,
            as_of,
        }
    }
}
