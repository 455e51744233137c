//! Registry facade
//!
//! `RegistryStore` owns the records and wires the subsystems together. Each
//! public write is one transaction: it authorizes the caller, mutates staged
//! copies, runs the affected derivation rules in topological order against
//! those copies, and only then stores them and appends the change event. A
//! failing rule therefore leaves the tables untouched. Reads and writes alike
//! pass through the access-scope gate, and a record that is missing reports
//! exactly like a record that is out of scope.

use crate::access::{AccessScopeEvaluator, EffectiveScope, Principal};
use crate::audit::{AuditSink, ChangeEvent, ChangeOperation};
use crate::config::RegistryConfig;
use crate::crypto::cipher::PiiCipher;
use crate::crypto::keys::{KeyManager, KeyMaterial, KeyPurpose, KeyRotationEvent};
use crate::derivation::{ChangeSet, DerivationPipeline, RuleId};
use crate::error::{RegistryError, Result};
use crate::geo::{GeoLevel, GeoResolver};
use crate::identifier::{HouseholdCode, IdentifierGenerator, StreetDirectory};
use crate::models::household::Household;
use crate::models::resident::{
    EncryptionMetadata, PiiField, Resident, ResidentId, SectoralClassification,
};
use crate::models::traits::{EntityModel, Locatable};
use crate::models::types::{
    CivilStatus, EducationLevel, EmploymentStatus, HouseholdRole, Sex,
};
use crate::occupation::OccupationCatalog;
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Logical name of the key protecting resident PII
pub const PII_KEY_NAME: &str = "pii_master_key";

/// Input for creating a household
#[derive(Debug, Clone, Default)]
pub struct NewHousehold {
    /// Barangay the household sits in
    pub barangay_code: String,
    /// Caller-supplied code; generated when absent
    pub code: Option<HouseholdCode>,
    /// House number as written on the structure
    pub house_number: Option<String>,
    /// Subdivision reference
    pub subdivision_id: Option<u32>,
    /// Street reference
    pub street_id: Option<u32>,
    /// Reported combined monthly income
    pub monthly_income: Option<f64>,
}

/// Input for registering a resident; PII arrives as plaintext and is
/// encrypted before the record is stored
#[derive(Debug, Clone)]
pub struct NewResident {
    /// Household to link to; the resident inherits its geographic chain
    pub household_code: Option<HouseholdCode>,
    /// Barangay code, used when not household-linked
    pub barangay_code: Option<String>,
    /// Role within the household
    pub role: HouseholdRole,
    /// First name
    pub first_name: Option<String>,
    /// Middle name
    pub middle_name: Option<String>,
    /// Last name
    pub last_name: Option<String>,
    /// Name extension
    pub extension_name: Option<String>,
    /// Contact number
    pub contact_number: Option<String>,
    /// Email address
    pub email: Option<String>,
    /// Mother's maiden name
    pub mother_maiden_name: Option<String>,
    /// Sex
    pub sex: Sex,
    /// Date of birth
    pub birthdate: NaiveDate,
    /// Civil status
    pub civil_status: CivilStatus,
    /// Education level
    pub education_level: EducationLevel,
    /// Whether that level is completed
    pub education_completed: bool,
    /// Employment status
    pub employment_status: EmploymentStatus,
    /// PSOC occupation code
    pub occupation_code: Option<String>,
    /// PSGC birth-place code
    pub birth_place_code: Option<String>,
    /// Birth-place level, inferred from the code width when absent
    pub birth_place_level: Option<GeoLevel>,
    /// Migrant flag
    pub is_migrant: bool,
    /// Registered-voter flag
    pub registered_voter: bool,
}

impl NewResident {
    /// Minimal input: the two required demographics, everything else empty
    #[must_use]
    pub fn new(sex: Sex, birthdate: NaiveDate) -> Self {
        Self {
            household_code: None,
            barangay_code: None,
            role: HouseholdRole::NonRelative,
            first_name: None,
            middle_name: None,
            last_name: None,
            extension_name: None,
            contact_number: None,
            email: None,
            mother_maiden_name: None,
            sex,
            birthdate,
            civil_status: CivilStatus::Single,
            education_level: EducationLevel::None,
            education_completed: false,
            employment_status: EmploymentStatus::NotInLaborForce,
            occupation_code: None,
            birth_place_code: None,
            birth_place_level: None,
            is_migrant: false,
            registered_voter: false,
        }
    }
}

/// The registry: records, subsystems, and the single access gate
#[derive(Debug)]
pub struct RegistryStore {
    config: RegistryConfig,
    resolver: Arc<GeoResolver>,
    directory: StreetDirectory,
    keys: KeyManager,
    cipher: PiiCipher,
    generator: IdentifierGenerator,
    pipeline: DerivationPipeline,
    evaluator: AccessScopeEvaluator,
    audit: Arc<dyn AuditSink>,
    households: HashMap<HouseholdCode, Household>,
    residents: BTreeMap<ResidentId, Resident>,
    sectoral: BTreeMap<ResidentId, SectoralClassification>,
    next_resident_id: u64,
}

impl RegistryStore {
    /// Wire up a registry over loaded reference data
    #[must_use]
    pub fn new(
        config: RegistryConfig,
        resolver: GeoResolver,
        occupations: OccupationCatalog,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let resolver = Arc::new(resolver);
        let occupations = Arc::new(occupations);
        let cipher = PiiCipher::new(&config, audit.clone());
        Self {
            generator: IdentifierGenerator::new(resolver.clone()),
            pipeline: DerivationPipeline::new(resolver.clone(), occupations, cipher.clone()),
            evaluator: AccessScopeEvaluator::new(resolver.clone()),
            directory: StreetDirectory::new(),
            keys: KeyManager::new(),
            cipher,
            audit,
            households: HashMap::new(),
            residents: BTreeMap::new(),
            sectoral: BTreeMap::new(),
            next_resident_id: 0,
            resolver,
            config,
        }
    }

    /// Mutable access to the street directory for reference-data loads
    pub fn directory_mut(&mut self) -> &mut StreetDirectory {
        &mut self.directory
    }

    /// The street directory
    #[must_use]
    pub fn directory(&self) -> &StreetDirectory {
        &self.directory
    }

    /// A caller's effective scope, in the shape the report layer consumes
    #[must_use]
    pub fn effective_scope(&self, principal: &Principal) -> EffectiveScope {
        self.evaluator.effective_scope(principal)
    }

    // ---- key administration -------------------------------------------------

    /// Install the PII master key
    pub fn install_pii_key(&mut self, principal: &Principal, material: KeyMaterial) -> Result<u32> {
        self.keys
            .install_key(principal, PII_KEY_NAME, KeyPurpose::Pii, material, true)
    }

    /// Rotate the PII master key; previously stored ciphertexts stay
    /// decryptable under the retained old version until migrated
    pub fn rotate_pii_key(
        &mut self,
        principal: &Principal,
        material: KeyMaterial,
        reason: impl Into<String>,
    ) -> Result<()> {
        self.keys.rotate(principal, PII_KEY_NAME, material, reason)?;
        Ok(())
    }

    /// Re-encrypt every stored PII field under the current active key,
    /// advancing the rotation event's migration counters. Returns the number
    /// of residents migrated.
    pub fn migrate_pii_encryption(&mut self, principal: &Principal) -> Result<u64> {
        let active = self.keys.active_key(principal, PII_KEY_NAME)?;
        let ids: Vec<ResidentId> = self.residents.keys().copied().collect();
        let mut migrated = 0u64;
        for id in ids {
            let Some(mut resident) = self.residents.get(&id).cloned() else {
                continue;
            };
            let mut touched = false;
            for field in [
                &mut resident.first_name,
                &mut resident.middle_name,
                &mut resident.last_name,
                &mut resident.extension_name,
                &mut resident.full_name,
                &mut resident.contact_number,
                &mut resident.email,
                &mut resident.mother_maiden_name,
            ] {
                let Some(value) = &field.value else { continue };
                if value.key_version == active.version() {
                    continue;
                }
                let old_handle = self.keys.key_version(&value.key_name, value.key_version)?;
                let plaintext = self.cipher.decrypt(principal, &old_handle, value)?;
                field.value = self.cipher.encrypt(principal, &active, Some(&plaintext))?;
                touched = true;
            }
            if touched {
                resident.encryption = Some(EncryptionMetadata {
                    key_version: active.version(),
                    encrypted_at: Utc::now(),
                    encrypted_by: principal.id().to_string(),
                });
                resident.updated_at = Utc::now();
                self.residents.insert(id, resident);
                migrated += 1;
            }
        }
        self.keys
            .record_migration_progress(PII_KEY_NAME, migrated, true)?;
        log::info!("migrated PII of {migrated} residents to key v{}", active.version());
        Ok(migrated)
    }

    /// Rotation history of the PII master key
    #[must_use]
    pub fn pii_rotation_events(&self) -> Vec<&KeyRotationEvent> {
        self.keys
            .rotation_events()
            .iter()
            .filter(|event| event.key_name == PII_KEY_NAME)
            .collect()
    }

    // ---- households ---------------------------------------------------------

    /// Create a household, generating its code when the caller did not
    /// supply one. Auto-allocation retries a bounded number of times on a
    /// sequence collision.
    pub fn create_household(
        &mut self,
        principal: &Principal,
        new: NewHousehold,
    ) -> Result<HouseholdCode> {
        let chain = self
            .resolver
            .resolve_hierarchy(&new.barangay_code, GeoLevel::Barangay)?
            .chain()
            .ok_or_else(|| RegistryError::UnknownGeographicCode(new.barangay_code.clone()))?;
        self.evaluator.require(principal, &chain)?;

        let code = match new.code {
            Some(code) => {
                if code.barangay_prefix() != new.barangay_code {
                    return Err(RegistryError::InvalidIdentifierInput(format!(
                        "code {code} does not belong to barangay {}",
                        new.barangay_code
                    )));
                }
                if self.households.contains_key(&code) {
                    return Err(RegistryError::InvalidIdentifierInput(format!(
                        "household {code} already exists"
                    )));
                }
                self.generator.register_code(&code);
                code
            }
            None => self.generate_code(&new)?,
        };

        let mut household = Household::new(code.clone(), chain)
            .with_location(new.subdivision_id, new.street_id);
        household.house_number = new.house_number;
        household.monthly_income = new.monthly_income;
        self.apply_household_rules(
            principal,
            &mut household,
            &ChangeSet::household_insert().plan(),
            None,
        )?;

        self.record_entity_change(
            principal,
            "households",
            &household,
            ChangeOperation::Insert,
            None,
        );
        self.households.insert(code.clone(), household);
        Ok(code)
    }

    fn generate_code(&self, new: &NewHousehold) -> Result<HouseholdCode> {
        let mut attempts = 0;
        loop {
            match self.generator.generate(
                &self.directory,
                &new.barangay_code,
                new.subdivision_id,
                new.street_id,
                new.house_number.as_deref(),
            ) {
                Ok(code) => return Ok(code),
                Err(RegistryError::SequenceCollision { scope })
                    if attempts < self.config.max_sequence_retries =>
                {
                    attempts += 1;
                    log::debug!("sequence collision in {scope}, retry {attempts}");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Fetch a household the caller is scoped to see
    pub fn get_household(&self, principal: &Principal, code: &HouseholdCode) -> Result<&Household> {
        self.gate(principal, self.households.get(code))
    }

    /// Soft-delete a household; the record and its code remain
    pub fn deactivate_household(
        &mut self,
        principal: &Principal,
        code: &HouseholdCode,
    ) -> Result<()> {
        let mut household = self.get_household(principal, code)?.clone();
        household.active = false;
        household.updated_at = Utc::now();
        self.record_entity_change(
            principal,
            "households",
            &household,
            ChangeOperation::Delete,
            None,
        );
        self.households.insert(code.clone(), household);
        Ok(())
    }

    /// Mark a resident as head of their household.
    ///
    /// Enforces the one-head invariant at write time.
    pub fn set_household_head(
        &mut self,
        principal: &Principal,
        code: &HouseholdCode,
        resident_id: ResidentId,
    ) -> Result<()> {
        let mut household = self.get_household(principal, code)?.clone();
        if household
            .head_resident
            .is_some_and(|current| current != resident_id)
        {
            return Err(RegistryError::DuplicateHouseholdHead(code.to_string()));
        }
        let mut resident = self
            .residents
            .get(&resident_id)
            .filter(|r| r.household_code.as_ref() == Some(code))
            .cloned()
            .ok_or(RegistryError::UnauthorizedAccess)?;
        resident.role = HouseholdRole::Head;
        resident.updated_at = Utc::now();
        household.head_resident = Some(resident_id);

        let changes = ChangeSet {
            head_link: true,
            ..ChangeSet::default()
        };
        self.apply_household_rules(
            principal,
            &mut household,
            &changes.plan(),
            Some((&resident, self.sectoral.get(&resident_id))),
        )?;

        self.residents.insert(resident_id, resident);
        self.record_entity_change(
            principal,
            "households",
            &household,
            ChangeOperation::Update,
            None,
        );
        self.households.insert(code.clone(), household);
        Ok(())
    }

    // ---- residents ----------------------------------------------------------

    /// Register a resident, encrypting every PII field with the active key
    pub fn register_resident(
        &mut self,
        principal: &Principal,
        new: NewResident,
    ) -> Result<ResidentId> {
        let (chain, household_code) = match &new.household_code {
            Some(code) => {
                let household = self
                    .households
                    .get(code)
                    .ok_or(RegistryError::UnauthorizedAccess)?;
                (household.chain.clone(), Some(code.clone()))
            }
            None => {
                let barangay = new.barangay_code.as_deref().ok_or_else(|| {
                    RegistryError::InvalidIdentifierInput(
                        "a resident needs a household or a barangay".to_string(),
                    )
                })?;
                let chain = self
                    .resolver
                    .resolve_hierarchy(barangay, GeoLevel::Barangay)?
                    .chain()
                    .ok_or_else(|| RegistryError::UnknownGeographicCode(barangay.to_string()))?;
                (chain, None)
            }
        };
        self.evaluator.require(principal, &chain)?;

        if new.role == HouseholdRole::Head {
            if let Some(code) = &household_code {
                if let Some(household) = self.households.get(code) {
                    if household.head_resident.is_some() {
                        return Err(RegistryError::DuplicateHouseholdHead(code.to_string()));
                    }
                }
            }
        }

        let handle = self.keys.active_key(principal, PII_KEY_NAME)?;
        self.next_resident_id += 1;
        let id = ResidentId(self.next_resident_id);

        let mut resident = Resident::new(id, new.birthdate, new.sex, chain);
        resident.household_code = household_code.clone();
        resident.role = new.role;
        resident.civil_status = new.civil_status;
        resident.education_level = new.education_level;
        resident.education_completed = new.education_completed;
        resident.employment_status = new.employment_status;
        resident.occupation_code = new.occupation_code;
        resident.birth_place_code = new.birth_place_code;
        resident.birth_place_level = new.birth_place_level;
        resident.is_migrant = new.is_migrant;
        resident.registered_voter = new.registered_voter;
        resident.first_name = self.encrypt_field(principal, &handle, new.first_name.as_deref())?;
        resident.middle_name =
            self.encrypt_field(principal, &handle, new.middle_name.as_deref())?;
        resident.last_name = self.encrypt_field(principal, &handle, new.last_name.as_deref())?;
        resident.extension_name =
            self.encrypt_field(principal, &handle, new.extension_name.as_deref())?;
        resident.contact_number =
            self.encrypt_field(principal, &handle, new.contact_number.as_deref())?;
        resident.email = self.encrypt_field(principal, &handle, new.email.as_deref())?;
        resident.mother_maiden_name =
            self.encrypt_field(principal, &handle, new.mother_maiden_name.as_deref())?;
        resident.encryption = Some(EncryptionMetadata {
            key_version: handle.version(),
            encrypted_at: Utc::now(),
            encrypted_by: principal.id().to_string(),
        });

        let plan = ChangeSet::resident_insert().plan();
        let flags = self.run_resident_rules(principal, &mut resident, &plan)?;

        let staged_household = match &household_code {
            Some(code) => {
                let mut household = self
                    .households
                    .get(code)
                    .cloned()
                    .ok_or(RegistryError::UnauthorizedAccess)?;
                if resident.is_head() {
                    household.head_resident = Some(id);
                }
                self.apply_household_rules(
                    principal,
                    &mut household,
                    &plan,
                    Some((&resident, flags.as_ref())),
                )?;
                Some(household)
            }
            None => None,
        };

        self.record_entity_change(
            principal,
            "residents",
            &resident,
            ChangeOperation::Insert,
            None,
        );
        self.residents.insert(id, resident);
        if let Some(flags) = flags {
            self.sectoral.insert(id, flags);
        }
        if let Some(household) = staged_household {
            self.households.insert(household.code.clone(), household);
        }
        Ok(id)
    }

    /// Fetch a resident the caller is scoped to see
    pub fn get_resident(&self, principal: &Principal, id: ResidentId) -> Result<&Resident> {
        self.gate(principal, self.residents.get(&id))
    }

    /// Fetch a resident's derived sectoral record
    pub fn sectoral_classification(
        &self,
        principal: &Principal,
        id: ResidentId,
    ) -> Result<&SectoralClassification> {
        // gate on the resident itself so absence and scope report alike
        self.get_resident(principal, id)?;
        self.sectoral
            .get(&id)
            .ok_or(RegistryError::UnauthorizedAccess)
    }

    /// Equality lookup by contact number without decrypting: hash the probe
    /// and compare against the stored hash column, then scope-filter.
    #[must_use]
    pub fn find_residents_by_contact(
        &self,
        principal: &Principal,
        contact_number: &str,
    ) -> Vec<&Resident> {
        let Some(probe) = self.cipher.search_hash(Some(contact_number)) else {
            return Vec::new();
        };
        self.residents
            .values()
            .filter(|resident| resident.contact_number.hash.as_deref() == Some(probe.as_str()))
            .filter(|resident| self.evaluator.authorize(principal, &resident.chain))
            .collect()
    }

    /// Decrypt one resident's full name for display. A PII-access event is
    /// recorded whether or not the caller is in scope to see it.
    pub fn resident_full_name(&self, principal: &Principal, id: ResidentId) -> Result<String> {
        let resident = self.get_resident(principal, id)?;
        let value = resident
            .full_name
            .value
            .as_ref()
            .ok_or(RegistryError::DerivationInputMissing {
                rule: RuleId::FullName.name(),
                field: "full_name",
            })?;
        let handle = self.keys.key_version(&value.key_name, value.key_version)?;
        self.cipher.decrypt(principal, &handle, value)
    }

    /// Update a resident's name components
    pub fn update_resident_name(
        &mut self,
        principal: &Principal,
        id: ResidentId,
        first_name: Option<&str>,
        middle_name: Option<&str>,
        last_name: Option<&str>,
        extension_name: Option<&str>,
    ) -> Result<()> {
        self.get_resident(principal, id)?;
        let handle = self.keys.active_key(principal, PII_KEY_NAME)?;
        let mut resident = self
            .residents
            .get(&id)
            .cloned()
            .ok_or(RegistryError::UnauthorizedAccess)?;
        resident.first_name = self.encrypt_field(principal, &handle, first_name)?;
        resident.middle_name = self.encrypt_field(principal, &handle, middle_name)?;
        resident.last_name = self.encrypt_field(principal, &handle, last_name)?;
        resident.extension_name = self.encrypt_field(principal, &handle, extension_name)?;
        resident.encryption = Some(EncryptionMetadata {
            key_version: handle.version(),
            encrypted_at: Utc::now(),
            encrypted_by: principal.id().to_string(),
        });
        let changes = ChangeSet {
            name_components: true,
            ..ChangeSet::default()
        };
        self.commit_resident(principal, resident, changes)
    }

    /// Update education fields; sectoral flags recompute from the post-write
    /// record
    pub fn update_resident_education(
        &mut self,
        principal: &Principal,
        id: ResidentId,
        education_level: EducationLevel,
        education_completed: bool,
    ) -> Result<()> {
        self.get_resident(principal, id)?;
        let mut resident = self
            .residents
            .get(&id)
            .cloned()
            .ok_or(RegistryError::UnauthorizedAccess)?;
        resident.education_level = education_level;
        resident.education_completed = education_completed;
        let changes = ChangeSet {
            education: true,
            ..ChangeSet::default()
        };
        self.commit_resident(principal, resident, changes)
    }

    /// Update employment status and occupation code
    pub fn update_resident_employment(
        &mut self,
        principal: &Principal,
        id: ResidentId,
        employment_status: EmploymentStatus,
        occupation_code: Option<String>,
    ) -> Result<()> {
        self.get_resident(principal, id)?;
        let mut resident = self
            .residents
            .get(&id)
            .cloned()
            .ok_or(RegistryError::UnauthorizedAccess)?;
        resident.employment_status = employment_status;
        resident.occupation_code = occupation_code;
        let changes = ChangeSet {
            employment: true,
            occupation: true,
            ..ChangeSet::default()
        };
        self.commit_resident(principal, resident, changes)
    }

    /// Update the birth-place reference
    pub fn update_resident_birth_place(
        &mut self,
        principal: &Principal,
        id: ResidentId,
        birth_place_code: Option<String>,
        birth_place_level: Option<GeoLevel>,
    ) -> Result<()> {
        self.get_resident(principal, id)?;
        let mut resident = self
            .residents
            .get(&id)
            .cloned()
            .ok_or(RegistryError::UnauthorizedAccess)?;
        resident.birth_place_code = birth_place_code;
        resident.birth_place_level = birth_place_level;
        let changes = ChangeSet {
            birth_place: true,
            ..ChangeSet::default()
        };
        self.commit_resident(principal, resident, changes)
    }

    /// Soft-delete a resident and recompute their household's aggregates
    pub fn deactivate_resident(&mut self, principal: &Principal, id: ResidentId) -> Result<()> {
        self.get_resident(principal, id)?;
        let mut resident = self
            .residents
            .get(&id)
            .cloned()
            .ok_or(RegistryError::UnauthorizedAccess)?;
        resident.active = false;
        let changes = ChangeSet {
            membership: true,
            ..ChangeSet::default()
        };
        self.commit_resident_with_operation(principal, resident, changes, ChangeOperation::Delete)
    }

    // ---- internals ----------------------------------------------------------

    fn encrypt_field(
        &self,
        principal: &Principal,
        handle: &crate::crypto::keys::KeyHandle,
        plaintext: Option<&str>,
    ) -> Result<PiiField> {
        Ok(PiiField {
            value: self.cipher.encrypt(principal, handle, plaintext)?,
            hash: self.cipher.search_hash(plaintext),
        })
    }

    fn commit_resident(
        &mut self,
        principal: &Principal,
        resident: Resident,
        changes: ChangeSet,
    ) -> Result<()> {
        self.commit_resident_with_operation(principal, resident, changes, ChangeOperation::Update)
    }

    /// Apply a mutated resident copy: run the affected rules against the
    /// copy and a staged household clone, then store both and append the
    /// change event. Nothing is written until every rule has succeeded.
    fn commit_resident_with_operation(
        &mut self,
        principal: &Principal,
        mut resident: Resident,
        changes: ChangeSet,
        operation: ChangeOperation,
    ) -> Result<()> {
        let id = resident.id;
        let old = self
            .residents
            .get(&id)
            .and_then(|r| serde_json::to_value(r).ok());
        let plan = changes.plan();
        let flags = self.run_resident_rules(principal, &mut resident, &plan)?;
        let staged_household = match &resident.household_code {
            Some(code) => match self.households.get(code).cloned() {
                Some(mut household) => {
                    self.apply_household_rules(
                        principal,
                        &mut household,
                        &plan,
                        Some((&resident, flags.as_ref())),
                    )?;
                    Some(household)
                }
                None => None,
            },
            None => None,
        };

        resident.updated_at = Utc::now();
        self.record_entity_change(principal, "residents", &resident, operation, old);
        self.residents.insert(id, resident);
        if let Some(flags) = flags {
            self.sectoral.insert(id, flags);
        }
        if let Some(household) = staged_household {
            self.households.insert(household.code.clone(), household);
        }
        Ok(())
    }

    /// Run the resident-side rules of a plan against a staged copy. The
    /// sectoral record is returned rather than stored so the caller commits
    /// it together with the resident.
    fn run_resident_rules(
        &self,
        principal: &Principal,
        resident: &mut Resident,
        plan: &[RuleId],
    ) -> Result<Option<SectoralClassification>> {
        let as_of = Utc::now().date_naive();
        let mut flags = None;
        for rule in plan {
            match rule {
                RuleId::FullName => {
                    self.pipeline
                        .derive_full_name(&self.keys, principal, resident)?;
                }
                RuleId::BirthPlaceName => self.pipeline.derive_birth_place(resident)?,
                RuleId::EmploymentName => self.pipeline.derive_employment(resident)?,
                RuleId::SectoralClassification => {
                    flags = Some(self.pipeline.derive_sectoral(resident, as_of));
                }
                RuleId::HouseholdAddress
                | RuleId::HouseholdName
                | RuleId::HouseholdAggregates => {}
            }
        }
        Ok(flags)
    }

    /// Run the household-side rules of a plan against a staged household
    /// clone. `staged` is a resident copy (with its recomputed sectoral
    /// flags) that belongs to the same transaction and is not yet stored; it
    /// shadows the stored record with the same id.
    fn apply_household_rules(
        &self,
        principal: &Principal,
        household: &mut Household,
        plan: &[RuleId],
        staged: Option<(&Resident, Option<&SectoralClassification>)>,
    ) -> Result<()> {
        for rule in plan {
            match rule {
                RuleId::HouseholdAddress => {
                    self.pipeline
                        .derive_household_address(&self.directory, household)?;
                }
                RuleId::HouseholdName => {
                    let head = household.head_resident.and_then(|head_id| match staged {
                        Some((resident, _)) if resident.id == head_id => Some(resident),
                        _ => self.residents.get(&head_id),
                    });
                    self.pipeline
                        .derive_household_name(&self.keys, principal, household, head)?;
                }
                RuleId::HouseholdAggregates => {
                    let code = household.code.clone();
                    let mut members: Vec<(&Resident, Option<&SectoralClassification>)> = self
                        .residents
                        .values()
                        .filter(|resident| resident.household_code.as_ref() == Some(&code))
                        .filter(|resident| {
                            staged.is_none_or(|(shadow, _)| shadow.id != resident.id)
                        })
                        .map(|resident| (resident, self.sectoral.get(&resident.id)))
                        .collect();
                    if let Some((resident, flags)) = staged {
                        if resident.household_code.as_ref() == Some(&code) {
                            members
                                .push((resident, flags.or_else(|| self.sectoral.get(&resident.id))));
                        }
                    }
                    self.pipeline.derive_household_aggregates(household, &members);
                }
                RuleId::FullName
                | RuleId::BirthPlaceName
                | RuleId::EmploymentName
                | RuleId::SectoralClassification => {}
            }
        }
        household.updated_at = Utc::now();
        Ok(())
    }

    /// Scope gate shared by every read path: absence and scope mismatch
    /// collapse into the same error.
    fn gate<'a, T: Locatable>(&self, principal: &Principal, entity: Option<&'a T>) -> Result<&'a T> {
        entity
            .filter(|entity| self.evaluator.authorize(principal, entity.geo_chain()))
            .ok_or(RegistryError::UnauthorizedAccess)
    }

    fn record_entity_change<T>(
        &self,
        principal: &Principal,
        table: &str,
        entity: &T,
        operation: ChangeOperation,
        old_values: Option<serde_json::Value>,
    ) where
        T: EntityModel + Locatable + serde::Serialize,
    {
        self.audit.record_change(ChangeEvent {
            table: table.to_string(),
            record_id: entity.key(),
            operation,
            old_values,
            new_values: serde_json::to_value(entity).ok(),
            principal: principal.id().to_string(),
            geographic_code: Some(entity.geo_chain().barangay_code.clone()),
            at: Utc::now(),
        });
    }
}
