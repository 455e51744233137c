//! Field derivation pipeline
//!
//! Denormalized fields are maintained by named rules forming an explicit
//! DAG. A write computes a `ChangeSet` of touched inputs; the planner
//! expands it to the affected rules plus their dependents and returns them
//! in fixed topological order, and the registry runs the plan once per
//! transaction before commit. There is no trigger cascade and no
//! re-entrancy: a rule's output feeding another rule is expressed as an
//! edge, never as a second firing.
//!
//! Every rule is pure given its declared inputs; re-running a rule on
//! unchanged inputs produces byte-identical output.

use crate::access::Principal;
use crate::crypto::cipher::PiiCipher;
use crate::crypto::keys::KeyManager;
use crate::error::{RegistryError, Result};
use crate::geo::{GeoLevel, GeoResolver};
use crate::identifier::StreetDirectory;
use crate::models::household::Household;
use crate::models::resident::{PiiField, Resident, SectoralClassification};
use crate::models::types::IncomeClass;
use crate::occupation::OccupationCatalog;
use chrono::NaiveDate;
use itertools::Itertools;
use std::sync::Arc;

/// The named derivation rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleId {
    /// Resident: concatenated, re-encrypted full name
    FullName,
    /// Household: display address
    HouseholdAddress,
    /// Household: "<head's last name> Residence"
    HouseholdName,
    /// Resident: human-readable birth place
    BirthPlaceName,
    /// Resident: standardized occupation title
    EmploymentName,
    /// Resident: derived eligibility flags
    SectoralClassification,
    /// Household: member/migrant counts and income class
    HouseholdAggregates,
}

/// Fixed topological order. `HouseholdName` reads the head's encrypted last
/// name, so it follows `FullName`; `HouseholdAggregates` reads the sectoral
/// migrant flag, so it follows `SectoralClassification`.
const TOPOLOGICAL_ORDER: [RuleId; 7] = [
    RuleId::FullName,
    RuleId::HouseholdAddress,
    RuleId::BirthPlaceName,
    RuleId::EmploymentName,
    RuleId::SectoralClassification,
    RuleId::HouseholdName,
    RuleId::HouseholdAggregates,
];

impl RuleId {
    /// Stable rule name used in errors and logs
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::FullName => "full_name",
            Self::HouseholdAddress => "household_address",
            Self::HouseholdName => "household_name",
            Self::BirthPlaceName => "birth_place_name",
            Self::EmploymentName => "employment_name",
            Self::SectoralClassification => "sectoral_classification",
            Self::HouseholdAggregates => "household_aggregates",
        }
    }

    /// Rules whose inputs include this rule's output
    #[must_use]
    pub const fn dependents(self) -> &'static [Self] {
        match self {
            Self::FullName => &[Self::HouseholdName],
            Self::SectoralClassification => &[Self::HouseholdAggregates],
            _ => &[],
        }
    }
}

/// Which derivation inputs a write touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Any name component (first, middle, last, extension)
    pub name_components: bool,
    /// House number, street or subdivision reference
    pub address_components: bool,
    /// The geographic chain itself
    pub geography: bool,
    /// The household-head link
    pub head_link: bool,
    /// Birth-place code or level
    pub birth_place: bool,
    /// Occupation code
    pub occupation: bool,
    /// Birthdate
    pub birthdate: bool,
    /// Education level or completion
    pub education: bool,
    /// Employment fields
    pub employment: bool,
    /// Household membership (insert, update or removal of a member)
    pub membership: bool,
}

impl ChangeSet {
    /// A full-resident insert: every resident-side input is touched
    #[must_use]
    pub const fn resident_insert() -> Self {
        Self {
            name_components: true,
            birth_place: true,
            occupation: true,
            birthdate: true,
            education: true,
            employment: true,
            membership: true,
            head_link: true,
            address_components: false,
            geography: false,
        }
    }

    /// A household insert: every household-side input is touched
    #[must_use]
    pub const fn household_insert() -> Self {
        Self {
            address_components: true,
            geography: true,
            head_link: true,
            membership: true,
            name_components: false,
            birth_place: false,
            occupation: false,
            birthdate: false,
            education: false,
            employment: false,
        }
    }

    fn directly_triggered(self) -> Vec<RuleId> {
        let mut rules = Vec::new();
        if self.name_components {
            rules.push(RuleId::FullName);
        }
        if self.address_components || self.geography {
            rules.push(RuleId::HouseholdAddress);
        }
        if self.head_link {
            rules.push(RuleId::HouseholdName);
        }
        if self.birth_place {
            rules.push(RuleId::BirthPlaceName);
        }
        if self.occupation {
            rules.push(RuleId::EmploymentName);
        }
        if self.birthdate || self.education || self.employment {
            rules.push(RuleId::SectoralClassification);
        }
        if self.membership {
            rules.push(RuleId::HouseholdAggregates);
        }
        rules
    }

    /// Expand the touched inputs to the affected rules and their transitive
    /// dependents, in topological order, each rule at most once.
    #[must_use]
    pub fn plan(self) -> Vec<RuleId> {
        let mut selected: Vec<RuleId> = Vec::new();
        let mut queue = self.directly_triggered();
        while let Some(rule) = queue.pop() {
            if !selected.contains(&rule) {
                selected.push(rule);
                queue.extend_from_slice(rule.dependents());
            }
        }
        TOPOLOGICAL_ORDER
            .into_iter()
            .filter(|rule| selected.contains(rule))
            .collect()
    }
}

/// Runs the derivation rules.
///
/// The pipeline is stateless between runs; it borrows the key manager per
/// call so decryption always sees the post-write key state.
#[derive(Debug, Clone)]
pub struct DerivationPipeline {
    resolver: Arc<GeoResolver>,
    occupations: Arc<OccupationCatalog>,
    cipher: PiiCipher,
}

impl DerivationPipeline {
    /// Create a pipeline over the shared reference data and cipher
    #[must_use]
    pub fn new(
        resolver: Arc<GeoResolver>,
        occupations: Arc<OccupationCatalog>,
        cipher: PiiCipher,
    ) -> Self {
        Self {
            resolver,
            occupations,
            cipher,
        }
    }

    fn decrypt_field(
        &self,
        keys: &KeyManager,
        principal: &Principal,
        field: &PiiField,
    ) -> Result<Option<String>> {
        let Some(value) = &field.value else {
            return Ok(None);
        };
        let handle = keys.key_version(&value.key_name, value.key_version)?;
        Ok(Some(self.cipher.decrypt(principal, &handle, value)?))
    }

    /// Rule 1: decrypt the name parts, join them with single spaces skipping
    /// empty parts, then re-encrypt the result and recompute its hash.
    pub fn derive_full_name(
        &self,
        keys: &KeyManager,
        principal: &Principal,
        resident: &mut Resident,
    ) -> Result<()> {
        log::debug!("running {} for resident {}", RuleId::FullName.name(), resident.id);
        let parts = [
            self.decrypt_field(keys, principal, &resident.first_name)?,
            self.decrypt_field(keys, principal, &resident.middle_name)?,
            self.decrypt_field(keys, principal, &resident.last_name)?,
            self.decrypt_field(keys, principal, &resident.extension_name)?,
        ];
        let full_name = parts
            .iter()
            .flatten()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .join(" ");

        if full_name.is_empty() {
            resident.full_name = PiiField::default();
            return Ok(());
        }
        let key_name = resident
            .first_name
            .value
            .as_ref()
            .or(resident.last_name.value.as_ref())
            .map_or("pii_master_key", |value| value.key_name.as_str());
        let handle = keys.active_key(principal, key_name)?;
        resident.full_name = PiiField {
            value: self.cipher.encrypt(principal, &handle, Some(&full_name))?,
            hash: self.cipher.search_hash(Some(&full_name)),
        };
        Ok(())
    }

    /// Rule 2: rebuild the household display address from its components and
    /// resolved geography. Province is omitted for independent cities.
    pub fn derive_household_address(
        &self,
        directory: &StreetDirectory,
        household: &mut Household,
    ) -> Result<()> {
        log::debug!(
            "running {} for household {}",
            RuleId::HouseholdAddress.name(),
            household.code
        );
        let hierarchy = self
            .resolver
            .resolve_hierarchy(&household.chain.barangay_code, GeoLevel::Barangay)?;

        let street_name = household
            .street_id
            .and_then(|id| directory.street(id))
            .map(|street| street.name.clone());
        let subdivision_name = household
            .subdivision_id
            .and_then(|id| directory.subdivision(id))
            .map(|subdivision| subdivision.name.clone());
        let barangay_name = hierarchy
            .barangay
            .as_ref()
            .map(|unit| format!("Barangay {}", unit.name));
        let city_name = hierarchy.city.as_ref().map(|unit| unit.name.clone());
        let province_name = hierarchy.province.as_ref().map(|unit| unit.name.clone());

        let address = [
            household.house_number.clone(),
            street_name,
            subdivision_name,
            barangay_name,
            city_name,
            province_name,
            Some(hierarchy.region.name.clone()),
        ]
        .into_iter()
        .flatten()
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .join(", ");

        household.address = Some(address);
        Ok(())
    }

    /// Rule 3: name the household after its head. Clears the name when the
    /// household has no head; fails when the head has no stored last name.
    pub fn derive_household_name(
        &self,
        keys: &KeyManager,
        principal: &Principal,
        household: &mut Household,
        head: Option<&Resident>,
    ) -> Result<()> {
        log::debug!(
            "running {} for household {}",
            RuleId::HouseholdName.name(),
            household.code
        );
        let Some(head) = head else {
            household.name = None;
            return Ok(());
        };
        let last_name = self
            .decrypt_field(keys, principal, &head.last_name)?
            .ok_or(RegistryError::DerivationInputMissing {
                rule: RuleId::HouseholdName.name(),
                field: "head.last_name",
            })?;
        household.name = Some(format!("{last_name} Residence"));
        Ok(())
    }

    /// Rule 4: resolve the birth-place code into its display ancestry
    pub fn derive_birth_place(&self, resident: &mut Resident) -> Result<()> {
        log::debug!(
            "running {} for resident {}",
            RuleId::BirthPlaceName.name(),
            resident.id
        );
        let Some(code) = &resident.birth_place_code else {
            resident.birth_place_name = None;
            return Ok(());
        };
        let level = match resident.birth_place_level {
            Some(level) => level,
            None => GeoLevel::from_code(code)?,
        };
        let hierarchy = self.resolver.resolve_hierarchy(code, level)?;
        resident.birth_place_name = Some(hierarchy.display_name());
        Ok(())
    }

    /// Rule 5: resolve the occupation code into its standardized title
    pub fn derive_employment(&self, resident: &mut Resident) -> Result<()> {
        log::debug!(
            "running {} for resident {}",
            RuleId::EmploymentName.name(),
            resident.id
        );
        resident.occupation_name = match &resident.occupation_code {
            Some(code) => Some(self.occupations.title(code)?.to_string()),
            None => None,
        };
        Ok(())
    }

    /// Rule 6: recompute the sectoral flags from the post-write record
    #[must_use]
    pub fn derive_sectoral(
        &self,
        resident: &Resident,
        as_of: NaiveDate,
    ) -> SectoralClassification {
        log::debug!(
            "running {} for resident {}",
            RuleId::SectoralClassification.name(),
            resident.id
        );
        SectoralClassification::evaluate(resident, as_of)
    }

    /// Rule 7: recompute membership aggregates and the income class
    pub fn derive_household_aggregates(
        &self,
        household: &mut Household,
        members: &[(&Resident, Option<&SectoralClassification>)],
    ) {
        log::debug!(
            "running {} for household {}",
            RuleId::HouseholdAggregates.name(),
            household.code
        );
        let active: Vec<_> = members.iter().filter(|(r, _)| r.active).collect();
        household.member_count = active.len() as u32;
        household.migrant_count = active
            .iter()
            .filter(|(_, flags)| flags.is_some_and(|f| f.is_migrant))
            .count() as u32;
        household.income_class = household
            .monthly_income
            .map(IncomeClass::from_monthly_income);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_orders_name_before_household_name() {
        let changes = ChangeSet {
            name_components: true,
            head_link: true,
            ..ChangeSet::default()
        };
        assert_eq!(
            changes.plan(),
            vec![RuleId::FullName, RuleId::HouseholdName]
        );
    }

    #[test]
    fn test_plan_expands_dependents() {
        let changes = ChangeSet {
            name_components: true,
            ..ChangeSet::default()
        };
        // HouseholdName reads the (re-encrypted) name, so it is pulled in
        assert_eq!(
            changes.plan(),
            vec![RuleId::FullName, RuleId::HouseholdName]
        );

        let changes = ChangeSet {
            birthdate: true,
            ..ChangeSet::default()
        };
        assert_eq!(
            changes.plan(),
            vec![RuleId::SectoralClassification, RuleId::HouseholdAggregates]
        );
    }

    #[test]
    fn test_plan_runs_each_rule_once() {
        let plan = ChangeSet::resident_insert().plan();
        let mut deduped = plan.clone();
        deduped.dedup();
        assert_eq!(plan, deduped);
        assert_eq!(plan.last(), Some(&RuleId::HouseholdAggregates));
    }

    #[test]
    fn test_empty_change_set_plans_nothing() {
        assert!(ChangeSet::default().plan().is_empty());
    }

    #[test]
    fn test_household_address_is_idempotent() {
        use crate::audit::MemoryAuditLog;
        use crate::config::RegistryConfig;
        use crate::geo::{GeoChain, GeographicUnit};
        use crate::identifier::HouseholdCode;

        let resolver = Arc::new(GeoResolver::from_units([
            GeographicUnit::region("13", "National Capital Region"),
            GeographicUnit::independent_city("137404", "Taguig", "13"),
            GeographicUnit::barangay("137404001", "Bagumbayan", "137404"),
        ]));
        let audit = Arc::new(MemoryAuditLog::new());
        let pipeline = DerivationPipeline::new(
            resolver,
            Arc::new(OccupationCatalog::new()),
            PiiCipher::new(&RegistryConfig::default(), audit),
        );

        let chain = GeoChain {
            region_code: "13".to_string(),
            province_code: None,
            city_code: "137404".to_string(),
            barangay_code: "137404001".to_string(),
        };
        let directory = StreetDirectory::new();
        let mut household = Household::new(
            HouseholdCode::parse("137404001-0000-0000-0123").unwrap(),
            chain,
        )
        .with_house_number("123-A");

        pipeline
            .derive_household_address(&directory, &mut household)
            .unwrap();
        let first = household.address.clone();
        assert_eq!(
            first.as_deref(),
            Some("123-A, Barangay Bagumbayan, Taguig, National Capital Region")
        );

        pipeline
            .derive_household_address(&directory, &mut household)
            .unwrap();
        assert_eq!(household.address, first);
    }
}
