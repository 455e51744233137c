//! Household record
//!
//! A household is keyed by its hierarchical code and carries the
//! denormalized geographic chain plus two derived text fields (address and
//! name) maintained by the derivation pipeline. Households are soft-deleted
//! via the active flag and never removed while residents reference them.

use crate::geo::GeoChain;
use crate::identifier::HouseholdCode;
use crate::models::resident::ResidentId;
use crate::models::traits::{EntityModel, Locatable};
use crate::models::types::IncomeClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered household
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Household {
    /// Hierarchical primary key
    pub code: HouseholdCode,
    /// House number as written on the structure, free-form
    pub house_number: Option<String>,
    /// Subdivision reference in the street directory
    pub subdivision_id: Option<u32>,
    /// Street reference in the street directory
    pub street_id: Option<u32>,
    /// Denormalized geographic chain, barangay through region
    pub chain: GeoChain,
    /// Resident currently marked as head
    pub head_resident: Option<ResidentId>,
    /// Derived: number of active members
    pub member_count: u32,
    /// Derived: number of active members flagged as migrants
    pub migrant_count: u32,
    /// Number of families sharing the household
    pub family_count: u32,
    /// Reported combined monthly income in pesos
    pub monthly_income: Option<f64>,
    /// Derived: income bracket of the reported monthly income
    pub income_class: Option<IncomeClass>,
    /// Derived: full display address
    pub address: Option<String>,
    /// Derived: "<head's last name> Residence"
    pub name: Option<String>,
    /// Soft-delete flag
    pub active: bool,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record last changed
    pub updated_at: DateTime<Utc>,
}

impl Household {
    /// Create a household with the minimum required information
    #[must_use]
    pub fn new(code: HouseholdCode, chain: GeoChain) -> Self {
        let now = Utc::now();
        Self {
            code,
            house_number: None,
            subdivision_id: None,
            street_id: None,
            chain,
            head_resident: None,
            member_count: 0,
            migrant_count: 0,
            family_count: 1,
            monthly_income: None,
            income_class: None,
            address: None,
            name: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the house number
    #[must_use]
    pub fn with_house_number(mut self, house_number: impl Into<String>) -> Self {
        self.house_number = Some(house_number.into());
        self
    }

    /// Set the street-directory references
    #[must_use]
    pub const fn with_location(
        mut self,
        subdivision_id: Option<u32>,
        street_id: Option<u32>,
    ) -> Self {
        self.subdivision_id = subdivision_id;
        self.street_id = street_id;
        self
    }

    /// Set the reported monthly income
    #[must_use]
    pub const fn with_monthly_income(mut self, monthly_income: f64) -> Self {
        self.monthly_income = Some(monthly_income);
        self
    }
}

impl EntityModel for Household {
    type Id = HouseholdCode;

    fn id(&self) -> &Self::Id {
        &self.code
    }

    fn key(&self) -> String {
        self.code.to_string()
    }
}

impl Locatable for Household {
    fn geo_chain(&self) -> &GeoChain {
        &self.chain
    }
}
