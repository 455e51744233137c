//! Common domain type definitions
//!
//! Enum types shared across the registry models, with lenient string
//! conversions for the CRUD collaborator's form inputs.

use serde::{Deserialize, Serialize};

/// Sex of a resident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    /// Male
    Male,
    /// Female
    Female,
    /// Unknown or not specified
    Unknown,
}

impl From<&str> for Sex {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "m" | "male" | "1" => Self::Male,
            "f" | "female" | "2" => Self::Female,
            _ => Self::Unknown,
        }
    }
}

/// Civil status of a resident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CivilStatus {
    /// Never married
    Single,
    /// Currently married
    Married,
    /// Surviving spouse
    Widowed,
    /// Legally separated
    Separated,
    /// Marriage dissolved
    Divorced,
}

impl From<&str> for CivilStatus {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "married" => Self::Married,
            "widowed" | "widow" | "widower" => Self::Widowed,
            "separated" => Self::Separated,
            "divorced" => Self::Divorced,
            _ => Self::Single,
        }
    }
}

/// Highest education level a resident is enrolled in or has reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EducationLevel {
    /// No formal schooling
    None,
    /// Elementary
    Elementary,
    /// Junior high school
    JuniorHighSchool,
    /// Senior high school
    SeniorHighSchool,
    /// Technical or vocational
    Vocational,
    /// College
    College,
    /// Postgraduate studies
    Postgraduate,
}

impl From<&str> for EducationLevel {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "elementary" | "primary" => Self::Elementary,
            "junior high" | "junior high school" | "high school" => Self::JuniorHighSchool,
            "senior high" | "senior high school" => Self::SeniorHighSchool,
            "vocational" | "technical" | "tesda" => Self::Vocational,
            "college" | "tertiary" => Self::College,
            "postgraduate" | "masters" | "doctorate" => Self::Postgraduate,
            _ => Self::None,
        }
    }
}

/// Employment status of a resident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmploymentStatus {
    /// Wage or salary worker
    Employed,
    /// Own-account worker
    SelfEmployed,
    /// Looking for work
    Unemployed,
    /// Currently enrolled in school
    Student,
    /// Retired from the labor force
    Retired,
    /// Outside the labor force
    NotInLaborForce,
}

impl EmploymentStatus {
    /// Whether the status counts as employed for sectoral classification
    #[must_use]
    pub const fn is_employed(self) -> bool {
        matches!(self, Self::Employed | Self::SelfEmployed)
    }
}

impl From<&str> for EmploymentStatus {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "employed" => Self::Employed,
            "self-employed" | "self employed" => Self::SelfEmployed,
            "unemployed" => Self::Unemployed,
            "student" => Self::Student,
            "retired" => Self::Retired,
            _ => Self::NotInLaborForce,
        }
    }
}

/// Monthly-income bracket of a household, derived from monthly income
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IncomeClass {
    /// Below the poverty line
    Poor,
    /// Low income but not poor
    LowIncome,
    /// Lower middle income
    LowerMiddle,
    /// Middle income
    Middle,
    /// Upper middle income
    UpperMiddle,
    /// Upper income but not rich
    UpperIncome,
    /// Rich
    Rich,
}

impl IncomeClass {
    /// Classify a monthly household income in pesos
    #[must_use]
    pub fn from_monthly_income(amount: f64) -> Self {
        match amount {
            a if a < 10_957.0 => Self::Poor,
            a if a < 21_914.0 => Self::LowIncome,
            a if a < 43_828.0 => Self::LowerMiddle,
            a if a < 76_669.0 => Self::Middle,
            a if a < 131_484.0 => Self::UpperMiddle,
            a if a < 219_140.0 => Self::UpperIncome,
            _ => Self::Rich,
        }
    }
}

/// Role of a resident within their household
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HouseholdRole {
    /// Household head; at most one per household
    Head,
    /// Spouse of the head
    Spouse,
    /// Child of the head
    Child,
    /// Other relative of the head
    OtherRelative,
    /// Unrelated member
    NonRelative,
}

impl From<&str> for HouseholdRole {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "head" => Self::Head,
            "spouse" | "wife" | "husband" => Self::Spouse,
            "child" | "son" | "daughter" => Self::Child,
            "relative" | "other relative" => Self::OtherRelative,
            _ => Self::NonRelative,
        }
    }
}
