//! Philippine Standard Occupational Classification (PSOC)
//!
//! A five-level occupation taxonomy keyed by digit width, loaded as read-only
//! reference data and consumed by the employment-name derivation rule.

use crate::error::{RegistryError, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Hierarchy level of a PSOC code, one per digit of code width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OccupationLevel {
    /// 1-digit major group
    MajorGroup,
    /// 2-digit sub-major group
    SubMajorGroup,
    /// 3-digit minor group
    MinorGroup,
    /// 4-digit unit group
    UnitGroup,
    /// 5-digit individual occupation
    Occupation,
}

impl OccupationLevel {
    /// Infer the level from a PSOC code's width (1–5 digits)
    pub fn from_code(code: &str) -> Result<Self> {
        match code.len() {
            1 => Ok(Self::MajorGroup),
            2 => Ok(Self::SubMajorGroup),
            3 => Ok(Self::MinorGroup),
            4 => Ok(Self::UnitGroup),
            5 => Ok(Self::Occupation),
            _ => Err(RegistryError::InvalidIdentifierInput(format!(
                "PSOC code {code} must be 1 to 5 digits"
            ))),
        }
    }
}

/// One entry of the PSOC reference table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupationEntry {
    /// PSOC code, 1–5 digits
    pub code: String,
    /// Standardized occupation title
    pub title: String,
    /// Level implied by the code width
    pub level: OccupationLevel,
}

/// Read-only lookup over the PSOC reference table
#[derive(Debug, Clone, Default)]
pub struct OccupationCatalog {
    entries: FxHashMap<String, OccupationEntry>,
}

impl OccupationCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one classification entry; the level is derived from the code
    pub fn add_entry(&mut self, code: impl Into<String>, title: impl Into<String>) -> Result<()> {
        let code = code.into();
        let level = OccupationLevel::from_code(&code)?;
        self.entries.insert(
            code.clone(),
            OccupationEntry {
                code,
                title: title.into(),
                level,
            },
        );
        Ok(())
    }

    /// Resolve a code at any of the five levels into its standardized title
    pub fn title(&self, code: &str) -> Result<&str> {
        // Validates the width even when the code is simply absent.
        let _ = OccupationLevel::from_code(code)?;
        self.entries
            .get(code)
            .map(|entry| entry.title.as_str())
            .ok_or_else(|| {
                RegistryError::InvalidIdentifierInput(format!("unknown PSOC code {code}"))
            })
    }

    /// Number of loaded entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
