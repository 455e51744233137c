//! Philippine Standard Geographic Code (PSGC) hierarchy
//!
//! This module contains the geographic reference model and the resolver that
//! walks a leaf code up to its ancestors. The four-level hierarchy
//! (region → province → city/municipality → barangay) is supplied as
//! read-only reference data by the bulk-import collaborator; units are never
//! deleted, only renamed or deactivated.

use crate::error::{RegistryError, Result};
use itertools::Itertools;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Administrative level of a geographic unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeoLevel {
    /// Top-level region
    Region,
    /// Province under a region
    Province,
    /// City or municipality; may be independent (no province ancestor)
    City,
    /// Smallest administrative unit, leaf of the hierarchy
    Barangay,
}

impl GeoLevel {
    /// Infer the level from a PSGC code's width (2, 4, 6 or 9 digits)
    pub fn from_code(code: &str) -> Result<Self> {
        match code.len() {
            2 => Ok(Self::Region),
            4 => Ok(Self::Province),
            6 => Ok(Self::City),
            9 => Ok(Self::Barangay),
            _ => Err(RegistryError::UnknownGeographicCode(code.to_string())),
        }
    }

    /// Stable lowercase label, used in audit records
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Region => "region",
            Self::Province => "province",
            Self::City => "city",
            Self::Barangay => "barangay",
        }
    }
}

/// One node of the PSGC reference table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeographicUnit {
    /// Externally assigned PSGC code, unique and stable
    pub code: String,
    /// Official name (the one mutable attribute besides `active`)
    pub name: String,
    /// Administrative level of this unit
    pub level: GeoLevel,
    /// Code of the parent unit. `None` for regions and for independent
    /// cities, which have no province ancestor.
    pub parent_code: Option<String>,
    /// Region reference carried directly on independent cities
    pub region_code: Option<String>,
    /// Inactive units are kept for historical records but do not resolve
    pub active: bool,
}

impl GeographicUnit {
    /// Create a region node
    #[must_use]
    pub fn region(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            level: GeoLevel::Region,
            parent_code: None,
            region_code: None,
            active: true,
        }
    }

    /// Create a province under a region
    #[must_use]
    pub fn province(
        code: impl Into<String>,
        name: impl Into<String>,
        region_code: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            level: GeoLevel::Province,
            parent_code: Some(region_code.into()),
            region_code: None,
            active: true,
        }
    }

    /// Create a city or municipality under a province
    #[must_use]
    pub fn city(
        code: impl Into<String>,
        name: impl Into<String>,
        province_code: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            level: GeoLevel::City,
            parent_code: Some(province_code.into()),
            region_code: None,
            active: true,
        }
    }

    /// Create an independent city, attached directly to its region
    #[must_use]
    pub fn independent_city(
        code: impl Into<String>,
        name: impl Into<String>,
        region_code: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            level: GeoLevel::City,
            parent_code: None,
            region_code: Some(region_code.into()),
            active: true,
        }
    }

    /// Create a barangay under a city or municipality
    #[must_use]
    pub fn barangay(
        code: impl Into<String>,
        name: impl Into<String>,
        city_code: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            level: GeoLevel::Barangay,
            parent_code: Some(city_code.into()),
            region_code: None,
            active: true,
        }
    }

    /// A city with no province ancestor
    #[must_use]
    pub fn is_independent_city(&self) -> bool {
        self.level == GeoLevel::City && self.parent_code.is_none()
    }
}

/// The full geographic chain of an entity, barangay through region.
///
/// Households and residents carry this denormalized chain so access-scope
/// checks never need a resolver lookup at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoChain {
    /// Region code
    pub region_code: String,
    /// Province code; `None` when the city is independent
    pub province_code: Option<String>,
    /// City or municipality code
    pub city_code: String,
    /// Barangay code
    pub barangay_code: String,
}

/// Result of resolving a leaf code: the ancestor chain down to the leaf.
///
/// Fields below the supplied leaf level are `None`; province is also `None`
/// on the independent-city path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoHierarchy {
    /// The region ancestor (always present)
    pub region: GeographicUnit,
    /// The province ancestor, absent for independent cities
    pub province: Option<GeographicUnit>,
    /// The city ancestor, absent when the leaf is a region or province
    pub city: Option<GeographicUnit>,
    /// The barangay, present only when it was the leaf
    pub barangay: Option<GeographicUnit>,
}

impl GeoHierarchy {
    /// Denormalized code chain, available when the leaf was a barangay
    #[must_use]
    pub fn chain(&self) -> Option<GeoChain> {
        let barangay = self.barangay.as_ref()?;
        let city = self.city.as_ref()?;
        Some(GeoChain {
            region_code: self.region.code.clone(),
            province_code: self.province.as_ref().map(|p| p.code.clone()),
            city_code: city.code.clone(),
            barangay_code: barangay.code.clone(),
        })
    }

    /// Human-readable "Leaf, Parent, Grandparent, …" name.
    ///
    /// The province segment is omitted for independent cities, matching the
    /// invariant that independence removes the province from every derived
    /// representation.
    #[must_use]
    pub fn display_name(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(4);
        if let Some(barangay) = &self.barangay {
            parts.push(&barangay.name);
        }
        if let Some(city) = &self.city {
            parts.push(&city.name);
        }
        if let Some(province) = &self.province {
            parts.push(&province.name);
        }
        parts.push(&self.region.name);
        parts.iter().join(", ")
    }
}

/// Read-only resolver over the PSGC reference table.
///
/// Resolution is pure and idempotent; results are safe to cache by code.
#[derive(Debug, Clone, Default)]
pub struct GeoResolver {
    units: FxHashMap<String, GeographicUnit>,
}

impl GeoResolver {
    /// Create an empty resolver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a resolver from a reference-data load
    pub fn from_units(units: impl IntoIterator<Item = GeographicUnit>) -> Self {
        let mut resolver = Self::new();
        for unit in units {
            resolver.add_unit(unit);
        }
        resolver
    }

    /// Insert one unit of reference data
    pub fn add_unit(&mut self, unit: GeographicUnit) {
        self.units.insert(unit.code.clone(), unit);
    }

    /// Number of loaded units
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the reference table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Correct the name of an existing unit
    pub fn rename_unit(&mut self, code: &str, name: impl Into<String>) -> Result<()> {
        let unit = self
            .units
            .get_mut(code)
            .ok_or_else(|| RegistryError::UnknownGeographicCode(code.to_string()))?;
        unit.name = name.into();
        Ok(())
    }

    /// Activate or deactivate a unit; deactivated units stop resolving
    pub fn set_active(&mut self, code: &str, active: bool) -> Result<()> {
        let unit = self
            .units
            .get_mut(code)
            .ok_or_else(|| RegistryError::UnknownGeographicCode(code.to_string()))?;
        unit.active = active;
        Ok(())
    }

    /// Look up an active unit at the expected level
    fn unit(&self, code: &str, level: GeoLevel) -> Result<&GeographicUnit> {
        match self.units.get(code) {
            Some(unit) if unit.active && unit.level == level => Ok(unit),
            _ => Err(RegistryError::UnknownGeographicCode(code.to_string())),
        }
    }

    fn parent_code<'a>(&self, unit: &'a GeographicUnit) -> Result<&'a str> {
        unit.parent_code
            .as_deref()
            .ok_or_else(|| RegistryError::UnknownGeographicCode(unit.code.clone()))
    }

    /// Resolve a leaf code into its full ancestor chain.
    ///
    /// For an independent city the region is read off the city's own region
    /// reference and the province slot stays empty.
    pub fn resolve_hierarchy(&self, leaf_code: &str, leaf_level: GeoLevel) -> Result<GeoHierarchy> {
        match leaf_level {
            GeoLevel::Region => {
                let region = self.unit(leaf_code, GeoLevel::Region)?.clone();
                Ok(GeoHierarchy {
                    region,
                    province: None,
                    city: None,
                    barangay: None,
                })
            }
            GeoLevel::Province => {
                let province = self.unit(leaf_code, GeoLevel::Province)?.clone();
                let region = self
                    .unit(self.parent_code(&province)?, GeoLevel::Region)?
                    .clone();
                Ok(GeoHierarchy {
                    region,
                    province: Some(province),
                    city: None,
                    barangay: None,
                })
            }
            GeoLevel::City => {
                let mut hierarchy = self.resolve_city(leaf_code)?;
                hierarchy.barangay = None;
                Ok(hierarchy)
            }
            GeoLevel::Barangay => {
                let barangay = self.unit(leaf_code, GeoLevel::Barangay)?.clone();
                let mut hierarchy = self.resolve_city(self.parent_code(&barangay)?)?;
                hierarchy.barangay = Some(barangay);
                Ok(hierarchy)
            }
        }
    }

    /// Resolve a city and its ancestors, taking the independent-city shortcut
    /// to the region when there is no province.
    fn resolve_city(&self, city_code: &str) -> Result<GeoHierarchy> {
        let city = self.unit(city_code, GeoLevel::City)?.clone();
        if city.is_independent_city() {
            let region_code = city
                .region_code
                .as_deref()
                .ok_or_else(|| RegistryError::UnknownGeographicCode(city.code.clone()))?;
            let region = self.unit(region_code, GeoLevel::Region)?.clone();
            return Ok(GeoHierarchy {
                region,
                province: None,
                city: Some(city),
                barangay: None,
            });
        }
        let province = self
            .unit(self.parent_code(&city)?, GeoLevel::Province)?
            .clone();
        let region = self
            .unit(self.parent_code(&province)?, GeoLevel::Region)?
            .clone();
        Ok(GeoHierarchy {
            region,
            province: Some(province),
            city: Some(city),
            barangay: None,
        })
    }

    /// Resolve a code of any level into its display ancestry, the level
    /// inferred from the code width
    pub fn format_ancestry(&self, code: &str) -> Result<String> {
        let level = GeoLevel::from_code(code)?;
        Ok(self.resolve_hierarchy(code, level)?.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_resolver() -> GeoResolver {
        GeoResolver::from_units([
            GeographicUnit::region("13", "National Capital Region"),
            GeographicUnit::region("04", "CALABARZON"),
            GeographicUnit::province("0434", "Laguna", "04"),
            GeographicUnit::city("043404", "Calamba", "0434"),
            GeographicUnit::barangay("043404001", "Banlic", "043404"),
            GeographicUnit::independent_city("137404", "Taguig", "13"),
            GeographicUnit::barangay("137404001", "Bagumbayan", "137404"),
        ])
    }

    #[test]
    fn test_resolve_barangay_under_province() {
        let resolver = sample_resolver();
        let hierarchy = resolver
            .resolve_hierarchy("043404001", GeoLevel::Barangay)
            .unwrap();
        assert_eq!(hierarchy.region.code, "04");
        assert_eq!(hierarchy.province.as_ref().unwrap().code, "0434");
        assert_eq!(hierarchy.city.as_ref().unwrap().code, "043404");
        assert_eq!(hierarchy.barangay.as_ref().unwrap().code, "043404001");
        assert_eq!(
            hierarchy.display_name(),
            "Banlic, Calamba, Laguna, CALABARZON"
        );
    }

    #[test]
    fn test_resolve_independent_city_omits_province() {
        let resolver = sample_resolver();
        let hierarchy = resolver
            .resolve_hierarchy("137404001", GeoLevel::Barangay)
            .unwrap();
        assert_eq!(hierarchy.region.code, "13");
        assert!(hierarchy.province.is_none());
        assert_eq!(hierarchy.city.as_ref().unwrap().code, "137404");
        assert_eq!(hierarchy.barangay.as_ref().unwrap().code, "137404001");

        let chain = hierarchy.chain().unwrap();
        assert_eq!(chain.province_code, None);
        assert_eq!(chain.city_code, "137404");
    }

    #[test]
    fn test_unknown_code_fails() {
        let resolver = sample_resolver();
        let err = resolver
            .resolve_hierarchy("999999999", GeoLevel::Barangay)
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownGeographicCode(_)));
    }

    #[test]
    fn test_inactive_unit_does_not_resolve() {
        let mut resolver = sample_resolver();
        resolver.set_active("043404001", false).unwrap();
        assert!(
            resolver
                .resolve_hierarchy("043404001", GeoLevel::Barangay)
                .is_err()
        );
    }

    #[test]
    fn test_format_ancestry_infers_level_from_width() {
        let resolver = sample_resolver();
        assert_eq!(
            resolver.format_ancestry("137404").unwrap(),
            "Taguig, National Capital Region"
        );
        assert_eq!(resolver.format_ancestry("04").unwrap(), "CALABARZON");
        assert!(resolver.format_ancestry("123").is_err());
    }

    #[test]
    fn test_rename_is_reflected_in_resolution() {
        let mut resolver = sample_resolver();
        resolver.rename_unit("137404", "Taguig City").unwrap();
        assert_eq!(
            resolver.format_ancestry("137404").unwrap(),
            "Taguig City, National Capital Region"
        );
    }
}
