//! Geographic access scoping
//!
//! Every caller is a `Principal` carrying a role and at most one geographic
//! assignment. The evaluator reduces that to an `EffectiveScope`, the single
//! predicate used to filter every read and write of households, residents
//! and their dependent records.

use crate::geo::{GeoChain, GeoLevel, GeoResolver};
use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Role attached to a principal's profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Nationwide administrative access, independent of geography
    NationalAdmin,
    /// Registry officer scoped by a geographic assignment
    Officer,
    /// Read-only consumer scoped by a geographic assignment
    Viewer,
}

/// At most one geographic scope per principal; the most specific non-null
/// level is the one that takes effect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessAssignment {
    /// Barangay-level scope
    pub barangay_code: Option<String>,
    /// City-level scope
    pub city_code: Option<String>,
    /// Province-level scope
    pub province_code: Option<String>,
    /// Region-level scope
    pub region_code: Option<String>,
}

/// An authenticated caller.
///
/// Passed explicitly through every key, cipher and scope operation; there is
/// no ambient session identity anywhere in the crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    id: String,
    role: Role,
    assignment: AccessAssignment,
}

impl Principal {
    /// Create a principal with an explicit role and assignment
    #[must_use]
    pub fn new(id: impl Into<String>, role: Role, assignment: AccessAssignment) -> Self {
        Self {
            id: id.into(),
            role,
            assignment,
        }
    }

    /// A principal with the national administrative role and no assignment
    #[must_use]
    pub fn national_admin(id: impl Into<String>) -> Self {
        Self::new(id, Role::NationalAdmin, AccessAssignment::default())
    }

    /// An officer scoped to a single barangay
    #[must_use]
    pub fn barangay_officer(id: impl Into<String>, barangay_code: impl Into<String>) -> Self {
        Self::new(
            id,
            Role::Officer,
            AccessAssignment {
                barangay_code: Some(barangay_code.into()),
                ..AccessAssignment::default()
            },
        )
    }

    /// Stable identity of the caller, used in audit events
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The principal's role
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// The principal's geographic assignment
    #[must_use]
    pub const fn assignment(&self) -> &AccessAssignment {
        &self.assignment
    }
}

/// Level of an effective scope, as consumed by the report layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeLevel {
    /// Scoped to one barangay
    Barangay,
    /// Scoped to one city or municipality
    City,
    /// Scoped to one province
    Province,
    /// Scoped to one region
    Region,
    /// Nationwide
    National,
}

/// A principal's computed scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectiveScope {
    /// Authorized for entities in exactly this barangay
    Barangay(String),
    /// Authorized for entities in exactly this city
    City(String),
    /// Authorized for entities in exactly this province
    Province(String),
    /// Authorized for entities in exactly this region
    Region(String),
    /// Authorized for every entity
    National,
    /// Authorized for nothing
    NoAccess,
}

impl EffectiveScope {
    /// Scope level, `None` for `NoAccess`
    #[must_use]
    pub const fn level(&self) -> Option<ScopeLevel> {
        match self {
            Self::Barangay(_) => Some(ScopeLevel::Barangay),
            Self::City(_) => Some(ScopeLevel::City),
            Self::Province(_) => Some(ScopeLevel::Province),
            Self::Region(_) => Some(ScopeLevel::Region),
            Self::National => Some(ScopeLevel::National),
            Self::NoAccess => None,
        }
    }

    /// The scoping code, when the scope is geographic
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Barangay(code) | Self::City(code) | Self::Province(code) | Self::Region(code) => {
                Some(code)
            }
            Self::National | Self::NoAccess => None,
        }
    }

    /// Whether this scope covers an entity with the given geographic chain.
    ///
    /// Equality at the matching level; `National` always authorizes,
    /// `NoAccess` never does.
    #[must_use]
    pub fn authorizes(&self, chain: &GeoChain) -> bool {
        match self {
            Self::Barangay(code) => chain.barangay_code == *code,
            Self::City(code) => chain.city_code == *code,
            Self::Province(code) => chain.province_code.as_deref() == Some(code.as_str()),
            Self::Region(code) => chain.region_code == *code,
            Self::National => true,
            Self::NoAccess => false,
        }
    }
}

/// Computes effective scopes and gates entity access with them
#[derive(Debug, Clone)]
pub struct AccessScopeEvaluator {
    resolver: Arc<GeoResolver>,
}

impl AccessScopeEvaluator {
    /// Create an evaluator over the loaded geographic reference data
    #[must_use]
    pub fn new(resolver: Arc<GeoResolver>) -> Self {
        Self { resolver }
    }

    /// Reduce a principal's profile to its effective scope.
    ///
    /// The most specific non-null assignment wins (barangay > city >
    /// province > region); the national role only applies when no assignment
    /// is present, and an assignment whose code no longer resolves yields
    /// `NoAccess` rather than silently widening.
    #[must_use]
    pub fn effective_scope(&self, principal: &Principal) -> EffectiveScope {
        let assignment = principal.assignment();
        let levels = [
            (assignment.barangay_code.as_deref(), GeoLevel::Barangay),
            (assignment.city_code.as_deref(), GeoLevel::City),
            (assignment.province_code.as_deref(), GeoLevel::Province),
            (assignment.region_code.as_deref(), GeoLevel::Region),
        ];
        for (code, level) in levels {
            let Some(code) = code else { continue };
            if self.resolver.resolve_hierarchy(code, level).is_err() {
                return EffectiveScope::NoAccess;
            }
            return match level {
                GeoLevel::Barangay => EffectiveScope::Barangay(code.to_string()),
                GeoLevel::City => EffectiveScope::City(code.to_string()),
                GeoLevel::Province => EffectiveScope::Province(code.to_string()),
                GeoLevel::Region => EffectiveScope::Region(code.to_string()),
            };
        }
        match principal.role() {
            Role::NationalAdmin => EffectiveScope::National,
            Role::Officer | Role::Viewer => EffectiveScope::NoAccess,
        }
    }

    /// Check a principal against an entity's geographic chain
    #[must_use]
    pub fn authorize(&self, principal: &Principal, chain: &GeoChain) -> bool {
        self.effective_scope(principal).authorizes(chain)
    }

    /// Like `authorize`, but propagating `UnauthorizedAccess` on mismatch
    pub fn require(&self, principal: &Principal, chain: &GeoChain) -> Result<()> {
        if self.authorize(principal, chain) {
            Ok(())
        } else {
            Err(RegistryError::UnauthorizedAccess)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeographicUnit;

    fn resolver() -> Arc<GeoResolver> {
        Arc::new(GeoResolver::from_units([
            GeographicUnit::region("04", "CALABARZON"),
            GeographicUnit::province("0434", "Laguna", "04"),
            GeographicUnit::province("0421", "Cavite", "04"),
            GeographicUnit::city("043404", "Calamba", "0434"),
            GeographicUnit::city("042108", "Imus", "0421"),
            GeographicUnit::barangay("043404001", "Banlic", "043404"),
            GeographicUnit::barangay("042108003", "Anabu", "042108"),
        ]))
    }

    fn banlic_chain() -> GeoChain {
        GeoChain {
            region_code: "04".to_string(),
            province_code: Some("0434".to_string()),
            city_code: "043404".to_string(),
            barangay_code: "043404001".to_string(),
        }
    }

    #[test]
    fn test_most_specific_assignment_wins() {
        let evaluator = AccessScopeEvaluator::new(resolver());
        let principal = Principal::new(
            "officer-1",
            Role::Officer,
            AccessAssignment {
                barangay_code: Some("043404001".to_string()),
                province_code: Some("0434".to_string()),
                ..AccessAssignment::default()
            },
        );
        assert_eq!(
            evaluator.effective_scope(&principal),
            EffectiveScope::Barangay("043404001".to_string())
        );
    }

    #[test]
    fn test_national_role_without_assignment() {
        let evaluator = AccessScopeEvaluator::new(resolver());
        let admin = Principal::national_admin("admin-1");
        assert_eq!(evaluator.effective_scope(&admin), EffectiveScope::National);
        assert!(evaluator.authorize(&admin, &banlic_chain()));
    }

    #[test]
    fn test_no_assignment_and_no_national_role_is_no_access() {
        let evaluator = AccessScopeEvaluator::new(resolver());
        let viewer = Principal::new("viewer-1", Role::Viewer, AccessAssignment::default());
        assert_eq!(evaluator.effective_scope(&viewer), EffectiveScope::NoAccess);
        assert!(!evaluator.authorize(&viewer, &banlic_chain()));
    }

    #[test]
    fn test_province_scope_rejects_other_province() {
        let evaluator = AccessScopeEvaluator::new(resolver());
        let principal = Principal::new(
            "officer-2",
            Role::Officer,
            AccessAssignment {
                province_code: Some("0421".to_string()),
                ..AccessAssignment::default()
            },
        );
        assert!(matches!(
            evaluator.require(&principal, &banlic_chain()),
            Err(RegistryError::UnauthorizedAccess)
        ));

        let own_chain = GeoChain {
            region_code: "04".to_string(),
            province_code: Some("0421".to_string()),
            city_code: "042108".to_string(),
            barangay_code: "042108003".to_string(),
        };
        assert!(evaluator.authorize(&principal, &own_chain));
    }

    #[test]
    fn test_stale_assignment_code_yields_no_access() {
        let evaluator = AccessScopeEvaluator::new(resolver());
        let principal = Principal::barangay_officer("officer-3", "999999999");
        assert_eq!(evaluator.effective_scope(&principal), EffectiveScope::NoAccess);
    }

    #[test]
    fn test_scope_filter_shape() {
        let scope = EffectiveScope::City("043404".to_string());
        assert_eq!(scope.level(), Some(ScopeLevel::City));
        assert_eq!(scope.code(), Some("043404"));
        assert_eq!(EffectiveScope::National.code(), None);
        assert_eq!(EffectiveScope::NoAccess.level(), None);
    }
}
