//! Hierarchical household identifiers
//!
//! A household code is fixed-width and positional:
//! `RRPPMMBBB-SSSS-TTTT-HHHH` — the 9-digit barangay code (2-digit region,
//! 2-digit province, 2-digit municipality, 3-digit barangay), then
//! zero-padded subdivision, street and house sequences. The house sequence
//! is allocated through a mutex-guarded per-scope counter, so two concurrent
//! creations in the same scope can never compute the same number.

use crate::error::{RegistryError, Result};
use crate::geo::{GeoLevel, GeoResolver};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Total width of a household code, three hyphens included
pub const CODE_LEN: usize = 24;

const PREFIX_LEN: usize = 9;
const SEGMENT_LEN: usize = 4;
const MAX_SEQUENCE: u32 = 9999;

/// Primary key of a household, bit-exact wire format
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HouseholdCode(String);

impl HouseholdCode {
    /// Parse and validate a caller-supplied code
    pub fn parse(code: &str) -> Result<Self> {
        let segments: Vec<&str> = code.split('-').collect();
        let shape_ok = code.len() == CODE_LEN
            && segments.len() == 4
            && segments[0].len() == PREFIX_LEN
            && segments[1..].iter().all(|s| s.len() == SEGMENT_LEN)
            && segments.iter().all(|s| s.bytes().all(|b| b.is_ascii_digit()));
        if !shape_ok {
            return Err(RegistryError::InvalidIdentifierInput(format!(
                "malformed household code {code}"
            )));
        }
        Ok(Self(code.to_string()))
    }

    fn compose(prefix: &str, subdivision: u32, street: u32, house: u32) -> Self {
        Self(format!(
            "{prefix}-{subdivision:04}-{street:04}-{house:04}"
        ))
    }

    /// The code as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The embedded 9-digit barangay code
    #[must_use]
    pub fn barangay_prefix(&self) -> &str {
        &self.0[..PREFIX_LEN]
    }

    fn scope_and_house(&self) -> (String, u32) {
        let scope = self.0[..PREFIX_LEN + 2 * (SEGMENT_LEN + 1)].to_string();
        let house = self.0[PREFIX_LEN + 2 * (SEGMENT_LEN + 1) + 1..]
            .parse()
            .unwrap_or(0);
        (scope, house)
    }
}

impl std::fmt::Display for HouseholdCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A subdivision within a barangay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subdivision {
    /// Surrogate identifier
    pub id: u32,
    /// Barangay the subdivision belongs to
    pub barangay_code: String,
    /// Display name
    pub name: String,
}

/// A street, optionally inside a subdivision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Street {
    /// Surrogate identifier
    pub id: u32,
    /// Barangay the street belongs to
    pub barangay_code: String,
    /// Subdivision the street belongs to, if any
    pub subdivision_id: Option<u32>,
    /// Display name
    pub name: String,
}

/// Creation-ordered directory of subdivisions and streets.
///
/// A subdivision's code segment is its ordinal position among the
/// subdivisions of the same barangay; a street's is its position among the
/// streets of the same (barangay, subdivision) scope.
#[derive(Debug, Clone, Default)]
pub struct StreetDirectory {
    subdivisions: Vec<Subdivision>,
    streets: Vec<Street>,
    next_id: u32,
}

impl StreetDirectory {
    /// Create an empty directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subdivision, returning its identifier
    pub fn add_subdivision(
        &mut self,
        barangay_code: impl Into<String>,
        name: impl Into<String>,
    ) -> u32 {
        self.next_id += 1;
        self.subdivisions.push(Subdivision {
            id: self.next_id,
            barangay_code: barangay_code.into(),
            name: name.into(),
        });
        self.next_id
    }

    /// Register a street, returning its identifier
    pub fn add_street(
        &mut self,
        barangay_code: impl Into<String>,
        subdivision_id: Option<u32>,
        name: impl Into<String>,
    ) -> u32 {
        self.next_id += 1;
        self.streets.push(Street {
            id: self.next_id,
            barangay_code: barangay_code.into(),
            subdivision_id,
            name: name.into(),
        });
        self.next_id
    }

    /// Look up a subdivision
    #[must_use]
    pub fn subdivision(&self, id: u32) -> Option<&Subdivision> {
        self.subdivisions.iter().find(|s| s.id == id)
    }

    /// Look up a street
    #[must_use]
    pub fn street(&self, id: u32) -> Option<&Street> {
        self.streets.iter().find(|s| s.id == id)
    }

    /// 1-based creation-order position of a subdivision within its barangay
    #[must_use]
    pub fn subdivision_ordinal(&self, barangay_code: &str, id: u32) -> Option<u32> {
        self.subdivisions
            .iter()
            .filter(|s| s.barangay_code == barangay_code)
            .position(|s| s.id == id)
            .map(|pos| pos as u32 + 1)
    }

    /// 1-based creation-order position of a street within its
    /// (barangay, subdivision) scope
    #[must_use]
    pub fn street_ordinal(
        &self,
        barangay_code: &str,
        subdivision_id: Option<u32>,
        id: u32,
    ) -> Option<u32> {
        self.streets
            .iter()
            .filter(|s| s.barangay_code == barangay_code && s.subdivision_id == subdivision_id)
            .position(|s| s.id == id)
            .map(|pos| pos as u32 + 1)
    }
}

#[derive(Debug, Default)]
struct AllocatorState {
    used: FxHashSet<String>,
    counters: FxHashMap<String, u32>,
}

/// Generates collision-free household codes.
///
/// All sequence state is behind one mutex: allocation is check-and-reserve
/// in a single critical section, replacing the read-then-write counter of
/// the reference schema.
#[derive(Debug)]
pub struct IdentifierGenerator {
    resolver: Arc<GeoResolver>,
    state: Mutex<AllocatorState>,
}

impl IdentifierGenerator {
    /// Create a generator over the loaded geographic reference data
    #[must_use]
    pub fn new(resolver: Arc<GeoResolver>) -> Self {
        Self {
            resolver,
            state: Mutex::new(AllocatorState::default()),
        }
    }

    /// Seed the allocator with a code that already exists in storage
    pub fn register_code(&self, code: &HouseholdCode) {
        let (scope, house) = code.scope_and_house();
        let mut state = self.state.lock().expect("allocator lock poisoned");
        state.used.insert(code.as_str().to_string());
        let counter = state.counters.entry(scope).or_insert(0);
        *counter = (*counter).max(house);
    }

    /// Generate the household code for a new record.
    ///
    /// When a house number is supplied its numeric substring becomes the
    /// house sequence and a collision with an existing code is an error the
    /// caller must resolve; when it is absent the next free sequence in the
    /// (barangay, subdivision, street) scope is reserved atomically.
    pub fn generate(
        &self,
        directory: &StreetDirectory,
        barangay_code: &str,
        subdivision_id: Option<u32>,
        street_id: Option<u32>,
        house_number: Option<&str>,
    ) -> Result<HouseholdCode> {
        if barangay_code.len() != PREFIX_LEN
            || !barangay_code.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(RegistryError::InvalidIdentifierInput(format!(
                "barangay code {barangay_code} is not 9 digits"
            )));
        }
        self.resolver
            .resolve_hierarchy(barangay_code, GeoLevel::Barangay)?;

        let subdivision_seq = match subdivision_id {
            Some(id) => directory.subdivision_ordinal(barangay_code, id).ok_or_else(|| {
                RegistryError::InvalidIdentifierInput(format!(
                    "subdivision {id} is not in barangay {barangay_code}"
                ))
            })?,
            None => 0,
        };
        let street_seq = match street_id {
            Some(id) => directory
                .street_ordinal(barangay_code, subdivision_id, id)
                .ok_or_else(|| {
                    RegistryError::InvalidIdentifierInput(format!(
                        "street {id} is not in barangay {barangay_code}"
                    ))
                })?,
            None => 0,
        };

        let scope = format!("{barangay_code}-{subdivision_seq:04}-{street_seq:04}");
        let mut state = self.state.lock().expect("allocator lock poisoned");

        let code = if let Some(number) = house_number {
            let digits: String = number.chars().filter(char::is_ascii_digit).collect();
            let house_seq = if digits.is_empty() {
                1
            } else {
                // trailing four digits, the fixed-width analogue of mod 10000
                digits[digits.len().saturating_sub(4)..].parse().unwrap_or(1)
            };
            let code =
                HouseholdCode::compose(barangay_code, subdivision_seq, street_seq, house_seq);
            if state.used.contains(code.as_str()) {
                return Err(RegistryError::SequenceCollision { scope });
            }
            let counter = state.counters.entry(scope).or_insert(0);
            *counter = (*counter).max(house_seq);
            code
        } else {
            let next = state.counters.get(&scope).copied().unwrap_or(0) + 1;
            let mut house_seq = next;
            while state.used.contains(
                HouseholdCode::compose(barangay_code, subdivision_seq, street_seq, house_seq)
                    .as_str(),
            ) {
                house_seq += 1;
                if house_seq > MAX_SEQUENCE {
                    return Err(RegistryError::SequenceCollision { scope });
                }
            }
            state.counters.insert(scope, house_seq);
            HouseholdCode::compose(barangay_code, subdivision_seq, street_seq, house_seq)
        };

        state.used.insert(code.as_str().to_string());
        log::debug!("generated household code {code}");
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeographicUnit;

    fn generator() -> IdentifierGenerator {
        IdentifierGenerator::new(Arc::new(GeoResolver::from_units([
            GeographicUnit::region("13", "National Capital Region"),
            GeographicUnit::independent_city("137404", "Taguig", "13"),
            GeographicUnit::barangay("137404001", "Bagumbayan", "137404"),
        ])))
    }

    #[test]
    fn test_house_number_digits_become_house_sequence() {
        let generator = generator();
        let directory = StreetDirectory::new();
        let code = generator
            .generate(&directory, "137404001", None, None, Some("123-A"))
            .unwrap();
        assert_eq!(code.as_str(), "137404001-0000-0000-0123");
        assert_eq!(code.as_str().len(), CODE_LEN);
    }

    #[test]
    fn test_house_number_without_digits_falls_back() {
        let generator = generator();
        let directory = StreetDirectory::new();
        let code = generator
            .generate(&directory, "137404001", None, None, Some("Blk A"))
            .unwrap();
        assert_eq!(code.as_str(), "137404001-0000-0000-0001");
    }

    #[test]
    fn test_overlong_house_number_keeps_trailing_digits() {
        let generator = generator();
        let directory = StreetDirectory::new();
        let code = generator
            .generate(
                &directory,
                "137404001",
                None,
                None,
                Some("123456789012345678901234"),
            )
            .unwrap();
        assert_eq!(code.as_str(), "137404001-0000-0000-1234");
    }

    #[test]
    fn test_subdivision_and_street_ordinals() {
        let generator = generator();
        let mut directory = StreetDirectory::new();
        let first_subdivision = directory.add_subdivision("137404001", "Phase 1");
        let second_subdivision = directory.add_subdivision("137404001", "Phase 2");
        let street = directory.add_street("137404001", Some(second_subdivision), "Acacia St");

        let code = generator
            .generate(
                &directory,
                "137404001",
                Some(second_subdivision),
                Some(street),
                Some("7"),
            )
            .unwrap();
        assert_eq!(code.as_str(), "137404001-0002-0001-0007");

        let code = generator
            .generate(&directory, "137404001", Some(first_subdivision), None, Some("7"))
            .unwrap();
        assert_eq!(code.as_str(), "137404001-0001-0000-0007");
    }

    #[test]
    fn test_auto_sequence_advances_past_explicit_numbers() {
        let generator = generator();
        let directory = StreetDirectory::new();
        generator
            .generate(&directory, "137404001", None, None, Some("5"))
            .unwrap();

        let auto = generator
            .generate(&directory, "137404001", None, None, None)
            .unwrap();
        assert_eq!(auto.as_str(), "137404001-0000-0000-0006");

        let next = generator
            .generate(&directory, "137404001", None, None, None)
            .unwrap();
        assert_eq!(next.as_str(), "137404001-0000-0000-0007");
    }

    #[test]
    fn test_explicit_duplicate_is_a_collision() {
        let generator = generator();
        let directory = StreetDirectory::new();
        generator
            .generate(&directory, "137404001", None, None, Some("123"))
            .unwrap();
        let err = generator
            .generate(&directory, "137404001", None, None, Some("123"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::SequenceCollision { .. }));
    }

    #[test]
    fn test_invalid_and_unknown_barangay_codes() {
        let generator = generator();
        let directory = StreetDirectory::new();
        assert!(matches!(
            generator.generate(&directory, "1374", None, None, None),
            Err(RegistryError::InvalidIdentifierInput(_))
        ));
        assert!(matches!(
            generator.generate(&directory, "999999999", None, None, None),
            Err(RegistryError::UnknownGeographicCode(_))
        ));
    }

    #[test]
    fn test_register_code_seeds_the_allocator() {
        let generator = generator();
        let directory = StreetDirectory::new();
        generator.register_code(&HouseholdCode::parse("137404001-0000-0000-0042").unwrap());

        let auto = generator
            .generate(&directory, "137404001", None, None, None)
            .unwrap();
        assert_eq!(auto.as_str(), "137404001-0000-0000-0043");
    }

    #[test]
    fn test_parse_rejects_malformed_codes() {
        assert!(HouseholdCode::parse("137404001-0000-0000-0001").is_ok());
        assert!(HouseholdCode::parse("137404001-0000-0001").is_err());
        assert!(HouseholdCode::parse("13740400A-0000-0000-0001").is_err());
        assert!(HouseholdCode::parse("137404001-000-00000-0001").is_err());
    }
}
