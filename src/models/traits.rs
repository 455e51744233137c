//! Trait definitions for domain models

use crate::geo::GeoChain;
use std::hash::Hash;

/// A trait that all registry entities implement.
///
/// Provides identifier access for collections and audit records.
pub trait EntityModel: Clone + Send + Sync + std::fmt::Debug {
    /// The type of identifier used for this model
    type Id: Clone + Eq + Hash + Send + Sync + std::fmt::Debug;

    /// Get the unique identifier for this model
    fn id(&self) -> &Self::Id;

    /// Create a unique key string representation of the identifier
    fn key(&self) -> String;
}

/// An entity with a denormalized geographic chain.
///
/// The chain is the input to every access-scope check, so each record carries
/// it rather than re-resolving at query time.
pub trait Locatable {
    /// The entity's barangay-through-region chain
    fn geo_chain(&self) -> &GeoChain;
}
