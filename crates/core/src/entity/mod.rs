//! Marketplace entities.
//!
//! Each entity mirrors one backend table and names its own create payload
//! (`Draft`) and partial update payload (`Patch`). The web crate's cache layer
//! is generic over [`Entity`], so the seven kinds share one implementation.

mod listing;
mod operations;
mod profile;
mod sourcing;

use core::fmt;
use std::hash::Hash;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use listing::{Listing, ListingDraft, ListingPatch, Transaction, TransactionDraft, TransactionPatch};
pub use operations::{Package, PackageDraft, PackagePatch, Report, ReportDraft, ReportPatch};
pub use profile::{Profile, ProfileDraft, ProfilePatch};
pub use sourcing::{
    BulkRequest, BulkRequestDraft, BulkRequestPatch, Proposal, ProposalDraft, ProposalPatch,
};

/// The kinds of collections held by the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Users,
    Listings,
    Transactions,
    BulkRequests,
    Proposals,
    Packages,
    Reports,
}

impl EntityKind {
    /// Every kind.
    pub const ALL: [Self; 7] = [
        Self::Users,
        Self::Listings,
        Self::Transactions,
        Self::BulkRequests,
        Self::Proposals,
        Self::Packages,
        Self::Reports,
    ];

    /// Backend table holding this kind.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Users => "profiles",
            Self::Listings => "listings",
            Self::Transactions => "transactions",
            Self::BulkRequests => "bulk_requests",
            Self::Proposals => "proposals",
            Self::Packages => "packages",
            Self::Reports => "reports",
        }
    }

    /// Short name used in logs and cache keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Listings => "listings",
            Self::Transactions => "transactions",
            Self::BulkRequests => "bulk_requests",
            Self::Proposals => "proposals",
            Self::Packages => "packages",
            Self::Reports => "reports",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of one of the marketplace tables.
pub trait Entity:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Typed primary key.
    type Id: Copy
        + Eq
        + Hash
        + fmt::Debug
        + fmt::Display
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// Payload sent to create a row.
    type Draft: Serialize + Validate + Send + Sync + 'static;

    /// Payload sent to partially update a row.
    type Patch: Serialize + Validate + Send + Sync + 'static;

    /// Collection this entity belongs to.
    const KIND: EntityKind;

    /// Primary key of this row.
    fn id(&self) -> Self::Id;
}

/// Form validation failure on a draft or patch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    /// Offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub reason: &'static str,
}

/// Client-side validation of outgoing payloads.
pub trait Validate {
    /// Check the payload before it is sent to the backend.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field.
    fn validate(&self) -> Result<(), ValidationError>;
}

pub(crate) fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError {
            field,
            reason: "must not be empty",
        });
    }
    Ok(())
}

/// Largest quantity, price or amount accepted in a payload (one trillion).
///
/// Keeps products and sums of accepted values far below [`Decimal::MAX`].
pub const MAX_MAGNITUDE: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);

pub(crate) fn require_positive(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value <= Decimal::ZERO {
        return Err(ValidationError {
            field,
            reason: "must be greater than zero",
        });
    }
    require_bounded(field, value)
}

pub(crate) fn require_bounded(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value > MAX_MAGNITUDE {
        return Err(ValidationError {
            field,
            reason: "must not exceed one trillion",
        });
    }
    Ok(())
}

pub(crate) fn check_optional<T>(
    value: Option<&T>,
    check: impl FnOnce(&T) -> Result<(), ValidationError>,
) -> Result<(), ValidationError> {
    value.map_or(Ok(()), check)
}
