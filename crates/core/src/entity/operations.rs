//! Marketplace operations: subscription packages and user reports.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    Entity, EntityKind, Validate, ValidationError, check_optional, require_bounded, require_text,
};
use crate::{ListingId, PackageId, ReportId, ReportStatus, UserId};

const fn default_true() -> bool {
    true
}

/// A paid plan factories subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    pub duration_days: u32,
    /// Maximum concurrent live listings; `None` means unlimited.
    #[serde(default)]
    pub listing_limit: Option<u32>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    pub duration_days: u32,
    #[serde(default)]
    pub listing_limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackagePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl Entity for Package {
    type Id = PackageId;
    type Draft = PackageDraft;
    type Patch = PackagePatch;

    const KIND: EntityKind = EntityKind::Packages;

    fn id(&self) -> PackageId {
        self.id
    }
}

fn require_non_negative(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() {
        return Err(ValidationError {
            field,
            reason: "must not be negative",
        });
    }
    require_bounded(field, value)
}

fn require_days(value: u32) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError {
            field: "duration_days",
            reason: "must be at least one day",
        });
    }
    Ok(())
}

impl Validate for PackageDraft {
    fn validate(&self) -> Result<(), ValidationError> {
        require_text("name", &self.name)?;
        require_non_negative("price", self.price)?;
        require_days(self.duration_days)
    }
}

impl Validate for PackagePatch {
    fn validate(&self) -> Result<(), ValidationError> {
        check_optional(self.name.as_ref(), |n| require_text("name", n))?;
        check_optional(self.price.as_ref(), |p| require_non_negative("price", *p))?;
        check_optional(self.duration_days.as_ref(), |d| require_days(*d))
    }
}

/// A complaint filed by a user, optionally about a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub reporter_id: UserId,
    pub subject: String,
    /// Free-form category, e.g. "quality" or "fraud".
    pub category: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub listing_id: Option<ListingId>,
    #[serde(default)]
    pub status: ReportStatus,
    #[serde(default)]
    pub resolution_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportDraft {
    pub reporter_id: UserId,
    pub subject: String,
    pub category: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub listing_id: Option<ListingId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReportStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_note: Option<String>,
}

impl Entity for Report {
    type Id = ReportId;
    type Draft = ReportDraft;
    type Patch = ReportPatch;

    const KIND: EntityKind = EntityKind::Reports;

    fn id(&self) -> ReportId {
        self.id
    }
}

impl Validate for ReportDraft {
    fn validate(&self) -> Result<(), ValidationError> {
        require_text("subject", &self.subject)?;
        require_text("category", &self.category)
    }
}

impl Validate for ReportPatch {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}
