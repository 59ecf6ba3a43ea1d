//! Bulk sourcing: buyer requests and factory proposals.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    Entity, EntityKind, Validate, ValidationError, check_optional, require_positive, require_text,
};
use crate::{BulkRequestId, BulkRequestStatus, ProposalId, ProposalStatus, UserId};

/// A buyer asking the market for a quantity of some material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRequest {
    pub id: BulkRequestId,
    pub buyer_id: UserId,
    pub material: String,
    pub quantity_kg: Decimal,
    #[serde(default)]
    pub max_price_per_kg: Option<Decimal>,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: BulkRequestStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkRequestDraft {
    pub buyer_id: UserId,
    pub material: String,
    pub quantity_kg: Decimal,
    #[serde(default)]
    pub max_price_per_kg: Option<Decimal>,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkRequestPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BulkRequestStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity_kg: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price_per_kg: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Entity for BulkRequest {
    type Id = BulkRequestId;
    type Draft = BulkRequestDraft;
    type Patch = BulkRequestPatch;

    const KIND: EntityKind = EntityKind::BulkRequests;

    fn id(&self) -> BulkRequestId {
        self.id
    }
}

impl Validate for BulkRequestDraft {
    fn validate(&self) -> Result<(), ValidationError> {
        require_text("material", &self.material)?;
        require_positive("quantity_kg", self.quantity_kg)?;
        check_optional(self.max_price_per_kg.as_ref(), |p| {
            require_positive("max_price_per_kg", *p)
        })
    }
}

impl Validate for BulkRequestPatch {
    fn validate(&self) -> Result<(), ValidationError> {
        check_optional(self.quantity_kg.as_ref(), |q| {
            require_positive("quantity_kg", *q)
        })?;
        check_optional(self.max_price_per_kg.as_ref(), |p| {
            require_positive("max_price_per_kg", *p)
        })
    }
}

/// A factory's offer to fill a bulk request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub bulk_request_id: BulkRequestId,
    pub factory_id: UserId,
    pub price_per_kg: Decimal,
    pub quantity_kg: Decimal,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalDraft {
    pub bulk_request_id: BulkRequestId,
    pub factory_id: UserId,
    pub price_per_kg: Decimal,
    pub quantity_kg: Decimal,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProposalStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_per_kg: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Entity for Proposal {
    type Id = ProposalId;
    type Draft = ProposalDraft;
    type Patch = ProposalPatch;

    const KIND: EntityKind = EntityKind::Proposals;

    fn id(&self) -> ProposalId {
        self.id
    }
}

impl Validate for ProposalDraft {
    fn validate(&self) -> Result<(), ValidationError> {
        require_positive("price_per_kg", self.price_per_kg)?;
        require_positive("quantity_kg", self.quantity_kg)
    }
}

impl Validate for ProposalPatch {
    fn validate(&self) -> Result<(), ValidationError> {
        check_optional(self.price_per_kg.as_ref(), |p| {
            require_positive("price_per_kg", *p)
        })
    }
}
