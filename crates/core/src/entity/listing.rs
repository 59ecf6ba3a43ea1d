//! Waste listings and the purchases made against them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    Entity, EntityKind, Validate, ValidationError, check_optional, require_positive, require_text,
};
use crate::{ListingId, ListingStatus, TransactionId, TransactionStatus, UserId};

/// A lot of textile waste offered by a factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub factory_id: UserId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Material category, e.g. "cotton" or "polyester blend".
    pub material: String,
    pub quantity_kg: Decimal,
    pub price_per_kg: Decimal,
    #[serde(default)]
    pub status: ListingStatus,
    #[serde(default)]
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    /// Asking price for the whole lot, saturating for rows that bypassed
    /// validation.
    #[must_use]
    pub fn total_value(&self) -> Decimal {
        self.quantity_kg.saturating_mul(self.price_per_kg)
    }
}

/// New listing submitted by a factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingDraft {
    pub factory_id: UserId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub material: String,
    pub quantity_kg: Decimal,
    pub price_per_kg: Decimal,
    #[serde(default)]
    pub status: ListingStatus,
    #[serde(default)]
    pub location: Option<String>,
}

/// Editable listing fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListingPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity_kg: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_per_kg: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ListingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Entity for Listing {
    type Id = ListingId;
    type Draft = ListingDraft;
    type Patch = ListingPatch;

    const KIND: EntityKind = EntityKind::Listings;

    fn id(&self) -> ListingId {
        self.id
    }
}

impl Validate for ListingDraft {
    fn validate(&self) -> Result<(), ValidationError> {
        require_text("title", &self.title)?;
        require_text("material", &self.material)?;
        require_positive("quantity_kg", self.quantity_kg)?;
        require_positive("price_per_kg", self.price_per_kg)
    }
}

impl Validate for ListingPatch {
    fn validate(&self) -> Result<(), ValidationError> {
        check_optional(self.title.as_ref(), |t| require_text("title", t))?;
        check_optional(self.material.as_ref(), |m| require_text("material", m))?;
        check_optional(self.quantity_kg.as_ref(), |q| {
            require_positive("quantity_kg", *q)
        })?;
        check_optional(self.price_per_kg.as_ref(), |p| {
            require_positive("price_per_kg", *p)
        })
    }
}

/// A purchase of (part of) a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    #[serde(default)]
    pub listing_id: Option<ListingId>,
    pub buyer_id: UserId,
    pub factory_id: UserId,
    pub material: String,
    pub quantity_kg: Decimal,
    pub amount: Decimal,
    #[serde(default)]
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

/// Purchase placed by a buyer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionDraft {
    pub listing_id: Option<ListingId>,
    pub buyer_id: UserId,
    pub factory_id: UserId,
    pub material: String,
    pub quantity_kg: Decimal,
    pub amount: Decimal,
}

/// Status change on a purchase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
}

impl Entity for Transaction {
    type Id = TransactionId;
    type Draft = TransactionDraft;
    type Patch = TransactionPatch;

    const KIND: EntityKind = EntityKind::Transactions;

    fn id(&self) -> TransactionId {
        self.id
    }
}

impl Validate for TransactionDraft {
    fn validate(&self) -> Result<(), ValidationError> {
        require_text("material", &self.material)?;
        require_positive("quantity_kg", self.quantity_kg)?;
        require_positive("amount", self.amount)
    }
}

impl Validate for TransactionPatch {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn draft() -> ListingDraft {
        ListingDraft {
            factory_id: UserId::random(),
            title: "Cotton offcuts".to_string(),
            description: None,
            material: "cotton".to_string(),
            quantity_kg: Decimal::new(1200, 0),
            price_per_kg: Decimal::new(35, 2),
            status: ListingStatus::Live,
            location: None,
        }
    }

    #[test]
    fn test_valid_draft() {
        assert!(draft().validate().is_ok());
    }

    #[test]
    fn test_draft_rejects_zero_quantity() {
        let mut d = draft();
        d.quantity_kg = Decimal::ZERO;
        assert_eq!(d.validate().unwrap_err().field, "quantity_kg");
    }

    #[test]
    fn test_draft_rejects_blank_title() {
        let mut d = draft();
        d.title = String::new();
        assert_eq!(d.validate().unwrap_err().field, "title");
    }

    #[test]
    fn test_draft_rejects_quantity_beyond_bound() {
        let mut d = draft();
        d.quantity_kg = Decimal::from_i128_with_scale(50_000_000_000_000_000_000_000_000_000, 0);
        assert_eq!(d.validate().unwrap_err().field, "quantity_kg");
    }

    #[test]
    fn test_patch_rejects_negative_price() {
        let patch = ListingPatch {
            price_per_kg: Some(Decimal::new(-1, 0)),
            ..ListingPatch::default()
        };
        assert_eq!(patch.validate().unwrap_err().field, "price_per_kg");
    }

    #[test]
    fn test_total_value() {
        let listing = Listing {
            id: ListingId::random(),
            factory_id: UserId::random(),
            title: "Denim scraps".to_string(),
            description: None,
            material: "denim".to_string(),
            quantity_kg: Decimal::new(200, 0),
            price_per_kg: Decimal::new(50, 2),
            status: ListingStatus::Live,
            location: None,
            created_at: Utc::now(),
        };
        assert_eq!(listing.total_value(), Decimal::new(100, 0));

        let huge = Listing {
            quantity_kg: Decimal::MAX,
            price_per_kg: Decimal::TWO,
            ..listing
        };
        assert_eq!(huge.total_value(), Decimal::MAX);
    }

    #[test]
    fn test_missing_status_defaults_to_pending() {
        let row = serde_json::json!({
            "id": "8d1e6b2a-1111-4a5e-9d1e-5c2b1a0f9e8d",
            "factory_id": "0b6f3a0e-7f6a-4a5e-9d1e-5c2b1a0f9e8d",
            "title": "Wool ends",
            "material": "wool",
            "quantity_kg": "40",
            "price_per_kg": "1.10",
            "created_at": "2025-03-01T10:00:00Z"
        });
        let listing: Listing = serde_json::from_value(row).unwrap();
        assert_eq!(listing.status, ListingStatus::Pending);
    }
}
