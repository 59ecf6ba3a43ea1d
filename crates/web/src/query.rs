//! Listing filter and sort query parameters.

use rewoven_core::{Listing, ListingStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

/// Deserialize empty strings as None for optional fields.
fn empty_string_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// How a listing table is ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListingSort {
    #[default]
    Newest,
    Oldest,
    PriceAsc,
    PriceDesc,
    QuantityDesc,
}

impl ListingSort {
    /// Parse from URL parameter value.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "oldest" => Self::Oldest,
            "price-ascending" | "price_asc" => Self::PriceAsc,
            "price-descending" | "price_desc" => Self::PriceDesc,
            "quantity" | "quantity-descending" => Self::QuantityDesc,
            _ => Self::Newest,
        }
    }

    /// Convert to URL parameter value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::Oldest => "oldest",
            Self::PriceAsc => "price-ascending",
            Self::PriceDesc => "price-descending",
            Self::QuantityDesc => "quantity-descending",
        }
    }
}

/// Listing table query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ListingQuery {
    /// Case-insensitive match on title, material and location.
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub material: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub status: Option<ListingStatusParam>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub min_kg: Option<Decimal>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub max_price: Option<Decimal>,
    #[serde(default)]
    pub sort: String,
}

/// `ListingStatus` parsed from its wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingStatusParam(pub ListingStatus);

impl std::str::FromStr for ListingStatusParam {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ListingStatus::ALL
            .iter()
            .copied()
            .find(|status| status.label().eq_ignore_ascii_case(s))
            .map(Self)
            .ok_or_else(|| format!("unknown listing status '{s}'"))
    }
}

impl ListingQuery {
    /// Whether `listing` passes every filter.
    #[must_use]
    pub fn matches(&self, listing: &Listing) -> bool {
        let q = self.q.trim().to_lowercase();
        if !q.is_empty() {
            let haystacks = [
                Some(listing.title.as_str()),
                Some(listing.material.as_str()),
                listing.location.as_deref(),
            ];
            if !haystacks
                .iter()
                .flatten()
                .any(|h| h.to_lowercase().contains(&q))
            {
                return false;
            }
        }
        let material = self.material.trim();
        if !material.is_empty() && !listing.material.trim().eq_ignore_ascii_case(material) {
            return false;
        }
        if self.status.is_some_and(|ListingStatusParam(s)| listing.status != s) {
            return false;
        }
        if self.min_kg.is_some_and(|min| listing.quantity_kg < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| listing.price_per_kg > max) {
            return false;
        }
        true
    }

    /// Filter and order `listings`.
    #[must_use]
    pub fn apply<'a>(&self, listings: impl IntoIterator<Item = &'a Listing>) -> Vec<Listing> {
        let mut selected: Vec<Listing> = listings
            .into_iter()
            .filter(|l| self.matches(l))
            .cloned()
            .collect();
        match ListingSort::parse(&self.sort) {
            ListingSort::Newest => selected.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            ListingSort::Oldest => selected.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            ListingSort::PriceAsc => selected.sort_by(|a, b| a.price_per_kg.cmp(&b.price_per_kg)),
            ListingSort::PriceDesc => selected.sort_by(|a, b| b.price_per_kg.cmp(&a.price_per_kg)),
            ListingSort::QuantityDesc => {
                selected.sort_by(|a, b| b.quantity_kg.cmp(&a.quantity_kg));
            }
        }
        selected
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration, Utc};
    use rewoven_core::{ListingId, UserId};

    use super::*;

    fn listing(title: &str, material: &str, kg: i64, price: i64, days_ago: i64) -> Listing {
        Listing {
            id: ListingId::random(),
            factory_id: UserId::random(),
            title: title.to_string(),
            description: None,
            material: material.to_string(),
            quantity_kg: Decimal::from(kg),
            price_per_kg: Decimal::from(price),
            status: ListingStatus::Live,
            location: Some("Tiruppur".to_string()),
            created_at: Utc::now() - Duration::days(days_ago),
        }
    }

    fn titles(listings: &[Listing]) -> Vec<&str> {
        listings.iter().map(|l| l.title.as_str()).collect()
    }

    #[test]
    fn test_sort_parse_roundtrip_and_default() {
        for sort in [
            ListingSort::Newest,
            ListingSort::Oldest,
            ListingSort::PriceAsc,
            ListingSort::PriceDesc,
            ListingSort::QuantityDesc,
        ] {
            assert_eq!(ListingSort::parse(sort.as_str()), sort);
        }
        assert_eq!(ListingSort::parse("whatever"), ListingSort::Newest);
    }

    #[test]
    fn test_default_query_keeps_all_newest_first() {
        let listings = vec![listing("old", "cotton", 5, 2, 10), listing("new", "denim", 5, 2, 1)];
        let out = ListingQuery::default().apply(&listings);
        assert_eq!(titles(&out), ["new", "old"]);
    }

    #[test]
    fn test_filters_combine() {
        let listings = vec![
            listing("Cotton offcuts", "cotton", 500, 2, 1),
            listing("Cotton scraps", "cotton", 50, 2, 2),
            listing("Denim waste", "denim", 800, 3, 3),
        ];
        let query = ListingQuery {
            material: "COTTON".to_string(),
            min_kg: Some(Decimal::from(100)),
            ..ListingQuery::default()
        };
        assert_eq!(titles(&query.apply(&listings)), ["Cotton offcuts"]);
    }

    #[test]
    fn test_text_search_covers_location() {
        let listings = vec![listing("Offcuts", "wool", 1, 1, 1)];
        let query = ListingQuery {
            q: "tirup".to_string(),
            ..ListingQuery::default()
        };
        assert_eq!(query.apply(&listings).len(), 1);
    }

    #[test]
    fn test_price_sort() {
        let listings = vec![
            listing("mid", "a", 1, 5, 1),
            listing("cheap", "a", 1, 1, 1),
            listing("dear", "a", 1, 9, 1),
        ];
        let query = ListingQuery {
            sort: "price-ascending".to_string(),
            ..ListingQuery::default()
        };
        assert_eq!(titles(&query.apply(&listings)), ["cheap", "mid", "dear"]);
    }

    #[test]
    fn test_status_param_parses_case_insensitively() {
        assert_eq!(
            "sold".parse::<ListingStatusParam>().unwrap(),
            ListingStatusParam(ListingStatus::Sold)
        );
        assert!("archived".parse::<ListingStatusParam>().is_err());
    }
}
