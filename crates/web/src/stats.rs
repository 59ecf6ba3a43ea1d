//! Marketplace statistics derived from cached collections.
//!
//! Everything here is pure: same collections and `now` in, same numbers out.
//! All arithmetic is in [`Decimal`], so no result can be NaN or infinite.
//! Sums saturate at [`Decimal::MAX`] instead of overflowing, and every ratio
//! is guarded against a zero denominator. Rounding happens only in
//! [`format_percent`].

use chrono::{DateTime, Duration, Utc};
use rewoven_core::{
    BulkRequest, BulkRequestStatus, Listing, ListingStatus, Package, Profile, Proposal,
    ProposalStatus, Report, ReportStatus, Role, Transaction, TransactionStatus, UserId,
};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

/// Length of one trend window.
pub const TREND_WINDOW_DAYS: i64 = 30;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Relative change from `previous` to `current`, in percent.
///
/// Zero when `previous` is zero, whatever `current` is.
#[must_use]
pub fn percent_change(previous: Decimal, current: Decimal) -> Decimal {
    if previous.is_zero() {
        return Decimal::ZERO;
    }
    current
        .checked_sub(previous)
        .and_then(|delta| delta.checked_div(previous))
        .and_then(|ratio| ratio.checked_mul(HUNDRED))
        .unwrap_or(Decimal::ZERO)
}

/// Sum of `values`, saturating at the `Decimal` bounds.
#[must_use]
pub fn saturating_sum(values: impl IntoIterator<Item = Decimal>) -> Decimal {
    values
        .into_iter()
        .fold(Decimal::ZERO, Decimal::saturating_add)
}

/// `part` as a percentage of `total`; zero when `total` is zero.
#[must_use]
pub fn share_of(part: Decimal, total: Decimal) -> Decimal {
    if total.is_zero() {
        return Decimal::ZERO;
    }
    part.checked_div(total)
        .and_then(|ratio| ratio.checked_mul(HUNDRED))
        .unwrap_or(Decimal::ZERO)
}

/// Render a percentage with one decimal and an explicit sign, e.g. `+12.5%`.
#[must_use]
pub fn format_percent(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero);
    let sign = if rounded.is_sign_positive() && !rounded.is_zero() {
        "+"
    } else if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    format!("{sign}{:.1}%", rounded.abs())
}

// =============================================================================
// Distribution
// =============================================================================

/// One bucket of a [`Distribution`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Share<K> {
    pub key: K,
    pub value: Decimal,
    pub percent: Decimal,
}

/// Values summed per category, with each category's share of the total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Distribution<K> {
    pub entries: Vec<Share<K>>,
    pub total: Decimal,
}

impl<K: PartialEq + Clone> Distribution<K> {
    /// Sum `items` per key.
    ///
    /// Every key in `always` gets an entry even when nothing falls into it;
    /// other keys are appended in first-seen order.
    pub fn tally(always: &[K], items: impl IntoIterator<Item = (K, Decimal)>) -> Self {
        let mut sums: Vec<(K, Decimal)> = always.iter().map(|k| (k.clone(), Decimal::ZERO)).collect();
        for (key, value) in items {
            match sums.iter_mut().find(|(k, _)| *k == key) {
                Some((_, sum)) => *sum = sum.saturating_add(value),
                None => sums.push((key, value)),
            }
        }
        let total = saturating_sum(sums.iter().map(|(_, v)| *v));
        Self {
            entries: sums
                .into_iter()
                .map(|(key, value)| Share {
                    key,
                    value,
                    percent: share_of(value, total),
                })
                .collect(),
            total,
        }
    }

    /// Count items per key.
    pub fn count(always: &[K], keys: impl IntoIterator<Item = K>) -> Self {
        Self::tally(always, keys.into_iter().map(|k| (k, Decimal::ONE)))
    }

    /// Bucket for `key`, if present.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&Share<K>> {
        self.entries.iter().find(|share| share.key == *key)
    }
}

// =============================================================================
// Trend
// =============================================================================

/// A value over the last window against the window before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Trend {
    pub current: Decimal,
    pub previous: Decimal,
    pub change_percent: Decimal,
}

impl Trend {
    #[must_use]
    pub fn new(previous: Decimal, current: Decimal) -> Self {
        Self {
            current,
            previous,
            change_percent: percent_change(previous, current),
        }
    }

    /// Sum `value` of items dated in each of the two windows ending at `now`.
    pub fn over<T>(
        items: &[T],
        now: DateTime<Utc>,
        date: impl Fn(&T) -> DateTime<Utc>,
        value: impl Fn(&T) -> Decimal,
    ) -> Self {
        let window = Duration::days(TREND_WINDOW_DAYS);
        let current_start = now - window;
        let previous_start = current_start - window;

        let mut current = Decimal::ZERO;
        let mut previous = Decimal::ZERO;
        for item in items {
            let at = date(item);
            if at >= current_start && at <= now {
                current = current.saturating_add(value(item));
            } else if at >= previous_start && at < current_start {
                previous = previous.saturating_add(value(item));
            }
        }
        Self::new(previous, current)
    }
}

// =============================================================================
// Marketplace stats
// =============================================================================

/// Collections the statistics are derived from.
#[derive(Debug, Clone, Copy)]
pub struct StatsInput<'a> {
    pub profiles: &'a [Profile],
    pub listings: &'a [Listing],
    pub transactions: &'a [Transaction],
    pub bulk_requests: &'a [BulkRequest],
    pub proposals: &'a [Proposal],
    pub packages: &'a [Package],
    pub reports: &'a [Report],
}

/// Admin dashboard figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketplaceStats {
    /// Keyed by role name; users with an unrecognized role count as `unknown`.
    pub users_by_role: Distribution<&'static str>,
    pub total_listings: usize,
    pub listing_status: Distribution<ListingStatus>,
    /// Kilograms listed per material.
    pub waste_by_material: Distribution<String>,
    /// Amount of completed transactions.
    pub revenue: Trend,
    /// Number of transactions created.
    pub transactions: Trend,
    pub transaction_status: Distribution<TransactionStatus>,
    pub open_bulk_requests: usize,
    pub pending_proposals: usize,
    pub open_reports: usize,
    pub active_packages: usize,
}

/// Role key used in [`MarketplaceStats::users_by_role`].
#[must_use]
pub fn role_key(role: Option<Role>) -> &'static str {
    role.map_or("unknown", Role::as_str)
}

/// Derive every admin figure.
#[must_use]
pub fn compute(input: &StatsInput<'_>, now: DateTime<Utc>) -> MarketplaceStats {
    let role_keys: Vec<&'static str> = Role::ALL.iter().map(|r| r.as_str()).collect();
    let completed: Vec<&Transaction> = input
        .transactions
        .iter()
        .filter(|t| t.status == TransactionStatus::Completed)
        .collect();

    MarketplaceStats {
        users_by_role: Distribution::count(
            &role_keys,
            input.profiles.iter().map(|p| role_key(p.role)),
        ),
        total_listings: input.listings.len(),
        listing_status: Distribution::count(
            ListingStatus::ALL,
            input.listings.iter().map(|l| l.status),
        ),
        waste_by_material: Distribution::tally(
            &[],
            input
                .listings
                .iter()
                .map(|l| (normalize_material(&l.material), l.quantity_kg)),
        ),
        revenue: Trend::over(&completed, now, |t| t.created_at, |t| t.amount),
        transactions: Trend::over(input.transactions, now, |t| t.created_at, |_| Decimal::ONE),
        transaction_status: Distribution::count(
            TransactionStatus::ALL,
            input.transactions.iter().map(|t| t.status),
        ),
        open_bulk_requests: input
            .bulk_requests
            .iter()
            .filter(|b| b.status == BulkRequestStatus::Open)
            .count(),
        pending_proposals: input
            .proposals
            .iter()
            .filter(|p| p.status == ProposalStatus::Pending)
            .count(),
        open_reports: input
            .reports
            .iter()
            .filter(|r| r.status == ReportStatus::Open)
            .count(),
        active_packages: input.packages.iter().filter(|p| p.is_active).count(),
    }
}

/// Group materials case-insensitively ("Cotton " and "cotton" are one bucket).
fn normalize_material(material: &str) -> String {
    let trimmed = material.trim();
    if trimmed.is_empty() {
        return "other".to_string();
    }
    trimmed.to_lowercase()
}

// =============================================================================
// Role summaries
// =============================================================================

/// Factory dashboard figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactorySummary {
    pub listing_status: Distribution<ListingStatus>,
    pub listed_kg: Decimal,
    pub sold_kg: Decimal,
    pub revenue: Trend,
    pub pending_orders: usize,
}

impl FactorySummary {
    /// Figures for `factory` over its own listings and sales.
    #[must_use]
    pub fn compute(
        factory: UserId,
        listings: &[Listing],
        transactions: &[Transaction],
        now: DateTime<Utc>,
    ) -> Self {
        let own: Vec<&Listing> = listings.iter().filter(|l| l.factory_id == factory).collect();
        let sales: Vec<&Transaction> = transactions
            .iter()
            .filter(|t| t.factory_id == factory)
            .collect();
        let completed: Vec<&Transaction> = sales
            .iter()
            .copied()
            .filter(|t| t.status == TransactionStatus::Completed)
            .collect();

        Self {
            listing_status: Distribution::count(ListingStatus::ALL, own.iter().map(|l| l.status)),
            listed_kg: saturating_sum(own.iter().map(|l| l.quantity_kg)),
            sold_kg: saturating_sum(completed.iter().map(|t| t.quantity_kg)),
            revenue: Trend::over(&completed, now, |t| t.created_at, |t| t.amount),
            pending_orders: sales
                .iter()
                .filter(|t| t.status == TransactionStatus::Pending)
                .count(),
        }
    }
}

/// Buyer dashboard figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuyerSummary {
    pub orders: Distribution<TransactionStatus>,
    pub spent: Trend,
    pub purchased_kg: Decimal,
    pub open_bulk_requests: usize,
}

impl BuyerSummary {
    /// Figures for `buyer` over its own orders and bulk requests.
    #[must_use]
    pub fn compute(
        buyer: UserId,
        transactions: &[Transaction],
        bulk_requests: &[BulkRequest],
        now: DateTime<Utc>,
    ) -> Self {
        let orders: Vec<&Transaction> = transactions.iter().filter(|t| t.buyer_id == buyer).collect();
        let completed: Vec<&Transaction> = orders
            .iter()
            .copied()
            .filter(|t| t.status == TransactionStatus::Completed)
            .collect();

        Self {
            orders: Distribution::count(TransactionStatus::ALL, orders.iter().map(|t| t.status)),
            spent: Trend::over(&completed, now, |t| t.created_at, |t| t.amount),
            purchased_kg: saturating_sum(completed.iter().map(|t| t.quantity_kg)),
            open_bulk_requests: bulk_requests
                .iter()
                .filter(|b| b.buyer_id == buyer && b.status == BulkRequestStatus::Open)
                .count(),
        }
    }
}
