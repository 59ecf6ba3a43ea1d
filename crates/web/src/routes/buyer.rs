//! Buyer routes.

use std::collections::HashSet;

use axum::{
    Json, Router,
    extract::{Path, Query},
    http::StatusCode,
    routing::{get, patch, post},
};
use chrono::{NaiveDate, Utc};
use rewoven_core::{
    BulkRequest, BulkRequestDraft, BulkRequestId, BulkRequestPatch, BulkRequestStatus, Listing,
    ListingId, ListingStatus, Proposal, ProposalId, ProposalPatch, ProposalStatus, Report,
    ReportDraft, Transaction, TransactionDraft, Validate,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::view::{CollectionView, Freshness, load};
use crate::error::{AppError, Result};
use crate::guard::{BuyerOnly, Guarded};
use crate::query::ListingQuery;
use crate::state::AppState;
use crate::stats::{BuyerSummary, format_percent};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(dashboard))
        .route("/listings", get(listings))
        .route("/orders", get(orders).post(place_order))
        .route("/bulk-requests", get(bulk_requests).post(create_bulk_request))
        .route("/proposals", get(proposals))
        .route("/proposals/{id}", patch(decide_proposal))
        .route("/reports", post(file_report))
}

/// Purchases at a glance.
#[derive(Debug, Serialize)]
pub struct BuyerDashboard {
    pub display_name: String,
    pub summary: BuyerSummary,
    pub spent_change: String,
}

#[instrument(skip_all, fields(user_id = %guard.user.id))]
async fn dashboard(guard: Guarded<BuyerOnly>) -> Result<Json<BuyerDashboard>> {
    let (transactions, bulk_requests) = tokio::try_join!(
        guard.cache.fetch::<Transaction>(),
        guard.cache.fetch::<BulkRequest>(),
    )?;
    let summary = BuyerSummary::compute(
        guard.user.id,
        transactions.items(),
        bulk_requests.items(),
        Utc::now(),
    );
    Ok(Json(BuyerDashboard {
        display_name: guard.user.display_name,
        spent_change: format_percent(summary.spent.change_percent),
        summary,
    }))
}

/// Live listings only.
async fn listings(
    guard: Guarded<BuyerOnly>,
    Query(query): Query<ListingQuery>,
    Query(fresh): Query<Freshness>,
) -> Result<Json<CollectionView<Listing>>> {
    let loaded = load::<Listing>(&guard.cache, fresh.refresh).await?;
    let live = loaded
        .collection
        .items()
        .iter()
        .filter(|l| l.status == ListingStatus::Live);
    Ok(Json(loaded.view(query.apply(live))))
}

// =============================================================================
// Orders
// =============================================================================

/// Purchase of part or all of a live listing.
#[derive(Debug, Deserialize)]
pub struct OrderForm {
    pub listing_id: ListingId,
    pub quantity_kg: Decimal,
}

async fn orders(
    guard: Guarded<BuyerOnly>,
    Query(fresh): Query<Freshness>,
) -> Result<Json<CollectionView<Transaction>>> {
    let loaded = load::<Transaction>(&guard.cache, fresh.refresh).await?;
    Ok(Json(loaded.filtered(|t| t.buyer_id == guard.user.id)))
}

#[instrument(skip(guard, form), fields(user_id = %guard.user.id, listing_id = %form.listing_id))]
async fn place_order(
    guard: Guarded<BuyerOnly>,
    Json(form): Json<OrderForm>,
) -> Result<(StatusCode, Json<Transaction>)> {
    let listings = guard.cache.fetch::<Listing>().await?;
    let listing = listings
        .get(form.listing_id)
        .ok_or_else(|| AppError::NotFound(format!("listing {}", form.listing_id)))?;
    if listing.status != ListingStatus::Live {
        return Err(AppError::BadRequest("listing is not for sale".to_string()));
    }
    if form.quantity_kg > listing.quantity_kg {
        return Err(AppError::BadRequest(format!(
            "only {} kg available",
            listing.quantity_kg
        )));
    }

    let amount = form
        .quantity_kg
        .checked_mul(listing.price_per_kg)
        .ok_or_else(|| AppError::BadRequest("order amount is out of range".to_string()))?;

    let draft = TransactionDraft {
        listing_id: Some(listing.id),
        buyer_id: guard.user.id,
        factory_id: listing.factory_id,
        material: listing.material.clone(),
        quantity_kg: form.quantity_kg,
        amount,
    };
    draft.validate()?;
    let order = guard.cache.add::<Transaction>(draft).await?;
    info!(transaction_id = %order.id, "Order placed");
    Ok((StatusCode::CREATED, Json(order)))
}

// =============================================================================
// Bulk requests and proposals
// =============================================================================

/// A sourcing request as submitted by the buyer.
#[derive(Debug, Deserialize)]
pub struct BulkRequestForm {
    pub material: String,
    pub quantity_kg: Decimal,
    #[serde(default)]
    pub max_price_per_kg: Option<Decimal>,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

async fn bulk_requests(
    guard: Guarded<BuyerOnly>,
    Query(fresh): Query<Freshness>,
) -> Result<Json<CollectionView<BulkRequest>>> {
    let loaded = load::<BulkRequest>(&guard.cache, fresh.refresh).await?;
    Ok(Json(loaded.filtered(|b| b.buyer_id == guard.user.id)))
}

#[instrument(skip(guard, form), fields(user_id = %guard.user.id))]
async fn create_bulk_request(
    guard: Guarded<BuyerOnly>,
    Json(form): Json<BulkRequestForm>,
) -> Result<(StatusCode, Json<BulkRequest>)> {
    let draft = BulkRequestDraft {
        buyer_id: guard.user.id,
        material: form.material,
        quantity_kg: form.quantity_kg,
        max_price_per_kg: form.max_price_per_kg,
        deadline: form.deadline,
        notes: form.notes,
    };
    draft.validate()?;
    let request = guard.cache.add::<BulkRequest>(draft).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn own_request_ids(guard: &Guarded<BuyerOnly>) -> Result<HashSet<BulkRequestId>> {
    let requests = guard.cache.fetch::<BulkRequest>().await?;
    Ok(requests
        .items()
        .iter()
        .filter(|b| b.buyer_id == guard.user.id)
        .map(|b| b.id)
        .collect())
}

/// Proposals made on the buyer's own bulk requests.
async fn proposals(
    guard: Guarded<BuyerOnly>,
    Query(fresh): Query<Freshness>,
) -> Result<Json<CollectionView<Proposal>>> {
    let own = own_request_ids(&guard).await?;
    let loaded = load::<Proposal>(&guard.cache, fresh.refresh).await?;
    Ok(Json(loaded.filtered(|p| own.contains(&p.bulk_request_id))))
}

/// Accept or reject a proposal.
#[derive(Debug, Deserialize)]
pub struct ProposalDecision {
    pub status: ProposalStatus,
}

/// Decide a pending proposal. Accepting one marks its bulk request matched.
#[instrument(skip(guard), fields(user_id = %guard.user.id))]
async fn decide_proposal(
    guard: Guarded<BuyerOnly>,
    Path(id): Path<ProposalId>,
    Json(decision): Json<ProposalDecision>,
) -> Result<Json<Proposal>> {
    if decision.status == ProposalStatus::Pending {
        return Err(AppError::BadRequest(
            "a decision must accept or reject".to_string(),
        ));
    }

    let own = own_request_ids(&guard).await?;
    let proposals = guard.cache.fetch::<Proposal>().await?;
    let proposal = proposals
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("proposal {id}")))?;
    if !own.contains(&proposal.bulk_request_id) {
        return Err(AppError::Forbidden(format!(
            "proposal {id} is on another buyer's request"
        )));
    }
    if proposal.status != ProposalStatus::Pending {
        return Err(AppError::BadRequest("proposal was already decided".to_string()));
    }
    let bulk_request_id = proposal.bulk_request_id;

    let patch = ProposalPatch {
        status: Some(decision.status),
        ..ProposalPatch::default()
    };
    let decided = guard.cache.update::<Proposal>(id, patch).await?;

    if decided.status == ProposalStatus::Accepted {
        let matched = BulkRequestPatch {
            status: Some(BulkRequestStatus::Matched),
            ..BulkRequestPatch::default()
        };
        // The proposal is already accepted; a failure here only leaves the
        // request open for the buyer to close by hand.
        if let Err(e) = guard.cache.update::<BulkRequest>(bulk_request_id, matched).await {
            warn!(error = %e, %bulk_request_id, "Failed to mark bulk request matched");
        }
    }
    Ok(Json(decided))
}

// =============================================================================
// Reports
// =============================================================================

/// A report about a listing or about the marketplace in general.
#[derive(Debug, Deserialize)]
pub struct ReportForm {
    pub subject: String,
    pub category: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub listing_id: Option<ListingId>,
}

#[instrument(skip(guard, form), fields(user_id = %guard.user.id))]
async fn file_report(
    guard: Guarded<BuyerOnly>,
    Json(form): Json<ReportForm>,
) -> Result<(StatusCode, Json<Report>)> {
    let draft = ReportDraft {
        reporter_id: guard.user.id,
        subject: form.subject,
        category: form.category,
        details: form.details,
        listing_id: form.listing_id,
    };
    draft.validate()?;
    let report = guard.cache.add::<Report>(draft).await?;
    Ok((StatusCode::CREATED, Json(report)))
}
