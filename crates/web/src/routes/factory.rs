//! Factory (seller) routes.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
};
use chrono::Utc;
use rewoven_core::{
    BulkRequest, BulkRequestId, BulkRequestStatus, Listing, ListingDraft, ListingId, ListingPatch,
    ListingStatus, Proposal, ProposalDraft, Transaction, Validate,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::view::{CollectionView, Freshness, load};
use crate::error::{AppError, Result};
use crate::guard::{FactoryOnly, Guarded};
use crate::query::ListingQuery;
use crate::state::AppState;
use crate::stats::{FactorySummary, format_percent};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(dashboard))
        .route("/listings", get(listings).post(create_listing))
        .route("/listings/{id}", patch(update_listing).delete(delete_listing))
        .route("/orders", get(orders))
        .route("/bulk-requests", get(bulk_requests))
        .route("/proposals", get(proposals).post(create_proposal))
}

/// Own listings and sales at a glance.
#[derive(Debug, Serialize)]
pub struct FactoryDashboard {
    pub display_name: String,
    pub summary: FactorySummary,
    pub revenue_change: String,
}

#[instrument(skip_all, fields(user_id = %guard.user.id))]
async fn dashboard(guard: Guarded<FactoryOnly>) -> Result<Json<FactoryDashboard>> {
    let (listings, transactions) = tokio::try_join!(
        guard.cache.fetch::<Listing>(),
        guard.cache.fetch::<Transaction>(),
    )?;
    let summary = FactorySummary::compute(
        guard.user.id,
        listings.items(),
        transactions.items(),
        Utc::now(),
    );
    Ok(Json(FactoryDashboard {
        display_name: guard.user.display_name,
        revenue_change: format_percent(summary.revenue.change_percent),
        summary,
    }))
}

// =============================================================================
// Listings
// =============================================================================

/// New listing as submitted by the factory; the owner comes from the session.
#[derive(Debug, Deserialize)]
pub struct ListingForm {
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

async fn listings(
    guard: Guarded<FactoryOnly>,
    Query(query): Query<ListingQuery>,
    Query(fresh): Query<Freshness>,
) -> Result<Json<CollectionView<Listing>>> {
    let loaded = load::<Listing>(&guard.cache, fresh.refresh).await?;
    let own = loaded
        .collection
        .items()
        .iter()
        .filter(|l| l.factory_id == guard.user.id);
    Ok(Json(loaded.view(query.apply(own))))
}

#[instrument(skip(guard, form), fields(user_id = %guard.user.id))]
async fn create_listing(
    guard: Guarded<FactoryOnly>,
    Json(form): Json<ListingForm>,
) -> Result<(StatusCode, Json<Listing>)> {
    let draft = ListingDraft {
        factory_id: guard.user.id,
        title: form.title,
        description: form.description,
        material: form.material,
        quantity_kg: form.quantity_kg,
        price_per_kg: form.price_per_kg,
        status: form.status,
        location: form.location,
    };
    draft.validate()?;
    let listing = guard.cache.add::<Listing>(draft).await?;
    info!(listing_id = %listing.id, "Listing created");
    Ok((StatusCode::CREATED, Json(listing)))
}

#[instrument(skip(guard, patch), fields(user_id = %guard.user.id))]
async fn update_listing(
    guard: Guarded<FactoryOnly>,
    Path(id): Path<ListingId>,
    Json(patch): Json<ListingPatch>,
) -> Result<Json<Listing>> {
    patch.validate()?;
    ensure_owned(&guard, id).await?;
    Ok(Json(guard.cache.update::<Listing>(id, patch).await?))
}

#[instrument(skip(guard), fields(user_id = %guard.user.id))]
async fn delete_listing(guard: Guarded<FactoryOnly>, Path(id): Path<ListingId>) -> Result<StatusCode> {
    ensure_owned(&guard, id).await?;
    guard.cache.delete::<Listing>(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn ensure_owned(guard: &Guarded<FactoryOnly>, id: ListingId) -> Result<()> {
    let listings = guard.cache.fetch::<Listing>().await?;
    match listings.get(id) {
        None => Err(AppError::NotFound(format!("listing {id}"))),
        Some(listing) if listing.factory_id != guard.user.id => {
            Err(AppError::Forbidden(format!("listing {id} belongs to another factory")))
        }
        Some(_) => Ok(()),
    }
}

// =============================================================================
// Orders and sourcing
// =============================================================================

async fn orders(
    guard: Guarded<FactoryOnly>,
    Query(fresh): Query<Freshness>,
) -> Result<Json<CollectionView<Transaction>>> {
    let loaded = load::<Transaction>(&guard.cache, fresh.refresh).await?;
    Ok(Json(loaded.filtered(|t| t.factory_id == guard.user.id)))
}

/// A bulk request visible to the factory.
#[derive(Debug, Serialize)]
pub struct FactoryBulkRequest {
    #[serde(flatten)]
    pub request: BulkRequest,
    pub assigned_to_me: bool,
}

/// Open requests plus every request an admin routed to this factory.
async fn bulk_requests(
    State(state): State<AppState>,
    guard: Guarded<FactoryOnly>,
    Query(fresh): Query<Freshness>,
) -> Result<Json<CollectionView<FactoryBulkRequest>>> {
    let loaded = load::<BulkRequest>(&guard.cache, fresh.refresh).await?;
    let assigned = state.assignments().assigned_to(guard.user.id).await?;
    let rows = loaded
        .collection
        .items()
        .iter()
        .filter_map(|request| {
            let assigned_to_me = assigned.contains(&request.id);
            (assigned_to_me || request.status == BulkRequestStatus::Open).then(|| {
                FactoryBulkRequest {
                    request: request.clone(),
                    assigned_to_me,
                }
            })
        })
        .collect();
    Ok(Json(loaded.view(rows)))
}

/// A proposal as submitted by the factory.
#[derive(Debug, Deserialize)]
pub struct ProposalForm {
    pub bulk_request_id: BulkRequestId,
    pub price_per_kg: Decimal,
    pub quantity_kg: Decimal,
    #[serde(default)]
    pub message: Option<String>,
}

async fn proposals(
    guard: Guarded<FactoryOnly>,
    Query(fresh): Query<Freshness>,
) -> Result<Json<CollectionView<Proposal>>> {
    let loaded = load::<Proposal>(&guard.cache, fresh.refresh).await?;
    Ok(Json(loaded.filtered(|p| p.factory_id == guard.user.id)))
}

#[instrument(skip(guard, form), fields(user_id = %guard.user.id, bulk_request_id = %form.bulk_request_id))]
async fn create_proposal(
    guard: Guarded<FactoryOnly>,
    Json(form): Json<ProposalForm>,
) -> Result<(StatusCode, Json<Proposal>)> {
    let draft = ProposalDraft {
        bulk_request_id: form.bulk_request_id,
        factory_id: guard.user.id,
        price_per_kg: form.price_per_kg,
        quantity_kg: form.quantity_kg,
        message: form.message,
    };
    draft.validate()?;

    let requests = guard.cache.fetch::<BulkRequest>().await?;
    match requests.get(form.bulk_request_id) {
        None => {
            return Err(AppError::NotFound(format!(
                "bulk request {}",
                form.bulk_request_id
            )));
        }
        Some(request) if request.status != BulkRequestStatus::Open => {
            return Err(AppError::BadRequest(
                "bulk request is no longer open".to_string(),
            ));
        }
        Some(_) => {}
    }

    let proposal = guard.cache.add::<Proposal>(draft).await?;
    Ok((StatusCode::CREATED, Json(proposal)))
}
