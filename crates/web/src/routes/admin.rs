//! Administrator routes.
//!
//! Admins see every row of every table and may moderate listings, reports and
//! subscription packages.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch, put},
};
use chrono::Utc;
use rewoven_core::{
    BulkRequest, BulkRequestId, BulkRequestStatus, Listing, ListingId, Package, PackageDraft,
    PackageId, PackagePatch, Profile, Report, ReportId, ReportPatch, Role, Transaction, UserId,
    Validate,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::view::{CollectionView, Freshness, load};
use crate::error::{AppError, Result};
use crate::guard::{AdminOnly, Guarded};
use crate::query::ListingQuery;
use crate::state::AppState;
use crate::stats::{MarketplaceStats, format_percent};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(dashboard))
        .route("/users", get(users))
        .route("/listings", get(listings))
        .route("/listings/{id}", delete(delete_listing))
        .route("/transactions", get(transactions))
        .route("/bulk-requests", get(bulk_requests))
        .route(
            "/bulk-requests/{id}/assignment",
            put(assign_bulk_request).delete(unassign_bulk_request),
        )
        .route("/reports", get(reports))
        .route("/reports/{id}", patch(update_report))
        .route("/packages", get(packages).post(create_package))
        .route("/packages/{id}", patch(update_package).delete(delete_package))
}

// =============================================================================
// Dashboard
// =============================================================================

/// Marketplace statistics with presentation-ready trend labels.
#[derive(Debug, Serialize)]
pub struct AdminDashboard {
    pub stats: MarketplaceStats,
    pub revenue_change: String,
    pub transactions_change: String,
}

#[instrument(skip_all, fields(user_id = %guard.user.id))]
async fn dashboard(guard: Guarded<AdminOnly>) -> Result<Json<AdminDashboard>> {
    let stats = guard.cache.load_stats(Utc::now()).await?;
    Ok(Json(AdminDashboard {
        revenue_change: format_percent(stats.revenue.change_percent),
        transactions_change: format_percent(stats.transactions.change_percent),
        stats,
    }))
}

// =============================================================================
// Tables
// =============================================================================

async fn users(
    guard: Guarded<AdminOnly>,
    Query(fresh): Query<Freshness>,
) -> Result<Json<CollectionView<Profile>>> {
    Ok(Json(load::<Profile>(&guard.cache, fresh.refresh).await?.all()))
}

async fn listings(
    guard: Guarded<AdminOnly>,
    Query(query): Query<ListingQuery>,
    Query(fresh): Query<Freshness>,
) -> Result<Json<CollectionView<Listing>>> {
    let loaded = load::<Listing>(&guard.cache, fresh.refresh).await?;
    Ok(Json(loaded.view(query.apply(loaded.collection.items()))))
}

#[instrument(skip(guard), fields(user_id = %guard.user.id))]
async fn delete_listing(guard: Guarded<AdminOnly>, Path(id): Path<ListingId>) -> Result<StatusCode> {
    guard.cache.delete::<Listing>(id).await?;
    info!("Listing removed by admin");
    Ok(StatusCode::NO_CONTENT)
}

async fn transactions(
    guard: Guarded<AdminOnly>,
    Query(fresh): Query<Freshness>,
) -> Result<Json<CollectionView<Transaction>>> {
    Ok(Json(load::<Transaction>(&guard.cache, fresh.refresh).await?.all()))
}

// =============================================================================
// Bulk request assignment
// =============================================================================

/// A bulk request with the factory it is routed to, if any.
#[derive(Debug, Serialize)]
pub struct AssignedBulkRequest {
    #[serde(flatten)]
    pub request: BulkRequest,
    pub assigned_factory: Option<UserId>,
}

/// Body of an assignment.
#[derive(Debug, Deserialize)]
pub struct AssignmentForm {
    pub factory_id: UserId,
}

async fn bulk_requests(
    State(state): State<AppState>,
    guard: Guarded<AdminOnly>,
    Query(fresh): Query<Freshness>,
) -> Result<Json<CollectionView<AssignedBulkRequest>>> {
    let loaded = load::<BulkRequest>(&guard.cache, fresh.refresh).await?;
    let assignments = state.assignments().all().await?;
    let rows = loaded
        .collection
        .items()
        .iter()
        .map(|request| AssignedBulkRequest {
            assigned_factory: assignments.get(&request.id).copied(),
            request: request.clone(),
        })
        .collect();
    Ok(Json(loaded.view(rows)))
}

#[instrument(skip(state, guard, form), fields(user_id = %guard.user.id, factory_id = %form.factory_id))]
async fn assign_bulk_request(
    State(state): State<AppState>,
    guard: Guarded<AdminOnly>,
    Path(id): Path<BulkRequestId>,
    Json(form): Json<AssignmentForm>,
) -> Result<Json<AssignedBulkRequest>> {
    let (requests, profiles) = tokio::try_join!(
        guard.cache.fetch::<BulkRequest>(),
        guard.cache.fetch::<Profile>(),
    )?;
    let request = requests
        .get(id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("bulk request {id}")))?;
    if request.status != BulkRequestStatus::Open {
        return Err(AppError::BadRequest(
            "only open bulk requests can be assigned".to_string(),
        ));
    }
    match profiles.get(form.factory_id) {
        Some(profile) if profile.role == Some(Role::Factory) => {}
        _ => {
            return Err(AppError::BadRequest(format!(
                "{} is not a factory",
                form.factory_id
            )));
        }
    }

    state.assignments().assign(id, form.factory_id).await?;
    Ok(Json(AssignedBulkRequest {
        request,
        assigned_factory: Some(form.factory_id),
    }))
}

#[instrument(skip(state, guard), fields(user_id = %guard.user.id))]
async fn unassign_bulk_request(
    State(state): State<AppState>,
    guard: Guarded<AdminOnly>,
    Path(id): Path<BulkRequestId>,
) -> Result<StatusCode> {
    match state.assignments().unassign(id).await? {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(AppError::NotFound(format!("assignment of bulk request {id}"))),
    }
}

// =============================================================================
// Reports
// =============================================================================

async fn reports(
    guard: Guarded<AdminOnly>,
    Query(fresh): Query<Freshness>,
) -> Result<Json<CollectionView<Report>>> {
    Ok(Json(load::<Report>(&guard.cache, fresh.refresh).await?.all()))
}

#[instrument(skip(guard, patch), fields(user_id = %guard.user.id))]
async fn update_report(
    guard: Guarded<AdminOnly>,
    Path(id): Path<ReportId>,
    Json(patch): Json<ReportPatch>,
) -> Result<Json<Report>> {
    patch.validate()?;
    Ok(Json(guard.cache.update::<Report>(id, patch).await?))
}

// =============================================================================
// Packages
// =============================================================================

async fn packages(
    guard: Guarded<AdminOnly>,
    Query(fresh): Query<Freshness>,
) -> Result<Json<CollectionView<Package>>> {
    Ok(Json(load::<Package>(&guard.cache, fresh.refresh).await?.all()))
}

#[instrument(skip(guard, draft), fields(user_id = %guard.user.id))]
async fn create_package(
    guard: Guarded<AdminOnly>,
    Json(draft): Json<PackageDraft>,
) -> Result<(StatusCode, Json<Package>)> {
    draft.validate()?;
    let package = guard.cache.add::<Package>(draft).await?;
    Ok((StatusCode::CREATED, Json(package)))
}

#[instrument(skip(guard, patch), fields(user_id = %guard.user.id))]
async fn update_package(
    guard: Guarded<AdminOnly>,
    Path(id): Path<PackageId>,
    Json(patch): Json<PackagePatch>,
) -> Result<Json<Package>> {
    patch.validate()?;
    Ok(Json(guard.cache.update::<Package>(id, patch).await?))
}

#[instrument(skip(guard), fields(user_id = %guard.user.id))]
async fn delete_package(guard: Guarded<AdminOnly>, Path(id): Path<PackageId>) -> Result<StatusCode> {
    guard.cache.delete::<Package>(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
