//! # Browse
//!
//! Read-only listing queries: the offers table, the surplus inventory, predictions, the map.
//!
//! ## Filters
//! - `status`: any lifecycle status (`available`, `claimed`, ...)
//! - `category`: lenient, `bread` finds bakery
//! - `mine=true`: only the caller's own listings
//!
//! ## Map
//! `GET /offers/map?lat=&lng=&radius_km=` returns claimable offers with a pin inside the radius,
//! nearest first. Radius defaults to [`DEFAULT_RADIUS_KM`] and is capped at [`MAX_RADIUS_KM`].
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
};
use bank::{
    LedgerError,
    allocation::NearbyOffer,
    ledger::{OfferFilter, PredictionFilter},
    lifecycle::DonationStatus,
    models::{Category, Location, Offer, OfferSource, Prediction},
};
use chrono::Utc;
use serde::Deserialize;

use crate::{auth::AuthUser, error::AppError, state::AppState, utils::query};

pub const DEFAULT_RADIUS_KM: f64 = 10.0;
pub const MAX_RADIUS_KM: f64 = 200.0;

#[derive(Deserialize)]
pub struct ListingQuery {
    pub status: Option<DonationStatus>,
    pub category: Option<Category>,
    #[serde(default)]
    pub mine: bool,
}

#[derive(Deserialize)]
pub struct MapQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: Option<f64>,
}

impl MapQuery {
    fn center(&self) -> Result<Location, LedgerError> {
        let center = Location::new(self.lat, self.lng);
        if !center.is_valid() {
            return Err(LedgerError::InvalidInput("coordinates out of range".into()));
        }

        Ok(center)
    }

    fn radius(&self) -> Result<f64, LedgerError> {
        match self.radius_km {
            None => Ok(DEFAULT_RADIUS_KM),
            Some(r) if r.is_finite() && r > 0.0 => Ok(r.min(MAX_RADIUS_KM)),
            Some(_) => Err(LedgerError::InvalidInput("radius_km must be positive".into())),
        }
    }
}

fn offer_filter(auth: &AuthUser, params: ListingQuery, source: Option<OfferSource>) -> OfferFilter {
    OfferFilter {
        status: params.status,
        category: params.category,
        donor_id: params.mine.then(|| auth.id().to_string()),
        source,
    }
}

pub async fn list_offers_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    params: Result<Query<ListingQuery>, QueryRejection>,
) -> Result<Json<Vec<Offer>>, AppError> {
    let filter = offer_filter(&auth, query(params)?, None);

    let offers = state
        .store
        .read(|ledger| ledger.offers(&filter).into_iter().cloned().collect())
        .await;

    Ok(Json(offers))
}

pub async fn list_surplus_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    params: Result<Query<ListingQuery>, QueryRejection>,
) -> Result<Json<Vec<Offer>>, AppError> {
    let filter = offer_filter(&auth, query(params)?, Some(OfferSource::Surplus));

    let offers = state
        .store
        .read(|ledger| ledger.offers(&filter).into_iter().cloned().collect())
        .await;

    Ok(Json(offers))
}

pub async fn get_offer_handler(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Offer>, AppError> {
    let offer = state
        .store
        .read(|ledger| ledger.offer(&id).cloned())
        .await?;

    Ok(Json(offer))
}

pub async fn map_offers_handler(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    params: Result<Query<MapQuery>, QueryRejection>,
) -> Result<Json<Vec<NearbyOffer>>, AppError> {
    let params = query(params)?;
    let center = params.center()?;
    let radius = params.radius()?;
    let now = Utc::now();

    let nearby = state
        .store
        .read(|ledger| ledger.offers_near(&center, radius, now))
        .await;

    #[cfg(feature = "verbose")]
    tracing::info!("Map query at {},{} r={radius} -> {}", center.lat, center.lng, nearby.len());

    Ok(Json(nearby))
}

pub async fn list_predictions_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    params: Result<Query<ListingQuery>, QueryRejection>,
) -> Result<Json<Vec<Prediction>>, AppError> {
    let params = query(params)?;
    let filter = PredictionFilter {
        status: params.status,
        category: params.category,
        donor_id: params.mine.then(|| auth.id().to_string()),
    };

    let predictions = state
        .store
        .read(|ledger| ledger.predictions(&filter).into_iter().cloned().collect())
        .await;

    Ok(Json(predictions))
}
