use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};
use bank::{
    LedgerError,
    geo::{Route, plan_route},
    lifecycle::DonationStatus,
    models::{Claim, ListingRef, Location, Offer, OfferSource, Prediction, PublicUser, Role},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    auth::AuthUser,
    error::AppError,
    state::AppState,
    utils::{ClaimRequest, ConfirmQuery, GenerateRequest, OfferRequest, PredictionRequest, payload, query},
};

#[derive(Serialize)]
pub struct CancelResponse {
    pub id: String,
    pub previous: DonationStatus,
    pub status: DonationStatus,
}

#[derive(Serialize)]
pub struct SweepResponse {
    pub expired: usize,
    pub sessions_pruned: usize,
}

#[derive(Deserialize)]
pub struct RouteQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

pub async fn health_handler() -> &'static str {
    "ok"
}

// Listings

async fn create_offer(
    state: &AppState,
    auth: &AuthUser,
    request: OfferRequest,
    source: OfferSource,
) -> Result<(StatusCode, Json<Offer>), AppError> {
    auth.require(Role::Donor)?;
    let now = Utc::now();

    let offer = state
        .store
        .write(|ledger| {
            let new = request.into_new_offer(source, now)?;
            ledger.create_offer(auth.id(), new, now)
        })
        .await?;

    Ok((StatusCode::CREATED, Json(offer)))
}

pub async fn create_offer_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    body: Result<Json<OfferRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    create_offer(&state, &auth, payload(body)?, OfferSource::Direct).await
}

pub async fn create_surplus_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    body: Result<Json<OfferRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    create_offer(&state, &auth, payload(body)?, OfferSource::Surplus).await
}

async fn cancel_listing(
    state: &AppState,
    auth: &AuthUser,
    listing: ListingRef,
) -> Result<Json<CancelResponse>, AppError> {
    let now = Utc::now();

    let previous = state
        .store
        .write(|ledger| ledger.cancel_listing(auth.id(), &listing, now))
        .await?;

    Ok(Json(CancelResponse {
        id: listing.id,
        previous,
        status: DonationStatus::Cancelled,
    }))
}

pub async fn cancel_offer_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    cancel_listing(&state, &auth, ListingRef::offer(id)).await
}

pub async fn cancel_prediction_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    cancel_listing(&state, &auth, ListingRef::prediction(id)).await
}

pub async fn create_prediction_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    body: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = payload(body)?;
    auth.require(Role::Donor)?;
    let now = Utc::now();

    let prediction = state
        .store
        .write(|ledger| ledger.create_prediction(auth.id(), request.into(), now))
        .await?;

    Ok((StatusCode::CREATED, Json(prediction)))
}

/// Model call happens between two short lock holds, never under one.
pub async fn generate_prediction_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = payload(body)?;
    auth.require(Role::Donor)?;
    let now = Utc::now();
    let date = request.for_date.unwrap_or_else(|| now.date_naive());

    let forecast_request = state
        .store
        .read(|ledger| process::request_for(ledger, auth.id(), request.category, date))
        .await;

    let forecast = state.forecaster.forecast(&forecast_request).await?;

    let prediction: Prediction = state
        .store
        .write(|ledger| process::record(ledger, &forecast_request, forecast, now))
        .await?;

    Ok((StatusCode::CREATED, Json(prediction)))
}

pub async fn confirm_prediction_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
    params: Result<Query<ConfirmQuery>, QueryRejection>,
) -> Result<Json<Prediction>, AppError> {
    let quantity = query(params)?.quantity;
    let now = Utc::now();

    let prediction = state
        .store
        .write(|ledger| ledger.confirm_prediction(auth.id(), &id, quantity, now))
        .await?;

    Ok(Json(prediction))
}

// Claims

pub async fn create_claim_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    body: Result<Json<ClaimRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = payload(body)?;
    let listing = request.listing();
    let now = Utc::now();

    let claim = state
        .store
        .write(|ledger| ledger.claim(auth.id(), &listing, request.quantity, now))
        .await?;

    #[cfg(feature = "verbose")]
    info!("Claim {} on {:?} {}", claim.id, listing.kind, listing.id);

    Ok((StatusCode::CREATED, Json(claim)))
}

/// Recipients see their own claims, donors the claims on their listings, drivers their
/// deliveries, admins everything.
pub async fn list_claims_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Json<Vec<Claim>> {
    let claims = state
        .store
        .read(|ledger| {
            let claims = match auth.user.role {
                Role::Recipient => ledger.claims_by_recipient(auth.id()),
                Role::Donor => ledger.claims_on_donor(auth.id()),
                Role::Driver => ledger.claims_by_driver(auth.id()),
                Role::Admin => ledger.claims().collect(),
            };

            claims.into_iter().cloned().collect()
        })
        .await;

    Json(claims)
}

pub async fn cancel_claim_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Claim>, AppError> {
    let now = Utc::now();

    let claim = state
        .store
        .write(|ledger| ledger.cancel_claim(auth.id(), &id, now))
        .await?;

    Ok(Json(claim))
}

pub async fn accept_claim_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Claim>, AppError> {
    let now = Utc::now();

    let claim = state
        .store
        .write(|ledger| ledger.accept_delivery(auth.id(), &id, now))
        .await?;

    Ok(Json(claim))
}

pub async fn pickup_claim_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Claim>, AppError> {
    let now = Utc::now();

    let claim = state
        .store
        .write(|ledger| ledger.pickup(auth.id(), &id, now))
        .await?;

    Ok(Json(claim))
}

pub async fn deliver_claim_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Claim>, AppError> {
    let now = Utc::now();

    let claim = state
        .store
        .write(|ledger| ledger.deliver(auth.id(), &id, now))
        .await?;

    Ok(Json(claim))
}

// Deliveries

pub async fn open_deliveries_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<Claim>>, AppError> {
    auth.require_any(&[Role::Driver, Role::Admin])?;

    let open = state
        .store
        .read(|ledger| ledger.open_deliveries().into_iter().cloned().collect())
        .await;

    Ok(Json(open))
}

/// Starts from `?lat=&lng=` when given, the driver's profile location otherwise.
pub async fn delivery_route_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    params: Result<Query<RouteQuery>, QueryRejection>,
) -> Result<Json<Route>, AppError> {
    auth.require(Role::Driver)?;
    let params = query(params)?;

    let start = match (params.lat, params.lng) {
        (Some(lat), Some(lng)) => Location::new(lat, lng),
        (None, None) => auth.user.location.clone().ok_or_else(|| {
            LedgerError::InvalidInput("no start position: pass lat and lng".into())
        })?,
        _ => {
            return Err(LedgerError::InvalidInput("lat and lng go together".into()).into());
        }
    };

    if !start.is_valid() {
        return Err(LedgerError::InvalidInput("coordinates out of range".into()).into());
    }

    let errands = state
        .store
        .read(|ledger| ledger.errands_for_driver(auth.id()))
        .await;

    Ok(Json(plan_route(&start, &errands)))
}

// Admin

pub async fn expire_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<SweepResponse>, AppError> {
    auth.require(Role::Admin)?;

    let response = sweep(&state).await?;
    info!(
        "Admin {} swept: {} expired, {} sessions pruned",
        auth.id(),
        response.expired,
        response.sessions_pruned
    );

    Ok(Json(response))
}

pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<PublicUser>>, AppError> {
    auth.require(Role::Admin)?;

    let users = state
        .store
        .read(|ledger| ledger.users().map(PublicUser::from).collect())
        .await;

    Ok(Json(users))
}

/// Expire stale listings and drop dead sessions in one write.
pub async fn sweep(state: &AppState) -> Result<SweepResponse, AppError> {
    let now = Utc::now();

    state
        .store
        .write(|ledger| {
            Ok::<_, LedgerError>(SweepResponse {
                expired: ledger.expire_stale(now)?,
                sessions_pruned: ledger.prune_sessions(now),
            })
        })
        .await
}
