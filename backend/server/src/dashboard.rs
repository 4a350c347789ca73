//! # Dashboards
//!
//! One read model per role, each built under a single lock hold so the numbers agree with the
//! lists next to them.
//!
//! | route | who | shows |
//! |---|---|---|
//! | `/dashboard/donor` | donor | own offers, predictions, claims against them, totals |
//! | `/dashboard/recipient` | recipient | recommended listings, own claims |
//! | `/dashboard/driver` | driver | unassigned deliveries, own deliveries |
//! | `/dashboard/admin` | admin | marketplace stats |
use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use bank::{
    allocation::Recommendation,
    audit::LedgerStats,
    ledger::{OfferFilter, PredictionFilter},
    lifecycle::ClaimStatus,
    models::{Category, Claim, Offer, Prediction, PublicUser, Role},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{auth::AuthUser, error::AppError, state::AppState, utils::query};

pub const DEFAULT_RECOMMENDATIONS: usize = 10;
pub const MAX_RECOMMENDATIONS: usize = 50;

#[derive(Serialize, Default, Debug, PartialEq)]
pub struct DonorTotals {
    pub listed: u64,
    pub remaining: u64,
    pub claimed: u64,
    pub delivered: u64,
}

#[derive(Serialize)]
pub struct DonorDashboard {
    pub user: PublicUser,
    pub offers: Vec<Offer>,
    pub predictions: Vec<Prediction>,
    pub incoming_claims: Vec<Claim>,
    pub totals: DonorTotals,
}

#[derive(Serialize)]
pub struct RecipientDashboard {
    pub user: PublicUser,
    pub recommendations: Vec<Recommendation>,
    pub claims: Vec<Claim>,
}

#[derive(Serialize)]
pub struct DriverDashboard {
    pub user: PublicUser,
    pub open: Vec<Claim>,
    pub assigned: Vec<Claim>,
}

#[derive(Serialize)]
pub struct AdminDashboard {
    pub user: PublicUser,
    pub stats: LedgerStats,
}

#[derive(Deserialize)]
pub struct RecommendQuery {
    pub category: Option<Category>,
    pub limit: Option<usize>,
}

fn totals(offers: &[Offer], claims: &[Claim]) -> DonorTotals {
    let mut totals = DonorTotals::default();

    for offer in offers {
        totals.listed += u64::from(offer.quantity);
        totals.remaining += u64::from(offer.remaining);
    }

    for claim in claims.iter().filter(|c| c.is_live()) {
        totals.claimed += u64::from(claim.quantity);

        if claim.status == ClaimStatus::Delivered {
            totals.delivered += u64::from(claim.quantity);
        }
    }

    totals
}

pub async fn donor_dashboard_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<DonorDashboard>, AppError> {
    auth.require(Role::Donor)?;
    let donor_id = auth.id().to_string();

    let dashboard = state
        .store
        .read(|ledger| {
            let offers: Vec<Offer> = ledger
                .offers(&OfferFilter {
                    donor_id: Some(donor_id.clone()),
                    ..Default::default()
                })
                .into_iter()
                .cloned()
                .collect();
            let predictions = ledger
                .predictions(&PredictionFilter {
                    donor_id: Some(donor_id.clone()),
                    ..Default::default()
                })
                .into_iter()
                .cloned()
                .collect();
            let incoming_claims: Vec<Claim> = ledger
                .claims_on_donor(&donor_id)
                .into_iter()
                .cloned()
                .collect();

            DonorDashboard {
                user: PublicUser::from(&auth.user),
                totals: totals(&offers, &incoming_claims),
                offers,
                predictions,
                incoming_claims,
            }
        })
        .await;

    Ok(Json(dashboard))
}

pub async fn recipient_dashboard_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    params: Result<Query<RecommendQuery>, QueryRejection>,
) -> Result<Json<RecipientDashboard>, AppError> {
    auth.require(Role::Recipient)?;
    let params = query(params)?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_RECOMMENDATIONS)
        .min(MAX_RECOMMENDATIONS);
    let now = Utc::now();

    let dashboard = state
        .store
        .read(|ledger| RecipientDashboard {
            user: PublicUser::from(&auth.user),
            recommendations: ledger.recommend(auth.id(), params.category, limit, now),
            claims: ledger
                .claims_by_recipient(auth.id())
                .into_iter()
                .cloned()
                .collect(),
        })
        .await;

    Ok(Json(dashboard))
}

pub async fn driver_dashboard_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<DriverDashboard>, AppError> {
    auth.require(Role::Driver)?;

    let dashboard = state
        .store
        .read(|ledger| DriverDashboard {
            user: PublicUser::from(&auth.user),
            open: ledger.open_deliveries().into_iter().cloned().collect(),
            assigned: ledger
                .claims_by_driver(auth.id())
                .into_iter()
                .filter(|c| matches!(c.status, ClaimStatus::Claimed | ClaimStatus::InTransit))
                .cloned()
                .collect(),
        })
        .await;

    Ok(Json(dashboard))
}

pub async fn admin_dashboard_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AdminDashboard>, AppError> {
    auth.require(Role::Admin)?;
    let now = Utc::now();

    let stats = state.store.read(|ledger| ledger.stats(now)).await;

    Ok(Json(AdminDashboard {
        user: PublicUser::from(&auth.user),
        stats,
    }))
}
